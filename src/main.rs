//! MARIE Simulator - CLI Entry Point
//!
//! Commands:
//! - `marie-sim run <program>` - Load a `.mex` image and run it to completion
//! - `marie-sim list <program>` - Print the program listing

use clap::{Parser, Subcommand};
use marie::cpu::decode::disassemble;
use marie::cpu::register::render_word;
use marie::{
    ControllerConfig, CpuError, DisplayMode, ExecutionController, MachineState, ProgramSource,
};
use std::io::{self, BufRead, Write};
use std::process;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "marie-sim")]
#[command(version)]
#[command(about = "A simulator for the MARIE accumulator machine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Program image (`.mex`), with or without its extension
        program: String,
        /// How INPUT values read from stdin are parsed: hex, dec or ascii
        #[arg(long, default_value = "dec")]
        input_mode: DisplayMode,
        /// How OUTPUT values are printed: hex, dec or ascii
        #[arg(long, default_value = "dec")]
        output_mode: DisplayMode,
        /// Print output values without a line break after each
        #[arg(long)]
        no_linefeeds: bool,
        /// Trace each instruction to stderr
        #[arg(short, long)]
        trace: bool,
        /// Write a core dump (`.dmp`) next to the program when it stops
        #[arg(long)]
        dump: bool,
        /// Stop after this many instructions
        #[arg(long)]
        max_cycles: Option<u64>,
    },
    /// Print the loaded program with its disassembly
    List {
        /// Program image (`.mex`), with or without its extension
        program: String,
    },
}

struct RunOptions {
    input_mode: DisplayMode,
    output_mode: DisplayMode,
    linefeeds: bool,
    trace: bool,
    dump: bool,
    max_cycles: Option<u64>,
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    match cli.command {
        Commands::Run {
            program,
            input_mode,
            output_mode,
            no_linefeeds,
            trace,
            dump,
            max_cycles,
        } => {
            let options = RunOptions {
                input_mode,
                output_mode,
                linefeeds: !no_linefeeds,
                trace,
                dump,
                max_cycles,
            };
            run_program(&program, &options);
        }
        Commands::List { program } => list_program(&program),
    }
}

/// Diagnostics go to stderr, filtered by `RUST_LOG` (default `warn`).
fn init_logging() {
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_writer(io::stderr);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}

fn load_or_exit(path: &str, config: ControllerConfig) -> (ExecutionController, ProgramSource) {
    let source = ProgramSource::new(path);
    let mut ctl = ExecutionController::new(config);
    if let Err(e) = ctl.load_file(&source) {
        eprintln!("Failed to load {}: {}", source.image_path().display(), e);
        process::exit(1);
    }
    (ctl, source)
}

fn run_program(path: &str, options: &RunOptions) {
    let config = match options.max_cycles {
        Some(limit) => ControllerConfig::default().with_cycle_limit(limit),
        None => ControllerConfig::default(),
    };
    let (mut ctl, source) = load_or_exit(path, config);
    {
        let mut m = ctl.machine();
        m.regs.input.set_mode(options.input_mode);
        m.regs.output.set_mode(options.output_mode);
    }

    let stdin = io::stdin();
    let mut lines = stdin.lock().lines();
    let run_start = ctl.machine().cycles();
    let mut state = start(&mut ctl, options, run_start);

    loop {
        print_output(&ctl, options.linefeeds);
        match state {
            MachineState::BlockedOnInput => {
                state = match lines.next() {
                    Some(Ok(line)) => match ctl.supply_input_literal(&line) {
                        Ok(next) => next,
                        Err(e) => abort(&mut ctl, CpuError::InvalidRegisterValue(e.to_string())),
                    },
                    Some(Err(e)) => abort(&mut ctl, CpuError::InvalidRegisterValue(e.to_string())),
                    None => abort(
                        &mut ctl,
                        CpuError::InvalidRegisterValue("end of input".to_string()),
                    ),
                };
            }
            MachineState::Running if options.trace => state = traced_step(&mut ctl, options, run_start),
            _ => break,
        }
    }
    if !options.linefeeds {
        println!();
    }

    if options.dump {
        let dump_path = source.dump_path();
        if let Err(e) = std::fs::write(&dump_path, ctl.machine().core_dump()) {
            eprintln!("Failed to write {}: {}", dump_path.display(), e);
            process::exit(1);
        }
    }

    let m = ctl.machine();
    match state {
        MachineState::HaltedAbnormal => {
            let message = m.error_code().map_or("unknown error", |code| code.message());
            println!("Machine halted abnormally.  Error: {}", message);
            if let Some(fault) = m.fault() {
                eprintln!("{}", fault);
            }
            process::exit(2);
        }
        MachineState::Paused => {
            eprintln!("Stopped after {} cycles.", m.cycles());
            process::exit(3);
        }
        _ => {}
    }
}

fn start(ctl: &mut ExecutionController, options: &RunOptions, run_start: u64) -> MachineState {
    let result = if options.trace {
        Ok(traced_step(ctl, options, run_start))
    } else {
        ctl.run()
    };
    result.unwrap_or_else(|e| {
        eprintln!("Cannot run: {}", e);
        process::exit(1);
    })
}

/// Step one instruction, tracing it to stderr. The cycle limit counts from
/// `run_start`, as it does for an untraced run.
fn traced_step(ctl: &mut ExecutionController, options: &RunOptions, run_start: u64) -> MachineState {
    let (pc, word) = {
        let m = ctl.machine();
        if options
            .max_cycles
            .is_some_and(|limit| m.cycles().saturating_sub(run_start) >= limit)
        {
            drop(m);
            ctl.request_pause();
            return ctl.state();
        }
        let pc = m.regs.pc.value();
        (pc, m.mem.read(i32::from(pc)).unwrap_or(0))
    };

    let state = ctl.step().unwrap_or_else(|e| {
        eprintln!("Cannot step: {}", e);
        process::exit(1);
    });
    let m = ctl.machine();
    eprintln!(
        "{:03X}  {:<14} AC={}",
        pc,
        disassemble(word),
        render_word(m.regs.ac.value(), DisplayMode::Hex, false)
    );
    state
}

fn abort(ctl: &mut ExecutionController, err: CpuError) -> MachineState {
    if let Err(e) = ctl.abort_input(err) {
        eprintln!("{}", e);
    }
    ctl.state()
}

fn print_output(ctl: &ExecutionController, linefeeds: bool) {
    let records = ctl.drain_output();
    if records.is_empty() {
        return;
    }
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in records {
        let written = if linefeeds {
            writeln!(out, "{}", record)
        } else {
            write!(out, "{}", record)
        };
        if written.is_err() {
            process::exit(1);
        }
    }
    let _ = out.flush();
}

fn list_program(path: &str) {
    let (ctl, source) = load_or_exit(path, ControllerConfig::default());
    let m = ctl.machine();

    println!("{}: {} lines", source.name(), m.program().len());
    println!();
    for line in m.program().lines() {
        println!(
            "{:03X}  {:04X}  {:<10} {:<9} {:<10} ; {}",
            line.address,
            line.word as u16,
            line.label,
            line.mnemonic,
            line.operand_token,
            disassemble(line.word)
        );
    }
    println!();
    if source.has_symbol_table() {
        println!("Symbol table: {}", source.symbol_table_path().display());
    } else {
        println!("Symbol table: none");
    }
}
