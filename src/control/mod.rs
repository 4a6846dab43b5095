//! Execution control.
//!
//! [`ExecutionController`] owns the machine and drives it in one of three
//! modes: single step, run to completion (synchronous, on the caller's
//! thread) or run to breakpoint (on a worker thread, paced by a delay).
//!
//! The machine sits behind a mutex that is held for exactly one cycle at a
//! time, so readers on other threads always see it between instructions.
//! Pause and stop requests are atomic flags checked at the same boundaries.

use crate::cpu::register::parse_literal;
use crate::cpu::{CpuError, LiteralError, Machine, MachineState, OutputRecord};
use crate::program::{self, LoadError, ProgramImage, ProgramSource};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use thiserror::Error;
use tracing::{event, Level};

/// Shortest pause between instructions when running to a breakpoint.
pub const MINIMUM_DELAY: Duration = Duration::from_millis(10);

/// How the controller is driving the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunMode {
    SingleStep,
    RunToCompletion,
    RunToBreakpoint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Pause between instructions in run-to-breakpoint mode. Never below
    /// [`MINIMUM_DELAY`].
    delay: Duration,
    /// Pause a run-to-completion after this many cycles. Each run, resume
    /// or restart gets a fresh budget.
    pub cycle_limit: Option<u64>,
}

impl ControllerConfig {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay: delay.max(MINIMUM_DELAY),
            cycle_limit: None,
        }
    }

    pub fn with_cycle_limit(mut self, limit: u64) -> Self {
        self.cycle_limit = Some(limit);
        self
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay.max(MINIMUM_DELAY);
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::new(MINIMUM_DELAY)
    }
}

#[derive(Debug, Default)]
struct RunFlags {
    pause: AtomicBool,
    stop: AtomicBool,
}

impl RunFlags {
    fn clear(&self) {
        self.pause.store(false, Ordering::SeqCst);
        self.stop.store(false, Ordering::SeqCst);
    }
}

/// A cloneable handle for asking a running machine to pause or stop from
/// another thread. Requests take effect at the next instruction boundary.
///
/// A machine blocked on input has no boundary to reach: a stop sent through
/// the handle is honored when input is next supplied, in place of that
/// input. Use [`ExecutionController::request_stop`] to cancel a blocked
/// input at once.
#[derive(Debug, Clone)]
pub struct ControlHandle {
    flags: Arc<RunFlags>,
}

impl ControlHandle {
    pub fn request_pause(&self) {
        self.flags.pause.store(true, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.flags.stop.store(true, Ordering::SeqCst);
    }
}

fn lock(machine: &Mutex<Machine>) -> MutexGuard<'_, Machine> {
    machine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of checking the flags at an instruction boundary.
fn observe_flags(machine: &mut Machine, flags: &RunFlags) -> bool {
    if flags.stop.swap(false, Ordering::SeqCst) {
        machine.stop_by_user();
        return false;
    }
    if flags.pause.swap(false, Ordering::SeqCst) {
        machine.pause();
        return false;
    }
    machine.is_running()
}

/// After a cycle, pause if the line just executed carries a breakpoint.
fn pause_at_breakpoint(machine: &mut Machine) -> bool {
    let hit = machine.is_running()
        && machine
            .executed_line()
            .is_some_and(|row| machine.program().has_breakpoint(row));
    if hit {
        event!(Level::INFO, line = ?machine.executed_line(), "breakpoint");
        machine.pause();
    }
    hit
}

fn breakpoint_loop(machine: &Mutex<Machine>, flags: &RunFlags, delay: Duration) {
    loop {
        {
            let mut m = lock(machine);
            if !observe_flags(&mut m, flags) {
                break;
            }
            m.cycle();
            if !m.is_running() || pause_at_breakpoint(&mut m) {
                break;
            }
        }
        thread::sleep(delay);
    }
}

pub struct ExecutionController {
    machine: Arc<Mutex<Machine>>,
    config: ControllerConfig,
    mode: RunMode,
    flags: Arc<RunFlags>,
    worker: Option<JoinHandle<()>>,
    /// Machine cycle count when the current run started.
    run_start: u64,
}

impl ExecutionController {
    pub fn new(config: ControllerConfig) -> Self {
        Self {
            machine: Arc::new(Mutex::new(Machine::new())),
            config,
            mode: RunMode::SingleStep,
            flags: Arc::default(),
            worker: None,
            run_start: 0,
        }
    }

    /// Lock the machine for inspection. Hold the guard briefly: a running
    /// worker waits on it between instructions.
    pub fn machine(&self) -> MutexGuard<'_, Machine> {
        lock(&self.machine)
    }

    pub fn state(&self) -> MachineState {
        self.machine().state()
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.config.set_delay(delay);
    }

    pub fn handle(&self) -> ControlHandle {
        ControlHandle {
            flags: Arc::clone(&self.flags),
        }
    }

    /// Whether a run-to-breakpoint worker is still executing.
    pub fn is_busy(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Wait for the worker, if any, and return the resulting state.
    pub fn wait(&mut self) -> MachineState {
        self.join_worker();
        self.state()
    }

    fn join_worker(&mut self) {
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                event!(Level::ERROR, "execution worker panicked");
            }
        }
    }

    fn ensure_idle(&mut self) -> Result<(), ControlError> {
        if self.is_busy() {
            return Err(ControlError::Busy);
        }
        self.join_worker();
        Ok(())
    }

    pub fn load(&mut self, image: &ProgramImage) -> Result<(), ControlError> {
        self.ensure_idle()?;
        program::load(&mut self.machine(), image)?;
        Ok(())
    }

    pub fn load_file(&mut self, source: &ProgramSource) -> Result<(), ControlError> {
        self.ensure_idle()?;
        program::load_file(&mut self.machine(), source)?;
        Ok(())
    }

    /// Bring the machine into `Running` for a new step or run. Halted
    /// machines restart from the first line.
    fn prepare(&mut self, mode: RunMode) -> Result<(), ControlError> {
        self.ensure_idle()?;
        let mut m = self.machine();
        match m.state() {
            MachineState::Uninitialized | MachineState::NoProgramLoaded => {
                return Err(ControlError::NoProgramLoaded)
            }
            MachineState::BlockedOnInput => return Err(ControlError::AwaitingInput),
            MachineState::HaltedNormal | MachineState::HaltedAbnormal | MachineState::HaltedByUser => {
                m.restart()
            }
            MachineState::Paused => m.set_state(MachineState::Running),
            MachineState::Running => {}
        }
        let run_start = m.cycles();
        drop(m);
        self.run_start = run_start;
        self.flags.clear();
        self.mode = mode;
        event!(Level::DEBUG, ?mode, "execution started");
        Ok(())
    }

    /// Execute exactly one instruction.
    pub fn step(&mut self) -> Result<MachineState, ControlError> {
        self.prepare(RunMode::SingleStep)?;
        let mut m = self.machine();
        m.cycle();
        Ok(m.state())
    }

    /// Run on the calling thread until the machine leaves `Running`.
    ///
    /// Returns the state it stopped in; `BlockedOnInput` means the caller
    /// must supply a value, after which the run continues.
    pub fn run(&mut self) -> Result<MachineState, ControlError> {
        self.prepare(RunMode::RunToCompletion)?;
        Ok(self.run_loop())
    }

    fn run_loop(&self) -> MachineState {
        loop {
            let mut m = lock(&self.machine);
            if !observe_flags(&mut m, &self.flags) {
                return m.state();
            }
            if let Some(limit) = self.config.cycle_limit {
                if m.cycles().saturating_sub(self.run_start) >= limit {
                    event!(Level::WARN, limit, "cycle limit reached");
                    m.pause();
                    return m.state();
                }
            }
            m.cycle();
        }
    }

    /// Start running on a worker thread, pausing after any line with a
    /// breakpoint.
    pub fn run_to_breakpoint(&mut self) -> Result<(), ControlError> {
        self.prepare(RunMode::RunToBreakpoint)?;
        self.spawn_worker();
        Ok(())
    }

    fn spawn_worker(&mut self) {
        let machine = Arc::clone(&self.machine);
        let flags = Arc::clone(&self.flags);
        let delay = self.config.delay();
        self.worker = Some(thread::spawn(move || breakpoint_loop(&machine, &flags, delay)));
    }

    /// Continue a paused machine in the mode that paused it.
    pub fn resume(&mut self) -> Result<MachineState, ControlError> {
        let state = self.state();
        if state != MachineState::Paused {
            return Err(ControlError::NotPaused(state));
        }
        match self.mode {
            RunMode::SingleStep => self.step(),
            RunMode::RunToCompletion => self.run(),
            RunMode::RunToBreakpoint => {
                self.run_to_breakpoint()?;
                Ok(MachineState::Running)
            }
        }
    }

    /// Complete a pending INPUT instruction and resume the current mode.
    pub fn supply_input(&mut self, value: i32) -> Result<MachineState, ControlError> {
        let state = self.state();
        if state != MachineState::BlockedOnInput {
            return Err(ControlError::NotBlockedOnInput(state));
        }
        // A blocked worker has already left its loop.
        self.join_worker();
        if self.flags.stop.swap(false, Ordering::SeqCst) {
            self.machine().stop_by_user();
            return Ok(MachineState::HaltedByUser);
        }
        {
            let mut m = self.machine();
            m.complete_input(value);
            event!(Level::DEBUG, value, "input supplied");
        }

        match self.mode {
            RunMode::SingleStep => Ok(self.state()),
            RunMode::RunToCompletion => Ok(self.run_loop()),
            RunMode::RunToBreakpoint => {
                if pause_at_breakpoint(&mut self.machine()) {
                    return Ok(MachineState::Paused);
                }
                self.spawn_worker();
                Ok(MachineState::Running)
            }
        }
    }

    /// Parse `literal` in the INPUT register's mode and supply it. A bad
    /// literal is reported and the machine stays blocked.
    pub fn supply_input_literal(&mut self, literal: &str) -> Result<MachineState, ControlError> {
        let mode = self.machine().regs.input.mode();
        let value = parse_literal(mode, literal)?;
        self.supply_input(value)
    }

    /// Give up on a pending INPUT instruction, halting abnormally with `err`.
    pub fn abort_input(&mut self, err: CpuError) -> Result<(), ControlError> {
        let mut m = self.machine();
        let state = m.state();
        if state != MachineState::BlockedOnInput {
            return Err(ControlError::NotBlockedOnInput(state));
        }
        m.raise(err);
        Ok(())
    }

    /// Ask a running machine to pause at the next instruction boundary.
    pub fn request_pause(&self) {
        let mut m = self.machine();
        if m.is_running() {
            if self.is_busy() {
                self.flags.pause.store(true, Ordering::SeqCst);
            } else {
                m.pause();
            }
        }
    }

    /// Stop the machine. Idle machines stop at once; a worker stops at the
    /// next instruction boundary.
    pub fn request_stop(&self) {
        let mut m = self.machine();
        match m.state() {
            MachineState::Running if self.is_busy() => self.flags.stop.store(true, Ordering::SeqCst),
            MachineState::Running | MachineState::Paused | MachineState::BlockedOnInput => {
                m.stop_by_user()
            }
            _ => {}
        }
    }

    pub fn set_breakpoint(&self, address: u16, enabled: bool) -> Result<(), ControlError> {
        if self.machine().program_mut().set_breakpoint(address, enabled) {
            Ok(())
        } else {
            Err(ControlError::NotAProgramLine(address))
        }
    }

    pub fn toggle_breakpoint(&self, address: u16) -> Result<bool, ControlError> {
        self.machine()
            .program_mut()
            .toggle_breakpoint(address)
            .ok_or(ControlError::NotAProgramLine(address))
    }

    pub fn clear_breakpoints(&self) {
        self.machine().program_mut().clear_breakpoints();
    }

    pub fn breakpoints(&self) -> Vec<u16> {
        self.machine().program().breakpoints()
    }

    pub fn drain_output(&self) -> Vec<OutputRecord> {
        self.machine().drain_output()
    }
}

impl Default for ExecutionController {
    fn default() -> Self {
        Self::new(ControllerConfig::default())
    }
}

impl Drop for ExecutionController {
    fn drop(&mut self) {
        if self.is_busy() {
            self.flags.stop.store(true, Ordering::SeqCst);
        }
        self.join_worker();
    }
}

/// Misuse of the controller. None of these change the machine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("no program loaded")]
    NoProgramLoaded,

    #[error("machine is running")]
    Busy,

    #[error("machine is waiting for input")]
    AwaitingInput,

    #[error("machine is not waiting for input ({0})")]
    NotBlockedOnInput(MachineState),

    #[error("machine is not paused ({0})")]
    NotPaused(MachineState),

    #[error("no program line at address {0:03X}")]
    NotAProgramLine(u16),

    #[error(transparent)]
    Literal(#[from] LiteralError),

    #[error(transparent)]
    Load(#[from] LoadError),
}
