//! CPU execution engine for MARIE.
//!
//! Implements the fetch-decode-execute cycle, all instruction behaviors and
//! the state transitions they drive.

use crate::cpu::decode::{self, Condition, Opcode};
use crate::cpu::machine::{Machine, OutputRecord};
use crate::cpu::memory::MAX_ADDRESS;
use crate::cpu::state::{CpuError, MachineState};
use tracing::{event, Level};

impl Machine {
    /// Run one fetch-decode-execute cycle.
    ///
    /// Returns the opcode that was executed, or `None` if the machine was not
    /// running or the fetch stage faulted. Faults never escape as errors: they
    /// halt the machine abnormally and are available from [`Machine::fault`].
    pub fn cycle(&mut self) -> Option<Opcode> {
        if self.state != MachineState::Running {
            return None;
        }
        if self.fault.is_some() {
            self.halt();
            return None;
        }

        let opcode = match self.fetch() {
            Ok(op) => op,
            Err(err) => {
                self.raise(err);
                return None;
            }
        };

        if let Err(err) = self.execute(opcode) {
            self.raise(err);
        }

        self.cycles += 1;
        self.last_opcode = Some(opcode);
        Some(opcode)
    }

    /// Fetch and decode the instruction at PC, loading MAR/MBR for
    /// operand-requiring opcodes and advancing PC.
    fn fetch(&mut self) -> Result<Opcode, CpuError> {
        self.regs.mar.set_value(i32::from(self.regs.pc.value()));
        let address = self.regs.mar.value() as u16;
        let word = self.mem.read(i32::from(address))?;
        self.regs.ir.set_value(i32::from(word));

        self.executed_line = self.program.row_of(address);
        if self.executed_line.is_some() {
            self.cursor = self.executed_line;
        }

        let opcode = decode::decode(word).map_err(|e| CpuError::from_decode(e, address))?;

        if opcode.requires_operand() {
            self.regs.mar.set_value(i32::from(decode::operand(word)));
            let value = self.mem.read(i32::from(self.regs.mar.value()))?;
            self.regs.mbr.set_value(i32::from(value));
        }

        let next = i32::from(self.regs.pc.value()) + 1;
        if next > MAX_ADDRESS {
            return Err(CpuError::MaxProgramReached);
        }
        self.regs.pc.set_value(next);

        Ok(opcode)
    }

    /// Execute a decoded instruction.
    fn execute(&mut self, opcode: Opcode) -> Result<(), CpuError> {
        let ir = self.regs.ir.value();

        match opcode {
            Opcode::JnS => {
                self.regs.mbr.set_value(i32::from(self.regs.pc.value()));
                self.regs.mar.set_value(i32::from(decode::operand(ir)));
                self.mem
                    .write(i32::from(self.regs.mar.value()), self.regs.mbr.value())?;
                self.regs.mbr.set_value(i32::from(self.regs.mar.value()));
                self.regs.ac.set_value(i32::from(self.regs.mbr.value()) + 1);
                self.regs.pc.set_value(i32::from(self.regs.ac.value()));
            }

            Opcode::Load => {
                self.regs.ac.set_value(i32::from(self.regs.mbr.value()));
            }

            Opcode::Store => {
                self.regs.mbr.set_value(i32::from(self.regs.ac.value()));
                self.mem
                    .write(i32::from(self.regs.mar.value()), self.regs.mbr.value())?;
            }

            Opcode::Add => self.add_mbr(),

            Opcode::Subt => {
                let diff = i32::from(self.regs.ac.value()) - i32::from(self.regs.mbr.value());
                self.regs.ac.set_value(diff);
            }

            Opcode::Input => {
                self.set_state(MachineState::BlockedOnInput);
            }

            Opcode::Output => {
                self.regs.output.set_value(i32::from(self.regs.ac.value()));
                self.output.push(OutputRecord {
                    value: self.regs.output.value(),
                    mode: self.regs.output.mode(),
                });
            }

            Opcode::Halt => self.halt(),

            Opcode::SkipCond => {
                let condition = Condition::from_word(ir).map_err(|e| {
                    CpuError::from_decode(e, self.regs.mar.value() as u16)
                })?;
                if condition.holds(self.regs.ac.value()) {
                    self.regs.pc.set_value(i32::from(self.regs.pc.value()) + 1);
                }
            }

            Opcode::Jump => {
                self.regs.pc.set_value(i32::from(decode::operand(ir)));
            }

            Opcode::Clear => self.regs.ac.set_value(0),

            Opcode::AddI => {
                self.indirect()?;
                self.add_mbr();
            }

            Opcode::JumpI => {
                self.regs.pc.set_value(i32::from(self.regs.mbr.value()));
            }

            Opcode::LoadI => {
                self.indirect()?;
                self.regs.ac.set_value(i32::from(self.regs.mbr.value()));
            }

            Opcode::StoreI => {
                // The target is the word found at the pointed-to cell, one
                // level deeper than a conventional STOREI. MBR is not masked,
                // so the target can fall outside memory.
                self.indirect()?;
                let target = i32::from(self.regs.mbr.value());
                self.mem.write(target, self.regs.ac.value())?;
            }
        }

        Ok(())
    }

    /// MAR <- MBR; MBR <- Memory[MAR].
    fn indirect(&mut self) -> Result<(), CpuError> {
        self.regs.mar.set_value(i32::from(self.regs.mbr.value()));
        let value = self.mem.read(i32::from(self.regs.mar.value()))?;
        self.regs.mbr.set_value(i32::from(value));
        Ok(())
    }

    fn add_mbr(&mut self) {
        let sum = i32::from(self.regs.ac.value()) + i32::from(self.regs.mbr.value());
        self.regs.ac.set_value(sum);
    }

    /// Stop the machine: abnormally if a fatal condition is pending,
    /// normally otherwise.
    pub fn halt(&mut self) {
        match &self.fault {
            Some(err) => {
                event!(Level::WARN, code = err.code().code(), "machine halted abnormally: {}", err);
                self.set_state(MachineState::HaltedAbnormal);
            }
            None => {
                event!(Level::INFO, cycles = self.cycles, "machine halted normally");
                self.set_state(MachineState::HaltedNormal);
            }
        }
    }

    /// Record a fatal condition and halt. The first fault raised wins.
    pub(crate) fn raise(&mut self, err: CpuError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
        self.halt();
    }

    /// Put a loaded program back at its first instruction and enter
    /// [`MachineState::Running`]. Memory is left as the program left it.
    ///
    /// Does nothing when no program is loaded.
    pub fn restart(&mut self) {
        if !self.state.has_program() {
            return;
        }
        self.fault = None;
        let entry = self.program.entry_address().unwrap_or(0);
        self.regs.pc.set_value(i32::from(entry));
        self.cursor = if self.program.is_empty() { None } else { Some(0) };
        self.executed_line = None;
        event!(Level::DEBUG, entry, "restart");
        self.set_state(MachineState::Running);
    }

    /// Complete a pending INPUT instruction: INPUT <- value, AC <- INPUT.
    pub(crate) fn complete_input(&mut self, value: i32) {
        debug_assert_eq!(self.state, MachineState::BlockedOnInput);
        self.regs.input.set_value(value);
        self.regs.ac.set_value(i32::from(self.regs.input.value()));
        self.set_state(MachineState::Running);
    }

    pub(crate) fn pause(&mut self) {
        self.set_state(MachineState::Paused);
    }

    pub(crate) fn stop_by_user(&mut self) {
        event!(Level::INFO, "machine halted by user");
        self.set_state(MachineState::HaltedByUser);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu::decode::encode;
    use crate::cpu::state::ErrorCode;
    use crate::program::ProgramLine;

    /// Load `words` at consecutive addresses starting from `origin` and enter
    /// the running state.
    fn machine_with(origin: u16, words: &[i16]) -> Machine {
        let mut m = Machine::new();
        for (i, &word) in words.iter().enumerate() {
            let address = origin + i as u16;
            m.mem.write(i32::from(address), word).unwrap();
            m.program.push(ProgramLine {
                address,
                word,
                label: String::new(),
                mnemonic: String::new(),
                operand_token: String::new(),
                breakpoint: false,
            });
        }
        m.state = MachineState::HaltedNormal;
        m.restart();
        m
    }

    fn run(m: &mut Machine) -> u64 {
        let start = m.cycles();
        while m.is_running() {
            m.cycle();
        }
        m.cycles() - start
    }

    #[test]
    fn test_load_one_cycle() {
        let mut m = machine_with(0x000, &[0x1050]);
        m.mem.write(0x050, 7).unwrap();

        assert_eq!(m.cycle(), Some(Opcode::Load));
        assert_eq!(m.regs.ac.value(), 7);
        assert_eq!(m.regs.pc.value(), 1);
        assert_eq!(m.state(), MachineState::Running);
        assert_eq!(m.regs.mar.value(), 0x050);
        assert_eq!(m.regs.mbr.value(), 7);
    }

    #[test]
    fn test_single_halt() {
        let mut m = machine_with(0x100, &[encode(Opcode::Halt, 0)]);

        assert_eq!(run(&mut m), 1);
        assert_eq!(m.state(), MachineState::HaltedNormal);
        assert_eq!(m.cycle(), None);
        assert_eq!(m.cycles(), 1);
    }

    #[test]
    fn test_add_store_subt() {
        // 100 LOAD 10A / ADD 10B / STORE 10C / SUBT 10A / OUTPUT / HALT
        let mut m = machine_with(
            0x100,
            &[
                encode(Opcode::Load, 0x10A),
                encode(Opcode::Add, 0x10B),
                encode(Opcode::Store, 0x10C),
                encode(Opcode::Subt, 0x10A),
                encode(Opcode::Output, 0),
                encode(Opcode::Halt, 0),
            ],
        );
        m.mem.write(0x10A, 10).unwrap();
        m.mem.write(0x10B, 5).unwrap();

        run(&mut m);
        assert_eq!(m.mem.read(0x10C), Ok(15));
        assert_eq!(m.regs.ac.value(), 5);
        assert_eq!(m.regs.output.value(), 5);
        assert_eq!(m.output().len(), 1);
        assert_eq!(m.state(), MachineState::HaltedNormal);
    }

    #[test]
    fn test_arithmetic_wraps() {
        let mut m = machine_with(0x000, &[encode(Opcode::Load, 0x10), encode(Opcode::Add, 0x11)]);
        m.mem.write(0x10, i16::MAX).unwrap();
        m.mem.write(0x11, 1).unwrap();

        m.cycle();
        m.cycle();
        assert_eq!(m.regs.ac.value(), i16::MIN);
        assert_eq!(m.state(), MachineState::Running);
    }

    #[test]
    fn test_skipcond_zero_skips() {
        let mut m = machine_with(0x000, &[encode(Opcode::SkipCond, 0x400)]);
        m.cycle();
        assert_eq!(m.regs.pc.value(), 2);
    }

    #[test]
    fn test_skipcond_not_taken() {
        let mut m = machine_with(0x000, &[encode(Opcode::SkipCond, 0x800)]);
        m.cycle();
        assert_eq!(m.regs.pc.value(), 1);

        let mut m = machine_with(0x000, &[encode(Opcode::SkipCond, 0x000)]);
        m.regs.ac.set_value(-3);
        m.cycle();
        assert_eq!(m.regs.pc.value(), 2);
    }

    #[test]
    fn test_skipcond_illegal_condition() {
        let mut m = machine_with(0x000, &[encode(Opcode::SkipCond, 0xC00)]);
        m.cycle();
        assert_eq!(m.state(), MachineState::HaltedAbnormal);
        assert_eq!(m.error_code(), Some(ErrorCode::IllegalConditionalOperand));
    }

    #[test]
    fn test_illegal_opcode() {
        let mut m = machine_with(0x000, &[0xF123u16 as i16]);
        assert_eq!(m.cycle(), None);
        assert_eq!(m.state(), MachineState::HaltedAbnormal);
        assert_eq!(m.error_code(), Some(ErrorCode::IllegalOpcode));
    }

    #[test]
    fn test_jump_and_clear() {
        let mut m = machine_with(
            0x000,
            &[encode(Opcode::Jump, 0x003), 0, 0, encode(Opcode::Clear, 0)],
        );
        m.regs.ac.set_value(99);
        m.cycle();
        assert_eq!(m.regs.pc.value(), 3);
        m.cycle();
        assert_eq!(m.regs.ac.value(), 0);
        assert_eq!(m.current_line(), Some(3));
    }

    #[test]
    fn test_jns_stores_return_address() {
        // 000 JNS 010 ; subroutine at 010 (return slot), body at 011
        let mut m = machine_with(0x000, &[encode(Opcode::JnS, 0x010)]);
        m.cycle();
        assert_eq!(m.mem.read(0x010), Ok(1));
        assert_eq!(m.regs.ac.value(), 0x011);
        assert_eq!(m.regs.pc.value(), 0x011);
    }

    #[test]
    fn test_jumpi_returns_through_pointer() {
        let mut m = machine_with(0x000, &[encode(Opcode::JumpI, 0x020)]);
        m.mem.write(0x020, 0x0AB).unwrap();
        m.cycle();
        assert_eq!(m.regs.pc.value(), 0x0AB);
    }

    #[test]
    fn test_addi_and_loadi() {
        let mut m = machine_with(0x000, &[encode(Opcode::LoadI, 0x030), encode(Opcode::AddI, 0x031)]);
        m.mem.write(0x030, 0x040).unwrap();
        m.mem.write(0x031, 0x041).unwrap();
        m.mem.write(0x040, 20).unwrap();
        m.mem.write(0x041, 22).unwrap();

        m.cycle();
        assert_eq!(m.regs.ac.value(), 20);
        m.cycle();
        assert_eq!(m.regs.ac.value(), 42);
        assert_eq!(m.regs.mar.value(), 0x041);
    }

    /// StoreI follows a double-indirection chain: Memory[operand] holds a
    /// pointer P, Memory[P] holds the final target T, and AC lands in
    /// Memory[T]. A conventional STOREI would write Memory[P] instead. This
    /// test pins the current behavior; it may be a latent defect.
    #[test]
    fn test_storei_double_indirection() {
        let mut m = machine_with(0x000, &[encode(Opcode::StoreI, 0x050)]);
        m.mem.write(0x050, 0x060).unwrap();
        m.mem.write(0x060, 0x070).unwrap();
        m.regs.ac.set_value(123);

        m.cycle();
        assert_eq!(m.mem.read(0x070), Ok(123));
        assert_eq!(m.mem.read(0x060), Ok(0x070));
        assert_eq!(m.state(), MachineState::Running);
    }

    #[test]
    fn test_storei_target_out_of_range() {
        let mut m = machine_with(0x000, &[encode(Opcode::StoreI, 0x050)]);
        m.mem.write(0x050, 0x060).unwrap();
        m.mem.write(0x060, -5).unwrap();

        m.cycle();
        assert_eq!(m.state(), MachineState::HaltedAbnormal);
        assert_eq!(m.error_code(), Some(ErrorCode::AddressOutOfRange));
        assert_eq!(m.fault(), Some(&CpuError::AddressOutOfRange(-5)));
    }

    #[test]
    fn test_pc_past_end_of_memory() {
        let mut m = machine_with(0xFFF, &[encode(Opcode::Clear, 0)]);
        m.cycle();
        assert_eq!(m.state(), MachineState::HaltedAbnormal);
        assert_eq!(m.error_code(), Some(ErrorCode::MaxProgramReached));
    }

    #[test]
    fn test_input_blocks_until_completed() {
        let mut m = machine_with(0x000, &[encode(Opcode::Input, 0), encode(Opcode::Halt, 0)]);
        m.regs.mbr.set_value(77);

        assert_eq!(m.cycle(), Some(Opcode::Input));
        assert_eq!(m.state(), MachineState::BlockedOnInput);
        assert_eq!(m.cycle(), None);
        assert_eq!(m.regs.pc.value(), 1);

        m.complete_input(-12);
        assert_eq!(m.state(), MachineState::Running);
        assert_eq!(m.regs.input.value(), -12);
        assert_eq!(m.regs.ac.value(), -12);
        assert_eq!(m.regs.mbr.value(), 77);
    }

    #[test]
    fn test_restart_clears_fault() {
        let mut m = machine_with(0x200, &[0xF000u16 as i16]);
        m.cycle();
        assert_eq!(m.state(), MachineState::HaltedAbnormal);

        m.restart();
        assert_eq!(m.state(), MachineState::Running);
        assert_eq!(m.fault(), None);
        assert_eq!(m.regs.pc.value(), 0x200);
        assert_eq!(m.current_line(), Some(0));
    }

    #[test]
    fn test_last_opcode_tracks_executed_instruction() {
        let mut m = machine_with(0x000, &[encode(Opcode::Clear, 0), encode(Opcode::Halt, 0), 0xF000u16 as i16]);
        assert_eq!(m.last_opcode(), None);
        m.cycle();
        assert_eq!(m.last_opcode(), Some(Opcode::Clear));
        m.cycle();
        assert_eq!(m.last_opcode(), Some(Opcode::Halt));

        // A fetch that fails to decode leaves the previous opcode in place.
        m.regs.pc.set_value(2);
        m.state = MachineState::Running;
        assert_eq!(m.cycle(), None);
        assert_eq!(m.last_opcode(), Some(Opcode::Halt));
        assert_eq!(m.cycles(), 2);
    }

    #[test]
    fn test_restart_without_program_is_noop() {
        let mut m = Machine::new();
        m.restart();
        assert_eq!(m.state(), MachineState::NoProgramLoaded);
    }

    #[test]
    fn test_output_tagged_with_mode() {
        let mut m = machine_with(0x000, &[encode(Opcode::Output, 0)]);
        m.regs.output.set_mode(crate::cpu::DisplayMode::Ascii);
        m.regs.ac.set_value(65);
        m.cycle();
        let out = m.drain_output();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].to_string(), "A");
    }
}
