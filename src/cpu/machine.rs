//! The machine aggregate.
//!
//! [`Machine`] owns everything a running MARIE program can observe or
//! change: registers, memory, the execution state, the fatal-error flag, the
//! loaded program's address index and the output stream. The fetch-execute
//! cycle lives in [`crate::cpu::execute`]; the loader and execution
//! controller operate on a `&mut Machine`.

use crate::cpu::decode::Opcode;
use crate::cpu::register::{render_word, DisplayMode};
use crate::cpu::state::{CpuError, ErrorCode, MachineState};
use crate::cpu::{Memory, Registers};
use crate::program::AddressIndex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fmt::Write as _;
use tracing::{event, Level};

/// One value written by an OUTPUT instruction, tagged with the OUTPUT
/// register's display mode at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub value: i16,
    pub mode: DisplayMode,
}

impl fmt::Display for OutputRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render_word(self.value, self.mode, false))
    }
}

/// The complete state of one MARIE machine.
#[derive(Clone, Serialize, Deserialize)]
pub struct Machine {
    /// CPU registers.
    pub regs: Registers,
    /// Main memory.
    pub mem: Memory,
    pub(crate) state: MachineState,
    /// Set when a fatal condition has been raised.
    pub(crate) fault: Option<CpuError>,
    pub(crate) program: AddressIndex,
    /// Row of the program line most recently fetched ("current line").
    pub(crate) cursor: Option<usize>,
    /// Row of the line fetched by the last cycle, if that address is a
    /// program line.
    pub(crate) executed_line: Option<usize>,
    pub(crate) output: Vec<OutputRecord>,
    /// Completed fetch-execute cycles since the last load.
    pub(crate) cycles: u64,
    pub(crate) last_opcode: Option<Opcode>,
}

impl Machine {
    /// Construct a machine. Construction performs a reset, so the machine
    /// starts in [`MachineState::NoProgramLoaded`].
    pub fn new() -> Self {
        let mut machine = Self {
            regs: Registers::new(),
            mem: Memory::new(),
            state: MachineState::Uninitialized,
            fault: None,
            program: AddressIndex::new(),
            cursor: None,
            executed_line: None,
            output: Vec::new(),
            cycles: 0,
            last_opcode: None,
        };
        machine.reset();
        machine
    }

    /// Clear registers, memory, the loaded program and its breakpoints, and
    /// the output stream. Register display modes are kept.
    pub fn reset(&mut self) {
        self.regs.reset();
        self.mem.clear();
        self.program = AddressIndex::new();
        self.cursor = None;
        self.executed_line = None;
        self.output.clear();
        self.fault = None;
        self.cycles = 0;
        self.last_opcode = None;
        self.set_state(MachineState::NoProgramLoaded);
    }

    pub fn state(&self) -> MachineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == MachineState::Running
    }

    /// The fatal condition behind an abnormal halt.
    pub fn fault(&self) -> Option<&CpuError> {
        self.fault.as_ref()
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        self.fault.as_ref().map(CpuError::code)
    }

    pub fn program(&self) -> &AddressIndex {
        &self.program
    }

    /// Mutable access to the program index, for breakpoint editing.
    pub fn program_mut(&mut self) -> &mut AddressIndex {
        &mut self.program
    }

    /// Row of the current program line.
    pub fn current_line(&self) -> Option<usize> {
        self.cursor
    }

    pub fn executed_line(&self) -> Option<usize> {
        self.executed_line
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    pub fn last_opcode(&self) -> Option<Opcode> {
        self.last_opcode
    }

    /// Output produced so far and not yet drained.
    pub fn output(&self) -> &[OutputRecord] {
        &self.output
    }

    pub fn drain_output(&mut self) -> Vec<OutputRecord> {
        std::mem::take(&mut self.output)
    }

    pub(crate) fn set_state(&mut self, state: MachineState) {
        if self.state != state {
            event!(Level::DEBUG, from = %self.state, to = %state, "machine state change");
            self.state = state;
        }
    }

    /// Render registers and memory as a core dump.
    pub fn core_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "MARIE core dump");
        let _ = writeln!(out, "State: {}", self.state);
        if let Some(code) = self.error_code() {
            let _ = writeln!(out, "Error: {} ({})", code, code.code());
        }
        let _ = writeln!(out, "Cycles: {}", self.cycles);
        out.push('\n');
        for reg in self.regs.iter() {
            let _ = writeln!(
                out,
                "{:<6} {}",
                reg.designation().name(),
                render_word(reg.value(), DisplayMode::Hex, reg.designation().is_address_class())
            );
        }
        out.push('\n');
        out.push_str(&self.mem.hex_rows());
        out
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Machine")
            .field("state", &self.state)
            .field("fault", &self.fault)
            .field("cycles", &self.cycles)
            .field("regs", &self.regs)
            .field("lines", &self.program.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_machine_has_no_program() {
        let machine = Machine::new();
        assert_eq!(machine.state(), MachineState::NoProgramLoaded);
        assert!(machine.program().is_empty());
        assert_eq!(machine.error_code(), None);
        assert_eq!(machine.current_line(), None);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut machine = Machine::new();
        machine.regs.ac.set_value(12);
        machine.regs.output.set_mode(DisplayMode::Ascii);
        machine.mem.write(7, 7).unwrap();
        machine.output.push(OutputRecord { value: 1, mode: DisplayMode::Decimal });
        machine.fault = Some(CpuError::MaxProgramReached);
        machine.state = MachineState::HaltedAbnormal;

        machine.reset();
        assert_eq!(machine.regs.ac.value(), 0);
        assert_eq!(machine.regs.output.mode(), DisplayMode::Ascii);
        assert_eq!(machine.mem.read(7), Ok(0));
        assert!(machine.output().is_empty());
        assert_eq!(machine.fault(), None);
        assert_eq!(machine.state(), MachineState::NoProgramLoaded);
    }

    #[test]
    fn test_output_record_rendering() {
        let rec = OutputRecord { value: 72, mode: DisplayMode::Ascii };
        assert_eq!(rec.to_string(), "H");
        let rec = OutputRecord { value: -2, mode: DisplayMode::Hex };
        assert_eq!(rec.to_string(), "FFFE");
        let rec = OutputRecord { value: -2, mode: DisplayMode::Decimal };
        assert_eq!(rec.to_string(), "-2");
    }

    #[test]
    fn test_drain_output() {
        let mut machine = Machine::new();
        machine.output.push(OutputRecord { value: 3, mode: DisplayMode::Decimal });
        let drained = machine.drain_output();
        assert_eq!(drained.len(), 1);
        assert!(machine.output().is_empty());
    }

    #[test]
    fn test_core_dump_layout() {
        let mut machine = Machine::new();
        machine.regs.pc.set_value(0x100);
        machine.mem.write(0x100, 0x1104).unwrap();
        let dump = machine.core_dump();
        assert!(dump.contains("State: no program loaded"));
        assert!(dump.contains("PC     100"));
        assert!(dump.contains("100  1104 0000"));
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let mut machine = Machine::new();
        machine.regs.ac.set_value(-9);
        machine.mem.write(0x200, 5).unwrap();
        let json = serde_json::to_string(&machine).unwrap();
        let restored: Machine = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.regs, machine.regs);
        assert_eq!(restored.mem, machine.mem);
        assert_eq!(restored.state(), machine.state());
    }
}
