//! Machine states and fatal error conditions.

use crate::cpu::decode::DecodeError;
use crate::cpu::memory::MemoryError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Machine execution state. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Not yet constructed.
    Uninitialized,
    /// Reset, or the last load failed.
    NoProgramLoaded,
    Running,
    /// An INPUT instruction is waiting for a value.
    BlockedOnInput,
    /// Stopped at a breakpoint or on request; can be resumed.
    Paused,
    HaltedNormal,
    HaltedAbnormal,
    HaltedByUser,
}

impl MachineState {
    /// Whether a program is loaded and not currently executing.
    pub fn is_halted(self) -> bool {
        matches!(
            self,
            MachineState::HaltedNormal | MachineState::HaltedAbnormal | MachineState::HaltedByUser
        )
    }

    /// Whether a program has been loaded into the machine.
    pub fn has_program(self) -> bool {
        !matches!(self, MachineState::Uninitialized | MachineState::NoProgramLoaded)
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            MachineState::Uninitialized => "uninitialized",
            MachineState::NoProgramLoaded => "no program loaded",
            MachineState::Running => "running",
            MachineState::BlockedOnInput => "blocked on input",
            MachineState::Paused => "paused",
            MachineState::HaltedNormal => "halted normally",
            MachineState::HaltedAbnormal => "halted abnormally",
            MachineState::HaltedByUser => "halted by user",
        };
        f.write_str(text)
    }
}

/// Condition code attached to an abnormal halt or a failed load.
///
/// The numeric codes are stable and used in diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    IllegalOpcode = 1,
    IllegalConditionalOperand = 2,
    AddressOutOfRange = 3,
    InvalidProgramImage = 4,
    ImageUnreadable = 5,
    InvalidRegisterValue = 7,
    MaxProgramReached = 8,
}

impl ErrorCode {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn message(self) -> &'static str {
        match self {
            ErrorCode::IllegalOpcode => "Illegal opcode",
            ErrorCode::IllegalConditionalOperand => "Illegal conditional operand",
            ErrorCode::AddressOutOfRange => "Address out of range",
            ErrorCode::InvalidProgramImage => "Invalid machine code format",
            ErrorCode::ImageUnreadable => "IO Exception on input file",
            ErrorCode::InvalidRegisterValue => "Illegal numeric value in register",
            ErrorCode::MaxProgramReached => "Maximum program statements reached",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Fatal conditions raised during a fetch-execute cycle.
///
/// Any of these halts the machine abnormally at the current instruction
/// boundary. Partial effects of the faulting instruction are kept.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum CpuError {
    #[error("illegal opcode {opcode:X} at address {address:03X}")]
    IllegalOpcode { opcode: u8, address: u16 },

    #[error("illegal conditional operand at address {address:03X}")]
    IllegalConditionalOperand { address: u16 },

    #[error("address {0} out of range")]
    AddressOutOfRange(i32),

    #[error("maximum program statements reached")]
    MaxProgramReached,

    #[error("illegal numeric value in register: {0}")]
    InvalidRegisterValue(String),
}

impl CpuError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CpuError::IllegalOpcode { .. } => ErrorCode::IllegalOpcode,
            CpuError::IllegalConditionalOperand { .. } => ErrorCode::IllegalConditionalOperand,
            CpuError::AddressOutOfRange(_) => ErrorCode::AddressOutOfRange,
            CpuError::MaxProgramReached => ErrorCode::MaxProgramReached,
            CpuError::InvalidRegisterValue(_) => ErrorCode::InvalidRegisterValue,
        }
    }

    /// Attach the faulting instruction's address to a decode failure.
    pub fn from_decode(err: DecodeError, address: u16) -> Self {
        match err {
            DecodeError::IllegalOpcode(opcode) => CpuError::IllegalOpcode { opcode, address },
            DecodeError::IllegalCondition(_) => CpuError::IllegalConditionalOperand { address },
        }
    }
}

impl From<MemoryError> for CpuError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::AddressOutOfRange(addr) => CpuError::AddressOutOfRange(addr),
        }
    }
}
