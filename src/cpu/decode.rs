//! Instruction decoder for MARIE.
//!
//! Every instruction is a single 16-bit word: the high 4 bits select the
//! opcode and the low 12 bits carry an address operand (or, for SKIPCOND,
//! the condition in bits 11-10).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// MARIE opcodes. The discriminant is the opcode nibble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Opcode {
    /// Store PC at the operand address and jump to the following word.
    JnS = 0x0,
    Load = 0x1,
    Store = 0x2,
    Add = 0x3,
    Subt = 0x4,
    Input = 0x5,
    Output = 0x6,
    Halt = 0x7,
    SkipCond = 0x8,
    Jump = 0x9,
    Clear = 0xA,
    AddI = 0xB,
    JumpI = 0xC,
    LoadI = 0xD,
    StoreI = 0xE,
}

/// Whether the fetch stage must load an operand for each opcode, indexed by
/// opcode nibble.
const OPERAND_REQUIRED: [bool; 15] = [
    true,  // JNS
    true,  // LOAD
    true,  // STORE
    true,  // ADD
    true,  // SUBT
    false, // INPUT
    false, // OUTPUT
    false, // HALT
    false, // SKIPCOND
    false, // JUMP
    false, // CLEAR
    true,  // ADDI
    true,  // JUMPI
    true,  // LOADI
    true,  // STOREI
];

impl Opcode {
    /// Every opcode in nibble order.
    pub const ALL: [Opcode; 15] = [
        Opcode::JnS,
        Opcode::Load,
        Opcode::Store,
        Opcode::Add,
        Opcode::Subt,
        Opcode::Input,
        Opcode::Output,
        Opcode::Halt,
        Opcode::SkipCond,
        Opcode::Jump,
        Opcode::Clear,
        Opcode::AddI,
        Opcode::JumpI,
        Opcode::LoadI,
        Opcode::StoreI,
    ];

    /// Look up an opcode nibble.
    pub fn from_nibble(nibble: u8) -> Result<Self, DecodeError> {
        Self::ALL
            .get(usize::from(nibble))
            .copied()
            .ok_or(DecodeError::IllegalOpcode(nibble))
    }

    pub fn nibble(self) -> u8 {
        self as u8
    }

    /// Whether fetch loads MAR/MBR from the operand field.
    pub fn requires_operand(self) -> bool {
        OPERAND_REQUIRED[self as usize]
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::JnS => "JNS",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Add => "ADD",
            Opcode::Subt => "SUBT",
            Opcode::Input => "INPUT",
            Opcode::Output => "OUTPUT",
            Opcode::Halt => "HALT",
            Opcode::SkipCond => "SKIPCOND",
            Opcode::Jump => "JUMP",
            Opcode::Clear => "CLEAR",
            Opcode::AddI => "ADDI",
            Opcode::JumpI => "JUMPI",
            Opcode::LoadI => "LOADI",
            Opcode::StoreI => "STOREI",
        }
    }

    /// Case-insensitive reverse of [`Opcode::mnemonic`].
    pub fn from_mnemonic(text: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.mnemonic().eq_ignore_ascii_case(text.trim()))
    }
}

/// SKIPCOND conditions, selected by bits 11-10 of the instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Condition {
    /// `00`: skip if AC < 0
    Negative,
    /// `01`: skip if AC = 0
    Zero,
    /// `10`: skip if AC > 0
    Positive,
}

impl Condition {
    /// Decode the condition bits of a SKIPCOND word. `11` is illegal.
    pub fn from_word(word: i16) -> Result<Self, DecodeError> {
        match condition_bits(word) {
            0 => Ok(Condition::Negative),
            1 => Ok(Condition::Zero),
            2 => Ok(Condition::Positive),
            bits => Err(DecodeError::IllegalCondition(bits)),
        }
    }

    /// Whether the next instruction is skipped for this accumulator value.
    pub fn holds(self, ac: i16) -> bool {
        match self {
            Condition::Negative => ac < 0,
            Condition::Zero => ac == 0,
            Condition::Positive => ac > 0,
        }
    }
}

/// High nibble of an instruction word.
#[inline]
pub fn opcode_nibble(word: i16) -> u8 {
    ((word as u16) >> 12) as u8
}

/// Low 12 bits of an instruction word.
#[inline]
pub fn operand(word: i16) -> u16 {
    (word as u16) & 0x0FFF
}

#[inline]
fn condition_bits(word: i16) -> u8 {
    (((word as u16) & 0x0C00) >> 10) as u8
}

/// Decode the opcode of an instruction word.
pub fn decode(word: i16) -> Result<Opcode, DecodeError> {
    Opcode::from_nibble(opcode_nibble(word))
}

/// Build an instruction word from an opcode and a 12-bit operand.
pub fn encode(opcode: Opcode, operand: u16) -> i16 {
    ((u16::from(opcode.nibble()) << 12) | (operand & 0x0FFF)) as i16
}

/// Render a word as a mnemonic with its operand, e.g. `LOAD 050`.
///
/// Words with an illegal opcode nibble render as raw data.
pub fn disassemble(word: i16) -> String {
    match decode(word) {
        Ok(op @ (Opcode::Input | Opcode::Output | Opcode::Halt | Opcode::Clear)) => {
            op.mnemonic().to_string()
        }
        Ok(op) => format!("{} {:03X}", op.mnemonic(), operand(word)),
        Err(_) => format!("DATA {:04X}", word as u16),
    }
}

/// Errors that can occur during instruction decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum DecodeError {
    #[error("illegal opcode: {0:X}")]
    IllegalOpcode(u8),

    #[error("illegal conditional operand: {0:02b}")]
    IllegalCondition(u8),
}
