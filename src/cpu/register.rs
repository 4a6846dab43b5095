//! MARIE CPU registers.
//!
//! The machine has seven registers, all 16 bits wide:
//! - AC: accumulator
//! - IR: instruction register
//! - MAR: memory address register (12-bit address class)
//! - MBR: memory buffer register
//! - PC: program counter (12-bit address class)
//! - INPUT / OUTPUT: the I/O registers
//!
//! Every register carries a display mode and a text rendering that is kept
//! in step with its value. The mode never influences the stored value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Mask applied to address-class registers (MAR and PC).
pub const ADDRESS_MASK: i32 = 0x0FFF;

/// Which register a [`Register`] instance is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Designation {
    Ac,
    Ir,
    Mar,
    Mbr,
    Pc,
    Input,
    Output,
}

impl Designation {
    /// All designations in display order.
    pub const ALL: [Designation; 7] = [
        Designation::Ac,
        Designation::Ir,
        Designation::Mar,
        Designation::Mbr,
        Designation::Pc,
        Designation::Input,
        Designation::Output,
    ];

    /// MAR and PC hold addresses and are masked to 12 bits.
    pub fn is_address_class(self) -> bool {
        matches!(self, Designation::Mar | Designation::Pc)
    }

    pub fn name(self) -> &'static str {
        match self {
            Designation::Ac => "AC",
            Designation::Ir => "IR",
            Designation::Mar => "MAR",
            Designation::Mbr => "MBR",
            Designation::Pc => "PC",
            Designation::Input => "INPUT",
            Designation::Output => "OUTPUT",
        }
    }
}

impl fmt::Display for Designation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Presentation radix of a register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayMode {
    Hex,
    Decimal,
    Ascii,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisplayMode::Hex => "hex",
            DisplayMode::Decimal => "dec",
            DisplayMode::Ascii => "ascii",
        };
        f.write_str(name)
    }
}

impl FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hex" | "h" => Ok(DisplayMode::Hex),
            "dec" | "decimal" | "d" => Ok(DisplayMode::Decimal),
            "ascii" | "a" => Ok(DisplayMode::Ascii),
            other => Err(format!("unknown display mode '{}' (expected hex, dec or ascii)", other)),
        }
    }
}

/// A text literal could not be parsed in the requested mode.
///
/// This is a non-fatal condition; callers decide whether to escalate it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("invalid {mode} literal: '{literal}'")]
    InvalidLiteral { literal: String, mode: DisplayMode },
}

/// Parse a text literal according to a display mode.
///
/// Numeric literals are trimmed and truncated to the 16-bit word size after
/// parsing, so hex `FFFF` yields -1. An ASCII literal yields the 7-bit code of
/// its first character, or 0 when empty.
pub fn parse_literal(mode: DisplayMode, literal: &str) -> Result<i32, LiteralError> {
    let text = literal.trim();
    let invalid = || LiteralError::InvalidLiteral {
        literal: literal.to_string(),
        mode,
    };

    match mode {
        DisplayMode::Decimal => text
            .parse::<i32>()
            .map(|v| i32::from(v as i16))
            .map_err(|_| invalid()),
        DisplayMode::Hex => i32::from_str_radix(text, 16)
            .map(|v| i32::from(v as i16))
            .map_err(|_| invalid()),
        DisplayMode::Ascii => Ok(text.chars().next().map_or(0, |c| (c as u32 % 128) as i32)),
    }
}

/// A single 16-bit register with its display state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    designation: Designation,
    value: i16,
    mode: DisplayMode,
    rendering: String,
}

impl Register {
    /// Create a zeroed register. INPUT and OUTPUT default to decimal,
    /// everything else to hex.
    pub fn new(designation: Designation) -> Self {
        let mode = match designation {
            Designation::Input | Designation::Output => DisplayMode::Decimal,
            _ => DisplayMode::Hex,
        };
        let mut reg = Self {
            designation,
            value: 0,
            mode,
            rendering: String::new(),
        };
        reg.render();
        reg
    }

    pub fn designation(&self) -> Designation {
        self.designation
    }

    pub fn mode(&self) -> DisplayMode {
        self.mode
    }

    /// Store a raw value.
    ///
    /// Address-class registers keep only the low 12 bits, emulating hardware
    /// overflow; every other register truncates to 16 bits.
    pub fn set_value(&mut self, raw: i32) {
        self.value = if self.designation.is_address_class() {
            (raw & ADDRESS_MASK) as i16
        } else {
            raw as i16
        };
        self.render();
    }

    /// Parse `literal` in the register's current mode and store it.
    ///
    /// On failure the register is left untouched.
    pub fn set_literal(&mut self, literal: &str) -> Result<(), LiteralError> {
        let value = parse_literal(self.mode, literal)?;
        self.set_value(value);
        Ok(())
    }

    /// Change the display mode. The stored value is unchanged.
    pub fn set_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
        self.render();
    }

    /// Current value. Address-class registers always read back as a
    /// non-negative 12-bit quantity.
    #[inline]
    pub fn value(&self) -> i16 {
        if self.designation.is_address_class() {
            self.value & ADDRESS_MASK as i16
        } else {
            self.value
        }
    }

    /// Text rendering of the value in the current mode.
    pub fn rendering(&self) -> &str {
        &self.rendering
    }

    fn render(&mut self) {
        self.rendering = render_word(self.value, self.mode, self.designation.is_address_class());
    }
}

impl fmt::Display for Register {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendering)
    }
}

/// Render a word the way the register display does.
///
/// Hex uses three digits for addresses and four (two's complement) otherwise.
/// ASCII renders the character `value mod 128`, or nothing for zero.
pub fn render_word(value: i16, mode: DisplayMode, address: bool) -> String {
    match mode {
        DisplayMode::Hex if address => format!("{:03X}", (value as u16) & 0x0FFF),
        DisplayMode::Hex => format!("{:04X}", value as u16),
        DisplayMode::Decimal => value.to_string(),
        DisplayMode::Ascii if value == 0 => String::new(),
        DisplayMode::Ascii => char::from(i32::from(value).rem_euclid(128) as u8).to_string(),
    }
}

/// The MARIE register file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Registers {
    /// Accumulator
    pub ac: Register,
    /// Instruction register
    pub ir: Register,
    /// Memory address register
    pub mar: Register,
    /// Memory buffer register
    pub mbr: Register,
    /// Program counter
    pub pc: Register,
    pub input: Register,
    pub output: Register,
}

impl Registers {
    /// Create a register file with all values zeroed.
    pub fn new() -> Self {
        Self {
            ac: Register::new(Designation::Ac),
            ir: Register::new(Designation::Ir),
            mar: Register::new(Designation::Mar),
            mbr: Register::new(Designation::Mbr),
            pc: Register::new(Designation::Pc),
            input: Register::new(Designation::Input),
            output: Register::new(Designation::Output),
        }
    }

    /// Zero every register. Display modes are preserved.
    pub fn reset(&mut self) {
        for designation in Designation::ALL {
            self.get_mut(designation).set_value(0);
        }
    }

    pub fn get(&self, designation: Designation) -> &Register {
        match designation {
            Designation::Ac => &self.ac,
            Designation::Ir => &self.ir,
            Designation::Mar => &self.mar,
            Designation::Mbr => &self.mbr,
            Designation::Pc => &self.pc,
            Designation::Input => &self.input,
            Designation::Output => &self.output,
        }
    }

    pub fn get_mut(&mut self, designation: Designation) -> &mut Register {
        match designation {
            Designation::Ac => &mut self.ac,
            Designation::Ir => &mut self.ir,
            Designation::Mar => &mut self.mar,
            Designation::Mbr => &mut self.mbr,
            Designation::Pc => &mut self.pc,
            Designation::Input => &mut self.input,
            Designation::Output => &mut self.output,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Register> {
        Designation::ALL.into_iter().map(move |d| self.get(d))
    }
}

impl Default for Registers {
    fn default() -> Self {
        Self::new()
    }
}
