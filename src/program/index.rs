//! Address index for the loaded program.
//!
//! Each executable record of a program image becomes one line. The index maps
//! memory addresses back to lines so the machine can track which line is
//! executing and whether it carries a breakpoint.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One line of the loaded program.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramLine {
    pub address: u16,
    pub word: i16,
    pub label: String,
    pub mnemonic: String,
    pub operand_token: String,
    pub breakpoint: bool,
}

/// Lines of the loaded program, in image order, plus an address lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressIndex {
    lines: Vec<ProgramLine>,
    rows: BTreeMap<u16, usize>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line and return its row. A later line at the same address
    /// takes over the address mapping.
    pub fn push(&mut self, line: ProgramLine) -> usize {
        let row = self.lines.len();
        self.rows.insert(line.address, row);
        self.lines.push(line);
        row
    }

    /// Row of the line loaded at `address`, if any.
    pub fn row_of(&self, address: u16) -> Option<usize> {
        self.rows.get(&address).copied()
    }

    pub fn line(&self, row: usize) -> Option<&ProgramLine> {
        self.lines.get(row)
    }

    pub fn lines(&self) -> &[ProgramLine] {
        &self.lines
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Address of the first line; execution starts here.
    pub fn entry_address(&self) -> Option<u16> {
        self.lines.first().map(|line| line.address)
    }

    /// Set or clear the breakpoint on the line at `address`.
    ///
    /// Returns false if no program line lives at that address.
    pub fn set_breakpoint(&mut self, address: u16, enabled: bool) -> bool {
        match self.row_of(address) {
            Some(row) => {
                self.lines[row].breakpoint = enabled;
                true
            }
            None => false,
        }
    }

    /// Flip the breakpoint at `address`, returning its new setting.
    pub fn toggle_breakpoint(&mut self, address: u16) -> Option<bool> {
        let row = self.row_of(address)?;
        let line = &mut self.lines[row];
        line.breakpoint = !line.breakpoint;
        Some(line.breakpoint)
    }

    pub fn has_breakpoint(&self, row: usize) -> bool {
        self.lines.get(row).is_some_and(|line| line.breakpoint)
    }

    /// Addresses of all lines with a breakpoint, in line order.
    pub fn breakpoints(&self) -> Vec<u16> {
        self.lines
            .iter()
            .filter(|line| line.breakpoint)
            .map(|line| line.address)
            .collect()
    }

    pub fn clear_breakpoints(&mut self) {
        for line in &mut self.lines {
            line.breakpoint = false;
        }
    }
}
