//! Loads program images into a machine.

use crate::cpu::memory::MEMORY_SIZE;
use crate::cpu::{ErrorCode, Machine, MachineState, MemoryError};
use crate::program::image::{ImageError, ProgramImage, ProgramSource};
use crate::program::index::ProgramLine;
use thiserror::Error;
use tracing::{event, Level};

/// Reset `machine` and load `image` into it.
///
/// Every record is validated before memory is touched. On success PC holds
/// the first record's address and the machine is [`MachineState::HaltedNormal`];
/// on failure it is left reset in [`MachineState::NoProgramLoaded`].
pub fn load(machine: &mut Machine, image: &ProgramImage) -> Result<(), LoadError> {
    machine.reset();

    let count = image.executable().count();
    if count > MEMORY_SIZE {
        event!(Level::WARN, count, "program image too large");
        return Err(LoadError::TooManyRecords { count });
    }

    let mut lines = Vec::with_capacity(count);
    for (index, record) in image.executable() {
        let (address, word) = record.parse(index)?;
        lines.push(ProgramLine {
            address,
            word,
            label: record.label.trim().to_string(),
            mnemonic: record.mnemonic.trim().to_string(),
            operand_token: record.operand_token.trim().to_string(),
            breakpoint: false,
        });
    }
    if lines.is_empty() {
        return Err(LoadError::Empty);
    }

    for line in lines {
        machine.mem.write(i32::from(line.address), line.word)?;
        machine.program.push(line);
    }

    let entry = machine.program.entry_address().unwrap_or(0);
    machine.regs.pc.set_value(i32::from(entry));
    machine.set_state(MachineState::HaltedNormal);
    event!(Level::INFO, lines = machine.program.len(), entry, "program loaded");
    Ok(())
}

/// Read and load the image belonging to `source`.
pub fn load_file(machine: &mut Machine, source: &ProgramSource) -> Result<(), LoadError> {
    let image = match source.read() {
        Ok(image) => image,
        Err(err) => {
            machine.reset();
            event!(Level::WARN, path = %source.image_path().display(), "load failed: {}", err);
            return Err(err.into());
        }
    };
    load(machine, &image)
}

/// Reasons a program cannot be loaded. All of them are fatal to the load and
/// leave the machine without a program.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    #[error(transparent)]
    Image(#[from] ImageError),

    #[error("image has {count} records; at most {} fit in memory", MEMORY_SIZE)]
    TooManyRecords { count: usize },

    #[error("image has no executable records")]
    Empty,

    #[error("address {0} out of range")]
    AddressOutOfRange(i32),
}

impl From<MemoryError> for LoadError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::AddressOutOfRange(addr) => LoadError::AddressOutOfRange(addr),
        }
    }
}

impl LoadError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LoadError::Image(ImageError::Io { .. }) => ErrorCode::ImageUnreadable,
            LoadError::Image(_) | LoadError::Empty => ErrorCode::InvalidProgramImage,
            LoadError::TooManyRecords { .. } => ErrorCode::MaxProgramReached,
            LoadError::AddressOutOfRange(_) => ErrorCode::AddressOutOfRange,
        }
    }
}
