//! CPU emulation for the MARIE accumulator machine.
//!
//! - 4096 sixteen-bit memory cells
//! - 7 registers: AC, IR, MAR, MBR, PC, INPUT, OUTPUT
//! - 15-instruction set, one address per instruction

pub mod decode;
pub mod execute;
pub mod machine;
pub mod memory;
pub mod register;
pub mod state;

pub use decode::{Condition, DecodeError, Opcode};
pub use machine::{Machine, OutputRecord};
pub use memory::{Memory, MemoryError, MEMORY_SIZE};
pub use register::{parse_literal, Designation, DisplayMode, LiteralError, Register, Registers};
pub use state::{CpuError, ErrorCode, MachineState};
