//! # MARIE Simulator
//!
//! A simulator of MARIE, the Machine Architecture that is Really Intuitive and
//! Easy: a 16-bit accumulator machine with 4096 words of memory and fifteen
//! instructions, used to teach computer organization.
//!
//! The [`cpu`] module holds the machine itself, [`program`] reads and loads
//! assembled program images, and [`control`] drives execution in single-step,
//! run-to-completion or run-to-breakpoint mode.

pub mod control;
pub mod cpu;
pub mod program;

// Re-export commonly used types
pub use control::{ControlError, ControlHandle, ControllerConfig, ExecutionController, RunMode};
pub use cpu::{CpuError, DisplayMode, ErrorCode, Machine, MachineState, Opcode, OutputRecord};
pub use program::{load, load_file, LoadError, ProgramImage, ProgramSource};
