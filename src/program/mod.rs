//! Program images and loading.
//!
//! - `image`: the `.mex` JSON record format and companion file paths
//! - `index`: address-to-line mapping with breakpoint flags
//! - `loader`: validates an image and places it in memory

pub mod image;
pub mod index;
pub mod loader;

pub use image::{ImageError, ImageRecord, ProgramImage, ProgramSource};
pub use index::{AddressIndex, ProgramLine};
pub use loader::{load, load_file, LoadError};
