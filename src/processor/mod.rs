//! Per-record image processing operators.

mod augment;
mod loader;

pub use augment::*;
pub use loader::*;
