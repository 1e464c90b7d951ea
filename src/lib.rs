pub mod audio;
pub mod error;
#[cfg(feature = "native")]
pub mod input;
pub mod runtime;
pub mod synth;

pub use error::{Error, Fault, Result};
