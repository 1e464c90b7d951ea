pub mod native;

pub use native::{build, EngineStats, NativeSynth, NoteSender, SynthHandle};
#[cfg(feature = "native")]
pub use native::start;
