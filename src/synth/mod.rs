pub mod algorithm;
pub mod command;
pub mod config;
pub mod core;
pub mod delayline;
pub mod effect;
pub mod envelope;
pub mod filter;
pub mod mixer;
pub mod modulation;
pub mod note;
pub mod operator;
pub mod prelude;
pub mod waveform;
pub mod wavetable;

pub use self::core::Synth;
pub use self::mixer::Frame;
