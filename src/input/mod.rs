mod keyboard;
mod midi;

pub use self::keyboard::KeyboardHandler;
pub use self::midi::{decode, MidiHandler};
