use crate::runtime::SynthHandle;
use crate::synth::algorithm::CycleDirection;
use crate::synth::prelude::HashMap;
use device_query::{DeviceQuery, DeviceState, Keycode};

const KEYBOARD_VELOCITY: u8 = 100;

/// What a non-note key does.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Control {
    Algorithm(CycleDirection),
    StartRecording,
    SaveRecording,
    Quit,
}

/// Polls the computer keyboard and turns key changes into engine commands.
pub struct KeyboardHandler {
    device_state: DeviceState,
    key_states: HashMap<Keycode, bool>,
    key_to_note: HashMap<Keycode, u8>,
    control_keys: HashMap<Keycode, (Control, bool)>,
}

impl Default for KeyboardHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyboardHandler {
    pub fn new() -> Self {
        // Two-row piano layout starting at A3
        let key_to_note: HashMap<Keycode, u8> = [
            (Keycode::A, 57),
            (Keycode::S, 59),
            (Keycode::D, 60),
            (Keycode::F, 62),
            (Keycode::G, 64),
            (Keycode::H, 65),
            (Keycode::J, 67),
            (Keycode::K, 69),
            (Keycode::L, 71),
            (Keycode::Semicolon, 72),
            (Keycode::W, 58),
            (Keycode::R, 61),
            (Keycode::T, 63),
            (Keycode::U, 66),
            (Keycode::I, 68),
            (Keycode::O, 70),
            (Keycode::LeftBracket, 73),
        ]
        .into_iter()
        .collect();

        let key_states = key_to_note.keys().map(|&key| (key, false)).collect();

        let control_keys = [
            (Keycode::Comma, Control::Algorithm(CycleDirection::Backward)),
            (Keycode::Dot, Control::Algorithm(CycleDirection::Forward)),
            (Keycode::Z, Control::StartRecording),
            (Keycode::X, Control::SaveRecording),
            (Keycode::Escape, Control::Quit),
        ]
        .into_iter()
        .map(|(key, control)| (key, (control, false)))
        .collect();

        Self {
            device_state: DeviceState::new(),
            key_states,
            key_to_note,
            control_keys,
        }
    }

    /// Sends note and control changes since the last poll. Returns `false`
    /// once Escape is pressed.
    pub fn update(&mut self, handle: &mut SynthHandle) -> bool {
        let keys: Vec<Keycode> = self.device_state.get_keys();

        for (key, &note) in &self.key_to_note {
            let is_pressed = keys.contains(key);
            let was_pressed = self.key_states.insert(*key, is_pressed).unwrap_or(false);
            if is_pressed == was_pressed {
                continue;
            }
            let result = if is_pressed {
                handle.note_on(note, KEYBOARD_VELOCITY)
            } else {
                handle.note_off(note)
            };
            if let Err(e) = result {
                tracing::warn!(key = ?key, note, error = %e, "Dropped keyboard note");
            }
        }

        let mut keep_running = true;
        for (key, (control, was_pressed)) in self.control_keys.iter_mut() {
            let is_pressed = keys.contains(key);
            let just_pressed = is_pressed && !*was_pressed;
            *was_pressed = is_pressed;
            if !just_pressed {
                continue;
            }
            let result = match *control {
                Control::Algorithm(direction) => {
                    handle.cycle_algorithm(direction);
                    Ok(())
                }
                Control::StartRecording => handle.start_recording(),
                Control::SaveRecording => handle.save_recording(),
                Control::Quit => {
                    keep_running = false;
                    Ok(())
                }
            };
            if let Err(e) = result {
                tracing::warn!(control = ?control, error = %e, "Keyboard control failed");
            }
        }
        keep_running
    }
}
