use crate::error::{Error, Result};
use crate::runtime::NoteSender;
use crate::synth::note::{NoteEvent, NoteSource};
use midir::{Ignore, MidiInput, MidiInputConnection};
use parking_lot::Mutex;
use std::sync::Arc;

const CLIENT_NAME: &str = "rustfmvoice input";

/// Classifies a raw MIDI message. Note-on with velocity 0 counts as note-off;
/// anything that is not a three-byte note message yields `None`.
pub fn decode(message: &[u8]) -> Option<NoteEvent> {
    let &[status, note, velocity] = message else {
        return None;
    };
    match status & 0xF0 {
        0x90 if velocity > 0 => NoteEvent::new(note, velocity, true, NoteSource::Midi).ok(),
        0x90 | 0x80 => NoteEvent::new(note, 0, false, NoteSource::Midi).ok(),
        _ => None,
    }
}

/// Feeds one midir input port into the engine's note queue.
pub struct MidiHandler {
    connection: Option<MidiInputConnection<()>>,
    sender: Arc<Mutex<NoteSender>>,
    port_name: Option<String>,
}

impl MidiHandler {
    pub fn new(sender: NoteSender) -> Self {
        Self {
            connection: None,
            sender: Arc::new(Mutex::new(sender)),
            port_name: None,
        }
    }

    /// Names of the available input ports, in port index order.
    pub fn ports(&self) -> Result<Vec<String>> {
        let midi_in = MidiInput::new(CLIENT_NAME)?;
        midi_in
            .ports()
            .iter()
            .map(|port| midi_in.port_name(port).map_err(Error::from))
            .collect()
    }

    pub fn open(&mut self, index: usize) -> Result<()> {
        if self.connection.is_some() {
            return Err(Error::MidiPortOpen);
        }
        let mut midi_in = MidiInput::new(CLIENT_NAME)?;
        midi_in.ignore(Ignore::All);

        let ports = midi_in.ports();
        let port = ports.get(index).ok_or(Error::InvalidMidiPort(index))?;
        let port_name = midi_in.port_name(port)?;

        let sender = Arc::clone(&self.sender);
        let connection = midi_in
            .connect(
                port,
                "rustfmvoice-read-input",
                move |_stamp, message, _| {
                    if let Some(event) = decode(message) {
                        // a full queue is counted by the sender
                        sender.lock().send(event);
                    }
                },
                (),
            )
            .map_err(|e| Error::MidiConnect(e.to_string()))?;

        tracing::info!(port = %port_name, "Opened MIDI port");
        self.connection = Some(connection);
        self.port_name = Some(port_name);
        Ok(())
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            let port = self.port_name.take();
            tracing::info!(port = ?port, "Closed MIDI port");
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn port_name(&self) -> Option<&str> {
        self.port_name.as_deref()
    }
}

impl Drop for MidiHandler {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_note_on_and_off() {
        let on = decode(&[0x91, 60, 100]).unwrap();
        assert!(on.is_on);
        assert_eq!(on.note_number, 60);
        assert_eq!(on.velocity, 100);
        assert_eq!(on.source, NoteSource::Midi);

        let off = decode(&[0x80, 60, 64]).unwrap();
        assert!(!off.is_on);
        assert_eq!(off.velocity, 0);
    }

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let event = decode(&[0x90, 64, 0]).unwrap();
        assert!(!event.is_on);
    }

    #[test]
    fn ignores_other_messages() {
        assert!(decode(&[0xB0, 7, 100]).is_none());
        assert!(decode(&[0x90, 60]).is_none());
        assert!(decode(&[0xF8]).is_none());
        assert!(decode(&[0x90, 200, 100]).is_none());
    }
}
