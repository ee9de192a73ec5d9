use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::{HostError, HostErrorKind};

/// Kind of a recorded input event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEventKind {
    /// A joypad button transition.
    JoypadPress { port: u8, id: u8, pressed: bool },
    /// All joypad masks cleared.
    JoypadClear,
    /// A keyboard event.
    KeyEvent {
        keycode: u32,
        character: u32,
        modifiers: u16,
        pressed: bool,
    },
}

/// One recorded input event, tagged with the frame it applies before.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputEvent {
    pub frame_no: u64,
    pub kind: InputEventKind,
}

const RECORD_MAGIC: [u8; 8] = *b"E9KINP\0\0";
const RECORD_VERSION: u32 = 1;

const TAG_JOYPAD: u8 = 1;
const TAG_CLEAR: u8 = 2;
const TAG_KEY: u8 = 3;

/// Deterministic input record/replay.
///
/// The host bridge reports every successful input mutation here; during
/// playback the recorder is the only legal source of input (the bridge
/// ignores outside calls unless the recorder is injecting), which keeps a
/// replayed run bit-identical to the recorded one.
#[derive(Clone, Debug, Default)]
pub struct InputRecorder {
    events: Vec<InputEvent>,
    recording: bool,
    playback: bool,
    injecting: bool,
}

impl InputRecorder {
    /// Starts collecting events.
    pub fn start_recording(&mut self) {
        self.recording = true;
    }

    /// Stops collecting events, keeping what was recorded.
    pub fn stop_recording(&mut self) {
        self.recording = false;
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_playback(&self) -> bool {
        self.playback
    }

    pub fn is_injecting(&self) -> bool {
        self.injecting
    }

    /// True if an outside input mutation should be dropped: playback owns
    /// the input stream unless the recorder itself is injecting.
    pub fn blocks_input(&self) -> bool {
        self.playback && !self.injecting
    }

    pub(crate) fn set_injecting(&mut self, injecting: bool) {
        self.injecting = injecting;
    }

    /// Enables or disables playback of the loaded events.
    pub fn set_playback(&mut self, playback: bool) {
        self.playback = playback;
    }

    pub fn events(&self) -> &[InputEvent] {
        &self.events
    }

    fn record(&mut self, event: InputEvent) {
        if !self.recording || self.blocks_input() {
            return;
        }
        self.events.push(event);
    }

    pub fn record_joypad(&mut self, frame_no: u64, port: u8, id: u8, pressed: bool) {
        self.record(InputEvent {
            frame_no,
            kind: InputEventKind::JoypadPress { port, id, pressed },
        });
    }

    pub fn record_clear(&mut self, frame_no: u64) {
        self.record(InputEvent {
            frame_no,
            kind: InputEventKind::JoypadClear,
        });
    }

    pub fn record_key(
        &mut self,
        frame_no: u64,
        keycode: u32,
        character: u32,
        modifiers: u16,
        pressed: bool,
    ) {
        self.record(InputEvent {
            frame_no,
            kind: InputEventKind::KeyEvent {
                keycode,
                character,
                modifiers,
                pressed,
            },
        });
    }

    /// Collects the events recorded for `frame_no`.
    pub fn events_for_frame(&self, frame_no: u64) -> Vec<InputEvent> {
        self.events
            .iter()
            .filter(|e| e.frame_no == frame_no)
            .copied()
            .collect()
    }

    /// Writes the recorded events as a versioned tag-length-value stream.
    pub fn save(&self, path: &Path) -> Result<(), HostError> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(&RECORD_MAGIC)?;
        w.write_all(&RECORD_VERSION.to_le_bytes())?;
        for event in &self.events {
            let mut payload = Vec::with_capacity(19);
            payload.extend_from_slice(&event.frame_no.to_le_bytes());
            let tag = match event.kind {
                InputEventKind::JoypadPress { port, id, pressed } => {
                    payload.push(port);
                    payload.push(id);
                    payload.push(pressed as u8);
                    TAG_JOYPAD
                }
                InputEventKind::JoypadClear => TAG_CLEAR,
                InputEventKind::KeyEvent {
                    keycode,
                    character,
                    modifiers,
                    pressed,
                } => {
                    payload.extend_from_slice(&keycode.to_le_bytes());
                    payload.extend_from_slice(&character.to_le_bytes());
                    payload.extend_from_slice(&modifiers.to_le_bytes());
                    payload.push(pressed as u8);
                    TAG_KEY
                }
            };
            w.write_all(&[tag])?;
            w.write_all(&(payload.len() as u32).to_le_bytes())?;
            w.write_all(&payload)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Loads a recorded event stream, replacing the current events.
    /// Unknown tags are skipped so newer recorders stay readable.
    pub fn load(&mut self, path: &Path) -> Result<(), HostError> {
        let mut r = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if magic != RECORD_MAGIC {
            return Err(HostError::with_context(
                HostErrorKind::Io,
                "not an input record file",
            ));
        }
        let mut version = [0u8; 4];
        r.read_exact(&mut version)?;
        if u32::from_le_bytes(version) != RECORD_VERSION {
            return Err(HostError::with_context(
                HostErrorKind::Io,
                "unsupported input record version",
            ));
        }

        let mut events = Vec::new();
        loop {
            let mut tag = [0u8; 1];
            match r.read_exact(&mut tag) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let mut len = [0u8; 4];
            r.read_exact(&mut len)?;
            let mut payload = vec![0u8; u32::from_le_bytes(len) as usize];
            r.read_exact(&mut payload)?;
            if payload.len() < 8 {
                continue;
            }
            let frame_no = u64::from_le_bytes(payload[..8].try_into().unwrap());
            let body = &payload[8..];
            let kind = match tag[0] {
                TAG_JOYPAD if body.len() >= 3 => InputEventKind::JoypadPress {
                    port: body[0],
                    id: body[1],
                    pressed: body[2] != 0,
                },
                TAG_CLEAR => InputEventKind::JoypadClear,
                TAG_KEY if body.len() >= 11 => InputEventKind::KeyEvent {
                    keycode: u32::from_le_bytes(body[0..4].try_into().unwrap()),
                    character: u32::from_le_bytes(body[4..8].try_into().unwrap()),
                    modifiers: u16::from_le_bytes(body[8..10].try_into().unwrap()),
                    pressed: body[10] != 0,
                },
                _ => continue,
            };
            events.push(InputEvent { frame_no, kind });
        }
        self.events = events;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn sample() -> InputRecorder {
        let mut rec = InputRecorder::default();
        rec.start_recording();
        rec.record_joypad(1, 0, 4, true);
        rec.record_clear(2);
        rec.record_key(2, 65, 97, 0x01, true);
        rec.record_joypad(3, 1, 5, false);
        rec
    }

    #[test]
    fn test_events_for_frame() {
        let rec = sample();
        assert_eq!(rec.events_for_frame(2).len(), 2);
        assert_eq!(rec.events_for_frame(9).len(), 0);
    }

    #[test]
    fn test_playback_blocks_recording() {
        let mut rec = sample();
        rec.set_playback(true);
        rec.record_joypad(4, 0, 0, true);
        assert_eq!(rec.events().len(), 4);
        // The injector is allowed through.
        rec.set_injecting(true);
        assert!(!rec.blocks_input());
        rec.set_injecting(false);
        assert!(rec.blocks_input());
    }

    #[test]
    fn test_not_recording_drops_events() {
        let mut rec = InputRecorder::default();
        rec.record_joypad(1, 0, 4, true);
        assert!(rec.events().is_empty());
    }

    #[test]
    fn test_file_round_trip() {
        let rec = sample();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.e9k-rec");
        rec.save(&path).unwrap();

        let mut loaded = InputRecorder::default();
        loaded.load(&path).unwrap();
        assert_eq!(loaded.events(), rec.events());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("input.e9k-rec");
        std::fs::write(&path, b"BOGUS___????").unwrap();
        let mut rec = InputRecorder::default();
        assert!(rec.load(&path).is_err());
    }
}
