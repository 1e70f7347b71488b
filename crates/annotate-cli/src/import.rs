//! Standard MIDI File import: note-on/note-off pairing per track.

use midi_annotate::Note;
use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Resolution used when the file is timecode-based.
pub const FALLBACK_PPQ: u16 = 480;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("MIDI parse error: {0}")]
    MidiParse(String),
}

/// Notes of one SMF track, sorted by onset then pitch.
#[derive(Debug, Clone, Serialize)]
pub struct TrackNotes {
    pub track_index: usize,
    pub name: Option<String>,
    pub notes: Vec<Note>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportedMidi {
    pub ppq: u16,
    pub tracks: Vec<TrackNotes>,
}

impl ImportedMidi {
    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }
}

/// Parse SMF bytes and extract notes.
pub fn parse_midi(bytes: &[u8]) -> Result<ImportedMidi, ImportError> {
    let smf = Smf::parse(bytes).map_err(|e| ImportError::MidiParse(e.to_string()))?;
    Ok(extract_notes(&smf))
}

/// Extract notes per track, pairing note-on/note-off events.
///
/// Velocity-0 note-ons count as note-offs. Overlapping notes on the same
/// channel and key stack, last in first out. Notes left open are closed at
/// the track's final tick, and zero-length notes are stretched to one tick.
pub fn extract_notes(smf: &Smf) -> ImportedMidi {
    let ppq = match smf.header.timing {
        midly::Timing::Metrical(ticks) => ticks.as_int(),
        midly::Timing::Timecode(_, _) => FALLBACK_PPQ,
    };

    let mut tracks = Vec::with_capacity(smf.tracks.len());

    for (track_index, track) in smf.tracks.iter().enumerate() {
        let mut current_tick: u64 = 0;
        let mut name = None;
        let mut notes = Vec::new();
        // Map (channel, pitch) → Vec<(onset_tick, velocity)> for stacking
        let mut pending: HashMap<(u8, u8), Vec<(u64, u8)>> = HashMap::new();

        for event in track {
            current_tick += event.delta.as_int() as u64;

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(bytes)) if name.is_none() => {
                    name = Some(String::from_utf8_lossy(bytes).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let ch = channel.as_int();
                    match message {
                        MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            pending
                                .entry((ch, key.as_int()))
                                .or_default()
                                .push((current_tick, vel.as_int()));
                        }
                        MidiMessage::NoteOff { key, .. } | MidiMessage::NoteOn { key, .. } => {
                            let key = (ch, key.as_int());
                            if let Some((onset, velocity)) =
                                pending.get_mut(&key).and_then(|stack| stack.pop())
                            {
                                notes.push(make_note(key.1, onset, current_tick, velocity));
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        for ((_, pitch), stack) in &pending {
            for &(onset, velocity) in stack {
                notes.push(make_note(*pitch, onset, current_tick, velocity));
            }
        }

        notes.sort_by(|a: &Note, b: &Note| {
            a.onset
                .cmp(&b.onset)
                .then(a.pitch.cmp(&b.pitch))
                .then(a.duration.cmp(&b.duration))
        });

        tracks.push(TrackNotes {
            track_index,
            name,
            notes,
        });
    }

    ImportedMidi { ppq, tracks }
}

fn make_note(pitch: u8, onset: u64, offset: u64, velocity: u8) -> Note {
    let duration = offset.saturating_sub(onset).max(1);
    Note::new(pitch, onset, duration, velocity as f64 / 127.0)
}
