use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::{Error, Result};

/// Stable identity of a note across the whole annotation pipeline.
///
/// An empty id means "unassigned"; [`identify`] fills those in.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub String);

impl NoteId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Derived identity: onset, pitch and input position.
    pub fn derived(onset: u64, pitch: u8, index: usize) -> Self {
        Self(format!("{onset}:{pitch}:{index}"))
    }

    pub fn is_assigned(&self) -> bool {
        !self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A symbolic note with absolute tick timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    #[serde(default)]
    pub id: NoteId,
    pub pitch: u8,
    pub onset: u64,
    pub duration: u64,
    /// Normalized velocity (0.0–1.0)
    pub velocity: f64,
}

impl Note {
    /// A note without identity; one is derived when it enters a component.
    pub fn new(pitch: u8, onset: u64, duration: u64, velocity: f64) -> Self {
        Self {
            id: NoteId::default(),
            pitch,
            onset,
            duration,
            velocity,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = NoteId::new(id);
        self
    }

    pub fn end(&self) -> u64 {
        self.onset + self.duration
    }

    /// True when the two notes sound together for more than `tolerance` ticks.
    pub fn overlaps(&self, other: &Note, tolerance: u64) -> bool {
        overlap_ticks(self.onset, self.end(), other.onset, other.end()) > tolerance
    }
}

/// Length of the intersection of two half-open tick spans.
pub fn overlap_ticks(a_start: u64, a_end: u64, b_start: u64, b_end: u64) -> u64 {
    a_end.min(b_end).saturating_sub(a_start.max(b_start))
}

/// Copy `notes`, deriving ids for any note that has none.
pub fn identify(notes: &[Note]) -> Vec<Note> {
    notes
        .iter()
        .enumerate()
        .map(|(index, note)| {
            let mut note = note.clone();
            if !note.id.is_assigned() {
                note.id = NoteId::derived(note.onset, note.pitch, index);
            }
            note
        })
        .collect()
}

/// Check the hard precondition shared by every component.
///
/// Ids must be unique once derived ids are filled in.
pub fn validate(notes: &[Note]) -> Result<()> {
    let mut seen: BTreeMap<NoteId, usize> = BTreeMap::new();
    for (index, note) in notes.iter().enumerate() {
        let id = if note.id.is_assigned() {
            note.id.clone()
        } else {
            NoteId::derived(note.onset, note.pitch, index)
        };

        let reason = if note.pitch > 127 {
            Some(format!("pitch {} out of range", note.pitch))
        } else if note.duration == 0 {
            Some("zero duration".to_string())
        } else if !(0.0..=1.0).contains(&note.velocity) {
            Some(format!("velocity {} outside 0..=1", note.velocity))
        } else if let Some(first) = seen.get(&id) {
            Some(format!("id {id} already used by note {first}"))
        } else {
            None
        };

        if let Some(reason) = reason {
            return Err(Error::InvalidNote { index, reason });
        }
        seen.insert(id, index);
    }
    Ok(())
}

/// Indices of `notes` ordered by onset, then pitch, then id.
pub(crate) fn onset_order(notes: &[Note]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..notes.len()).collect();
    order.sort_by(|&a, &b| {
        let (na, nb) = (&notes[a], &notes[b]);
        na.onset
            .cmp(&nb.onset)
            .then(na.pitch.cmp(&nb.pitch))
            .then_with(|| na.id.cmp(&nb.id))
    });
    order
}
