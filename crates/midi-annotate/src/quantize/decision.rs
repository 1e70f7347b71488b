//! Provenance records attached to every quantized note.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::note::NoteId;
use crate::rhythm::{RhythmFamily, RuleSlot};

/// Confidence in the locally best grid candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Confidence {
    Certain,
    WeakPrimary,
    Ambiguous,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Certain => "CERTAIN",
            Self::WeakPrimary => "WEAK_PRIMARY",
            Self::Ambiguous => "AMBIGUOUS",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    /// Same-pitch notes overlap in time.
    #[serde(rename = "type1_unison_overlap")]
    UnisonOverlap,
    /// A short-lived polyphony spike would appear.
    #[serde(rename = "type2_polyphony_blip")]
    PolyphonyBlip,
    /// The candidate's family disagrees with its neighbourhood.
    #[serde(rename = "type3_contextual_rhythm")]
    ContextualRhythm,
}

impl ConflictType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnisonOverlap => "type1_unison_overlap",
            Self::PolyphonyBlip => "type2_polyphony_blip",
            Self::ContextualRhythm => "type3_contextual_rhythm",
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One grid placement proposed for a note by local analysis.
///
/// `family`, `note_value` and `slot` are `None` for the passthrough
/// candidate emitted when no rule is enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub family: Option<RhythmFamily>,
    pub note_value: Option<u32>,
    pub slot: Option<RuleSlot>,
    /// Grid spacing in ticks (1.0 for passthrough).
    pub quantum: f64,
    pub onset: u64,
    pub duration: u64,
    pub onset_error: u64,
    pub duration_error: u64,
}

impl Candidate {
    pub fn error(&self) -> u64 {
        self.onset_error + self.duration_error
    }

    pub fn end(&self) -> u64 {
        self.onset + self.duration
    }
}

/// Contextual objective terms for one candidate. Lower is better.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectiveBreakdown {
    pub ordering: f64,
    pub movement: f64,
    pub overlap: f64,
    pub blip: f64,
    pub context: f64,
    pub edit: f64,
    pub total: f64,
}

impl ObjectiveBreakdown {
    pub(crate) fn summed(mut self) -> Self {
        self.total =
            self.ordering + self.movement + self.overlap + self.blip + self.context + self.edit;
        self
    }
}

/// A shortening performed to remove a same-pitch overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accommodation {
    pub note_id: NoteId,
    pub original_duration: u64,
    pub new_duration: u64,
}

/// A candidate as scored by the contextual pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEvaluation {
    /// Position in the local ranking (0 = locally best).
    pub local_rank: usize,
    pub candidate: Candidate,
    pub objective: ObjectiveBreakdown,
    pub conflicts: Vec<ConflictType>,
    pub accommodations: Vec<Accommodation>,
}

/// Full record of how a note's grid position was chosen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowDecision {
    pub note_id: NoteId,
    pub original_onset: u64,
    pub original_duration: u64,
    pub selected_family: Option<RhythmFamily>,
    pub selected_note_value: Option<u32>,
    pub selected_slot: Option<RuleSlot>,
    pub selected_onset: u64,
    pub selected_duration: u64,
    pub confidence: Confidence,
    /// Combined error of the locally best candidate.
    pub local_error: u64,
    pub objective: ObjectiveBreakdown,
    pub conflicts: Vec<ConflictType>,
    pub accommodation_applied: Vec<Accommodation>,
    /// Every candidate considered, ordered by objective total.
    pub alternatives: Vec<CandidateEvaluation>,
}

impl ShadowDecision {
    pub fn has_conflict(&self, conflict: ConflictType) -> bool {
        self.conflicts.contains(&conflict)
    }

    pub(crate) fn add_conflict(&mut self, conflict: ConflictType) {
        if !self.conflicts.contains(&conflict) {
            self.conflicts.push(conflict);
            self.conflicts.sort();
        }
    }
}
