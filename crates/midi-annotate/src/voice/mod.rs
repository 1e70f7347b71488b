//! Voice distribution: partition a polyphonic stream into bounded voices.
//!
//! 1. [`analyze_density`] finds the largest polyphony sustained for a measure,
//!    which becomes the target voice count.
//! 2. Anchors: fully saturated time slices inside sustained regions hand
//!    their notes to voices by pitch rank.
//! 3. Gap filling: every remaining note goes to the cheapest voice, or
//!    becomes an orphan when no voice can take it at a reasonable cost.

mod anchor;
mod cost;
mod density;
mod gap_fill;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::note::{identify, Note, NoteId};

pub use cost::{CostBreakdown, VoiceCostConfig};
pub use density::{analyze_density, DensityProfile, DensitySlice};

/// Knobs for voice separation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceOptions {
    /// Overlap (ticks) still treated as sequential. 0 = ppq / 16.
    pub overlap_tolerance_ticks: u64,
    /// Strict monophony: a voice never holds two overlapping notes.
    pub disable_chords: bool,
    /// Scale of the register-continuity tie-breaker.
    pub pitch_bias: f64,
    /// Upper bound on the number of voices.
    pub max_voices: Option<usize>,
    /// Notes whose cheapest placement costs more than this become orphans.
    pub orphan_cost_threshold: f64,
    pub beats_per_measure: u32,
    pub cost: VoiceCostConfig,
}

impl Default for VoiceOptions {
    fn default() -> Self {
        Self {
            overlap_tolerance_ticks: 0,
            disable_chords: false,
            pitch_bias: 1.0,
            max_voices: None,
            orphan_cost_threshold: 60.0,
            beats_per_measure: 4,
            cost: VoiceCostConfig::default(),
        }
    }
}

impl VoiceOptions {
    pub fn tolerance(&self, ppq: u16) -> u64 {
        match self.overlap_tolerance_ticks {
            0 => ppq as u64 / 16,
            ticks => ticks,
        }
    }

    pub fn measure_ticks(&self, ppq: u16) -> u64 {
        ppq as u64 * self.beats_per_measure.max(1) as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentPhase {
    /// Placed by pitch rank in a saturated slice.
    Anchor,
    /// Placed by cost minimisation.
    GapFill,
    /// Not placed in any voice.
    Orphan,
    /// Degenerate input: everything in one voice.
    SingleVoice,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusion {
    /// Strict monophony and the voice already sounds at this time.
    StrictOverlap,
    /// Adjacent voice is within the hard crossing clearance.
    CrossingGuard,
}

/// How one voice scored for a note during gap filling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceCandidate {
    pub voice: usize,
    pub cost: Option<CostBreakdown>,
    pub excluded: Option<Exclusion>,
}

/// Traceability record for one note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceExplanation {
    pub phase: AssignmentPhase,
    pub voice: Option<usize>,
    /// Pitch rank within the anchoring slice.
    pub anchor_rank: Option<usize>,
    pub cost: Option<CostBreakdown>,
    pub candidates: Vec<VoiceCandidate>,
}

impl VoiceExplanation {
    fn single_voice() -> Self {
        Self {
            phase: AssignmentPhase::SingleVoice,
            voice: Some(0),
            anchor_rank: None,
            cost: None,
            candidates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceDistributionResult {
    /// Voice 0 is the highest. Notes sorted by onset, then pitch descending.
    pub voices: Vec<Vec<Note>>,
    /// Unplaced notes, unchanged, in onset order.
    pub orphans: Vec<Note>,
    pub explanations: BTreeMap<NoteId, VoiceExplanation>,
    pub target_voices: usize,
}

impl VoiceDistributionResult {
    pub fn voice_of(&self, id: &NoteId) -> Option<usize> {
        self.explanations.get(id).and_then(|e| e.voice)
    }

    pub fn is_orphan(&self, id: &NoteId) -> bool {
        self.orphans.iter().any(|n| &n.id == id)
    }

    pub fn note_count(&self) -> usize {
        self.voices.iter().map(Vec::len).sum::<usize>() + self.orphans.len()
    }
}

/// Voice membership as note indices, each lane kept in onset order.
#[derive(Debug, Clone)]
pub(crate) struct Lanes {
    lanes: Vec<Vec<usize>>,
}

impl Lanes {
    fn new(count: usize) -> Self {
        Self {
            lanes: vec![Vec::new(); count],
        }
    }

    pub fn count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, voice: usize) -> &[usize] {
        &self.lanes[voice]
    }

    pub fn insert(&mut self, voice: usize, index: usize, notes: &[Note]) {
        let lane = &mut self.lanes[voice];
        let key = |i: usize| (notes[i].onset, std::cmp::Reverse(notes[i].pitch));
        let position = lane.partition_point(|&i| key(i) <= key(index));
        lane.insert(position, index);
    }

    /// Does any note in `voice` overlap `note` by more than `tolerance`?
    pub fn overlaps(&self, voice: usize, note: &Note, notes: &[Note], tolerance: u64) -> bool {
        self.lanes[voice]
            .iter()
            .any(|&i| notes[i].overlaps(note, tolerance))
    }
}

/// Partition `notes` into voices and orphans.
pub fn distribute_voices(
    notes: &[Note],
    ppq: u16,
    options: &VoiceOptions,
) -> VoiceDistributionResult {
    let notes = identify(notes);

    if notes.is_empty() {
        return VoiceDistributionResult {
            voices: Vec::new(),
            orphans: Vec::new(),
            explanations: BTreeMap::new(),
            target_voices: 0,
        };
    }

    let measure = options.measure_ticks(ppq);
    let profile = analyze_density(&notes, ppq, measure);
    let target = match options.max_voices {
        Some(max) => profile.sustained_density.min(max.max(1)),
        None => profile.sustained_density,
    };

    if target == 0 {
        let mut everything = notes.clone();
        sort_voice(&mut everything);
        let explanations = notes
            .iter()
            .map(|n| (n.id.clone(), VoiceExplanation::single_voice()))
            .collect();
        return VoiceDistributionResult {
            voices: vec![everything],
            orphans: Vec::new(),
            explanations,
            target_voices: 1,
        };
    }

    let tolerance = options.tolerance(ppq);
    let mut lanes = Lanes::new(target);
    let mut explanations: BTreeMap<NoteId, VoiceExplanation> = BTreeMap::new();

    let anchored = anchor::assign_anchors(
        &notes,
        &profile,
        target,
        tolerance,
        &mut lanes,
        &mut explanations,
    );

    let orphan_indices =
        gap_fill::fill_gaps(&notes, ppq, options, &mut lanes, &mut explanations);

    let voices: Vec<Vec<Note>> = (0..lanes.count())
        .map(|v| lanes.lane(v).iter().map(|&i| notes[i].clone()).collect())
        .collect();
    let mut orphans: Vec<Note> = orphan_indices.iter().map(|&i| notes[i].clone()).collect();
    sort_voice(&mut orphans);

    debug!(
        notes = notes.len(),
        target,
        max_density = profile.max_density,
        anchored,
        orphans = orphans.len(),
        "voice distribution complete"
    );

    VoiceDistributionResult {
        voices,
        orphans,
        explanations,
        target_voices: target,
    }
}

fn sort_voice(notes: &mut [Note]) {
    notes.sort_by(|a, b| {
        a.onset
            .cmp(&b.onset)
            .then(b.pitch.cmp(&a.pitch))
            .then_with(|| a.id.cmp(&b.id))
    });
}
