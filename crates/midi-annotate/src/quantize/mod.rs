//! Shadow quantization: grid snapping with full decision provenance.
//!
//! Pass 1 ([`local_candidates`]) proposes one grid placement per enabled
//! rhythm rule and classifies how sure it is. Pass 2 walks the notes in onset
//! order and may override the locally best placement when it would create
//! unison overlaps, short polyphony blips or rhythm-family inconsistency.

mod decision;
mod local;
mod resolve;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::note::{identify, Note, NoteId};
use crate::rhythm::{RhythmRule, RuleSlot};

pub use decision::{
    Accommodation, Candidate, CandidateEvaluation, Confidence, ConflictType,
    ObjectiveBreakdown, ShadowDecision,
};
pub use local::{classify, local_candidates, tolerance_ticks, LocalAnalysis};

/// Weights of the contextual objective.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerWeights {
    /// Candidate would start before the previously resolved note.
    pub ordering: f64,
    /// Duration ratio outside `[0.5, 2]`.
    pub duration_out_of_range: f64,
    /// Scale of `|log2 ratio|` inside the allowed duration band.
    pub duration_scale: f64,
    /// Onset shift beyond `min(ppq/2, 1.5 × duration)`.
    pub shift_out_of_range: f64,
    pub shift_scale: f64,
    /// Same-pitch overlap removed by shortening one note.
    pub accommodation: f64,
    /// Same-pitch overlap that could not be accommodated.
    pub unresolved_overlap: f64,
    pub blip_certain: f64,
    pub blip_uncertain: f64,
    pub context_certain: f64,
    pub context_uncertain: f64,
    pub edit_certain: f64,
    pub edit_weak_primary: f64,
    pub edit_ambiguous: f64,
    /// Neighbours considered on each side for the dominant family.
    pub context_radius: usize,
}

impl Default for QuantizerWeights {
    fn default() -> Self {
        Self {
            ordering: 1000.0,
            duration_out_of_range: 20.0,
            duration_scale: 3.0,
            shift_out_of_range: 20.0,
            shift_scale: 6.0,
            accommodation: 2.0,
            unresolved_overlap: 25.0,
            blip_certain: 6.0,
            blip_uncertain: 2.0,
            context_certain: 4.0,
            context_uncertain: 1.0,
            edit_certain: 35.0,
            edit_weak_primary: 14.0,
            edit_ambiguous: 4.0,
            context_radius: 3,
        }
    }
}

impl QuantizerWeights {
    pub fn edit_cost(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::Certain => self.edit_certain,
            Confidence::WeakPrimary => self.edit_weak_primary,
            Confidence::Ambiguous => self.edit_ambiguous,
        }
    }

    pub fn blip_cost(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::Certain => self.blip_certain,
            Confidence::WeakPrimary | Confidence::Ambiguous => self.blip_uncertain,
        }
    }

    pub fn context_cost(&self, confidence: Confidence) -> f64 {
        match confidence {
            Confidence::Certain => self.context_certain,
            Confidence::WeakPrimary | Confidence::Ambiguous => self.context_uncertain,
        }
    }
}

/// Quantized notes (input order, ids assigned) and their decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizeOutcome {
    pub notes: Vec<Note>,
    /// Empty when the primary rule is disabled.
    pub decisions: BTreeMap<NoteId, ShadowDecision>,
}

impl QuantizeOutcome {
    pub fn decision(&self, id: &NoteId) -> Option<&ShadowDecision> {
        self.decisions.get(id)
    }
}

/// Snap onsets and durations to the primary (and optional secondary) grid.
pub fn shadow_quantize(
    notes: &[Note],
    ppq: u16,
    primary: &RhythmRule,
    secondary: &RhythmRule,
    weights: &QuantizerWeights,
) -> QuantizeOutcome {
    let identified = identify(notes);

    if !primary.enabled || identified.is_empty() {
        return QuantizeOutcome {
            notes: identified,
            decisions: BTreeMap::new(),
        };
    }

    let rules = [(RuleSlot::Primary, *primary), (RuleSlot::Secondary, *secondary)];
    let locals: Vec<LocalAnalysis> = identified
        .iter()
        .map(|note| local_candidates(note, ppq, &rules, Some(primary.family)))
        .collect();

    let resolution = resolve::resolve(&identified, &locals, ppq, primary.family, weights);

    let mut quantized = identified;
    for (index, placement) in resolution.placements.iter().enumerate() {
        quantized[index].onset = placement.onset;
        quantized[index].duration = placement.duration;
    }

    let moved = resolution
        .decisions
        .iter()
        .filter(|d| {
            d.selected_onset != d.original_onset || d.selected_duration != d.original_duration
        })
        .count();
    debug!(
        notes = quantized.len(),
        moved,
        primary = %primary,
        secondary = %secondary,
        "shadow quantization complete"
    );

    let decisions = resolution
        .decisions
        .into_iter()
        .map(|d| (d.note_id.clone(), d))
        .collect();

    QuantizeOutcome {
        notes: quantized,
        decisions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rhythm::RhythmFamily;

    fn sixteenths() -> RhythmRule {
        RhythmRule::new(RhythmFamily::Simple, 16)
    }

    #[test]
    fn disabled_primary_is_passthrough() {
        let notes = vec![Note::new(60, 13, 101, 0.5), Note::new(62, 130, 97, 0.5)];
        let outcome = shadow_quantize(
            &notes,
            480,
            &RhythmRule::disabled(),
            &RhythmRule::new(RhythmFamily::Triple, 8),
            &QuantizerWeights::default(),
        );
        assert!(outcome.decisions.is_empty());
        assert_eq!(outcome.notes[0].onset, 13);
        assert_eq!(outcome.notes[1].duration, 97);
    }

    #[test]
    fn empty_input() {
        let outcome = shadow_quantize(
            &[],
            480,
            &sixteenths(),
            &RhythmRule::disabled(),
            &QuantizerWeights::default(),
        );
        assert!(outcome.notes.is_empty());
        assert!(outcome.decisions.is_empty());
    }

    #[test]
    fn snaps_slightly_late_notes() {
        let notes = vec![
            Note::new(60, 7, 115, 0.5),
            Note::new(62, 124, 118, 0.5),
            Note::new(64, 236, 121, 0.5),
        ];
        let outcome = shadow_quantize(
            &notes,
            480,
            &sixteenths(),
            &RhythmRule::disabled(),
            &QuantizerWeights::default(),
        );
        let onsets: Vec<u64> = outcome.notes.iter().map(|n| n.onset).collect();
        assert_eq!(onsets, vec![0, 120, 240]);
        assert!(outcome.notes.iter().all(|n| n.duration == 120));
        assert!(outcome
            .decisions
            .values()
            .all(|d| d.confidence == Confidence::Certain));
    }

    #[test]
    fn weights_scale_by_confidence() {
        let w = QuantizerWeights::default();
        assert_eq!(w.edit_cost(Confidence::Certain), 35.0);
        assert_eq!(w.edit_cost(Confidence::WeakPrimary), 14.0);
        assert_eq!(w.edit_cost(Confidence::Ambiguous), 4.0);
        assert!(w.blip_cost(Confidence::Certain) > w.blip_cost(Confidence::Ambiguous));
        assert!(w.context_cost(Confidence::Certain) > w.context_cost(Confidence::WeakPrimary));
    }
}
