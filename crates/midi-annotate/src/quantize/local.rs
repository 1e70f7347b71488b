//! Pass 1: per-note candidate generation and confidence classification.

use serde::{Deserialize, Serialize};

use super::decision::{Candidate, Confidence};
use crate::note::Note;
use crate::rhythm::{RhythmFamily, RhythmRule, RuleSlot};

/// Absolute error tolerance floor, in ticks.
const MIN_TOLERANCE_TICKS: f64 = 5.0;
/// Tolerance as a fraction of the smallest enabled quantum.
const TOLERANCE_QUANTUM_FRACTION: f64 = 0.15;

/// Ranked candidates and confidence for a single note.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalAnalysis {
    /// Best first.
    pub candidates: Vec<Candidate>,
    pub confidence: Confidence,
    pub tolerance: f64,
}

impl LocalAnalysis {
    pub fn best(&self) -> &Candidate {
        &self.candidates[0]
    }
}

/// Error tolerance for a set of rules: `max(0.15 × smallest quantum, 5)` ticks.
pub fn tolerance_ticks(rules: &[(RuleSlot, RhythmRule)], ppq: u16) -> f64 {
    rules
        .iter()
        .filter(|(_, rule)| rule.enabled)
        .map(|(_, rule)| rule.quantum_ticks(ppq))
        .min_by(|a, b| a.total_cmp(b))
        .map(|quantum| (TOLERANCE_QUANTUM_FRACTION * quantum).max(MIN_TOLERANCE_TICKS))
        .unwrap_or(MIN_TOLERANCE_TICKS)
}

fn candidate_for(note: &Note, slot: RuleSlot, rule: &RhythmRule, ppq: u16) -> Candidate {
    let onset = rule.snap(note.onset, ppq);
    let duration = rule.snap_duration(note.duration, ppq);
    Candidate {
        family: Some(rule.family),
        note_value: Some(rule.min_note_value),
        slot: Some(slot),
        quantum: rule.quantum_ticks(ppq),
        onset,
        duration,
        onset_error: onset.abs_diff(note.onset),
        duration_error: duration.abs_diff(note.duration),
    }
}

fn passthrough(note: &Note) -> Candidate {
    Candidate {
        family: None,
        note_value: None,
        slot: None,
        quantum: 1.0,
        onset: note.onset,
        duration: note.duration,
        onset_error: 0,
        duration_error: 0,
    }
}

/// Generate and rank grid candidates for one note.
///
/// Candidates are ordered by combined error, then onset error, then rule
/// slot (Primary first).
pub fn local_candidates(
    note: &Note,
    ppq: u16,
    rules: &[(RuleSlot, RhythmRule)],
    primary_family: Option<RhythmFamily>,
) -> LocalAnalysis {
    let mut candidates: Vec<Candidate> = rules
        .iter()
        .filter(|(_, rule)| rule.enabled)
        .map(|(slot, rule)| candidate_for(note, *slot, rule, ppq))
        .collect();

    if candidates.is_empty() {
        candidates.push(passthrough(note));
    }

    candidates.sort_by(|a, b| {
        a.error()
            .cmp(&b.error())
            .then(a.onset_error.cmp(&b.onset_error))
            .then(a.slot.cmp(&b.slot))
    });

    let tolerance = tolerance_ticks(rules, ppq);
    let confidence = classify(&candidates, tolerance, primary_family);

    LocalAnalysis {
        candidates,
        confidence,
        tolerance,
    }
}

/// Confidence of the best candidate given the runner-up.
pub fn classify(
    ranked: &[Candidate],
    tolerance: f64,
    primary_family: Option<RhythmFamily>,
) -> Confidence {
    let Some(best) = ranked.first() else {
        return Confidence::Ambiguous;
    };
    let best_error = best.error() as f64;

    if best_error <= tolerance {
        return Confidence::Certain;
    }

    match ranked.get(1) {
        None => Confidence::WeakPrimary,
        Some(second) if best_error <= 0.5 * second.error() as f64 => Confidence::WeakPrimary,
        Some(_) if best.family.is_some() && best.family == primary_family => {
            Confidence::WeakPrimary
        }
        Some(_) => Confidence::Ambiguous,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> Vec<(RuleSlot, RhythmRule)> {
        vec![
            (RuleSlot::Primary, RhythmRule::new(RhythmFamily::Simple, 16)),
            (RuleSlot::Secondary, RhythmRule::new(RhythmFamily::Triple, 8)),
        ]
    }

    #[test]
    fn tolerance_uses_smallest_quantum() {
        assert_eq!(tolerance_ticks(&rules(), 480), 18.0);
        assert_eq!(tolerance_ticks(&[], 480), 5.0);
        // 0.15 × 7.5 falls under the floor
        let tiny = vec![(RuleSlot::Primary, RhythmRule::new(RhythmFamily::Simple, 64))];
        assert_eq!(tolerance_ticks(&tiny, 120), 5.0);
    }

    #[test]
    fn exact_sixteenth_is_certain() {
        let note = Note::new(60, 240, 120, 0.5);
        let local = local_candidates(&note, 480, &rules(), Some(RhythmFamily::Simple));
        assert_eq!(local.confidence, Confidence::Certain);
        assert_eq!(local.best().family, Some(RhythmFamily::Simple));
        assert_eq!(local.candidates.len(), 2);
    }

    #[test]
    fn error_within_tolerance_is_always_certain() {
        // 10 ticks late: within 18 even though the triplet grid is far
        let note = Note::new(60, 250, 120, 0.5);
        let local = local_candidates(&note, 480, &rules(), Some(RhythmFamily::Simple));
        assert_eq!(local.best().error(), 10);
        assert_eq!(local.confidence, Confidence::Certain);
    }

    #[test]
    fn tie_prefers_exact_onset() {
        let note = Note::new(60, 320, 110, 0.5);
        let local = local_candidates(&note, 480, &rules(), Some(RhythmFamily::Simple));
        assert_eq!(local.best().family, Some(RhythmFamily::Triple));
        assert_eq!(local.best().onset, 320);
        assert_eq!(local.candidates[1].error(), 50);
        assert_eq!(local.confidence, Confidence::Ambiguous);
    }

    #[test]
    fn primary_family_bias_downgrades_ambiguity() {
        let simple = Candidate {
            family: Some(RhythmFamily::Simple),
            note_value: Some(16),
            slot: Some(RuleSlot::Primary),
            quantum: 120.0,
            onset: 0,
            duration: 120,
            onset_error: 30,
            duration_error: 0,
        };
        let triple = Candidate {
            family: Some(RhythmFamily::Triple),
            slot: Some(RuleSlot::Secondary),
            onset_error: 40,
            ..simple.clone()
        };
        let ranked = vec![simple, triple];
        assert_eq!(
            classify(&ranked, 18.0, Some(RhythmFamily::Simple)),
            Confidence::WeakPrimary
        );
        assert_eq!(
            classify(&ranked, 18.0, Some(RhythmFamily::Triple)),
            Confidence::Ambiguous
        );
    }

    #[test]
    fn close_runner_up_versus_single_rule() {
        let note = Note::new(60, 330, 120, 0.5);
        // simple: 30 + 0, triple: 10 + 40; 30 is not within half of 50
        let local = local_candidates(&note, 480, &rules(), Some(RhythmFamily::Triple));
        assert_eq!(local.best().family, Some(RhythmFamily::Simple));
        assert_eq!(local.confidence, Confidence::Ambiguous);

        let single = vec![(RuleSlot::Primary, RhythmRule::new(RhythmFamily::Simple, 16))];
        let local = local_candidates(&note, 480, &single, Some(RhythmFamily::Simple));
        assert_eq!(local.confidence, Confidence::WeakPrimary);
    }

    #[test]
    fn no_rules_yields_passthrough() {
        let note = Note::new(60, 333, 77, 0.5);
        let local = local_candidates(&note, 480, &[], None);
        assert_eq!(local.candidates.len(), 1);
        assert_eq!(local.best().family, None);
        assert_eq!(local.best().onset, 333);
        assert_eq!(local.confidence, Confidence::Certain);
    }
}
