//! Pass 2: contextual resolution in onset order.

use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

use super::decision::{
    Accommodation, Candidate, CandidateEvaluation, ConflictType, ObjectiveBreakdown, ShadowDecision,
};
use super::local::LocalAnalysis;
use super::QuantizerWeights;
use crate::note::{onset_order, overlap_ticks, Note};
use crate::rhythm::RhythmFamily;

/// Final onset/duration of one note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Placement {
    pub onset: u64,
    pub duration: u64,
}

pub(super) struct Resolution {
    /// Indexed like the input notes.
    pub placements: Vec<Placement>,
    /// Input order.
    pub decisions: Vec<ShadowDecision>,
}

/// A note already placed by this pass.
#[derive(Debug, Clone)]
struct Resolved {
    index: usize,
    pitch: u8,
    onset: u64,
    duration: u64,
    quantum: f64,
    family: Option<RhythmFamily>,
}

impl Resolved {
    fn end(&self) -> u64 {
        self.onset + self.duration
    }
}

/// Which side of an overlapping pair gets shortened.
enum Shorten {
    Resolved(u64),
    Candidate(u64),
}

/// State shared by every candidate evaluation of one note.
struct Context<'a> {
    notes: &'a [Note],
    resolved: &'a [Resolved],
    local: &'a LocalAnalysis,
    dominant: Option<RhythmFamily>,
    ppq: u16,
    weights: &'a QuantizerWeights,
}

pub(super) fn resolve(
    notes: &[Note],
    locals: &[LocalAnalysis],
    ppq: u16,
    primary_family: RhythmFamily,
    weights: &QuantizerWeights,
) -> Resolution {
    let order = onset_order(notes);
    let mut resolved: Vec<Resolved> = Vec::with_capacity(notes.len());
    let mut decisions: Vec<Option<ShadowDecision>> = vec![None; notes.len()];

    for (position, &index) in order.iter().enumerate() {
        let note = &notes[index];
        let local = &locals[index];

        let dominant = dominant_family(
            position,
            &order,
            &resolved,
            locals,
            primary_family,
            weights.context_radius,
        );
        let ctx = Context {
            notes,
            resolved: &resolved,
            local,
            dominant,
            ppq,
            weights,
        };

        let mut evaluations: Vec<CandidateEvaluation> = local
            .candidates
            .iter()
            .enumerate()
            .map(|(rank, candidate)| evaluate(note, rank, candidate, &ctx))
            .collect();

        evaluations.sort_by(|a, b| {
            a.objective
                .total
                .total_cmp(&b.objective.total)
                .then(a.local_rank.cmp(&b.local_rank))
        });
        let winner = evaluations[0].clone();

        let mut duration = winner.candidate.duration;
        for accommodation in &winner.accommodations {
            if accommodation.note_id == note.id {
                duration = accommodation.new_duration;
                continue;
            }
            if let Some(other) = resolved
                .iter_mut()
                .find(|r| notes[r.index].id == accommodation.note_id)
            {
                other.duration = accommodation.new_duration;
                if let Some(decision) = decisions[other.index].as_mut() {
                    decision.add_conflict(ConflictType::UnisonOverlap);
                }
            }
        }

        trace!(
            note = %note.id,
            family = ?winner.candidate.family,
            onset = winner.candidate.onset,
            duration,
            total = winner.objective.total,
            confidence = %local.confidence,
            "resolved note"
        );

        resolved.push(Resolved {
            index,
            pitch: note.pitch,
            onset: winner.candidate.onset,
            duration,
            quantum: winner.candidate.quantum,
            family: winner.candidate.family,
        });

        decisions[index] = Some(ShadowDecision {
            note_id: note.id.clone(),
            original_onset: note.onset,
            original_duration: note.duration,
            selected_family: winner.candidate.family,
            selected_note_value: winner.candidate.note_value,
            selected_slot: winner.candidate.slot,
            selected_onset: winner.candidate.onset,
            selected_duration: duration,
            confidence: local.confidence,
            local_error: local.best().error(),
            objective: winner.objective.clone(),
            conflicts: winner.conflicts.clone(),
            accommodation_applied: winner.accommodations.clone(),
            alternatives: evaluations,
        });
    }

    let empty = Placement {
        onset: 0,
        duration: 0,
    };
    let mut placements = vec![empty; notes.len()];
    for r in &resolved {
        placements[r.index] = Placement {
            onset: r.onset,
            duration: r.duration,
        };
        // Later accommodations may have shortened an earlier decision.
        if let Some(decision) = decisions[r.index].as_mut() {
            decision.selected_onset = r.onset;
            decision.selected_duration = r.duration;
        }
    }

    Resolution {
        placements,
        decisions: decisions.into_iter().flatten().collect(),
    }
}

fn evaluate(
    note: &Note,
    rank: usize,
    candidate: &Candidate,
    ctx: &Context<'_>,
) -> CandidateEvaluation {
    let w = ctx.weights;
    let mut conflicts = BTreeSet::new();
    let mut accommodations = Vec::new();
    let mut objective = ObjectiveBreakdown::default();

    // 1. ordering
    if let Some(previous) = ctx.resolved.last() {
        if candidate.onset < previous.onset {
            objective.ordering = w.ordering;
        }
    }

    // 2. movement
    objective.movement = movement_cost(note, candidate, ctx.ppq, w);

    // 3a. same-pitch overlap, accommodated where possible
    let mut own_duration = candidate.duration;
    let mut adjusted: BTreeMap<usize, u64> = BTreeMap::new();
    for (position, other) in ctx.resolved.iter().enumerate() {
        if other.pitch != note.pitch {
            continue;
        }
        let own_end = candidate.onset + own_duration;
        if overlap_ticks(other.onset, other.end(), candidate.onset, own_end) == 0 {
            continue;
        }
        conflicts.insert(ConflictType::UnisonOverlap);

        match accommodate(other, candidate, own_duration) {
            Some(Shorten::Resolved(new_duration)) => {
                accommodations.push(Accommodation {
                    note_id: ctx.notes[other.index].id.clone(),
                    original_duration: other.duration,
                    new_duration,
                });
                adjusted.insert(position, new_duration);
                objective.overlap += w.accommodation;
            }
            Some(Shorten::Candidate(new_duration)) => {
                accommodations.push(Accommodation {
                    note_id: note.id.clone(),
                    original_duration: own_duration,
                    new_duration,
                });
                own_duration = new_duration;
                objective.overlap += w.accommodation;
            }
            None => objective.overlap += w.unresolved_overlap,
        }
    }

    // 3b. short polyphony spikes. Only spans within a beat of the changed
    // ticks can gain or lose a blip.
    let beat = ctx.ppq as u64;
    let reach = ctx
        .resolved
        .iter()
        .enumerate()
        .filter(|(position, _)| adjusted.contains_key(position))
        .map(|(_, r)| r.end())
        .fold(candidate.onset + own_duration, u64::max);
    let (lo, hi) = (candidate.onset.saturating_sub(beat), reach + beat);
    let nearby: Vec<(usize, &Resolved)> = ctx
        .resolved
        .iter()
        .enumerate()
        .filter(|(_, r)| r.onset < hi && r.end() > lo)
        .collect();

    let baseline = count_blips(nearby.iter().map(|(_, r)| (r.onset, r.end())), beat);
    let spans = nearby
        .iter()
        .map(|(position, r)| {
            let duration = adjusted.get(position).copied().unwrap_or(r.duration);
            (r.onset, r.onset + duration)
        })
        .chain(std::iter::once((candidate.onset, candidate.onset + own_duration)));
    let added = count_blips(spans, beat).saturating_sub(baseline);
    if added > 0 {
        conflicts.insert(ConflictType::PolyphonyBlip);
        objective.blip = added as f64 * w.blip_cost(ctx.local.confidence);
    }

    // 4. contextual rhythm fit
    if let (Some(family), Some(dominant)) = (candidate.family, ctx.dominant) {
        if family != dominant {
            conflicts.insert(ConflictType::ContextualRhythm);
            objective.context = w.context_cost(ctx.local.confidence);
        }
    }

    // 5. confidence-aware edit cost
    if rank > 0 {
        objective.edit = w.edit_cost(ctx.local.confidence);
    }

    CandidateEvaluation {
        local_rank: rank,
        candidate: candidate.clone(),
        objective: objective.summed(),
        conflicts: conflicts.into_iter().collect(),
        accommodations,
    }
}

fn movement_cost(note: &Note, candidate: &Candidate, ppq: u16, w: &QuantizerWeights) -> f64 {
    let ratio = candidate.duration as f64 / note.duration as f64;
    let duration_cost = if !(0.5..=2.0).contains(&ratio) {
        w.duration_out_of_range
    } else {
        w.duration_scale * ratio.log2().abs()
    };

    let shift = candidate.onset.abs_diff(note.onset) as f64;
    let limit = (ppq as f64 / 2.0).min(1.5 * candidate.duration as f64);
    let shift_cost = if shift > limit {
        w.shift_out_of_range
    } else if limit > 0.0 {
        w.shift_scale * shift / limit
    } else {
        0.0
    };

    duration_cost + shift_cost
}

/// Decide which note of an overlapping same-pitch pair to shorten.
///
/// The longer note is tried first (ties: the earlier one). A note can only be
/// cut to end at or before the other's onset, so it must start first. The cut
/// length is rounded down to whole quanta of the shortened note's grid and
/// must keep at least one.
fn accommodate(other: &Resolved, candidate: &Candidate, own_duration: u64) -> Option<Shorten> {
    let other_first = match other.duration.cmp(&own_duration) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => other.onset <= candidate.onset,
    };

    let try_other = || {
        (other.onset < candidate.onset)
            .then(|| whole_quanta(candidate.onset - other.onset, other.quantum))
            .flatten()
            .map(Shorten::Resolved)
    };
    let try_own = || {
        (candidate.onset < other.onset)
            .then(|| whole_quanta(other.onset - candidate.onset, candidate.quantum))
            .flatten()
            .map(Shorten::Candidate)
    };

    if other_first {
        try_other().or_else(try_own)
    } else {
        try_own().or_else(try_other)
    }
}

/// Largest multiple of `quantum` that fits in `gap`, if at least one does.
fn whole_quanta(gap: u64, quantum: f64) -> Option<u64> {
    let quantum = quantum.max(1.0);
    let steps = (gap as f64 / quantum).floor();
    (steps >= 1.0).then(|| (steps * quantum).round() as u64)
}

/// Majority rhythm family among up to `radius` neighbours on each side.
///
/// Neighbours already resolved vote with their chosen family, later ones with
/// their locally best family. Ties go to the primary family.
fn dominant_family(
    position: usize,
    order: &[usize],
    resolved: &[Resolved],
    locals: &[LocalAnalysis],
    primary: RhythmFamily,
    radius: usize,
) -> Option<RhythmFamily> {
    let lo = position.saturating_sub(radius);
    let hi = (position + radius).min(order.len().saturating_sub(1));

    let mut votes: BTreeMap<RhythmFamily, usize> = BTreeMap::new();
    for q in lo..=hi {
        if q == position {
            continue;
        }
        let family = if q < position {
            resolved[q].family
        } else {
            locals[order[q]].best().family
        };
        if let Some(family) = family {
            *votes.entry(family).or_default() += 1;
        }
    }

    let max = *votes.values().max()?;
    if votes.get(&primary) == Some(&max) {
        return Some(primary);
    }
    votes
        .into_iter()
        .find(|(_, count)| *count == max)
        .map(|(family, _)| family)
}

/// Count polyphony regions (two or more notes sounding) shorter than `max_len`.
fn count_blips(spans: impl Iterator<Item = (u64, u64)>, max_len: u64) -> usize {
    let mut events: Vec<(u64, i32)> = Vec::new();
    for (start, end) in spans {
        if end > start {
            events.push((start, 1));
            events.push((end, -1));
        }
    }
    // At the same tick, offsets before onsets
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut active = 0i32;
    let mut region_start: Option<u64> = None;
    let mut blips = 0;
    for (tick, delta) in events {
        let before = active;
        active += delta;
        if before < 2 && active >= 2 {
            region_start = Some(tick);
        } else if before >= 2 && active < 2 {
            if let Some(start) = region_start.take() {
                if tick - start < max_len {
                    blips += 1;
                }
            }
        }
    }
    blips
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blips_count_short_regions_only() {
        let spans = vec![(0, 480), (400, 880), (960, 2880), (960, 2880)];
        assert_eq!(count_blips(spans.into_iter(), 480), 1);
    }

    #[test]
    fn touching_notes_are_not_polyphonic() {
        let spans = vec![(0, 240), (240, 480), (480, 720)];
        assert_eq!(count_blips(spans.into_iter(), 480), 0);
    }

    #[test]
    fn dominant_prefers_primary_on_tie() {
        let resolved = vec![Resolved {
            index: 0,
            pitch: 60,
            onset: 0,
            duration: 120,
            quantum: 120.0,
            family: Some(RhythmFamily::Triple),
        }];
        let simple_local = LocalAnalysis {
            candidates: vec![Candidate {
                family: Some(RhythmFamily::Simple),
                note_value: Some(16),
                slot: None,
                quantum: 120.0,
                onset: 240,
                duration: 120,
                onset_error: 0,
                duration_error: 0,
            }],
            confidence: crate::quantize::Confidence::Certain,
            tolerance: 18.0,
        };
        let locals = vec![simple_local.clone(), simple_local.clone(), simple_local];
        let order = vec![0, 1, 2];
        assert_eq!(
            dominant_family(1, &order, &resolved, &locals, RhythmFamily::Simple, 3),
            Some(RhythmFamily::Simple)
        );
        assert_eq!(
            dominant_family(1, &order, &resolved, &locals, RhythmFamily::Quintuple, 3),
            Some(RhythmFamily::Simple)
        );
    }

    #[test]
    fn accommodation_shortens_longer_earlier_note() {
        let other = Resolved {
            index: 0,
            pitch: 60,
            onset: 0,
            duration: 480,
            quantum: 120.0,
            family: Some(RhythmFamily::Simple),
        };
        let candidate = Candidate {
            family: Some(RhythmFamily::Simple),
            note_value: Some(16),
            slot: None,
            quantum: 120.0,
            onset: 240,
            duration: 240,
            onset_error: 0,
            duration_error: 0,
        };
        assert!(matches!(
            accommodate(&other, &candidate, 240),
            Some(Shorten::Resolved(240))
        ));

        // same onset: neither can be cut
        let same_start = Candidate {
            onset: 0,
            ..candidate
        };
        assert!(accommodate(&other, &same_start, 240).is_none());
    }

    #[test]
    fn accommodation_respects_quantum_floor() {
        let other = Resolved {
            index: 0,
            pitch: 60,
            onset: 0,
            duration: 480,
            quantum: 120.0,
            family: Some(RhythmFamily::Simple),
        };
        let candidate = Candidate {
            family: Some(RhythmFamily::Simple),
            note_value: Some(16),
            slot: None,
            quantum: 120.0,
            onset: 60,
            duration: 120,
            onset_error: 0,
            duration_error: 0,
        };
        assert!(accommodate(&other, &candidate, 120).is_none());
    }

    #[test]
    fn accommodation_cut_lands_on_the_shortened_grid() {
        // a sixteenth-grid note cut by a triplet onset 520 ticks later
        let other = Resolved {
            index: 0,
            pitch: 67,
            onset: 2040,
            duration: 600,
            quantum: 120.0,
            family: Some(RhythmFamily::Simple),
        };
        let candidate = Candidate {
            family: Some(RhythmFamily::Triple),
            note_value: Some(8),
            slot: Some(crate::rhythm::RuleSlot::Secondary),
            quantum: 160.0,
            onset: 2560,
            duration: 320,
            onset_error: 0,
            duration_error: 0,
        };
        assert!(matches!(
            accommodate(&other, &candidate, 320),
            Some(Shorten::Resolved(480))
        ));
        assert_eq!(whole_quanta(520, 160.0), Some(480));
        assert_eq!(whole_quanta(107, 320.0 / 3.0), Some(107));
        assert_eq!(whole_quanta(106, 320.0 / 3.0), None);
    }

    fn certain_local(candidate: &Candidate) -> LocalAnalysis {
        LocalAnalysis {
            candidates: vec![candidate.clone()],
            confidence: crate::quantize::Confidence::Certain,
            tolerance: 18.0,
        }
    }

    fn sixteenth(onset: u64, duration: u64) -> Candidate {
        Candidate {
            family: Some(RhythmFamily::Simple),
            note_value: Some(16),
            slot: Some(crate::rhythm::RuleSlot::Primary),
            quantum: 120.0,
            onset,
            duration,
            onset_error: 0,
            duration_error: 0,
        }
    }

    #[test]
    fn starting_before_the_previous_note_pays_ordering() {
        let notes = vec![Note::new(62, 480, 120, 0.5), Note::new(60, 250, 120, 0.5)];
        let resolved = vec![Resolved {
            index: 0,
            pitch: 62,
            onset: 480,
            duration: 120,
            quantum: 120.0,
            family: Some(RhythmFamily::Simple),
        }];
        let candidate = sixteenth(240, 120);
        let local = certain_local(&candidate);
        let weights = QuantizerWeights::default();
        let ctx = Context {
            notes: &notes,
            resolved: &resolved,
            local: &local,
            dominant: Some(RhythmFamily::Simple),
            ppq: 480,
            weights: &weights,
        };

        let early = evaluate(&notes[1], 0, &candidate, &ctx);
        assert_eq!(early.objective.ordering, 1000.0);

        let later = evaluate(&notes[1], 0, &sixteenth(600, 120), &ctx);
        assert_eq!(later.objective.ordering, 0.0);
    }

    #[test]
    fn movement_thresholds() {
        let w = QuantizerWeights::default();
        let note = Note::new(60, 0, 120, 0.5);

        // duration ratio 3 is outside [0.5, 2]
        assert_eq!(movement_cost(&note, &sixteenth(0, 360), 480, &w), 20.0);
        // ratio 2 is inside: 3 × |log2 2|
        assert_eq!(movement_cost(&note, &sixteenth(0, 240), 480, &w), 3.0);
        // limit is min(240, 1.5 × 120) = 180
        assert_eq!(movement_cost(&note, &sixteenth(300, 120), 480, &w), 20.0);
        assert_eq!(movement_cost(&note, &sixteenth(90, 120), 480, &w), 3.0);
        // a long candidate lifts the limit to ppq / 2
        let long = Note::new(60, 0, 480, 0.5);
        assert_eq!(movement_cost(&long, &sixteenth(200, 480), 480, &w), 5.0);
    }

    #[test]
    fn blips_far_from_the_candidate_are_ignored() {
        // an existing blip at 0..60 and a clean candidate four beats later
        let notes = vec![
            Note::new(60, 0, 480, 0.5),
            Note::new(64, 420, 480, 0.5),
            Note::new(67, 1920, 120, 0.5),
        ];
        let resolved = vec![
            Resolved {
                index: 0,
                pitch: 60,
                onset: 0,
                duration: 480,
                quantum: 120.0,
                family: Some(RhythmFamily::Simple),
            },
            Resolved {
                index: 1,
                pitch: 64,
                onset: 420,
                duration: 480,
                quantum: 120.0,
                family: Some(RhythmFamily::Simple),
            },
        ];
        let candidate = sixteenth(1920, 120);
        let local = certain_local(&candidate);
        let weights = QuantizerWeights::default();
        let ctx = Context {
            notes: &notes,
            resolved: &resolved,
            local: &local,
            dominant: Some(RhythmFamily::Simple),
            ppq: 480,
            weights: &weights,
        };
        let clean = evaluate(&notes[2], 0, &candidate, &ctx);
        assert_eq!(clean.objective.blip, 0.0);

        // starting inside the tail of the second note makes a new spike
        let spiking = evaluate(&notes[2], 0, &sixteenth(840, 120), &ctx);
        assert!(spiking.conflicts.contains(&ConflictType::PolyphonyBlip));
        assert_eq!(spiking.objective.blip, 6.0);
    }
}
