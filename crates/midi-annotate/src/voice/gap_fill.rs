use std::collections::BTreeMap;
use tracing::trace;

use super::cost::CostContext;
use super::{AssignmentPhase, Lanes, VoiceCandidate, VoiceExplanation, VoiceOptions};
use crate::note::{Note, NoteId};

/// Place every note without an explanation yet; return the orphans' indices.
pub(super) fn fill_gaps(
    notes: &[Note],
    ppq: u16,
    options: &VoiceOptions,
    lanes: &mut Lanes,
    explanations: &mut BTreeMap<NoteId, VoiceExplanation>,
) -> Vec<usize> {
    let mut by_onset: Vec<usize> = (0..notes.len()).collect();
    by_onset.sort_by(|&a, &b| {
        notes[a]
            .onset
            .cmp(&notes[b].onset)
            .then(notes[b].pitch.cmp(&notes[a].pitch))
            .then_with(|| notes[a].id.cmp(&notes[b].id))
    });

    let pending: Vec<usize> = by_onset
        .iter()
        .copied()
        .filter(|&i| !explanations.contains_key(&notes[i].id))
        .collect();

    let zone_centres = zone_centres(notes, lanes.count());
    let mut orphans = Vec::new();

    for index in pending {
        let candidates: Vec<VoiceCandidate> = {
            let ctx = CostContext {
                notes,
                lanes: &*lanes,
                by_onset: &by_onset,
                ppq,
                measure: options.measure_ticks(ppq),
                tolerance: options.tolerance(ppq),
                strict: options.disable_chords,
                pitch_bias: options.pitch_bias,
                zone_centres: &zone_centres,
                config: &options.cost,
            };
            (0..lanes.count())
                .map(|voice| match ctx.cost(voice, index) {
                    Ok(cost) => VoiceCandidate {
                        voice,
                        cost: Some(cost),
                        excluded: None,
                    },
                    Err(exclusion) => VoiceCandidate {
                        voice,
                        cost: None,
                        excluded: Some(exclusion),
                    },
                })
                .collect()
        };

        let best = candidates
            .iter()
            .filter_map(|c| c.cost.as_ref().map(|cost| (c.voice, cost)))
            .min_by(|a, b| a.1.total.total_cmp(&b.1.total).then(a.0.cmp(&b.0)))
            .filter(|(_, cost)| cost.total <= options.orphan_cost_threshold)
            .map(|(voice, cost)| (voice, cost.clone()));

        let note = &notes[index];
        let explanation = match best {
            Some((voice, cost)) => {
                trace!(note = %note.id, voice, cost = cost.total, "gap fill");
                lanes.insert(voice, index, notes);
                VoiceExplanation {
                    phase: AssignmentPhase::GapFill,
                    voice: Some(voice),
                    anchor_rank: None,
                    cost: Some(cost),
                    candidates,
                }
            }
            None => {
                trace!(note = %note.id, "orphaned");
                orphans.push(index);
                VoiceExplanation {
                    phase: AssignmentPhase::Orphan,
                    voice: None,
                    anchor_rank: None,
                    cost: None,
                    candidates,
                }
            }
        };
        explanations.insert(note.id.clone(), explanation);
    }
    orphans
}

/// Evenly spaced register centres across the piece's pitch range.
fn zone_centres(notes: &[Note], voices: usize) -> Vec<f64> {
    let lo = notes.iter().map(|n| n.pitch).min().unwrap_or(60) as f64;
    let hi = notes.iter().map(|n| n.pitch).max().unwrap_or(60) as f64;
    let width = (hi - lo) / voices.max(1) as f64;
    (0..voices).map(|v| hi - (v as f64 + 0.5) * width).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zones_descend_from_the_top() {
        let notes = vec![Note::new(40, 0, 480, 0.5), Note::new(80, 0, 480, 0.5)];
        assert_eq!(zone_centres(&notes, 2), vec![70.0, 50.0]);
        assert_eq!(zone_centres(&notes, 1), vec![60.0]);
    }

    #[test]
    fn empty_voices_pick_the_nearest_zone() {
        let notes = crate::note::identify(&[
            Note::new(40, 0, 480, 0.5),
            Note::new(80, 0, 480, 0.5),
        ]);
        let mut lanes = Lanes::new(2);
        let mut explanations = BTreeMap::new();
        let options = VoiceOptions::default();
        let orphans = fill_gaps(&notes, 480, &options, &mut lanes, &mut explanations);

        assert!(orphans.is_empty());
        assert_eq!(lanes.lane(0), &[1]);
        assert_eq!(lanes.lane(1), &[0]);
    }
}
