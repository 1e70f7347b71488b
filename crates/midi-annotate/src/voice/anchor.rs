use std::collections::BTreeMap;

use super::density::DensityProfile;
use super::{AssignmentPhase, Lanes, VoiceExplanation};
use crate::note::{Note, NoteId};

/// Assign notes in saturated slices of sustained regions by pitch rank.
///
/// Rank `r` (0 = highest pitch) goes to voice `r` when the note is still
/// unassigned and the voice has nothing overlapping it. Returns how many
/// notes were anchored.
pub(super) fn assign_anchors(
    notes: &[Note],
    profile: &DensityProfile,
    target: usize,
    tolerance: u64,
    lanes: &mut Lanes,
    explanations: &mut BTreeMap<NoteId, VoiceExplanation>,
) -> usize {
    let mut anchored = 0;

    for slice in profile
        .slices
        .iter()
        .filter(|s| s.count() >= target && profile.in_sustained_region(s))
    {
        let mut ranked = slice.active.clone();
        ranked.sort_by(|&a, &b| {
            notes[b]
                .pitch
                .cmp(&notes[a].pitch)
                .then_with(|| notes[a].id.cmp(&notes[b].id))
        });

        for (rank, &index) in ranked.iter().take(target).enumerate() {
            let note = &notes[index];
            if explanations.contains_key(&note.id) || lanes.overlaps(rank, note, notes, tolerance) {
                continue;
            }
            lanes.insert(rank, index, notes);
            explanations.insert(
                note.id.clone(),
                VoiceExplanation {
                    phase: AssignmentPhase::Anchor,
                    voice: Some(rank),
                    anchor_rank: Some(rank),
                    cost: None,
                    candidates: Vec::new(),
                },
            );
            anchored += 1;
        }
    }
    anchored
}
