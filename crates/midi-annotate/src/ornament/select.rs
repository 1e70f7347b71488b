use std::collections::HashSet;

use super::{AmbiguityTag, OrnamentClass, OrnamentHypothesis, OrnamentParams};

/// Confidence multiplier for a hypothesis whose beat placement contradicts its class.
const TIMING_CONFLICT_FACTOR: f64 = 0.85;

/// Tag hypotheses whose observed beat alignment contradicts the class prior.
///
/// Mordents, turns and grace groups expect the principal on the beat (the
/// figure leads into it); trills expect their first note on the beat.
pub(super) fn apply_timing_priors(hypotheses: &mut [OrnamentHypothesis], params: &OrnamentParams) {
    for hypothesis in hypotheses.iter_mut() {
        let anchor = match hypothesis.class {
            OrnamentClass::GraceGroup | OrnamentClass::Mordent | OrnamentClass::Turn => {
                hypothesis.timing.end
            }
            OrnamentClass::Trill => hypothesis.timing.start,
        };

        if !params.is_on_beat(anchor) {
            hypothesis.tag(AmbiguityTag::TimingPriorConflict);
            hypothesis.confidence *= TIMING_CONFLICT_FACTOR;
        }
    }
}

/// Cross-tag hypotheses that compete for the same time window.
pub(super) fn tag_competing(hypotheses: &mut [OrnamentHypothesis]) {
    let mut competing = vec![false; hypotheses.len()];

    for i in 0..hypotheses.len() {
        for j in (i + 1)..hypotheses.len() {
            let (a, b) = (&hypotheses[i], &hypotheses[j]);
            if !a.timing.intersects(&b.timing) {
                continue;
            }
            if a.class != b.class || a.members == b.members {
                competing[i] = true;
                competing[j] = true;
            }
        }
    }

    for (hypothesis, is_competing) in hypotheses.iter_mut().zip(competing) {
        if is_competing {
            hypothesis.tag(AmbiguityTag::CompetingHypothesis);
        }
    }
}

/// Indices ordered by confidence descending; ties by start tick, class, principal.
pub(super) fn rank(hypotheses: &[OrnamentHypothesis]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..hypotheses.len()).collect();
    order.sort_by(|&a, &b| {
        let (ha, hb) = (&hypotheses[a], &hypotheses[b]);
        hb.confidence
            .total_cmp(&ha.confidence)
            .then(ha.timing.start.cmp(&hb.timing.start))
            .then(ha.class.cmp(&hb.class))
            .then_with(|| ha.principal.cmp(&hb.principal))
    });
    order
}

/// Greedy selection in the given order: accept a hypothesis only when none
/// of its members has been claimed by an earlier acceptance.
///
/// Returns accepted indices in acceptance order.
pub fn select_non_overlapping(hypotheses: &[OrnamentHypothesis], order: &[usize]) -> Vec<usize> {
    let mut claimed = HashSet::new();
    let mut accepted = Vec::new();

    for &index in order {
        let hypothesis = &hypotheses[index];
        if hypothesis.members.iter().any(|id| claimed.contains(id)) {
            continue;
        }
        claimed.extend(hypothesis.members.iter().cloned());
        accepted.push(index);
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::note::NoteId;
    use crate::ornament::TimingBounds;

    fn hypothesis(
        class: OrnamentClass,
        members: &[&str],
        confidence: f64,
        start: u64,
    ) -> OrnamentHypothesis {
        OrnamentHypothesis {
            class,
            principal: NoteId::new(*members.last().unwrap()),
            members: members.iter().map(|m| NoteId::new(*m)).collect(),
            timing: TimingBounds {
                start,
                end: start + 100,
            },
            confidence,
            tags: Vec::new(),
        }
    }

    #[test]
    fn greedy_prefers_confidence_and_skips_claimed() {
        let hypotheses = vec![
            hypothesis(OrnamentClass::GraceGroup, &["a", "b"], 0.7, 0),
            hypothesis(OrnamentClass::Mordent, &["b", "c", "d"], 0.9, 0),
            hypothesis(OrnamentClass::GraceGroup, &["e", "f"], 0.6, 500),
        ];
        let order = rank(&hypotheses);
        assert_eq!(order, vec![1, 0, 2]);
        assert_eq!(select_non_overlapping(&hypotheses, &order), vec![1, 2]);
    }

    #[test]
    fn selection_follows_given_order() {
        let hypotheses = vec![
            hypothesis(OrnamentClass::GraceGroup, &["a", "b"], 0.7, 0),
            hypothesis(OrnamentClass::Mordent, &["b", "c"], 0.9, 0),
        ];
        assert_eq!(select_non_overlapping(&hypotheses, &[0, 1]), vec![0]);
    }

    #[test]
    fn equal_confidence_breaks_by_start() {
        let hypotheses = vec![
            hypothesis(OrnamentClass::GraceGroup, &["x", "y"], 0.8, 200),
            hypothesis(OrnamentClass::GraceGroup, &["p", "q"], 0.8, 100),
        ];
        assert_eq!(rank(&hypotheses), vec![1, 0]);
    }

    #[test]
    fn cross_class_windows_compete() {
        let mut hypotheses = vec![
            hypothesis(OrnamentClass::GraceGroup, &["a", "b"], 0.8, 0),
            hypothesis(OrnamentClass::Mordent, &["c", "d"], 0.8, 50),
            hypothesis(OrnamentClass::GraceGroup, &["e", "f"], 0.8, 60),
        ];
        tag_competing(&mut hypotheses);
        assert!(hypotheses
            .iter()
            .all(|h| h.tags.contains(&AmbiguityTag::CompetingHypothesis)));
    }

    #[test]
    fn timing_conflict_lowers_confidence() {
        let params = OrnamentParams::new(480, 120.0);
        let mut hypotheses = vec![hypothesis(OrnamentClass::Mordent, &["a", "b"], 0.9, 100)];
        // end = 200: off the beat
        apply_timing_priors(&mut hypotheses, &params);
        assert!(hypotheses[0].tags.contains(&AmbiguityTag::TimingPriorConflict));
        assert!((hypotheses[0].confidence - 0.765).abs() < 1e-9);
    }
}
