//! Pattern predicates over consecutive notes of an onset-sorted sequence.

use super::{OrnamentClass, OrnamentHypothesis, OrnamentParams, TimingBounds};
use crate::note::Note;

/// A pattern match expressed as indices into the sorted note slice.
#[derive(Debug, Clone)]
pub(super) struct PatternMatch {
    pub class: OrnamentClass,
    pub principal: usize,
    pub members: Vec<usize>,
    pub timing: TimingBounds,
    pub confidence: f64,
}

impl PatternMatch {
    pub fn into_hypothesis(self, notes: &[Note]) -> OrnamentHypothesis {
        let mut tags = Vec::new();
        if self.class == OrnamentClass::Trill {
            tags.push(super::AmbiguityTag::TrillIsPrincipal);
        }
        OrnamentHypothesis {
            class: self.class,
            principal: notes[self.principal].id.clone(),
            members: self.members.iter().map(|&i| notes[i].id.clone()).collect(),
            timing: self.timing,
            confidence: self.confidence.clamp(0.0, 1.0),
            tags,
        }
    }
}

pub(super) fn find_all(notes: &[Note], params: &OrnamentParams) -> Vec<PatternMatch> {
    let mut matches = grace_groups(notes, params);
    matches.extend(mordents(notes, params));
    matches.extend(turns(notes, params));
    matches.extend(trills(notes, params));
    matches
}

fn semitones(a: &Note, b: &Note) -> u8 {
    a.pitch.abs_diff(b.pitch)
}

/// Onsets strictly increase across the window (no chord members).
fn strictly_sequential(window: &[Note]) -> bool {
    window.windows(2).all(|w| w[1].onset > w[0].onset)
}

/// Similarity of a set of durations: 1.0 when equal, 0.0 at the 1.5 ratio limit.
fn duration_similarity(durations: &[u64]) -> Option<(f64, u64)> {
    let max = *durations.iter().max()?;
    let min = *durations.iter().min()?;
    if min == 0 {
        return None;
    }
    let ratio = max as f64 / min as f64;
    if ratio > 1.5 {
        return None;
    }
    Some(((1.0 - (ratio - 1.0) / 0.5).clamp(0.0, 1.0), max))
}

fn grace_groups(notes: &[Note], params: &OrnamentParams) -> Vec<PatternMatch> {
    let mut found = Vec::new();

    for (i, pair) in notes.windows(2).enumerate() {
        let (grace, principal) = (&pair[0], &pair[1]);
        if principal.onset <= grace.onset {
            continue;
        }

        let limit = (params.grace_max_duration_ticks as f64).min(principal.duration as f64 / 3.0);
        if grace.duration as f64 > limit {
            continue;
        }

        let gap = principal.onset.saturating_sub(grace.end());
        if gap > params.attach_gap_ticks
            || semitones(grace, principal) > params.neighbor_max_semitones
            || principal.onset - grace.onset > params.max_window_ticks
        {
            continue;
        }

        let brevity = 1.0 - grace.duration as f64 / params.grace_max_duration_ticks.max(1) as f64;
        let closeness = if params.attach_gap_ticks == 0 {
            1.0
        } else {
            1.0 - gap as f64 / params.attach_gap_ticks as f64
        };

        found.push(PatternMatch {
            class: OrnamentClass::GraceGroup,
            principal: i + 1,
            members: vec![i, i + 1],
            timing: TimingBounds {
                start: grace.onset,
                end: principal.onset,
            },
            confidence: 0.6 + 0.2 * brevity + 0.2 * closeness,
        });
    }

    found
}

fn mordents(notes: &[Note], params: &OrnamentParams) -> Vec<PatternMatch> {
    let mut found = Vec::new();
    let short = params.short_note_ticks();

    for (i, w) in notes.windows(4).enumerate() {
        let (a, b, c, principal) = (&w[0], &w[1], &w[2], &w[3]);

        if a.pitch != c.pitch
            || a.pitch == b.pitch
            || semitones(a, b) > params.neighbor_max_semitones
            || principal.pitch != b.pitch
            || !strictly_sequential(w)
        {
            continue;
        }

        let durations = [a.duration, b.duration, c.duration];
        if durations.iter().any(|&d| d > short) {
            continue;
        }
        let Some((similarity, longest)) = duration_similarity(&durations) else {
            continue;
        };

        if principal.duration < 2 * longest
            || principal.onset - a.onset > params.max_window_ticks
        {
            continue;
        }

        found.push(PatternMatch {
            class: OrnamentClass::Mordent,
            principal: i + 3,
            members: vec![i, i + 1, i + 2, i + 3],
            timing: TimingBounds {
                start: a.onset,
                end: principal.onset,
            },
            confidence: 0.7 + 0.2 * similarity,
        });
    }

    found
}

fn turns(notes: &[Note], params: &OrnamentParams) -> Vec<PatternMatch> {
    let mut found = Vec::new();
    let short = params.short_note_ticks();
    let range = params.neighbor_max_semitones;

    for (i, w) in notes.windows(5).enumerate() {
        let (a, b, c, d, principal) = (&w[0], &w[1], &w[2], &w[3], &w[4]);
        let centre = b.pitch as i16;
        let above = a.pitch as i16 - centre;
        let below = c.pitch as i16 - centre;

        if above * below >= 0
            || semitones(a, b) > range
            || semitones(c, b) > range
            || d.pitch != b.pitch
            || semitones(principal, b) > range
            || !strictly_sequential(w)
        {
            continue;
        }

        let durations = [a.duration, b.duration, c.duration, d.duration];
        if durations.iter().any(|&dur| dur > short) {
            continue;
        }
        let longest = durations.iter().copied().max().unwrap_or(0);
        if principal.duration < 2 * longest {
            continue;
        }

        // Span to the principal's start: its own sustain must not count.
        if principal.onset - a.onset > params.max_window_ticks {
            continue;
        }

        let similarity = duration_similarity(&durations).map(|(s, _)| s).unwrap_or(0.0);

        found.push(PatternMatch {
            class: OrnamentClass::Turn,
            principal: i + 4,
            members: (i..i + 5).collect(),
            timing: TimingBounds {
                start: a.onset,
                end: principal.onset,
            },
            confidence: 0.75 + 0.15 * similarity,
        });
    }

    found
}

/// Can `next` continue an alternating run whose last note is `prev`?
fn trill_step(prev: &Note, next: &Note, params: &OrnamentParams) -> bool {
    let interval = semitones(prev, next);
    next.onset > prev.onset
        && interval >= 1
        && interval <= params.neighbor_max_semitones
        && next.duration <= params.short_note_ticks()
        && next.onset.saturating_sub(prev.end()) <= params.attach_gap_ticks
}

fn trills(notes: &[Note], params: &OrnamentParams) -> Vec<PatternMatch> {
    let mut found = Vec::new();
    let short = params.short_note_ticks();
    let cap = params.max_trill_notes.unwrap_or(usize::MAX).max(4);

    let mut start = 0;
    while start + 1 < notes.len() {
        if notes[start].duration > short || !trill_step(&notes[start], &notes[start + 1], params) {
            start += 1;
            continue;
        }

        let mut end = start + 2;
        while end < notes.len()
            && end - start < cap
            && notes[end].pitch == notes[end - 2].pitch
            && trill_step(&notes[end - 1], &notes[end], params)
        {
            end += 1;
        }

        let len = end - start;
        if len >= 4 {
            let members: Vec<usize> = (start..end).collect();
            let timing = TimingBounds {
                start: notes[start].onset,
                end: notes[end - 1].end(),
            };
            let confidence = (0.5 + 0.08 * (len - 4) as f64).min(0.95);

            found.push(PatternMatch {
                class: OrnamentClass::Trill,
                principal: start,
                members: members.clone(),
                timing,
                confidence,
            });
            found.push(PatternMatch {
                class: OrnamentClass::Trill,
                principal: start + 1,
                members,
                timing,
                confidence: confidence - 0.05,
            });
            // A new run may begin on this run's last note.
            start = end - 1;
        } else {
            start += 1;
        }
    }

    found
}
