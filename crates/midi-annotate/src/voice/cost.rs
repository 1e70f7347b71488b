//! Cost of placing a note in a voice during gap filling.

use serde::{Deserialize, Serialize};

use super::{Exclusion, Lanes};
use crate::note::Note;

/// Tunable constants of the voice cost function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceCostConfig {
    pub leap_per_semitone: f64,
    /// Leaps of at least this many semitones pay `seventh_penalty` per step
    /// from the threshold up.
    pub seventh_threshold: u8,
    pub seventh_penalty: f64,
    pub octave_threshold: u8,
    pub octave_penalty: f64,
    /// Leaps wider than this pay `wide_penalty` per semitone beyond it.
    pub wide_threshold: u8,
    pub wide_penalty: f64,

    pub centroid_weight: f64,
    /// Nearest voice notes averaged for the local register centre.
    pub centroid_window: usize,

    pub chord_addition: f64,
    pub chord_span_limit: u8,
    pub chord_span_penalty: f64,
    pub chord_spacing_limit: u8,
    pub chord_spacing_penalty: f64,
    pub chord_max_notes: usize,
    pub chord_size_penalty: f64,
    pub chord_drift_limit: f64,
    pub chord_drift_penalty: f64,

    /// Short note isolated from the rest of the voice.
    pub wake_up_isolated: f64,
    /// Short isolated note that starts a phrase.
    pub wake_up_phrase: f64,
    /// Long isolated note.
    pub wake_up_long: f64,
    pub phrase_lookahead_notes: usize,
    pub phrase_min_notes: usize,

    /// Clearance (semitones) at or below which an adjacent voice blocks
    /// placement.
    pub crossing_hard_clearance: i32,
    pub crossing_soft_margin: i32,
    pub crossing_soft_penalty: f64,

    pub path_min_leap: u8,
    pub path_threshold: u8,
    pub path_penalty: f64,
}

impl Default for VoiceCostConfig {
    fn default() -> Self {
        Self {
            leap_per_semitone: 1.0,
            seventh_threshold: 10,
            seventh_penalty: 3.0,
            octave_threshold: 12,
            octave_penalty: 5.0,
            wide_threshold: 16,
            wide_penalty: 10.0,
            centroid_weight: 0.05,
            centroid_window: 8,
            chord_addition: 0.5,
            chord_span_limit: 12,
            chord_span_penalty: 4.0,
            chord_spacing_limit: 12,
            chord_spacing_penalty: 2.0,
            chord_max_notes: 4,
            chord_size_penalty: 5.0,
            chord_drift_limit: 7.0,
            chord_drift_penalty: 1.5,
            wake_up_isolated: 40.0,
            wake_up_phrase: 3.0,
            wake_up_long: 8.0,
            phrase_lookahead_notes: 10,
            phrase_min_notes: 2,
            crossing_hard_clearance: 1,
            crossing_soft_margin: 3,
            crossing_soft_penalty: 4.0,
            path_min_leap: 5,
            path_threshold: 10,
            path_penalty: 1.5,
        }
    }
}

impl VoiceCostConfig {
    /// Escalating cost of a melodic leap.
    pub fn leap_cost(&self, from: u8, to: u8) -> f64 {
        let d = from.abs_diff(to);
        let mut cost = d as f64 * self.leap_per_semitone;
        if d >= self.seventh_threshold {
            let steps = d.saturating_sub(self.seventh_threshold.saturating_sub(1));
            cost += steps as f64 * self.seventh_penalty;
        }
        if d >= self.octave_threshold {
            let steps = d.saturating_sub(self.octave_threshold.saturating_sub(1));
            cost += steps as f64 * self.octave_penalty;
        }
        if d > self.wide_threshold {
            cost += (d - self.wide_threshold) as f64 * self.wide_penalty;
        }
        cost
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub leap: f64,
    pub centroid: f64,
    pub chord: f64,
    pub wake_up: f64,
    pub crossing: f64,
    pub path_distortion: f64,
    pub total: f64,
}

impl CostBreakdown {
    fn summed(mut self) -> Self {
        self.total = self.leap
            + self.centroid
            + self.chord
            + self.wake_up
            + self.crossing
            + self.path_distortion;
        self
    }
}

pub(super) struct CostContext<'a> {
    pub notes: &'a [Note],
    pub lanes: &'a Lanes,
    /// All note indices in onset order.
    pub by_onset: &'a [usize],
    pub ppq: u16,
    pub measure: u64,
    pub tolerance: u64,
    pub strict: bool,
    pub pitch_bias: f64,
    /// Register centre per voice, highest voice first.
    pub zone_centres: &'a [f64],
    pub config: &'a VoiceCostConfig,
}

/// Neighbours of a note within one voice.
struct Neighbours<'a> {
    chord_mates: Vec<&'a Note>,
    prev: Option<&'a Note>,
    next: Option<&'a Note>,
}

impl<'a> CostContext<'a> {
    pub fn cost(&self, voice: usize, index: usize) -> Result<CostBreakdown, Exclusion> {
        let note = &self.notes[index];
        let config = self.config;
        let lane = self.lanes.lane(voice);
        let neighbours = self.neighbours(lane, note);

        if self.strict && !neighbours.chord_mates.is_empty() {
            return Err(Exclusion::StrictOverlap);
        }

        let crossing = self.crossing(voice, note)?;

        let mut cost = CostBreakdown {
            crossing,
            ..Default::default()
        };

        if let Some(prev) = neighbours.prev {
            cost.leap += config.leap_cost(prev.pitch, note.pitch);
        }
        if let Some(next) = neighbours.next {
            cost.leap += config.leap_cost(note.pitch, next.pitch);
        }

        let centre = self.local_centre(voice, note);
        let distance = (note.pitch as f64 - centre).abs();
        cost.centroid = config.centroid_weight * self.pitch_bias * distance;

        if neighbours.chord_mates.is_empty() {
            if !lane.is_empty() {
                cost.wake_up = self.wake_up(note, &neighbours);
            }
        } else {
            cost.chord = self.chord(note, &neighbours.chord_mates, centre);
        }

        if let (Some(prev), Some(next)) = (neighbours.prev, neighbours.next) {
            let d1 = note.pitch as i32 - prev.pitch as i32;
            let d2 = next.pitch as i32 - note.pitch as i32;
            let min = config.path_min_leap as i32;
            if d1.signum() * d2.signum() < 0 && d1.abs() >= min && d2.abs() >= min {
                let excess = d1.abs() + d2.abs() - config.path_threshold as i32;
                cost.path_distortion = config.path_penalty * excess.max(0) as f64;
            }
        }

        Ok(cost.summed())
    }

    fn neighbours(&self, lane: &[usize], note: &Note) -> Neighbours<'a> {
        let notes: &'a [Note] = self.notes;
        let mut neighbours = Neighbours {
            chord_mates: Vec::new(),
            prev: None,
            next: None,
        };
        for &i in lane {
            let other = &notes[i];
            if other.overlaps(note, self.tolerance) {
                neighbours.chord_mates.push(other);
            } else if other.onset <= note.onset {
                neighbours.prev = Some(other);
            } else if neighbours.next.is_none() {
                neighbours.next = Some(other);
            }
        }
        neighbours
    }

    /// Mean pitch of the voice notes nearest in time, or the voice's zone.
    fn local_centre(&self, voice: usize, note: &Note) -> f64 {
        let lane = self.lanes.lane(voice);
        if lane.is_empty() {
            return self.zone_centres[voice];
        }
        let mut nearest: Vec<&Note> = lane.iter().map(|&i| &self.notes[i]).collect();
        nearest.sort_by_key(|n| (n.onset.abs_diff(note.onset), n.onset));
        let window = self.config.centroid_window.max(1);
        let picked = &nearest[..nearest.len().min(window)];
        picked.iter().map(|n| n.pitch as f64).sum::<f64>() / picked.len() as f64
    }

    fn chord(&self, note: &Note, mates: &[&Note], centre: f64) -> f64 {
        let config = self.config;
        let mut pitches: Vec<u8> = mates.iter().map(|n| n.pitch).collect();
        pitches.push(note.pitch);
        pitches.sort_unstable();

        let mut cost = config.chord_addition;

        let span = pitches[pitches.len() - 1] - pitches[0];
        if span > config.chord_span_limit {
            cost += (span - config.chord_span_limit) as f64 * config.chord_span_penalty;
        }

        let widest = pitches.windows(2).map(|w| w[1] - w[0]).max().unwrap_or(0);
        if widest > config.chord_spacing_limit {
            cost += (widest - config.chord_spacing_limit) as f64 * config.chord_spacing_penalty;
        }

        if pitches.len() > config.chord_max_notes {
            cost += (pitches.len() - config.chord_max_notes) as f64 * config.chord_size_penalty;
        }

        let mean = pitches.iter().map(|&p| p as f64).sum::<f64>() / pitches.len() as f64;
        let drift = (mean - centre).abs();
        if drift > config.chord_drift_limit {
            cost += (drift - config.chord_drift_limit) * config.chord_drift_penalty;
        }
        cost
    }

    fn wake_up(&self, note: &Note, neighbours: &Neighbours<'_>) -> f64 {
        let config = self.config;
        let gap_before = neighbours.prev.map(|p| note.onset.saturating_sub(p.end()));
        let gap_after = neighbours.next.map(|n| n.onset.saturating_sub(note.end()));
        let isolated = gap_before.map_or(true, |g| g > self.measure)
            && gap_after.map_or(true, |g| g > self.measure);

        if !isolated {
            return 0.0;
        }
        if note.duration >= self.ppq as u64 {
            return config.wake_up_long;
        }
        if self.starts_phrase(note) {
            config.wake_up_phrase
        } else {
            config.wake_up_isolated
        }
    }

    /// Enough notes follow within a measure and an octave to form a phrase.
    fn starts_phrase(&self, note: &Note) -> bool {
        let start = self
            .by_onset
            .partition_point(|&i| self.notes[i].onset <= note.onset);
        let horizon = note.onset + self.measure;
        let close = self.by_onset[start..]
            .iter()
            .take(self.config.phrase_lookahead_notes)
            .map(|&i| &self.notes[i])
            .take_while(|n| n.onset <= horizon)
            .filter(|n| n.pitch.abs_diff(note.pitch) <= 12)
            .count();
        close >= self.config.phrase_min_notes
    }

    /// Soft penalty or hard exclusion from the adjacent voices.
    fn crossing(&self, voice: usize, note: &Note) -> Result<f64, Exclusion> {
        let config = self.config;
        let sounding = |v: usize| {
            self.lanes
                .lane(v)
                .iter()
                .map(|&i| &self.notes[i])
                .filter(|n| n.onset <= note.onset && note.onset < n.end())
                .map(|n| n.pitch as i32)
                .collect::<Vec<i32>>()
        };

        let mut clearances = Vec::new();
        if voice > 0 {
            if let Some(lowest_above) = sounding(voice - 1).into_iter().min() {
                clearances.push(lowest_above - note.pitch as i32);
            }
        }
        if voice + 1 < self.lanes.count() {
            if let Some(highest_below) = sounding(voice + 1).into_iter().max() {
                clearances.push(note.pitch as i32 - highest_below);
            }
        }

        let mut penalty = 0.0;
        for clearance in clearances {
            if clearance <= config.crossing_hard_clearance {
                return Err(Exclusion::CrossingGuard);
            }
            if clearance < config.crossing_soft_margin {
                let shortfall = config.crossing_soft_margin - clearance;
                penalty += shortfall as f64 * config.crossing_soft_penalty;
            }
        }
        Ok(penalty)
    }
}
