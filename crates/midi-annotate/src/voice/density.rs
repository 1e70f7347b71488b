//! Polyphony density over time.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::note::Note;

/// A maximal span during which the same set of notes sounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensitySlice {
    pub start: u64,
    pub end: u64,
    /// Indices into the analysed notes.
    pub active: Vec<usize>,
}

impl DensitySlice {
    pub fn count(&self) -> usize {
        self.active.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DensityProfile {
    /// Non-empty slices in time order.
    pub slices: Vec<DensitySlice>,
    pub max_density: usize,
    /// Highest polyphony held for at least a measure (or `max_density`).
    pub sustained_density: usize,
    /// Regions at `sustained_density` lasting a measure or longer.
    pub sustained_regions: Vec<(u64, u64)>,
}

impl DensityProfile {
    pub fn in_sustained_region(&self, slice: &DensitySlice) -> bool {
        self.sustained_regions
            .iter()
            .any(|&(start, end)| slice.start >= start && slice.end <= end)
    }
}

/// Sweep note boundaries and find the sustained polyphony level.
///
/// Gaps of up to an eighth note (`ppq / 2`) do not break a region.
pub fn analyze_density(notes: &[Note], ppq: u16, measure_ticks: u64) -> DensityProfile {
    let slices = sweep(notes);
    let max_density = slices.iter().map(DensitySlice::count).max().unwrap_or(0);
    let bridge = ppq as u64 / 2;

    for level in (1..=max_density).rev() {
        let regions: Vec<(u64, u64)> = regions_at(&slices, level, bridge)
            .into_iter()
            .filter(|(start, end)| end - start >= measure_ticks)
            .collect();
        if !regions.is_empty() {
            return DensityProfile {
                slices,
                max_density,
                sustained_density: level,
                sustained_regions: regions,
            };
        }
    }

    DensityProfile {
        slices,
        max_density,
        sustained_density: max_density,
        sustained_regions: Vec::new(),
    }
}

fn sweep(notes: &[Note]) -> Vec<DensitySlice> {
    let mut boundaries: Vec<u64> = notes.iter().flat_map(|n| [n.onset, n.end()]).collect();
    boundaries.sort_unstable();
    boundaries.dedup();

    let mut starts: Vec<usize> = (0..notes.len()).collect();
    starts.sort_by_key(|&i| notes[i].onset);
    let mut ends = starts.clone();
    ends.sort_by_key(|&i| notes[i].end());

    let mut active: BTreeSet<usize> = BTreeSet::new();
    let (mut next_start, mut next_end) = (0, 0);
    let mut slices = Vec::new();

    for pair in boundaries.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        while next_end < ends.len() && notes[ends[next_end]].end() <= start {
            active.remove(&ends[next_end]);
            next_end += 1;
        }
        while next_start < starts.len() && notes[starts[next_start]].onset <= start {
            if notes[starts[next_start]].end() > start {
                active.insert(starts[next_start]);
            }
            next_start += 1;
        }
        if !active.is_empty() {
            slices.push(DensitySlice {
                start,
                end,
                active: active.iter().copied().collect(),
            });
        }
    }
    slices
}

/// Merge slices with at least `level` notes, bridging short gaps.
fn regions_at(slices: &[DensitySlice], level: usize, bridge: u64) -> Vec<(u64, u64)> {
    let mut regions: Vec<(u64, u64)> = Vec::new();
    for slice in slices.iter().filter(|s| s.count() >= level) {
        match regions.last_mut() {
            Some(last) if slice.start.saturating_sub(last.1) <= bridge => last.1 = slice.end,
            _ => regions.push((slice.start, slice.end)),
        }
    }
    regions
}
