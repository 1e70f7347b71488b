//! Ornament detection: grace notes, mordents, turns and trills.
//!
//! Detection runs in three steps over a pitch/time-sorted copy of the input:
//! pattern matching produces raw hypotheses, tagging adds timing-prior and
//! competition tags (adjusting confidence), and a greedy selector keeps a
//! non-overlapping subset. Notes themselves are never modified; the result
//! carries a side table of [`OrnamentMark`]s keyed by note id.

mod patterns;
mod select;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::note::{identify, onset_order, Note, NoteId};
use crate::rhythm::RhythmRule;

pub use select::select_non_overlapping;

/// Ornament classes, in tie-break order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrnamentClass {
    GraceGroup,
    Mordent,
    Turn,
    Trill,
}

impl OrnamentClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GraceGroup => "grace_group",
            Self::Mordent => "mordent",
            Self::Turn => "turn",
            Self::Trill => "trill",
        }
    }
}

impl fmt::Display for OrnamentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityTag {
    /// Observed beat alignment contradicts the class's expected placement.
    TimingPriorConflict,
    /// Another hypothesis claims an intersecting time window.
    CompetingHypothesis,
    /// Trills have no following principal; the run itself is the principal.
    TrillIsPrincipal,
}

/// Tick span of an ornament figure. For figures with a following principal
/// the end is the principal's onset, for trills the end of the last note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingBounds {
    pub start: u64,
    pub end: u64,
}

impl TimingBounds {
    pub fn intersects(&self, other: &TimingBounds) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrnamentHypothesis {
    pub class: OrnamentClass,
    pub principal: NoteId,
    /// Every note of the figure, principal included.
    pub members: Vec<NoteId>,
    pub timing: TimingBounds,
    pub confidence: f64,
    pub tags: Vec<AmbiguityTag>,
}

impl OrnamentHypothesis {
    /// Members other than the principal.
    pub fn ornament_notes(&self) -> impl Iterator<Item = &NoteId> {
        self.members.iter().filter(move |id| **id != self.principal)
    }

    fn tag(&mut self, tag: AmbiguityTag) {
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.tags.sort();
        }
    }
}

/// Per-note result of ornament selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrnamentMark {
    pub class: OrnamentClass,
    pub principal: NoteId,
    pub is_ornament: bool,
}

/// Detection thresholds, all in ticks except the semitone distance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrnamentParams {
    pub quarter_ticks: u64,
    /// Longest allowed span from the first ornament note to the principal.
    pub max_window_ticks: u64,
    pub grace_max_duration_ticks: u64,
    /// Largest gap tolerated between a figure and its principal; also the
    /// on-beat tolerance.
    pub attach_gap_ticks: u64,
    pub neighbor_max_semitones: u8,
    /// Optional cap on trill length. `None` accepts runs of any length.
    pub max_trill_notes: Option<usize>,
}

impl OrnamentParams {
    /// Thresholds for a resolution and the active rhythm's minimum note value.
    pub fn new(ppq: u16, min_note_value_ticks: f64) -> Self {
        let quarter = ppq as u64;
        let grace_max = (quarter / 8).min((min_note_value_ticks / 2.0).floor().max(0.0) as u64);
        Self {
            quarter_ticks: quarter,
            max_window_ticks: quarter,
            grace_max_duration_ticks: grace_max,
            attach_gap_ticks: quarter / 8,
            neighbor_max_semitones: 2,
            max_trill_notes: None,
        }
    }

    /// Thresholds using the primary rule's grid, or a sixteenth when disabled.
    pub fn for_rule(ppq: u16, rule: &RhythmRule) -> Self {
        let mnv = if rule.enabled {
            rule.quantum_ticks(ppq)
        } else {
            ppq as f64 / 4.0
        };
        Self::new(ppq, mnv)
    }

    /// Longest duration any figure note (other than a principal) may have.
    pub(crate) fn short_note_ticks(&self) -> u64 {
        self.quarter_ticks / 4
    }

    pub(crate) fn is_on_beat(&self, tick: u64) -> bool {
        if self.quarter_ticks == 0 {
            return true;
        }
        let phase = tick % self.quarter_ticks;
        phase <= self.attach_gap_ticks || self.quarter_ticks - phase <= self.attach_gap_ticks
    }
}

/// Everything the detector found, plus the selected subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrnamentAnalysis {
    /// Input notes, identified and sorted by onset then pitch.
    pub notes: Vec<Note>,
    /// All hypotheses in selection order (confidence descending).
    pub hypotheses: Vec<OrnamentHypothesis>,
    pub selected: Vec<OrnamentHypothesis>,
    pub marks: BTreeMap<NoteId, OrnamentMark>,
}

impl OrnamentAnalysis {
    pub fn is_ornament(&self, id: &NoteId) -> bool {
        self.marks.get(id).is_some_and(|m| m.is_ornament)
    }
}

/// Detect ornament figures and select a non-overlapping subset.
pub fn detect_ornaments(notes: &[Note], params: &OrnamentParams) -> OrnamentAnalysis {
    let identified = identify(notes);
    let sorted: Vec<Note> = onset_order(&identified)
        .into_iter()
        .map(|i| identified[i].clone())
        .collect();

    if sorted.len() < 2 {
        return OrnamentAnalysis {
            notes: sorted,
            hypotheses: Vec::new(),
            selected: Vec::new(),
            marks: BTreeMap::new(),
        };
    }

    let mut hypotheses: Vec<OrnamentHypothesis> = patterns::find_all(&sorted, params)
        .into_iter()
        .map(|m| m.into_hypothesis(&sorted))
        .collect();

    select::apply_timing_priors(&mut hypotheses, params);
    select::tag_competing(&mut hypotheses);

    let order = select::rank(&hypotheses);
    let accepted = select_non_overlapping(&hypotheses, &order);

    let selected: Vec<OrnamentHypothesis> =
        accepted.iter().map(|&i| hypotheses[i].clone()).collect();
    let ranked: Vec<OrnamentHypothesis> = order.iter().map(|&i| hypotheses[i].clone()).collect();

    let mut marks = BTreeMap::new();
    for hypothesis in &selected {
        let mark = |is_ornament| OrnamentMark {
            class: hypothesis.class,
            principal: hypothesis.principal.clone(),
            is_ornament,
        };
        marks.insert(hypothesis.principal.clone(), mark(false));
        for id in hypothesis.ornament_notes() {
            marks.insert(id.clone(), mark(true));
        }
    }

    debug!(
        notes = sorted.len(),
        hypotheses = ranked.len(),
        selected = selected.len(),
        "ornament detection complete"
    );

    OrnamentAnalysis {
        notes: sorted,
        hypotheses: ranked,
        selected,
        marks,
    }
}
