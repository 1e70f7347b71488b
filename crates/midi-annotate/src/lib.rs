//! Ornament detection, shadow quantization and voice distribution for
//! symbolic MIDI notes.
//!
//! Every component takes notes by reference and returns new copies plus a
//! side table keyed by [`NoteId`]; nothing is annotated in place.

pub mod note;
pub mod options;
pub mod ornament;
pub mod pipeline;
pub mod quantize;
pub mod rhythm;
pub mod voice;

pub use note::{identify, overlap_ticks, validate, Note, NoteId};
pub use options::ConversionOptions;
pub use ornament::{
    detect_ornaments, AmbiguityTag, OrnamentAnalysis, OrnamentClass, OrnamentHypothesis,
    OrnamentMark, OrnamentParams,
};
pub use pipeline::{annotate, AnnotatedTrack, NoteAnnotation};
pub use quantize::{
    shadow_quantize, Confidence, ConflictType, QuantizeOutcome, QuantizerWeights, ShadowDecision,
};
pub use rhythm::{RhythmFamily, RhythmRule, RuleSlot};
pub use voice::{
    distribute_voices, AssignmentPhase, VoiceCostConfig, VoiceDistributionResult,
    VoiceExplanation, VoiceOptions,
};

/// Errors from annotation operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid note at index {index}: {reason}")]
    InvalidNote { index: usize, reason: String },

    #[error("invalid resolution: ppq must be positive")]
    InvalidResolution,
}

pub type Result<T> = std::result::Result<T, Error>;
