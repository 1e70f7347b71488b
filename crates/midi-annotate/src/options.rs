use serde::{Deserialize, Serialize};

use crate::quantize::QuantizerWeights;
use crate::rhythm::{RhythmFamily, RhythmRule};
use crate::voice::VoiceOptions;

/// Everything [`annotate`](crate::annotate) can be told.
///
/// Every field has a default, so a partial TOML or JSON document is enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConversionOptions {
    pub detect_ornaments: bool,
    /// Optional cap on trill length during ornament detection.
    pub max_trill_notes: Option<usize>,
    pub quantize: bool,
    pub separate_voices: bool,
    pub primary_rhythm: RhythmRule,
    pub secondary_rhythm: RhythmRule,
    pub voice_separation: VoiceOptions,
    pub quantizer_weights: QuantizerWeights,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        Self {
            detect_ornaments: true,
            max_trill_notes: None,
            quantize: true,
            separate_voices: true,
            primary_rhythm: RhythmRule::new(RhythmFamily::Simple, 16),
            secondary_rhythm: RhythmRule {
                enabled: false,
                family: RhythmFamily::Triple,
                min_note_value: 8,
            },
            voice_separation: VoiceOptions::default(),
            quantizer_weights: QuantizerWeights::default(),
        }
    }
}
