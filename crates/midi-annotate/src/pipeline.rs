//! The full annotation pass: ornaments, then quantization, then voices.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::note::{identify, validate, Note, NoteId};
use crate::options::ConversionOptions;
use crate::ornament::{detect_ornaments, OrnamentHypothesis, OrnamentMark, OrnamentParams};
use crate::quantize::{shadow_quantize, ShadowDecision};
use crate::voice::{distribute_voices, VoiceExplanation};
use crate::{Error, Result};

/// Everything known about one note after annotation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteAnnotation {
    pub is_ornament: bool,
    pub ornament: Option<OrnamentMark>,
    /// `None` for ornament notes and when quantization is off.
    pub shadow_decision: Option<ShadowDecision>,
    pub voice_index: Option<usize>,
    pub orphan: bool,
    pub explanation: Option<VoiceExplanation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedTrack {
    pub ppq: u16,
    /// Input order, ids assigned, timing as resolved by quantization.
    pub notes: Vec<Note>,
    pub annotations: BTreeMap<NoteId, NoteAnnotation>,
    /// Selected ornament figures.
    pub ornaments: Vec<OrnamentHypothesis>,
    /// Note ids per voice, highest voice first, in onset order.
    pub voices: Vec<Vec<NoteId>>,
    pub orphans: Vec<NoteId>,
}

impl AnnotatedTrack {
    pub fn annotation(&self, id: &NoteId) -> Option<&NoteAnnotation> {
        self.annotations.get(id)
    }

    pub fn note(&self, id: &NoteId) -> Option<&Note> {
        self.notes.iter().find(|n| &n.id == id)
    }
}

/// Run every enabled stage over one track.
///
/// Ornament notes are excluded from quantization and voice separation and
/// follow their principal into its voice.
pub fn annotate(notes: &[Note], ppq: u16, options: &ConversionOptions) -> Result<AnnotatedTrack> {
    if ppq == 0 {
        return Err(Error::InvalidResolution);
    }
    validate(notes)?;

    let mut notes = identify(notes);
    let mut annotations: BTreeMap<NoteId, NoteAnnotation> = notes
        .iter()
        .map(|n| (n.id.clone(), NoteAnnotation::default()))
        .collect();

    let mut ornaments = Vec::new();
    if options.detect_ornaments {
        let params = OrnamentParams {
            max_trill_notes: options.max_trill_notes,
            ..OrnamentParams::for_rule(ppq, &options.primary_rhythm)
        };
        let analysis = detect_ornaments(&notes, &params);
        for (id, mark) in analysis.marks {
            if let Some(annotation) = annotations.get_mut(&id) {
                annotation.is_ornament = mark.is_ornament;
                annotation.ornament = Some(mark);
            }
        }
        ornaments = analysis.selected;
    }

    let core: Vec<Note> = notes
        .iter()
        .filter(|n| !annotations[&n.id].is_ornament)
        .cloned()
        .collect();

    let core = if options.quantize {
        let outcome = shadow_quantize(
            &core,
            ppq,
            &options.primary_rhythm,
            &options.secondary_rhythm,
            &options.quantizer_weights,
        );
        for (id, decision) in outcome.decisions {
            if let Some(annotation) = annotations.get_mut(&id) {
                annotation.shadow_decision = Some(decision);
            }
        }
        outcome.notes
    } else {
        core
    };

    let resolved: BTreeMap<&NoteId, &Note> = core.iter().map(|n| (&n.id, n)).collect();
    for note in notes.iter_mut() {
        if let Some(quantized) = resolved.get(&note.id) {
            note.onset = quantized.onset;
            note.duration = quantized.duration;
        }
    }

    let (voices, orphans) = if options.separate_voices {
        let distribution = distribute_voices(&core, ppq, &options.voice_separation);
        for (id, explanation) in &distribution.explanations {
            if let Some(annotation) = annotations.get_mut(id) {
                annotation.voice_index = explanation.voice;
                annotation.orphan = distribution.is_orphan(id);
                annotation.explanation = Some(explanation.clone());
            }
        }
        inherit_principal_voices(&mut annotations);
        group_voices(&notes, &annotations, distribution.voices.len())
    } else {
        (Vec::new(), Vec::new())
    };

    info!(
        notes = notes.len(),
        ornaments = ornaments.len(),
        voices = voices.len(),
        orphans = orphans.len(),
        "annotated track"
    );

    Ok(AnnotatedTrack {
        ppq,
        notes,
        annotations,
        ornaments,
        voices,
        orphans,
    })
}

fn inherit_principal_voices(annotations: &mut BTreeMap<NoteId, NoteAnnotation>) {
    let inherited: Vec<(NoteId, Option<usize>)> = annotations
        .iter()
        .filter(|(_, a)| a.is_ornament)
        .filter_map(|(id, a)| {
            let principal = &a.ornament.as_ref()?.principal;
            Some((id.clone(), annotations.get(principal)?.voice_index))
        })
        .collect();

    for (id, voice) in inherited {
        if let Some(annotation) = annotations.get_mut(&id) {
            debug!(note = %id, ?voice, "ornament follows principal");
            annotation.voice_index = voice;
            annotation.orphan = voice.is_none();
        }
    }
}

fn group_voices(
    notes: &[Note],
    annotations: &BTreeMap<NoteId, NoteAnnotation>,
    voice_count: usize,
) -> (Vec<Vec<NoteId>>, Vec<NoteId>) {
    let mut order: Vec<&Note> = notes.iter().collect();
    order.sort_by(|a, b| {
        a.onset
            .cmp(&b.onset)
            .then(b.pitch.cmp(&a.pitch))
            .then_with(|| a.id.cmp(&b.id))
    });

    let mut voices = vec![Vec::new(); voice_count];
    let mut orphans = Vec::new();
    for note in order {
        match annotations.get(&note.id).and_then(|a| a.voice_index) {
            Some(v) if v < voices.len() => voices[v].push(note.id.clone()),
            _ => orphans.push(note.id.clone()),
        }
    }
    (voices, orphans)
}
