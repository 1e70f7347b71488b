//! Command-line front end for `midi-annotate`: SMF import, configuration
//! discovery and JSON reports.

pub mod config;
pub mod import;

use anyhow::{bail, Context, Result};
use midi_annotate::{annotate, AnnotatedTrack, ConversionOptions};
use serde::Serialize;
use tracing::{debug, info};

use crate::import::ImportedMidi;

/// Annotation result for one SMF track.
#[derive(Debug, Clone, Serialize)]
pub struct TrackReport {
    pub track_index: usize,
    pub name: Option<String>,
    #[serde(flatten)]
    pub track: AnnotatedTrack,
}

/// Annotate every non-empty track, or only `track` when given.
pub fn annotate_midi(
    imported: &ImportedMidi,
    track: Option<usize>,
    options: &ConversionOptions,
) -> Result<Vec<TrackReport>> {
    if let Some(index) = track {
        if index >= imported.tracks.len() {
            bail!(
                "track {} out of range (file has {} tracks)",
                index,
                imported.tracks.len()
            );
        }
    }

    debug!(
        ppq = imported.ppq,
        tracks = imported.tracks.len(),
        notes = imported.note_count(),
        "annotating file"
    );

    let mut reports = Vec::new();
    for source in &imported.tracks {
        if track.is_some_and(|t| t != source.track_index) {
            continue;
        }
        if source.notes.is_empty() {
            debug!(track = source.track_index, "skipping empty track");
            continue;
        }

        let annotated = annotate(&source.notes, imported.ppq, options)
            .with_context(|| format!("annotating track {}", source.track_index))?;
        info!(
            track = source.track_index,
            name = source.name.as_deref().unwrap_or(""),
            notes = annotated.notes.len(),
            "track annotated"
        );
        reports.push(TrackReport {
            track_index: source.track_index,
            name: source.name.clone(),
            track: annotated,
        });
    }
    Ok(reports)
}
