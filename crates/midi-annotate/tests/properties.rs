//! End-to-end behaviour of the three annotators and the pipeline.

use midi_annotate::{
    annotate, detect_ornaments, distribute_voices, shadow_quantize, Confidence, ConflictType,
    ConversionOptions, Note, NoteId, OrnamentClass, OrnamentParams, QuantizerWeights, RhythmFamily,
    RhythmRule, VoiceOptions,
};
use pretty_assertions::assert_eq;

fn make_notes(specs: &[(u8, u64, u64)]) -> Vec<Note> {
    specs
        .iter()
        .map(|&(pitch, onset, duration)| Note::new(pitch, onset, duration, 0.8))
        .collect()
}

fn sixteenths() -> RhythmRule {
    RhythmRule::new(RhythmFamily::Simple, 16)
}

fn triplet_eighths() -> RhythmRule {
    RhythmRule::new(RhythmFamily::Triple, 8)
}

fn timing(notes: &[Note]) -> Vec<(u64, u64)> {
    notes.iter().map(|n| (n.onset, n.duration)).collect()
}

#[test]
fn test_triplet_outlier_resolves_to_triple() {
    let notes = make_notes(&[
        (60, 0, 120),
        (62, 120, 120),
        (64, 240, 120),
        (65, 320, 110),
        (67, 480, 120),
    ]);
    let outcome = shadow_quantize(
        &notes,
        480,
        &sixteenths(),
        &triplet_eighths(),
        &QuantizerWeights::default(),
    );

    let decision = outcome.decision(&NoteId::new("320:65:3")).unwrap();
    assert_eq!(decision.confidence, Confidence::Ambiguous);
    assert_eq!(decision.selected_family, Some(RhythmFamily::Triple));
    assert_eq!(decision.selected_onset, 320);
    assert_eq!(decision.selected_duration, 160);
    assert!(decision.has_conflict(ConflictType::PolyphonyBlip));
    assert!(decision.has_conflict(ConflictType::ContextualRhythm));
    assert_eq!(decision.alternatives.len(), 2);

    assert_eq!(
        timing(&outcome.notes),
        vec![(0, 120), (120, 120), (240, 120), (320, 160), (480, 120)]
    );
}

#[test]
fn test_unison_overlap_is_accommodated() {
    let notes = make_notes(&[(60, 0, 360), (60, 240, 360)]);
    let outcome = shadow_quantize(
        &notes,
        480,
        &sixteenths(),
        &RhythmRule::disabled(),
        &QuantizerWeights::default(),
    );

    assert_eq!(timing(&outcome.notes), vec![(0, 240), (240, 360)]);

    let second = outcome.decision(&NoteId::new("240:60:1")).unwrap();
    assert!(second.has_conflict(ConflictType::UnisonOverlap));
    assert_eq!(second.accommodation_applied.len(), 1);
    let accommodation = &second.accommodation_applied[0];
    assert_eq!(accommodation.note_id, NoteId::new("0:60:0"));
    assert_eq!(accommodation.original_duration, 360);
    assert_eq!(accommodation.new_duration, 240);

    let first = outcome.decision(&NoteId::new("0:60:0")).unwrap();
    assert!(first.has_conflict(ConflictType::UnisonOverlap));
    assert_eq!(first.selected_duration, 240);
}

#[test]
fn test_quantization_is_idempotent() {
    let cases = [
        make_notes(&[
            (60, 0, 120),
            (62, 120, 120),
            (64, 240, 120),
            (65, 320, 110),
            (67, 480, 120),
        ]),
        make_notes(&[(60, 0, 360), (60, 240, 360)]),
        make_notes(&[(60, 7, 115), (64, 124, 350), (67, 473, 250), (72, 951, 481)]),
        // a sixteenth note cut short by a triplet onset of the same pitch
        make_notes(&[(67, 2040, 600), (67, 2560, 320)]),
    ];

    for notes in cases {
        let once = shadow_quantize(
            &notes,
            480,
            &sixteenths(),
            &triplet_eighths(),
            &QuantizerWeights::default(),
        );
        let twice = shadow_quantize(
            &once.notes,
            480,
            &sixteenths(),
            &triplet_eighths(),
            &QuantizerWeights::default(),
        );
        assert_eq!(timing(&once.notes), timing(&twice.notes));
    }
}

#[test]
fn test_small_errors_are_always_certain() {
    // onset and duration jitter of at most 9 ticks each, tolerance is 18
    let notes: Vec<Note> = (1..=16u64)
        .map(|k| {
            let onset_jitter = (k * 7) % 19;
            let duration_jitter = (k * 5) % 10;
            Note::new(
                60 + (k % 12) as u8,
                k * 120 + onset_jitter - 9,
                120 + duration_jitter,
                0.7,
            )
        })
        .collect();

    let outcome = shadow_quantize(
        &notes,
        480,
        &sixteenths(),
        &RhythmRule::disabled(),
        &QuantizerWeights::default(),
    );
    assert_eq!(outcome.decisions.len(), notes.len());
    for decision in outcome.decisions.values() {
        assert!(decision.local_error <= 18, "{}", decision.note_id);
        assert_eq!(decision.confidence, Confidence::Certain);
    }
}

#[test]
fn test_grace_note_is_flagged() {
    let notes = make_notes(&[(61, 0, 40), (60, 40, 240), (64, 480, 480)]);
    let analysis = detect_ornaments(&notes, &OrnamentParams::for_rule(480, &sixteenths()));

    assert_eq!(analysis.selected.len(), 1);
    let grace = &analysis.selected[0];
    assert_eq!(grace.class, OrnamentClass::GraceGroup);
    assert_eq!(grace.principal, NoteId::new("40:60:1"));
    assert!(grace.confidence > 0.8 && grace.confidence < 0.9);
    assert!(analysis.is_ornament(&NoteId::new("0:61:0")));
}

#[test]
fn test_selected_ornaments_never_overlap() {
    let mut specs = vec![(61, 0, 40), (60, 40, 240)];
    // mordent into beat 2
    specs.extend([(62, 840, 40), (60, 880, 40), (62, 920, 40), (60, 960, 480)]);
    // trill from beat 4
    specs.extend((0..10).map(|i| (if i % 2 == 0 { 67 } else { 65 }, 1440 + i * 60, 60)));
    let notes = make_notes(&specs);

    let analysis = detect_ornaments(&notes, &OrnamentParams::new(480, 120.0));
    assert!(!analysis.selected.is_empty());

    for (i, a) in analysis.selected.iter().enumerate() {
        for b in &analysis.selected[i + 1..] {
            assert!(a.members.iter().all(|id| !b.members.contains(id)));
        }
    }
}

#[test]
fn test_strict_single_voice_yields_one_orphan() {
    let notes = make_notes(&[(60, 0, 480), (64, 240, 480), (67, 960, 240)]);
    let options = VoiceOptions {
        max_voices: Some(1),
        disable_chords: true,
        ..Default::default()
    };
    let result = distribute_voices(&notes, 480, &options);

    assert_eq!(result.voices.len(), 1);
    let pitches: Vec<u8> = result.voices[0].iter().map(|n| n.pitch).collect();
    assert_eq!(pitches, vec![60, 67]);

    // orphans keep their original values
    assert_eq!(result.orphans.len(), 1);
    let orphan = &result.orphans[0];
    assert_eq!((orphan.pitch, orphan.onset, orphan.duration), (64, 240, 480));
    assert_eq!(orphan.velocity, 0.8);
}

#[test]
fn test_conservation_across_components() {
    let notes = make_notes(&[
        (61, 0, 40),
        (60, 40, 440),
        (64, 0, 480),
        (67, 13, 470),
        (72, 480, 240),
        (71, 720, 240),
        (48, 480, 960),
        (55, 960, 480),
        (60, 960, 500),
        (60, 1200, 480),
        (84, 1300, 50),
    ]);

    let analysis = detect_ornaments(&notes, &OrnamentParams::new(480, 120.0));
    assert_eq!(analysis.notes.len(), notes.len());

    let outcome = shadow_quantize(
        &notes,
        480,
        &sixteenths(),
        &triplet_eighths(),
        &QuantizerWeights::default(),
    );
    assert_eq!(outcome.notes.len(), notes.len());
    assert_eq!(outcome.decisions.len(), notes.len());

    let result = distribute_voices(&notes, 480, &VoiceOptions::default());
    assert_eq!(result.note_count(), notes.len());

    let track = annotate(&notes, 480, &ConversionOptions::default()).unwrap();
    assert_eq!(track.notes.len(), notes.len());
    let placed = track.voices.iter().map(Vec::len).sum::<usize>() + track.orphans.len();
    assert_eq!(placed, notes.len());
}

#[test]
fn test_pipeline_output_is_deterministic() {
    let notes = make_notes(&[
        (60, 5, 233),
        (64, 2, 470),
        (67, 250, 230),
        (60, 480, 480),
        (72, 470, 120),
    ]);
    let options = ConversionOptions {
        secondary_rhythm: triplet_eighths(),
        ..Default::default()
    };
    let first = annotate(&notes, 480, &options).unwrap();
    let second = annotate(&notes, 480, &options).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_decision_json_shape() {
    let notes = make_notes(&[(60, 0, 360), (60, 240, 360)]);
    let track = annotate(&notes, 480, &ConversionOptions::default()).unwrap();

    let json = serde_json::to_value(&track).unwrap();
    let decision = &json["annotations"]["240:60:1"]["shadow_decision"];
    assert_eq!(decision["confidence"], "CERTAIN");
    assert_eq!(decision["selected_family"], "simple");
    assert_eq!(decision["conflicts"][0], "type1_unison_overlap");
    assert_eq!(
        decision["accommodation_applied"][0]["note_id"],
        serde_json::json!("0:60:0")
    );
}
