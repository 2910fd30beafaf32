use beatmap_synth_core::{
    analyze,
    config::WalkConfig,
    generate, generate_from_analysis,
    markov::WalkPredictor,
    notes::{MAX_LINE_INDEX, MAX_LINE_LAYER},
    pipeline::segment_song,
    rng::song_rng,
    timeline::segment_demands,
    validate::lead_in_beats,
    AudioTrack, CutDirection, Difficulty, DifficultySelection, GenerationRequest, MarkovModel,
    ModelKind, Note, NoteToken, NoteType, Segment, StaticModelStore, SynthConfig,
};

const SR: u32 = 22_050;

fn constant_track(seconds: f64) -> AudioTrack {
    AudioTrack::new(vec![0.5; (seconds * SR as f64) as usize], SR).unwrap()
}

/// Clicks every half second over a tone that steps one semitone per beat.
fn melody(seconds: f64, base_hz: f64, noisy: bool) -> Vec<f32> {
    let mut state = 0x2545_f491_u32;
    (0..(seconds * SR as f64) as usize)
        .map(|i| {
            let t = i as f64 / SR as f64;
            let beat = (t * 2.0).floor();
            let phase = (t * 2.0).fract();
            let click = if phase < 0.01 { 0.6 } else { 0.0 };
            let tone = if noisy {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                0.2 * (state as f64 / u32::MAX as f64 - 0.5)
            } else {
                let hz = base_hz * 2f64.powf(beat / 12.0);
                0.3 * (t * hz * std::f64::consts::TAU).sin()
            };
            (click + tone) as f32
        })
        .collect()
}

fn aba_track() -> AudioTrack {
    let a = melody(12.0, 110.0, false);
    let b = melody(12.0, 0.0, true);
    let mut samples = a.clone();
    samples.extend_from_slice(&b);
    samples.extend_from_slice(&a);
    AudioTrack::new(samples, SR).unwrap()
}

fn token_model() -> MarkovModel {
    let run: Vec<String> = (0..600)
        .map(|i| {
            let note = Note {
                time: 0.0,
                line_index: (i % 4) as u8,
                line_layer: (i / 4 % 3) as u8,
                note_type: if i % 3 == 0 { NoteType::Right } else { NoteType::Left },
                cut_direction: CutDirection::ALL[i % 9],
            };
            NoteToken::from_notes(&[note]).to_string()
        })
        .collect();
    MarkovModel::train(&[run], 1).unwrap()
}

fn all_models() -> StaticModelStore {
    Difficulty::ALL
        .iter()
        .fold(StaticModelStore::new(), |store, d| store.with_model(*d, 2, token_model()))
}

fn assert_legal(notes: &[Note], bpm: f64) {
    let lead_in = lead_in_beats(bpm);
    for note in notes {
        assert!(note.time >= lead_in, "{note:?} inside lead-in");
        assert!(note.line_index <= MAX_LINE_INDEX);
        assert!(note.line_layer <= MAX_LINE_LAYER);
        assert!(matches!(
            note.note_type,
            NoteType::Left | NoteType::Right | NoteType::Bomb
        ));
        assert!(u8::from(note.cut_direction) <= 8);
    }
}

fn segment_at(segments: &[Segment], time: f64) -> &Segment {
    segments
        .iter()
        .find(|s| s.start_time <= time && time < s.end_time)
        .unwrap()
}

#[test]
fn flat_signal_easy_random_is_valid() {
    let track = constant_track(60.0);
    let request = GenerationRequest::new(
        "flat",
        DifficultySelection::Single(Difficulty::Easy),
        ModelKind::Random,
    );

    let beatmap = generate(&track, &request, &StaticModelStore::new(), &SynthConfig::default())
        .unwrap();
    assert!((beatmap.bpm - 120.0).abs() < 1.0);

    let easy = beatmap.track(Difficulty::Easy).unwrap();
    assert!(!easy.notes().is_empty());
    assert_legal(easy.notes(), beatmap.bpm);
    assert!(easy.notes().iter().all(|n| n.time >= 4.0));
}

#[test]
fn same_song_name_reproduces_notes() {
    let track = aba_track();
    let config = SynthConfig::default();
    let analysis = analyze(&track, &config).unwrap();
    let models = all_models();

    for model in [ModelKind::Random, ModelKind::Hmm, ModelKind::RateModulatedSegmentedHmm] {
        let request = GenerationRequest::new("Artist - Song", DifficultySelection::All, model);
        let first = generate_from_analysis(&analysis, &request, &models, &config).unwrap();
        let second = generate_from_analysis(&analysis, &request, &models, &config).unwrap();

        assert!(first.failures.is_empty(), "{:?}", first.failures);
        assert_eq!(
            serde_json::to_string(&first.tracks).unwrap(),
            serde_json::to_string(&second.tracks).unwrap(),
            "{model} not reproducible"
        );
        for track in &first.tracks {
            assert_legal(track.notes(), first.bpm);
        }
    }

    let request = GenerationRequest::new("Other - Song", DifficultySelection::All, ModelKind::Random);
    let other = generate_from_analysis(&analysis, &request, &models, &config).unwrap();
    let request = GenerationRequest::new("Artist - Song", DifficultySelection::All, ModelKind::Random);
    let original = generate_from_analysis(&analysis, &request, &models, &config).unwrap();
    assert_ne!(
        serde_json::to_string(&other.tracks).unwrap(),
        serde_json::to_string(&original.tracks).unwrap()
    );
}

#[test]
fn repeated_thirds_share_label_and_tokens() {
    let track = aba_track();
    let config = SynthConfig::default();
    let analysis = analyze(&track, &config).unwrap();

    let request = GenerationRequest::new(
        "aba",
        DifficultySelection::Single(Difficulty::Hard),
        ModelKind::SegmentedHmm,
    )
    .with_k(3);
    let beatmap = generate_from_analysis(&analysis, &request, &all_models(), &config).unwrap();
    assert!(beatmap.failures.is_empty(), "{:?}", beatmap.failures);
    assert_legal(beatmap.tracks[0].notes(), beatmap.bpm);

    let segments = &beatmap.segments;
    assert_eq!(segments[0].start_time, 0.0);
    assert!((segments[segments.len() - 1].end_time - analysis.duration).abs() < 1e-9);
    for pair in segments.windows(2) {
        assert_eq!(pair[0].end_time, pair[1].start_time);
        assert_eq!(pair[0].end_beat, pair[1].start_beat);
    }
    assert!(segments.iter().all(|s| s.label < 3));

    // The third third starts where the first one did.
    let opening = segment_at(segments, 0.75);
    let reprise = segment_at(segments, 24.75);
    assert_eq!(opening.label, reprise.label);

    // Replaying the walk for these segments: every repeat of a label starts
    // with the tokens of its first occurrence.
    let mut rng = song_rng("aba");
    let segments = segment_song(&analysis, &config, Some(3), &mut rng).unwrap();
    let demands = segment_demands(&segments);
    let model = token_model();
    let walk = WalkPredictor::new(&model, &WalkConfig::default())
        .predict_segments(&demands, &mut rng)
        .unwrap();

    for (i, first) in segments.iter().enumerate() {
        for (j, later) in segments.iter().enumerate().skip(i + 1) {
            if first.label != later.label {
                continue;
            }
            let a = &walk.tokens[walk.spans[i].clone()];
            let b = &walk.tokens[walk.spans[j].clone()];
            let shared = a.len().min(b.len());
            assert_eq!(a[..shared], b[..shared], "segments {i} and {j}");
        }
    }
}
