mod common;

use std::sync::Arc;

use anyhow::Result;

use murmur::Error;
use murmur::decoder::Decoder;
use murmur::endpointer::{Endpointer, EndpointerConfig, SegmentedDecoder};
use murmur::hypothesis::Segment;
use murmur::model::Models;
use murmur::wav;

fn decode_chunks(decoder: &mut Decoder, audio: &[u8], chunk: usize) -> Result<()> {
    decoder.start_utt()?;
    for piece in audio.chunks(chunk) {
        decoder.process_raw(piece, false, false)?;
    }
    decoder.end_utt()?;
    Ok(())
}

#[test]
fn golden_decode_is_alpha_bravo() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;
    let audio = wav::to_le_bytes(&common::alpha_bravo());

    for _ in 0..2 {
        decoder.start_utt()?;
        decoder.process_raw(&audio, false, true)?;
        decoder.end_utt()?;

        let hyp = decoder.hyp().expect("hypothesis");
        assert_eq!(hyp.text, "alpha bravo");
        assert!(hyp.confidence > 0.0 && hyp.confidence <= 1.0);
        let words: Vec<&str> = decoder.seg().map(|s| s.word.as_str()).collect();
        assert_eq!(words, ["alpha", "bravo"]);
    }
    Ok(())
}

#[test]
fn segments_are_ordered_and_match_the_hypothesis() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;
    decode_chunks(&mut decoder, &wav::to_le_bytes(&common::alpha_bravo()), 4096)?;

    let segs: Vec<&Segment> = decoder.seg().collect();
    for s in &segs {
        assert!(s.start_frame <= s.end_frame);
        assert!(s.end_frame < decoder.n_frames());
    }
    for pair in segs.windows(2) {
        assert!(pair[0].end_frame < pair[1].start_frame);
    }
    let joined = segs.iter().map(|s| s.word.as_str()).collect::<Vec<_>>().join(" ");
    let hyp = decoder.hyp().expect("hypothesis");
    assert_eq!(joined, hyp.words().collect::<Vec<_>>().join(" "));

    // 440 Hz starts at 300 ms, 2 kHz at 1050 ms.
    let rate = decoder.frame_rate() as f32;
    assert!((segs[0].start_seconds(decoder.frame_rate()) - 0.30).abs() < 0.1);
    assert!((segs[1].start_frame as f32 / rate - 1.05).abs() < 0.1);
    Ok(())
}

#[test]
fn chunk_boundaries_do_not_change_results() -> Result<()> {
    let model = common::build()?;
    let models = Models::load(&model.config)?;
    let audio = wav::to_le_bytes(&common::alpha_bravo());

    let mut whole = Decoder::with_models(Arc::clone(&models));
    decode_chunks(&mut whole, &audio, audio.len())?;

    for chunk in [4096, 1001, 2] {
        let mut split = Decoder::with_models(Arc::clone(&models));
        decode_chunks(&mut split, &audio, chunk)?;
        assert_eq!(split.hyp(), whole.hyp(), "chunk size {chunk}");
        assert!(split.seg().eq(whole.seg()), "chunk size {chunk}");
        assert_eq!(split.nbest(10), whole.nbest(10), "chunk size {chunk}");
    }
    Ok(())
}

#[test]
fn empty_utterance_is_not_an_error() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;
    decoder.start_utt()?;
    decoder.end_utt()?;
    let hyp = decoder.hyp().expect("hypothesis");
    assert!(hyp.is_empty());
    assert_eq!(decoder.seg().count(), 0);
    assert!(decoder.nbest(5).is_empty());
    Ok(())
}

#[test]
fn lifecycle_errors_leave_the_session_usable() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;

    assert!(matches!(
        decoder.process_raw(&[0, 0], false, false),
        Err(Error::Sequence(_))
    ));
    assert!(matches!(decoder.end_utt(), Err(Error::Sequence(_))));
    decoder.start_utt()?;
    assert!(matches!(decoder.start_utt(), Err(Error::Sequence(_))));

    decoder.process_raw(&wav::to_le_bytes(&common::alpha_bravo()), false, false)?;
    decoder.end_utt()?;
    assert_eq!(decoder.hyp().map(|h| h.text.as_str()), Some("alpha bravo"));
    Ok(())
}

#[test]
fn nbest_is_sorted_and_bounded() -> Result<()> {
    let model = common::build()?;
    let mut config = model.config.clone();
    config.set_int("-maxnbest", 3)?;
    let mut decoder = Decoder::new(&config)?;
    decode_chunks(&mut decoder, &wav::to_le_bytes(&common::alpha_bravo()), 4096)?;

    let list = decoder.nbest(10);
    assert!(!list.is_empty());
    assert!(list.len() <= 3);
    assert_eq!(list[0].hypothesis.text, "alpha bravo");
    for pair in list.windows(2) {
        assert!(pair[0].score() >= pair[1].score());
        assert_ne!(pair[0].hypothesis.text, pair[1].hypothesis.text);
    }
    for (i, e) in list.iter().enumerate() {
        assert_eq!(e.rank, i);
    }
    assert_eq!(decoder.nbest(1).len(), 1);
    assert!(decoder.nbest(0).is_empty());
    Ok(())
}

#[test]
fn missing_and_malformed_models_fail_construction() -> Result<()> {
    let model = common::build()?;

    let mut missing = model.config.clone();
    missing.set_str("-lm", &model.dir.path().join("nope.lm").to_string_lossy())?;
    let err = Decoder::new(&missing).unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert!(err.is_setup_error());

    let bad_lm = model.dir.path().join("bad.lm");
    std::fs::write(&bad_lm, "not a language model\n")?;
    let mut malformed = model.config.clone();
    malformed.set_str("-lm", &bad_lm.to_string_lossy())?;
    assert!(matches!(
        Decoder::new(&malformed),
        Err(Error::ModelLoad { .. })
    ));

    let mut config = model.config.clone();
    assert!(matches!(
        config.set_str("-no_such_option", "1"),
        Err(Error::InvalidKey(_))
    ));
    Ok(())
}

#[test]
fn sessions_share_models_across_threads() -> Result<()> {
    let model = common::build()?;
    let models = Models::load(&model.config)?;
    let audio = wav::to_le_bytes(&common::alpha_bravo());

    let texts = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let models = Arc::clone(&models);
                let audio = &audio;
                scope.spawn(move || -> Result<String> {
                    let mut decoder = Decoder::with_models(models);
                    decode_chunks(&mut decoder, audio, 512 * (i + 1))?;
                    Ok(decoder.hyp().map(|h| h.text.clone()).unwrap_or_default())
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().expect("decoder thread panicked"))
            .collect::<Result<Vec<_>>>()
    })?;

    assert!(texts.iter().all(|t| t == "alpha bravo"), "{texts:?}");
    Ok(())
}

#[test]
fn endpointed_stream_decodes_each_utterance() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;
    let endpointer = Endpointer::new(EndpointerConfig::new(common::SAMPLE_RATE as u32))?;
    let mut stream = SegmentedDecoder::new(&mut decoder, endpointer)?.with_nbest(2);

    let mut found = Vec::new();
    for chunk in common::alpha_pause_bravo().chunks(4096) {
        found.extend(stream.push(chunk)?);
    }
    found.extend(stream.finish()?);

    let texts: Vec<&str> = found.iter().map(|s| s.hypothesis.text.as_str()).collect();
    assert_eq!(texts, ["alpha", "bravo"]);
    assert!((found[0].start - 0.3).abs() < 0.1, "{}", found[0].start);
    assert!((found[1].start - 1.8).abs() < 0.1, "{}", found[1].start);
    for seg in &found {
        assert!(seg.start < seg.end);
        assert_eq!(seg.segments.len(), 1);
        assert!(!seg.nbest.is_empty() && seg.nbest.len() <= 2);
    }
    assert!(!decoder.in_utt());
    Ok(())
}

#[test]
fn endpointer_must_match_the_model_rate() -> Result<()> {
    let model = common::build()?;
    let mut decoder = Decoder::new(&model.config)?;
    let endpointer = Endpointer::new(EndpointerConfig::new(8_000))?;
    assert!(matches!(
        SegmentedDecoder::new(&mut decoder, endpointer),
        Err(Error::Config(_))
    ));

    decoder.start_utt()?;
    let endpointer = Endpointer::new(EndpointerConfig::new(common::SAMPLE_RATE as u32))?;
    assert!(matches!(
        SegmentedDecoder::new(&mut decoder, endpointer),
        Err(Error::Sequence(_))
    ));
    Ok(())
}
