//! The utterance session: the public face of the engine.
//!
//! A [`Decoder`] owns one frontend and one search engine and drives them through the
//! `start_utt -> process_raw* -> end_utt` lifecycle. Models are shared read-only through an
//! `Arc`, so any number of decoders can run on separate threads over one [`Models`] load:
//!
//! ```no_run
//! use murmur::config::Config;
//! use murmur::decoder::Decoder;
//!
//! let mut config = Config::default_config();
//! config.set_str("-hmm", "model/en-us")?;
//! config.set_str("-dict", "model/en-us.dict")?;
//! config.set_str("-lm", "model/en-us.lm")?;
//!
//! let mut decoder = Decoder::new(&config)?;
//! let audio = std::fs::read("goforward.raw")?;
//! decoder.start_utt()?;
//! for chunk in audio.chunks(4096) {
//!     decoder.process_raw(chunk, false, false)?;
//! }
//! decoder.end_utt()?;
//!
//! if let Some(hyp) = decoder.hyp() {
//!     println!("{} ({})", hyp.text, hyp.score);
//! }
//! for seg in decoder.seg() {
//!     println!("{} {} {}", seg.word, seg.start_frame, seg.end_frame);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::frontend::{FeatureFrame, Frontend};
use crate::hypothesis::{Hypothesis, NBestEntry, Segment};
use crate::model::Models;
use crate::search::SearchEngine;
use crate::{Error, Result};

pub struct Decoder {
    models: Arc<Models>,
    frontend: Frontend,
    search: SearchEngine,
    in_utt: bool,
    /// First byte of a sample split across two `process_raw` calls.
    carry: Option<u8>,
    /// Frames produced under `no_search`, searched by the next searching call.
    deferred: VecDeque<FeatureFrame>,
    utt_count: u64,
}

impl std::fmt::Debug for Decoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Decoder")
            .field("in_utt", &self.in_utt)
            .field("n_frames", &self.search.n_frames())
            .field("deferred", &self.deferred.len())
            .finish()
    }
}

impl Decoder {
    /// A configuration pre-populated with the engine defaults.
    pub fn default_config() -> Config {
        Config::default_config()
    }

    /// Load the models named by `config` and create a session over them.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Self::with_models(Models::load(config)?))
    }

    /// Create a session over models that may be shared with other sessions.
    pub fn with_models(models: Arc<Models>) -> Self {
        Self {
            frontend: Frontend::new(models.frontend_config().clone()),
            search: SearchEngine::new(Arc::clone(&models)),
            models,
            in_utt: false,
            carry: None,
            deferred: VecDeque::new(),
            utt_count: 0,
        }
    }

    pub fn models(&self) -> &Arc<Models> {
        &self.models
    }

    pub fn in_utt(&self) -> bool {
        self.in_utt
    }

    /// Frames searched so far in the current (or last) utterance.
    pub fn n_frames(&self) -> usize {
        self.search.n_frames()
    }

    pub fn frame_rate(&self) -> u32 {
        self.models.frontend_config().frame_rate
    }

    /// Begin a new utterance, discarding the previous result.
    pub fn start_utt(&mut self) -> Result<()> {
        if self.in_utt {
            return Err(Error::sequence(
                "start_utt called while an utterance is in progress",
            ));
        }
        self.frontend.reset();
        self.search.reset();
        self.search.start()?;
        self.carry = None;
        self.deferred.clear();
        self.in_utt = true;
        Ok(())
    }

    /// Feed raw 16-bit PCM bytes in the configured byte order.
    ///
    /// An odd trailing byte is held until the next call. With `no_search` the resulting frames
    /// are computed but only searched by the next call without it (or by [`Self::end_utt`]).
    /// `full_utt` is accepted as a hint and does not change the result.
    ///
    /// Returns the number of frames this call produced.
    pub fn process_raw(&mut self, data: &[u8], no_search: bool, full_utt: bool) -> Result<usize> {
        if !self.in_utt {
            return Err(Error::sequence("process_raw called before start_utt"));
        }
        let _ = full_utt;
        let big_endian = self.frontend.config().big_endian;
        let to_sample = |pair: [u8; 2]| {
            if big_endian {
                i16::from_be_bytes(pair)
            } else {
                i16::from_le_bytes(pair)
            }
        };

        let mut samples = Vec::with_capacity(data.len() / 2 + 1);
        let mut bytes = data;
        if let Some(first) = self.carry.take() {
            match data.split_first() {
                Some((&second, rest)) => {
                    samples.push(to_sample([first, second]));
                    bytes = rest;
                }
                None => self.carry = Some(first),
            }
        }
        let mut pairs = bytes.chunks_exact(2);
        samples.extend(pairs.by_ref().map(|p| to_sample([p[0], p[1]])));
        if let Some(&last) = pairs.remainder().first() {
            self.carry = Some(last);
        }

        self.process(&samples, no_search)
    }

    /// Feed samples directly.
    pub fn process_int16(&mut self, samples: &[i16], no_search: bool, full_utt: bool) -> Result<usize> {
        if !self.in_utt {
            return Err(Error::sequence("process_int16 called before start_utt"));
        }
        let _ = full_utt;
        self.process(samples, no_search)
    }

    fn process(&mut self, samples: &[i16], no_search: bool) -> Result<usize> {
        if !no_search {
            self.drain_deferred()?;
        }
        let mut produced = 0;
        for frame in self.frontend.push(samples) {
            produced += 1;
            if no_search {
                self.deferred.push_back(frame);
            } else {
                self.search.advance(&frame)?;
            }
        }
        Ok(produced)
    }

    fn drain_deferred(&mut self) -> Result<()> {
        while let Some(frame) = self.deferred.pop_front() {
            self.search.advance(&frame)?;
        }
        Ok(())
    }

    /// Finish the utterance: flush the frontend, search every remaining frame and publish the
    /// hypothesis, segmentation and N-best list.
    pub fn end_utt(&mut self) -> Result<()> {
        if !self.in_utt {
            return Err(Error::sequence("end_utt called without start_utt"));
        }
        self.in_utt = false;
        if self.carry.take().is_some() {
            debug!("dropping odd trailing byte at end of utterance");
        }
        self.drain_deferred()?;
        for frame in self.frontend.flush() {
            self.search.advance(&frame)?;
        }
        let frames = self.search.n_frames();
        self.utt_count += 1;
        let result = self.search.finish()?;
        debug!(
            utterance = self.utt_count,
            frames,
            words = result.segments.len(),
            lattice_entries = result.lattice.n_entries(),
            score = result.hypothesis.score,
            confidence = result.hypothesis.confidence,
            "utterance decoded"
        );
        Ok(())
    }

    /// The best hypothesis of the last finished utterance.
    pub fn hyp(&self) -> Option<&Hypothesis> {
        self.search.result().map(|r| &r.hypothesis)
    }

    /// Word segments of the last hypothesis, in time order. Fillers are not included.
    pub fn seg(&self) -> Segments<'_> {
        let segments = self
            .search
            .result()
            .map(|r| r.segments.as_slice())
            .unwrap_or_default();
        Segments {
            inner: segments.iter(),
        }
    }

    /// Up to `k` distinct alternatives for the last utterance, best first.
    ///
    /// `k` is capped by the `maxnbest` option; empty before the first utterance finishes.
    pub fn nbest(&self, k: usize) -> Vec<NBestEntry> {
        self.search.nbest(k)
    }
}

/// Restartable iterator over the segments of a hypothesis; clone it to iterate again.
#[derive(Debug, Clone)]
pub struct Segments<'a> {
    inner: std::slice::Iter<'a, Segment>,
}

impl<'a> Iterator for Segments<'a> {
    type Item = &'a Segment;

    fn next(&mut self) -> Option<&'a Segment> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Segments<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing;

    fn tone(n: usize) -> Vec<u8> {
        (0..n)
            .flat_map(|i| {
                let v = ((i as f32 * 0.07).sin() * 3000.0) as i16;
                v.to_le_bytes()
            })
            .collect()
    }

    #[test]
    fn lifecycle_is_enforced() -> anyhow::Result<()> {
        let mut d = Decoder::with_models(testing::models());
        assert!(matches!(d.process_raw(&[], false, false), Err(Error::Sequence(_))));
        assert!(matches!(d.end_utt(), Err(Error::Sequence(_))));
        d.start_utt()?;
        assert!(matches!(d.start_utt(), Err(Error::Sequence(_))));
        assert!(d.in_utt());
        d.end_utt()?;
        assert!(!d.in_utt());
        d.start_utt()?;
        d.end_utt()?;
        Ok(())
    }

    #[test]
    fn empty_utterance_gives_empty_hypothesis() -> anyhow::Result<()> {
        let mut d = Decoder::with_models(testing::models());
        assert!(d.hyp().is_none());
        d.start_utt()?;
        assert_eq!(d.process_raw(&[], false, false)?, 0);
        d.end_utt()?;
        let hyp = d.hyp().expect("hypothesis after end_utt");
        assert!(hyp.is_empty());
        assert_eq!(d.seg().count(), 0);
        assert_eq!(d.n_frames(), 0);
        Ok(())
    }

    #[test]
    fn odd_byte_boundaries_do_not_change_frames() -> anyhow::Result<()> {
        let audio = tone(4000);
        let mut a = Decoder::with_models(testing::models());
        a.start_utt()?;
        a.process_raw(&audio, false, true)?;
        a.end_utt()?;

        let mut b = Decoder::with_models(testing::models());
        b.start_utt()?;
        for chunk in audio.chunks(333) {
            b.process_raw(chunk, false, false)?;
        }
        b.end_utt()?;

        assert_eq!(a.n_frames(), b.n_frames());
        assert_eq!(a.hyp(), b.hyp());
        Ok(())
    }

    #[test]
    fn no_search_frames_are_deferred() -> anyhow::Result<()> {
        let audio = tone(3200);
        let mut d = Decoder::with_models(testing::models());
        d.start_utt()?;
        let produced = d.process_raw(&audio[..3200], true, false)?;
        assert!(produced > 0);
        assert_eq!(d.n_frames(), 0);
        d.process_raw(&audio[3200..], false, false)?;
        assert!(d.n_frames() >= produced);
        d.end_utt()?;

        let mut all = Decoder::with_models(testing::models());
        all.start_utt()?;
        all.process_raw(&audio, false, true)?;
        all.end_utt()?;
        assert_eq!(d.n_frames(), all.n_frames());
        assert_eq!(d.hyp(), all.hyp());
        Ok(())
    }

    #[test]
    fn big_endian_input_matches_little_endian() -> anyhow::Result<()> {
        let samples: Vec<i16> = (0..2000).map(|i| ((i * 37) % 2000 - 1000) as i16).collect();
        let le: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        let be: Vec<u8> = samples.iter().flat_map(|s| s.to_be_bytes()).collect();

        let mut config = Config::default_config();
        config.set_str("-cmn", "none")?.set_str("-input_endian", "big")?;
        let mut big = Decoder::with_models(testing::models_with(config));
        big.start_utt()?;
        big.process_raw(&be, false, false)?;
        big.end_utt()?;

        let mut little = Decoder::with_models(testing::models());
        little.start_utt()?;
        little.process_raw(&le, false, false)?;
        little.end_utt()?;

        let mut direct = Decoder::with_models(testing::models());
        direct.start_utt()?;
        direct.process_int16(&samples, false, false)?;
        direct.end_utt()?;

        assert_eq!(big.hyp(), little.hyp());
        assert_eq!(direct.hyp(), little.hyp());
        assert_eq!(direct.n_frames(), little.n_frames());
        Ok(())
    }

    #[test]
    fn segments_iterator_restarts() -> anyhow::Result<()> {
        let mut d = Decoder::with_models(testing::models());
        d.start_utt()?;
        d.process_raw(&tone(8000), false, false)?;
        d.end_utt()?;
        let segs = d.seg();
        assert_eq!(segs.len(), segs.clone().count());
        assert_eq!(d.seg().count(), d.seg().count());
        Ok(())
    }
}
