//! Time-synchronous Viterbi beam search over a flat lexicon.
//!
//! Every decodable word is a chain of phone HMMs. Tokens flow through word HMMs frame by frame;
//! a token leaving a word's last state becomes a backpointer entry, and every backpointer of the
//! current frame may enter every word at the next frame with its language model (or filler)
//! score. Backpointers form the word lattice that [`SearchEngine::finish`] turns into the
//! hypothesis, segmentation and N-best list.
//!
//! The engine moves through `Idle -> Active -> Finalized -> Idle`:
//! - [`SearchEngine::start`] requires `Idle`
//! - [`SearchEngine::advance`] and [`SearchEngine::finish`] require `Active`
//! - [`SearchEngine::reset`] returns to `Idle` from anywhere
//!
//! Scores are natural-log probabilities. Ties are broken in favour of whatever was seen first
//! (lower word id, earlier backpointer), so identical input always yields identical output.

mod hmm;
mod lattice;
mod nbest;

use std::sync::Arc;

use tracing::debug;

use crate::config::Config;
use crate::frontend::FeatureFrame;
use crate::hypothesis::{Hypothesis, NBestEntry, Segment};
use crate::model::Models;
use crate::scorer::AcousticScorer;
use crate::{Error, Result};

use hmm::{BpIndex, Token, WordHmm};
use lattice::Backpointer;

pub use lattice::Lattice;

/// Search parameters in the log domain.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    /// Log beam widths; states, phone transitions and word exits scoring below
    /// `best + beam` are discarded.
    pub beam: f32,
    pub pbeam: f32,
    pub wbeam: f32,
    pub lw: f32,
    pub log_wip: f32,
    pub log_pip: f32,
    /// `lw * ln(silprob)`.
    pub log_silpen: f32,
    /// `lw * ln(fillprob)`.
    pub log_fillpen: f32,
    pub maxhmmpf: Option<usize>,
    pub maxwpf: Option<usize>,
    pub maxnbest: usize,
    pub ascale: f32,
    pub compallsen: bool,
}

/// `ln` of a probability option, which must lie in `(0, 1]`.
fn log_prob(config: &Config, key: &str) -> Result<f32> {
    let p = config.get_float(key)?;
    if !(p > 0.0 && p <= 1.0) {
        return Err(Error::config(format!("'-{key}' must be in (0, 1], got {p}")));
    }
    Ok(p.ln() as f32)
}

/// `ln` of a penalty option, which may exceed one.
fn log_penalty(config: &Config, key: &str) -> Result<f32> {
    let p = config.get_float(key)?;
    if !(p > 0.0 && p.is_finite()) {
        return Err(Error::config(format!("'-{key}' must be positive, got {p}")));
    }
    Ok(p.ln() as f32)
}

fn cap(config: &Config, key: &str) -> Result<Option<usize>> {
    let v = config.get_int(key)?;
    Ok(usize::try_from(v).ok().filter(|v| *v > 0))
}

impl SearchParams {
    pub fn from_config(config: &Config) -> Result<Self> {
        let lw = config.get_float("lw")? as f32;
        if lw < 0.0 {
            return Err(Error::config(format!("'-lw' must not be negative, got {lw}")));
        }
        let ascale = config.get_float("ascale")? as f32;
        if ascale <= 0.0 {
            return Err(Error::config(format!("'-ascale' must be positive, got {ascale}")));
        }
        let maxnbest = config.get_int("maxnbest")?;
        let maxnbest = usize::try_from(maxnbest)
            .map_err(|_| Error::config(format!("'-maxnbest' must not be negative, got {maxnbest}")))?;

        Ok(Self {
            beam: log_prob(config, "beam")?,
            pbeam: log_prob(config, "pbeam")?,
            wbeam: log_prob(config, "wbeam")?,
            lw,
            log_wip: log_penalty(config, "wip")?,
            log_pip: log_penalty(config, "pip")?,
            log_silpen: lw * log_prob(config, "silprob")?,
            log_fillpen: lw * log_prob(config, "fillprob")?,
            maxhmmpf: cap(config, "maxhmmpf")?,
            maxwpf: cap(config, "maxwpf")?,
            maxnbest,
            ascale,
            compallsen: config.get_bool("compallsen")?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchState {
    Idle,
    Active,
    Finalized,
}

/// The finalized result of one utterance.
#[derive(Debug, Clone)]
pub struct SearchResult {
    pub hypothesis: Hypothesis,
    pub segments: Vec<Segment>,
    pub lattice: Lattice,
}

/// Senone scores for the current frame, computed on first use.
struct SenoneCache {
    scores: Vec<f32>,
    stamp: Vec<usize>,
}

impl SenoneCache {
    fn new(n: usize) -> Self {
        Self {
            scores: vec![0.0; n],
            stamp: vec![0; n],
        }
    }

    fn reset(&mut self) {
        self.stamp.fill(0);
    }

    #[inline]
    fn get(
        &mut self,
        scorer: &dyn AcousticScorer,
        frame: &FeatureFrame,
        senone: usize,
        stamp: usize,
    ) -> f32 {
        if self.stamp[senone] != stamp {
            self.scores[senone] = scorer.score(frame, senone);
            self.stamp[senone] = stamp;
        }
        self.scores[senone]
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct UttStats {
    word_evals: usize,
    exits: usize,
}

pub struct SearchEngine {
    models: Arc<Models>,
    state: SearchState,
    words: Vec<WordHmm>,
    active: Vec<usize>,
    bps: Vec<Backpointer>,
    n_frames: usize,
    senones: SenoneCache,
    stats: UttStats,
    result: Option<SearchResult>,
}

impl SearchEngine {
    pub fn new(models: Arc<Models>) -> Self {
        let words = models
            .lexicon()
            .words()
            .iter()
            .map(|w| WordHmm::new(&w.phones, models.mdef()))
            .collect();
        let senones = SenoneCache::new(models.scorer().n_senones());
        Self {
            models,
            state: SearchState::Idle,
            words,
            active: Vec::new(),
            bps: Vec::new(),
            n_frames: 0,
            senones,
            stats: UttStats::default(),
            result: None,
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Frames searched in the current (or last) utterance.
    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Begin an utterance with a single root hypothesis at frame 0.
    pub fn start(&mut self) -> Result<()> {
        if self.state != SearchState::Idle {
            return Err(Error::sequence(format!(
                "cannot start a search while it is {:?}",
                self.state
            )));
        }
        self.clear_words();
        self.bps.clear();
        self.n_frames = 0;
        self.senones.reset();
        self.stats = UttStats::default();
        self.result = None;

        let root_hist = [self.models.lexicon().sentence_start(), None];
        self.bps.push(Backpointer {
            word: None,
            pred: None,
            start_frame: 0,
            end_excl: 0,
            score: 0.0,
            ascore: 0.0,
            lscore: 0.0,
            hist: root_hist,
        });
        let mut next = Vec::new();
        self.enter_words(0, f32::NEG_INFINITY, &mut next);
        self.active = self.finish_queue(next);
        self.state = SearchState::Active;
        Ok(())
    }

    /// Advance every live hypothesis by one frame.
    pub fn advance(&mut self, frame: &FeatureFrame) -> Result<()> {
        if self.state != SearchState::Active {
            return Err(Error::sequence(format!(
                "cannot advance a search while it is {:?}",
                self.state
            )));
        }
        let models = Arc::clone(&self.models);
        let scorer = models.scorer();
        if frame.values.len() != scorer.feature_len() {
            return Err(Error::msg(format!(
                "feature frame has {} values, expected {}",
                frame.values.len(),
                scorer.feature_len()
            )));
        }
        let params = models.search_params();
        let tmats = models.tmats();
        let t = self.n_frames;
        let stamp = t + 1;

        if params.compallsen {
            for s in 0..scorer.n_senones() {
                self.senones.get(scorer, frame, s, stamp);
            }
        }

        // Viterbi update.
        let active = std::mem::take(&mut self.active);
        let mut best = f32::NEG_INFINITY;
        {
            let senones = &mut self.senones;
            for &w in &active {
                let b = self.words[w].eval(tmats, |s| senones.get(scorer, frame, s, stamp));
                best = best.max(b);
            }
        }
        self.stats.word_evals += active.len();

        // Beam and active-word pruning.
        let threshold = best + params.beam;
        let mut live = Vec::with_capacity(active.len());
        for &w in &active {
            self.words[w].prune(threshold);
            if self.words[w].best_score() > f32::NEG_INFINITY {
                live.push(w);
            }
        }
        if let Some(cap) = params.maxhmmpf {
            if live.len() > cap {
                let words = &self.words;
                live.sort_by(|a, b| words[*b].best_score().total_cmp(&words[*a].best_score()));
                for &w in &live[cap..] {
                    self.words[w].clear();
                }
                live.truncate(cap);
                live.sort_unstable();
            }
        }

        // Phone transitions and word exits.
        let phone_threshold = best + params.pbeam;
        let word_threshold = best + params.wbeam;
        let mut exits: Vec<(usize, Token)> = Vec::new();
        for &w in &live {
            let hmm = &mut self.words[w];
            let last = hmm.n_phones() - 1;
            for k in 0..last {
                let out = hmm.exit(k, tmats);
                let score = out.score + params.log_pip;
                if out.is_live() && score >= phone_threshold {
                    hmm.enter(k + 1, Token { score, bp: out.bp });
                }
            }
            let out = hmm.exit(last, tmats);
            if out.is_live() && out.score >= word_threshold {
                exits.push((w, out));
            }
        }
        if let Some(cap) = params.maxwpf {
            if exits.len() > cap {
                exits.sort_by(|a, b| b.1.score.total_cmp(&a.1.score));
                exits.truncate(cap);
            }
        }
        self.stats.exits += exits.len();

        // Record exits in the lattice.
        let first_new = self.bps.len();
        for (w, tok) in exits {
            let pred = &self.bps[tok.bp as usize];
            let (lscore, hist) = nbest::entry_score(&models, w, pred.hist);
            let bp = Backpointer {
                word: Some(w),
                pred: Some(tok.bp),
                start_frame: pred.end_excl,
                end_excl: t + 1,
                score: tok.score,
                ascore: tok.score - pred.score - lscore,
                lscore,
                hist,
            };
            self.bps.push(bp);
        }

        // Queue words for the next frame.
        let mut next = Vec::with_capacity(live.len());
        for &w in &live {
            if self.words[w].is_live() {
                self.words[w].queued = true;
                next.push(w);
            }
        }
        for b in first_new..self.bps.len() {
            self.enter_words(b, threshold, &mut next);
        }
        self.active = self.finish_queue(next);
        self.n_frames += 1;
        Ok(())
    }

    /// Offer an entry from backpointer `b` to every lexicon word.
    fn enter_words(&mut self, b: usize, threshold: f32, next: &mut Vec<usize>) {
        let (score, hist) = (self.bps[b].score, self.bps[b].hist);
        for w in 0..self.words.len() {
            let (lscore, _) = nbest::entry_score(&self.models, w, hist);
            let s = score + lscore;
            if s < threshold {
                continue;
            }
            let hmm = &mut self.words[w];
            if hmm.enter(0, Token { score: s, bp: b as BpIndex }) && !hmm.queued {
                hmm.queued = true;
                next.push(w);
            }
        }
    }

    fn finish_queue(&mut self, mut next: Vec<usize>) -> Vec<usize> {
        for &w in &next {
            self.words[w].queued = false;
        }
        next.sort_unstable();
        next
    }

    /// Close the utterance and compute its best path.
    pub fn finish(&mut self) -> Result<&SearchResult> {
        if self.state != SearchState::Active {
            return Err(Error::sequence(format!(
                "cannot finish a search while it is {:?}",
                self.state
            )));
        }
        let bps = std::mem::take(&mut self.bps);
        let lattice = Lattice::new(bps, self.n_frames, &self.models);
        let (hypothesis, segments) = lattice.best_path(&self.models);

        debug!(
            frames = self.n_frames,
            word_evals = self.stats.word_evals,
            exits = self.stats.exits,
            finals = lattice.finals.len(),
            words = segments.len(),
            "search finished"
        );

        self.clear_words();
        self.state = SearchState::Finalized;
        Ok(&*self.result.insert(SearchResult {
            hypothesis,
            segments,
            lattice,
        }))
    }

    /// Discard the lattice and any result; ready for the next utterance.
    pub fn reset(&mut self) {
        self.clear_words();
        self.bps.clear();
        self.n_frames = 0;
        self.result = None;
        self.state = SearchState::Idle;
    }

    pub fn result(&self) -> Option<&SearchResult> {
        self.result.as_ref()
    }

    /// Up to `k` distinct alternatives from the finalized lattice, best first.
    pub fn nbest(&self, k: usize) -> Vec<NBestEntry> {
        match &self.result {
            Some(result) => nbest::nbest(&result.lattice, &self.models, k),
            None => Vec::new(),
        }
    }

    fn clear_words(&mut self) {
        for &w in &self.active {
            self.words[w].clear();
        }
        self.active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing;

    /// Features whose first value selects the phone the toy scorer prefers.
    fn frames(phones: &[(usize, usize)]) -> Vec<FeatureFrame> {
        let mut out = Vec::new();
        for &(phone, n) in phones {
            for _ in 0..n {
                let mut values = vec![0.0; 39];
                values[0] = phone as f32;
                out.push(FeatureFrame {
                    index: out.len(),
                    values,
                });
            }
        }
        out
    }

    fn decode(engine: &mut SearchEngine, input: &[FeatureFrame]) -> SearchResult {
        engine.reset();
        engine.start().expect("start");
        for f in input {
            engine.advance(f).expect("advance");
        }
        engine.finish().expect("finish").clone()
    }

    #[test]
    fn state_machine_enforces_order() {
        let mut engine = SearchEngine::new(testing::models());
        let f = &frames(&[(0, 1)])[0];
        assert!(matches!(engine.advance(f), Err(Error::Sequence(_))));
        assert!(matches!(engine.finish(), Err(Error::Sequence(_))));
        engine.start().expect("start");
        assert!(matches!(engine.start(), Err(Error::Sequence(_))));
        engine.finish().expect("finish");
        assert_eq!(engine.state(), SearchState::Finalized);
        assert!(matches!(engine.start(), Err(Error::Sequence(_))));
        engine.reset();
        assert_eq!(engine.state(), SearchState::Idle);
        assert!(engine.result().is_none());
    }

    #[test]
    fn no_frames_gives_empty_hypothesis() {
        let mut engine = SearchEngine::new(testing::models());
        let result = decode(&mut engine, &[]);
        assert_eq!(result.hypothesis, Hypothesis::empty());
        assert!(engine.nbest(5).is_empty());
    }

    #[test]
    fn decodes_toy_phone_sequence() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        config.set_str("-cmn", "none")?.set_float("-silprob", 0.1)?;
        let mut engine = SearchEngine::new(testing::models_with(config));
        // SIL(0) AA(1) SIL BB(2) SIL
        let input = frames(&[(0, 8), (1, 12), (0, 8), (2, 12), (0, 8)]);
        let result = decode(&mut engine, &input);
        assert_eq!(result.hypothesis.text, "alpha bravo");
        assert_eq!(result.segments.len(), 2);
        assert!(result.segments[0].end_frame < result.segments[1].start_frame);
        assert!(result.hypothesis.confidence > 0.0 && result.hypothesis.confidence <= 1.0);

        let list = engine.nbest(5);
        assert!(!list.is_empty());
        assert!(list.windows(2).all(|w| w[0].score() >= w[1].score()));
        assert_eq!(list[0].hypothesis.text, "alpha bravo");
        Ok(())
    }

    #[test]
    fn decoding_is_repeatable() {
        let mut engine = SearchEngine::new(testing::models());
        let input = frames(&[(0, 5), (2, 10), (0, 5)]);
        let a = decode(&mut engine, &input);
        let b = decode(&mut engine, &input);
        assert_eq!(a.hypothesis, b.hypothesis);
        assert_eq!(a.segments, b.segments);
    }

    #[test]
    fn params_reject_bad_probabilities() -> anyhow::Result<()> {
        let mut config = Config::default_config();
        config.set_float("-beam", 2.0)?;
        assert!(SearchParams::from_config(&config).is_err());

        let mut config = Config::default_config();
        config.set_float("-wip", 0.0)?;
        assert!(SearchParams::from_config(&config).is_err());

        let params = SearchParams::from_config(&Config::default_config())?;
        assert!(params.beam < -100.0);
        assert_eq!(params.maxwpf, None);
        assert_eq!(params.maxhmmpf, Some(30_000));
        Ok(())
    }
}
