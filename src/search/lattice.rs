//! The backpointer table: one entry per word exit, linked to the exit it was entered from.

use crate::hypothesis::{Hypothesis, Segment};
use crate::model::Models;
use crate::model::ngram::LmWord;

use super::hmm::BpIndex;

/// Language model context: the two most recent non-filler words, most recent first.
pub(crate) type History = [Option<LmWord>; 2];

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Backpointer {
    /// Lexicon word id; `None` for the utterance root.
    pub word: Option<usize>,
    pub pred: Option<BpIndex>,
    pub start_frame: usize,
    /// One past the last frame of the word.
    pub end_excl: usize,
    /// Path score up to and including this word.
    pub score: f32,
    pub ascore: f32,
    pub lscore: f32,
    pub hist: History,
}

/// The word lattice of one utterance.
#[derive(Debug, Clone, Default)]
pub struct Lattice {
    pub(crate) bps: Vec<Backpointer>,
    pub(crate) n_frames: usize,
    /// `(bp, final score)` for every word ending in the last frame, in table order.
    pub(crate) finals: Vec<(BpIndex, f32)>,
}

impl Lattice {
    pub(crate) fn new(bps: Vec<Backpointer>, n_frames: usize, models: &Models) -> Self {
        let finals = if n_frames == 0 {
            Vec::new()
        } else {
            bps.iter()
                .enumerate()
                .filter(|(_, bp)| bp.word.is_some() && bp.end_excl == n_frames)
                .map(|(i, bp)| (i as BpIndex, bp.score + final_lm_score(models, bp.hist)))
                .collect()
        };
        Self {
            bps,
            n_frames,
            finals,
        }
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    /// Number of word exits recorded.
    pub fn n_entries(&self) -> usize {
        self.bps.len().saturating_sub(1)
    }

    /// Best complete path; ties keep the earlier exit.
    pub(crate) fn best_final(&self) -> Option<(BpIndex, f32)> {
        let mut best: Option<(BpIndex, f32)> = None;
        for &(bp, score) in &self.finals {
            if best.is_none_or(|(_, b)| score > b) {
                best = Some((bp, score));
            }
        }
        best
    }

    /// Log of the summed scaled probability of every complete path.
    pub(crate) fn log_normalizer(&self, ascale: f32) -> f32 {
        let scaled: Vec<f32> = self.finals.iter().map(|(_, s)| s / ascale).collect();
        log_sum_exp(&scaled)
    }

    /// Backtrace the best complete path into a hypothesis and its word segments.
    pub(crate) fn best_path(&self, models: &Models) -> (Hypothesis, Vec<Segment>) {
        let Some((bp, score)) = self.best_final() else {
            return (Hypothesis::empty(), Vec::new());
        };
        let ascale = models.search_params().ascale;
        let confidence = (score / ascale - self.log_normalizer(ascale)).exp();

        let mut chain = Vec::new();
        let mut cur = Some(bp);
        while let Some(i) = cur {
            let entry = &self.bps[i as usize];
            if entry.word.is_none() {
                break;
            }
            chain.push(i);
            cur = entry.pred;
        }
        chain.reverse();

        let segments = self.segments_for(models, chain.iter().map(|&i| {
            let bp = &self.bps[i as usize];
            (i, bp.lscore)
        }));
        let hypothesis = Hypothesis {
            text: join_words(&segments),
            score,
            confidence: confidence.clamp(0.0, 1.0),
        };
        (hypothesis, segments)
    }

    /// Non-filler segments for a path given as `(bp, lscore)` pairs in time order.
    pub(crate) fn segments_for(
        &self,
        models: &Models,
        path: impl Iterator<Item = (BpIndex, f32)>,
    ) -> Vec<Segment> {
        let lexicon = models.lexicon();
        path.filter_map(|(i, lscore)| {
            let bp = &self.bps[i as usize];
            let word = lexicon.word(bp.word?);
            if word.is_filler() {
                return None;
            }
            Some(Segment {
                word: word.base.clone(),
                start_frame: bp.start_frame,
                end_frame: bp.end_excl - 1,
                ascore: bp.ascore,
                lscore,
            })
        })
        .collect()
    }
}

pub(crate) fn join_words(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.word.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Weighted `</s>` score for a path ending with history `hist`.
pub(crate) fn final_lm_score(models: &Models, hist: History) -> f32 {
    match models.lexicon().sentence_end() {
        Some(end) => models.search_params().lw * models.lm().score(end, hist),
        None => 0.0,
    }
}

pub(crate) fn log_sum_exp(xs: &[f32]) -> f32 {
    let max_v = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    if !max_v.is_finite() {
        return max_v;
    }
    let sum: f32 = xs.iter().map(|&v| (v - max_v).exp()).sum();
    max_v + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::testing;

    fn bp(word: Option<usize>, pred: Option<BpIndex>, start: usize, end: usize, score: f32) -> Backpointer {
        Backpointer {
            word,
            pred,
            start_frame: start,
            end_excl: end,
            score,
            ascore: score,
            lscore: 0.0,
            hist: [None, None],
        }
    }

    #[test]
    fn backtrace_skips_fillers() {
        let models = testing::models();
        // lexicon: 0 alpha, 1 bravo, 2 <sil>
        let bps = vec![
            bp(None, None, 0, 0, 0.0),
            bp(Some(0), Some(0), 0, 10, -10.0),
            bp(Some(2), Some(1), 10, 15, -12.0),
            bp(Some(1), Some(2), 15, 30, -20.0),
        ];
        let lattice = Lattice::new(bps, 30, &models);
        let (hyp, segs) = lattice.best_path(&models);
        assert_eq!(hyp.text, "alpha bravo");
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[1].start_frame, 15);
        assert_eq!(segs[1].end_frame, 29);
        assert!((hyp.confidence - 1.0).abs() < 1e-6);
    }

    #[test]
    fn no_final_exit_gives_empty_hypothesis() {
        let models = testing::models();
        let bps = vec![bp(None, None, 0, 0, 0.0), bp(Some(0), Some(0), 0, 10, -10.0)];
        let lattice = Lattice::new(bps, 20, &models);
        let (hyp, segs) = lattice.best_path(&models);
        assert_eq!(hyp, Hypothesis::empty());
        assert!(segs.is_empty());
    }

    #[test]
    fn confidence_splits_between_equal_paths() {
        let models = testing::models();
        let bps = vec![
            bp(None, None, 0, 0, 0.0),
            bp(Some(0), Some(0), 0, 10, -10.0),
            bp(Some(1), Some(0), 0, 10, -10.0),
        ];
        let lattice = Lattice::new(bps, 10, &models);
        let (hyp, _) = lattice.best_path(&models);
        assert_eq!(hyp.text, "alpha");
        assert!((hyp.confidence - 0.5).abs() < 1e-5);
    }

    #[test]
    fn log_sum_exp_handles_empty_and_infinite() {
        assert_eq!(log_sum_exp(&[]), f32::NEG_INFINITY);
        assert!((log_sum_exp(&[0.0, 0.0]) - 2f32.ln()).abs() < 1e-6);
    }
}
