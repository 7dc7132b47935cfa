//! Word HMMs: a left-to-right chain of context-independent phone HMMs.

use crate::model::mdef::ModelDef;
use crate::model::tmat::TransitionMatrices;

pub(crate) type BpIndex = u32;

/// A Viterbi token: best score into a state and the word entry it descends from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Token {
    pub score: f32,
    pub bp: BpIndex,
}

impl Token {
    pub const NONE: Token = Token {
        score: f32::NEG_INFINITY,
        bp: 0,
    };

    #[inline]
    pub fn is_live(&self) -> bool {
        self.score > f32::NEG_INFINITY
    }
}

/// Static shape of one phone inside a word.
#[derive(Debug, Clone)]
pub(crate) struct PhoneSlot {
    pub tmat: usize,
    pub senones: Vec<usize>,
}

/// Per-word search state, reused across frames and utterances.
#[derive(Debug, Clone)]
pub(crate) struct WordHmm {
    pub phones: Vec<PhoneSlot>,
    n_emit: usize,
    /// `phones.len() * n_emit` state tokens.
    states: Vec<Token>,
    /// Pending entry into the first state of each phone for the next frame.
    entries: Vec<Token>,
    pub queued: bool,
}

impl WordHmm {
    pub fn new(phones: &[usize], mdef: &ModelDef) -> Self {
        let n_emit = mdef.n_emit_state();
        let phones: Vec<PhoneSlot> = phones
            .iter()
            .map(|&p| {
                let phone = mdef.phone(p);
                PhoneSlot {
                    tmat: phone.tmat,
                    senones: phone.senones.clone(),
                }
            })
            .collect();
        Self {
            states: vec![Token::NONE; phones.len() * n_emit],
            entries: vec![Token::NONE; phones.len()],
            phones,
            n_emit,
            queued: false,
        }
    }

    pub fn clear(&mut self) {
        self.states.fill(Token::NONE);
        self.entries.fill(Token::NONE);
        self.queued = false;
    }

    /// Offer an entry into phone `phone` for the next frame. Returns whether it was taken.
    pub fn enter(&mut self, phone: usize, token: Token) -> bool {
        if token.score > self.entries[phone].score {
            self.entries[phone] = token;
            true
        } else {
            false
        }
    }

    pub fn has_entry(&self) -> bool {
        self.entries.iter().any(Token::is_live)
    }

    pub fn is_live(&self) -> bool {
        self.states.iter().any(Token::is_live) || self.has_entry()
    }

    /// Advance one frame: Viterbi update of every state, consuming pending entries.
    ///
    /// `senone_score` gives the acoustic log likelihood of a senone for the current frame.
    /// Returns the best state score after the update.
    pub fn eval(
        &mut self,
        tmats: &TransitionMatrices,
        mut senone_score: impl FnMut(usize) -> f32,
    ) -> f32 {
        let n = self.n_emit;
        let mut best = f32::NEG_INFINITY;
        for (k, phone) in self.phones.iter().enumerate() {
            let base = k * n;
            let entry = std::mem::replace(&mut self.entries[k], Token::NONE);
            for j in (0..n).rev() {
                let mut from = if j == 0 { entry } else { Token::NONE };
                for i in 0..=j {
                    let prev = self.states[base + i];
                    if !prev.is_live() {
                        continue;
                    }
                    let s = prev.score + tmats.get(phone.tmat, i, j);
                    if s > from.score {
                        from = Token { score: s, bp: prev.bp };
                    }
                }
                if from.is_live() {
                    from.score += senone_score(phone.senones[j]);
                    best = best.max(from.score);
                }
                self.states[base + j] = from;
            }
        }
        best
    }

    /// Drop states scoring below `threshold`.
    pub fn prune(&mut self, threshold: f32) {
        for t in &mut self.states {
            if t.score < threshold {
                *t = Token::NONE;
            }
        }
    }

    pub fn best_score(&self) -> f32 {
        self.states
            .iter()
            .map(|t| t.score)
            .fold(f32::NEG_INFINITY, f32::max)
    }

    /// Best token leaving phone `k` through its non-emitting exit state.
    pub fn exit(&self, k: usize, tmats: &TransitionMatrices) -> Token {
        let n = self.n_emit;
        let tmat = self.phones[k].tmat;
        let mut out = Token::NONE;
        for i in 0..n {
            let t = self.states[k * n + i];
            if !t.is_live() {
                continue;
            }
            let s = t.score + tmats.get(tmat, i, n);
            if s > out.score {
                out = Token { score: s, bp: t.bp };
            }
        }
        out
    }

    pub fn n_phones(&self) -> usize {
        self.phones.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mdef::TINY_MDEF;

    fn setup() -> (ModelDef, TransitionMatrices) {
        let mdef = ModelDef::parse(TINY_MDEF).expect("mdef");
        let probs: Vec<f32> = (0..3)
            .flat_map(|_| [0.5, 0.5, 0.0, 0.0, 0.0, 0.5, 0.5, 0.0, 0.0, 0.0, 0.5, 0.5])
            .collect();
        let tm = TransitionMatrices::from_probs(3, &probs, 1e-4).expect("tmat");
        (mdef, tm)
    }

    #[test]
    fn token_walks_left_to_right() {
        let (mdef, tm) = setup();
        let mut w = WordHmm::new(&[1], &mdef);
        assert!(w.enter(0, Token { score: 0.0, bp: 7 }));
        assert!(!w.enter(0, Token { score: -1.0, bp: 8 }));

        // Frame 0: only state 0 is reachable.
        w.eval(&tm, |_| 0.0);
        assert!(!w.exit(0, &tm).is_live());

        // Frames 1 and 2: the token reaches state 2 and can leave.
        w.eval(&tm, |_| 0.0);
        w.eval(&tm, |_| 0.0);
        let exit = w.exit(0, &tm);
        assert!(exit.is_live());
        assert_eq!(exit.bp, 7);
        // Two forward transitions and the exit, each ln 0.5.
        assert!((exit.score - 3.0 * 0.5f32.ln()).abs() < 1e-5);
    }

    #[test]
    fn pruning_removes_weak_states() {
        let (mdef, tm) = setup();
        let mut w = WordHmm::new(&[1, 2], &mdef);
        w.enter(0, Token { score: 0.0, bp: 0 });
        let best = w.eval(&tm, |_| -1.0);
        assert_eq!(best, -1.0);
        w.prune(best - 0.5);
        assert!(w.is_live());
        w.prune(-0.5);
        assert!(!w.is_live());
    }

    #[test]
    fn acoustic_scores_accumulate() {
        let (mdef, tm) = setup();
        let mut w = WordHmm::new(&[1], &mdef);
        w.enter(0, Token { score: 0.0, bp: 0 });
        w.eval(&tm, |s| if s == 3 { -2.0 } else { -100.0 });
        assert_eq!(w.best_score(), -2.0);
    }
}
