//! Cepstral mean normalization and dynamic (delta) features.

use std::collections::VecDeque;

use super::{CmnMode, FeatureFrame, FeatureType, FrontendConfig};

const CMN_WINDOW: f32 = 500.0;
const CMN_WINDOW_HIGH: f32 = 800.0;

/// Running-mean CMN seeded from `cmninit`.
#[derive(Debug, Clone)]
struct LiveCmn {
    init: Vec<f32>,
    sum: Vec<f32>,
    n: f32,
}

impl LiveCmn {
    fn new(init: Vec<f32>) -> Self {
        let mut cmn = Self {
            sum: Vec::new(),
            init,
            n: 0.0,
        };
        cmn.reset();
        cmn
    }

    fn reset(&mut self) {
        self.sum = self.init.iter().map(|m| m * CMN_WINDOW).collect();
        self.n = CMN_WINDOW;
    }

    fn apply(&mut self, cep: &mut [f32]) {
        for (c, s) in cep.iter_mut().zip(self.sum.iter_mut()) {
            let raw = *c;
            *c -= *s / self.n;
            *s += raw;
        }
        self.n += 1.0;
        if self.n > CMN_WINDOW_HIGH {
            let scale = CMN_WINDOW / self.n;
            for s in &mut self.sum {
                *s *= scale;
            }
            self.n = CMN_WINDOW;
        }
    }
}

pub(crate) struct FeatureStage {
    kind: FeatureType,
    cmn: CmnMode,
    live: LiveCmn,
    /// Raw cepstra held back until the end of the utterance for batch CMN.
    batch: Vec<Vec<f32>>,
    /// Normalized cepstra; `history[0]` has utterance index `base`.
    history: VecDeque<Vec<f32>>,
    base: usize,
    received: usize,
    emitted: usize,
    finished: bool,
}

impl FeatureStage {
    pub(crate) fn new(cfg: &FrontendConfig) -> Self {
        Self {
            kind: cfg.feat,
            cmn: cfg.cmn,
            live: LiveCmn::new(cfg.cmninit.clone()),
            batch: Vec::new(),
            history: VecDeque::new(),
            base: 0,
            received: 0,
            emitted: 0,
            finished: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.live.reset();
        self.batch.clear();
        self.history.clear();
        self.base = 0;
        self.received = 0;
        self.emitted = 0;
        self.finished = false;
    }

    pub(crate) fn push(&mut self, mut cep: Vec<f32>) {
        match self.cmn {
            CmnMode::None => self.accept(cep),
            CmnMode::Live => {
                self.live.apply(&mut cep);
                self.accept(cep);
            }
            CmnMode::Batch => self.batch.push(cep),
        }
    }

    /// No more cepstra this utterance; the remaining frames become available.
    pub(crate) fn finish(&mut self) {
        if self.finished {
            return;
        }
        if self.cmn == CmnMode::Batch && !self.batch.is_empty() {
            let dims = self.batch[0].len();
            let mut mean = vec![0.0f32; dims];
            for cep in &self.batch {
                for (m, c) in mean.iter_mut().zip(cep) {
                    *m += c;
                }
            }
            let n = self.batch.len() as f32;
            for m in &mut mean {
                *m /= n;
            }
            for mut cep in std::mem::take(&mut self.batch) {
                for (c, m) in cep.iter_mut().zip(&mean) {
                    *c -= m;
                }
                self.accept(cep);
            }
        }
        self.finished = true;
    }

    /// Frames that are ready but not yet emitted, excluding those waiting on lookahead.
    pub(crate) fn pop_ready(&mut self) -> Option<FeatureFrame> {
        let t = self.emitted;
        if t >= self.received {
            return None;
        }
        let lookahead = self.kind.half_window();
        if !self.finished && t + lookahead >= self.received {
            return None;
        }

        let frame = self.build(t);
        self.emitted += 1;

        // Frames older than the left context of the next output are no longer needed.
        let keep_from = self.emitted.saturating_sub(lookahead);
        while self.base < keep_from && self.history.len() > 1 {
            self.history.pop_front();
            self.base += 1;
        }
        Some(frame)
    }

    fn accept(&mut self, cep: Vec<f32>) {
        self.history.push_back(cep);
        self.received += 1;
    }

    /// Cepstrum at utterance index `t`, clamped to the frames seen so far.
    fn cep(&self, t: isize) -> &[f32] {
        let last = self.received as isize - 1;
        let t = t.clamp(0, last) as usize;
        let idx = t.max(self.base) - self.base;
        &self.history[idx.min(self.history.len() - 1)]
    }

    fn build(&self, t: usize) -> FeatureFrame {
        let t = t as isize;
        let c = self.cep(t);
        let mut values = Vec::with_capacity(c.len() * self.kind.streams());
        values.extend_from_slice(c);

        if self.kind.streams() >= 2 {
            let (next, prev) = (self.cep(t + 2), self.cep(t - 2));
            values.extend(next.iter().zip(prev).map(|(a, b)| a - b));
        }
        if self.kind.streams() >= 3 {
            let (p3, m1) = (self.cep(t + 3), self.cep(t - 1));
            let (p1, m3) = (self.cep(t + 1), self.cep(t - 3));
            values.extend(
                p3.iter()
                    .zip(m1)
                    .zip(p1.iter().zip(m3))
                    .map(|((a, b), (c, d))| (a - b) - (c - d)),
            );
        }

        FeatureFrame {
            index: t as usize,
            values,
        }
    }
}
