use std::path::Path;

use crate::Result;
use crate::s3file::S3Reader;

/// HMM transition matrices in the natural-log domain.
///
/// Each matrix has `n_src` emitting states and `n_src + 1` destinations; the last destination is
/// the non-emitting exit state. Impossible transitions are `f32::NEG_INFINITY`.
#[derive(Debug, Clone)]
pub struct TransitionMatrices {
    n_src: usize,
    /// `n_tmat * n_src * (n_src + 1)` log probabilities.
    probs: Vec<f32>,
}

impl TransitionMatrices {
    pub fn load(path: impl AsRef<Path>, floor: f32) -> Result<Self> {
        let mut r = S3Reader::open(path)?;
        let n_tmat = r.read_count("tmat count")?;
        let n_src = r.read_count("source states")?;
        let n_dst = r.read_count("destination states")?;
        if n_dst != n_src + 1 {
            return Err(r.error(format!(
                "expected {} destination states, found {n_dst}",
                n_src + 1
            )));
        }
        let total = r.read_count("value count")?;
        if total != n_tmat * n_src * n_dst {
            return Err(r.error(format!(
                "value count {total} does not match {n_tmat}x{n_src}x{n_dst}"
            )));
        }
        let raw = r.read_f32s(total)?;
        let path = r.path().to_path_buf();
        r.finish()?;

        Self::from_probs(n_src, &raw, floor)
            .map_err(|message| crate::Error::model_load(path, message))
    }

    /// Build from linear probabilities laid out as `[tmat][src][dst]`.
    pub fn from_probs(
        n_src: usize,
        probs: &[f32],
        floor: f32,
    ) -> std::result::Result<Self, String> {
        let n_dst = n_src + 1;
        let mut out = Vec::with_capacity(probs.len());
        for (i, &p) in probs.iter().enumerate() {
            let src = (i / n_dst) % n_src;
            let dst = i % n_dst;
            if p < 0.0 {
                return Err(format!("negative transition probability at {i}"));
            }
            if dst < src {
                if p > 0.0 {
                    return Err(format!(
                        "transition matrix {} is not upper triangular",
                        i / (n_src * n_dst)
                    ));
                }
                out.push(f32::NEG_INFINITY);
            } else if p == 0.0 {
                out.push(f32::NEG_INFINITY);
            } else {
                out.push(p.max(floor).ln());
            }
        }
        Ok(Self { n_src, probs: out })
    }

    pub fn len(&self) -> usize {
        self.probs.len() / (self.n_src * (self.n_src + 1))
    }

    pub fn is_empty(&self) -> bool {
        self.probs.is_empty()
    }

    /// Number of emitting states per matrix.
    pub fn n_states(&self) -> usize {
        self.n_src
    }

    /// Log probability of moving from `src` to `dst` (`dst == n_states()` is the exit).
    #[inline]
    pub fn get(&self, tmat: usize, src: usize, dst: usize) -> f32 {
        let n_dst = self.n_src + 1;
        self.probs[(tmat * self.n_src + src) * n_dst + dst]
    }
}
