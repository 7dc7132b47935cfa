use crate::frontend::FeatureFrame;
use crate::model::gauden::{Gaussians, MixtureWeights};
use crate::{Error, Result};

/// Per-senone acoustic likelihoods.
///
/// Implementations are read-only after construction and are shared across decoding sessions,
/// so `score` takes `&self` and must not rely on interior mutability.
pub trait AcousticScorer: Send + Sync {
    /// Number of senones (tied HMM states) this scorer evaluates.
    fn n_senones(&self) -> usize;

    /// Dimension of the feature vectors it expects.
    fn feature_len(&self) -> usize;

    /// Natural-log likelihood of `frame` given `senone`.
    fn score(&self, frame: &FeatureFrame, senone: usize) -> f32;
}

/// Gaussian mixture scorer for continuous (one codebook per senone) and semi-continuous (one
/// shared codebook) models.
#[derive(Debug, Clone)]
pub struct GmmScorer {
    gaussians: Gaussians,
    weights: MixtureWeights,
    shared_codebook: bool,
}

impl GmmScorer {
    pub fn new(gaussians: Gaussians, weights: MixtureWeights) -> Result<Self> {
        if gaussians.n_density() != weights.n_density() {
            return Err(Error::msg(format!(
                "mixture weights have {} densities but codebooks have {}",
                weights.n_density(),
                gaussians.n_density()
            )));
        }
        let shared_codebook = gaussians.n_mgau() == 1;
        if !shared_codebook && gaussians.n_mgau() != weights.n_senones() {
            return Err(Error::msg(format!(
                "{} codebooks for {} senones; expected 1 or one per senone",
                gaussians.n_mgau(),
                weights.n_senones()
            )));
        }
        Ok(Self {
            gaussians,
            weights,
            shared_codebook,
        })
    }
}

impl AcousticScorer for GmmScorer {
    fn n_senones(&self) -> usize {
        self.weights.n_senones()
    }

    fn feature_len(&self) -> usize {
        self.gaussians.veclen()
    }

    fn score(&self, frame: &FeatureFrame, senone: usize) -> f32 {
        let mgau = if self.shared_codebook { 0 } else { senone };
        let log_w = self.weights.get(senone);
        let mut best = f32::NEG_INFINITY;
        let mut terms = Vec::with_capacity(log_w.len());
        for (k, &w) in log_w.iter().enumerate() {
            let t = w + self.gaussians.log_density(mgau, k, &frame.values);
            best = best.max(t);
            terms.push(t);
        }
        log_sum_exp_with_max(&terms, best)
    }
}

fn log_sum_exp_with_max(xs: &[f32], max_v: f32) -> f32 {
    if !max_v.is_finite() {
        return max_v;
    }
    let sum: f32 = xs.iter().map(|&v| (v - max_v).exp()).sum();
    max_v + sum.ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(values: Vec<f32>) -> FeatureFrame {
        FeatureFrame { index: 0, values }
    }

    #[test]
    fn single_density_equals_gaussian() -> anyhow::Result<()> {
        let g = Gaussians::new(2, 1, 1, vec![0.0, 5.0], &[1.0, 1.0], 1e-4);
        let w = MixtureWeights::new(1, &[1.0, 1.0], 1e-7);
        let scorer = GmmScorer::new(g.clone(), w)?;
        let f = frame(vec![0.0]);
        assert!((scorer.score(&f, 0) - g.log_density(0, 0, &f.values)).abs() < 1e-6);
        assert!(scorer.score(&f, 0) > scorer.score(&f, 1));
        Ok(())
    }

    #[test]
    fn shared_codebook_mixes_densities() -> anyhow::Result<()> {
        let g = Gaussians::new(1, 2, 1, vec![-1.0, 1.0], &[1.0, 1.0], 1e-4);
        let w = MixtureWeights::new(2, &[0.9, 0.1, 0.1, 0.9], 1e-7);
        let scorer = GmmScorer::new(g, w)?;
        let f = frame(vec![-1.0]);
        assert_eq!(scorer.n_senones(), 2);
        assert!(scorer.score(&f, 0) > scorer.score(&f, 1));
        Ok(())
    }

    #[test]
    fn codebook_count_must_match() {
        let g = Gaussians::new(3, 1, 1, vec![0.0; 3], &[1.0; 3], 1e-4);
        let w = MixtureWeights::new(1, &[1.0, 1.0], 1e-7);
        assert!(GmmScorer::new(g, w).is_err());
    }
}
