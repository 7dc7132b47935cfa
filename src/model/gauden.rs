use std::f32::consts::PI;
use std::path::Path;

use crate::Result;
use crate::s3file::S3Reader;

/// Diagonal-covariance Gaussian codebooks.
///
/// Means are stored as-is; variances are kept as `1 / (2 var)` together with the per-density
/// log normalizer so that evaluation is a subtract, square, multiply and add.
#[derive(Debug, Clone)]
pub struct Gaussians {
    n_mgau: usize,
    n_density: usize,
    veclen: usize,
    means: Vec<f32>,
    inv_2var: Vec<f32>,
    log_norm: Vec<f32>,
}

/// Per-senone mixture weights in the natural-log domain.
#[derive(Debug, Clone)]
pub struct MixtureWeights {
    n_density: usize,
    log_weights: Vec<f32>,
}

struct RawParams {
    n_mgau: usize,
    n_density: usize,
    veclen: usize,
    data: Vec<f32>,
}

fn read_gaussian_file(path: &Path) -> Result<RawParams> {
    let mut r = S3Reader::open(path)?;
    let n_mgau = r.read_count("codebook count")?;
    let n_feat = r.read_count("stream count")?;
    let n_density = r.read_count("density count")?;
    if n_feat != 1 {
        return Err(r.error(format!("only single-stream models are supported, found {n_feat}")));
    }
    let veclen = r.read_count("vector length")?;
    let total = r.read_count("value count")?;
    if total != n_mgau * n_density * veclen {
        return Err(r.error(format!(
            "value count {total} does not match {n_mgau}x{n_density}x{veclen}"
        )));
    }
    let data = r.read_f32s(total)?;
    r.finish()?;
    Ok(RawParams {
        n_mgau,
        n_density,
        veclen,
        data,
    })
}

impl Gaussians {
    pub fn load(means: impl AsRef<Path>, vars: impl AsRef<Path>, varfloor: f32) -> Result<Self> {
        let m = read_gaussian_file(means.as_ref())?;
        let v = read_gaussian_file(vars.as_ref())?;
        if (m.n_mgau, m.n_density, m.veclen) != (v.n_mgau, v.n_density, v.veclen) {
            return Err(crate::Error::model_load(
                vars.as_ref(),
                "variance dimensions do not match means",
            ));
        }
        Ok(Self::new(m.n_mgau, m.n_density, m.veclen, m.data, &v.data, varfloor))
    }

    /// Build codebooks from `[mgau][density][dim]` means and variances.
    pub fn new(
        n_mgau: usize,
        n_density: usize,
        veclen: usize,
        means: Vec<f32>,
        vars: &[f32],
        varfloor: f32,
    ) -> Self {
        let mut inv_2var = Vec::with_capacity(vars.len());
        let mut log_norm = Vec::with_capacity(n_mgau * n_density);
        for density in vars.chunks(veclen.max(1)) {
            let mut log_det = 0.0f32;
            for &var in density {
                let var = var.max(varfloor);
                log_det += var.ln();
                inv_2var.push(1.0 / (2.0 * var));
            }
            log_norm.push(-0.5 * (veclen as f32 * (2.0 * PI).ln() + log_det));
        }
        Self {
            n_mgau,
            n_density,
            veclen,
            means,
            inv_2var,
            log_norm,
        }
    }

    pub fn n_mgau(&self) -> usize {
        self.n_mgau
    }

    pub fn n_density(&self) -> usize {
        self.n_density
    }

    pub fn veclen(&self) -> usize {
        self.veclen
    }

    /// Log density of `x` under one Gaussian.
    #[inline]
    pub fn log_density(&self, mgau: usize, density: usize, x: &[f32]) -> f32 {
        let idx = mgau * self.n_density + density;
        let base = idx * self.veclen;
        let mean = &self.means[base..base + self.veclen];
        let inv = &self.inv_2var[base..base + self.veclen];
        let mut d = self.log_norm[idx];
        for ((&xi, &mi), &vi) in x.iter().zip(mean).zip(inv) {
            let diff = xi - mi;
            d -= diff * diff * vi;
        }
        d
    }
}

impl MixtureWeights {
    pub fn load(path: impl AsRef<Path>, floor: f32) -> Result<Self> {
        let mut r = S3Reader::open(path)?;
        let n_mixw = r.read_count("senone count")?;
        let n_feat = r.read_count("stream count")?;
        let n_density = r.read_count("density count")?;
        if n_feat != 1 {
            return Err(r.error(format!("only single-stream models are supported, found {n_feat}")));
        }
        let total = r.read_count("value count")?;
        if total != n_mixw * n_density {
            return Err(r.error(format!(
                "value count {total} does not match {n_mixw}x{n_density}"
            )));
        }
        let data = r.read_f32s(total)?;
        r.finish()?;
        Ok(Self::new(n_density, &data, floor))
    }

    /// Normalize each senone's weights, floor them and take logs.
    pub fn new(n_density: usize, weights: &[f32], floor: f32) -> Self {
        let mut log_weights = Vec::with_capacity(weights.len());
        for senone in weights.chunks(n_density.max(1)) {
            let sum: f32 = senone.iter().sum();
            for &w in senone {
                let p = if sum > 0.0 { w / sum } else { 0.0 };
                log_weights.push(p.max(floor).ln());
            }
        }
        Self {
            n_density,
            log_weights,
        }
    }

    pub fn n_senones(&self) -> usize {
        if self.n_density == 0 {
            0
        } else {
            self.log_weights.len() / self.n_density
        }
    }

    pub fn n_density(&self) -> usize {
        self.n_density
    }

    #[inline]
    pub fn get(&self, senone: usize) -> &[f32] {
        let base = senone * self.n_density;
        &self.log_weights[base..base + self.n_density]
    }
}
