//! Streaming MFCC extraction: dither, pre-emphasis, framing, windowing, power spectrum, mel
//! filterbank, log and DCT.

use std::f32::consts::PI;
use std::sync::Arc;

use realfft::RealToComplex;
use realfft::num_complex::Complex;

use super::{FrontendConfig, Transform};

const LOG_FLOOR: f32 = 1e-10;
const DEFAULT_SEED: u64 = 0x2545_f491_4f6c_dd1d;
/// Consumed samples are dropped from the buffer once this many accumulate.
const COMPACT_AT: usize = 1 << 14;

fn mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_inv(m: f32) -> f32 {
    700.0 * (10f32.powf(m / 2595.0) - 1.0)
}

/// One triangular filter over a contiguous run of DFT bins.
#[derive(Debug, Clone)]
struct MelFilter {
    first_bin: usize,
    weights: Vec<f32>,
}

/// Unit-area triangles with edges snapped to the nearest DFT bin.
fn build_mel_filters(cfg: &FrontendConfig) -> Vec<MelFilter> {
    let dfreq = cfg.sample_rate as f32 / cfg.nfft as f32;
    let n_bins = cfg.nfft / 2 + 1;
    let mel_lo = mel(cfg.lowerf);
    let mel_hi = mel(cfg.upperf);
    let step = (mel_hi - mel_lo) / (cfg.nfilt + 1) as f32;
    let edge_bin = |i: usize| -> usize {
        let hz = mel_inv(mel_lo + i as f32 * step);
        ((hz / dfreq + 0.5) as usize).min(n_bins - 1)
    };

    (0..cfg.nfilt)
        .map(|f| {
            let left = edge_bin(f);
            let center = edge_bin(f + 1).max(left);
            let right = edge_bin(f + 2).max(center + 1);
            let height = 2.0 / ((right - left) as f32 * dfreq);
            let weights = (left..right.min(n_bins))
                .map(|k| {
                    if k < center {
                        height * (k - left) as f32 / (center - left) as f32
                    } else if k == center {
                        height
                    } else {
                        height * (right - k) as f32 / (right - center) as f32
                    }
                })
                .collect();
            MelFilter {
                first_bin: left,
                weights,
            }
        })
        .collect()
}

/// Row-major `ncep x nfilt` cosine basis for `transform`.
///
/// The legacy basis puts a half weight on the first filter and divides by `nfilt`. The DCT-II
/// variants scale row 0 by `sqrt(1/n)` (or `sqrt(2/n)` for HTK) and every other row by
/// `sqrt(2/n)`.
fn build_dct(transform: Transform, ncep: usize, nfilt: usize) -> Vec<f32> {
    let n = nfilt as f32;
    let mut basis = Vec::with_capacity(ncep * nfilt);
    for i in 0..ncep {
        let row_scale = match transform {
            Transform::Legacy => 1.0,
            Transform::Dct if i == 0 => (1.0 / n).sqrt(),
            Transform::Dct | Transform::Htk => (2.0 / n).sqrt(),
        };
        for j in 0..nfilt {
            let c = (PI * i as f32 * (j as f32 + 0.5) / n).cos();
            let w = match transform {
                Transform::Legacy if j == 0 => 0.5 / n,
                Transform::Legacy => 1.0 / n,
                Transform::Dct | Transform::Htk => row_scale,
            };
            basis.push(c * w);
        }
    }
    basis
}

/// Sine lifter weights `1 + L/2 sin(pi i / L)`, or `None` when `period` is 0.
fn build_lifter(period: usize, ncep: usize) -> Option<Vec<f32>> {
    if period == 0 {
        return None;
    }
    let l = period as f32;
    Some(
        (0..ncep)
            .map(|i| 1.0 + 0.5 * l * (PI * i as f32 / l).sin())
            .collect(),
    )
}

fn hamming(n: usize) -> Vec<f32> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (n - 1) as f32).cos())
        .collect()
}

/// Deterministic xorshift noise source for dithering.
#[derive(Debug, Clone)]
struct Dither {
    seed: u64,
    state: u64,
}

impl Dither {
    fn new(seed: i64) -> Self {
        let seed = if seed < 0 {
            DEFAULT_SEED
        } else {
            (seed as u64) ^ DEFAULT_SEED
        };
        let seed = if seed == 0 { DEFAULT_SEED } else { seed };
        Self { seed, state: seed }
    }

    fn reset(&mut self) {
        self.state = self.seed;
    }

    /// Uniform noise in `[-0.5, 0.5)`.
    fn next(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        ((x >> 40) as f32 / (1u64 << 24) as f32) - 0.5
    }
}

pub(crate) struct MfccExtractor {
    frame_len: usize,
    frame_shift: usize,
    alpha: f32,
    remove_dc: bool,
    dither: Option<Dither>,
    window: Vec<f32>,
    filters: Vec<MelFilter>,
    dct: Vec<f32>,
    lifter: Option<Vec<f32>>,
    ncep: usize,
    fft: Arc<dyn RealToComplex<f32>>,
    fft_in: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    power: Vec<f32>,
    log_mel: Vec<f32>,

    /// Pre-emphasized samples; `offset` is where the next frame starts.
    ///
    /// When the shift is longer than the window, `offset` may point past the end of the buffer
    /// until the skipped samples arrive.
    samples: Vec<f32>,
    offset: usize,
    prior: f32,
    total_samples: usize,
    frames_out: usize,
    flushing: bool,
}

impl MfccExtractor {
    pub(crate) fn new(cfg: &FrontendConfig) -> Self {
        let mut planner = realfft::RealFftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(cfg.nfft);
        let fft_in = fft.make_input_vec();
        let spectrum = fft.make_output_vec();
        Self {
            frame_len: cfg.frame_len,
            frame_shift: cfg.frame_shift,
            alpha: cfg.alpha,
            remove_dc: cfg.remove_dc,
            dither: cfg.dither.then(|| Dither::new(cfg.seed)),
            window: hamming(cfg.frame_len),
            filters: build_mel_filters(cfg),
            dct: build_dct(cfg.transform, cfg.ncep, cfg.nfilt),
            lifter: build_lifter(cfg.lifter, cfg.ncep),
            ncep: cfg.ncep,
            fft,
            fft_in,
            power: vec![0.0; spectrum.len()],
            spectrum,
            log_mel: vec![0.0; cfg.nfilt],
            samples: Vec::new(),
            offset: 0,
            prior: 0.0,
            total_samples: 0,
            frames_out: 0,
            flushing: false,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.samples.clear();
        self.offset = 0;
        self.prior = 0.0;
        self.total_samples = 0;
        self.frames_out = 0;
        self.flushing = false;
        if let Some(d) = self.dither.as_mut() {
            d.reset();
        }
    }

    pub(crate) fn push(&mut self, pcm: &[i16]) {
        if self.offset >= COMPACT_AT {
            let consumed = self.offset.min(self.samples.len());
            self.samples.drain(..consumed);
            self.offset -= consumed;
        }
        self.samples.reserve(pcm.len());
        for &s in pcm {
            let mut x = s as f32;
            if let Some(d) = self.dither.as_mut() {
                x += d.next();
            }
            self.samples.push(x - self.alpha * self.prior);
            self.prior = x;
        }
        self.total_samples += pcm.len();
    }

    /// Mark the end of input; the next calls may yield one zero-padded frame.
    pub(crate) fn flush(&mut self) {
        self.flushing = true;
    }

    /// Compute the next cepstral vector if enough samples are buffered.
    pub(crate) fn next_cepstrum(&mut self) -> Option<Vec<f32>> {
        let available = self.samples.len().saturating_sub(self.offset);
        if available >= self.frame_len {
            let start = self.offset;
            self.offset += self.frame_shift;
            self.frames_out += 1;
            return Some(self.cepstrum(start, self.frame_len));
        }
        if self.flushing && available > 0 && self.has_unseen_samples() {
            let start = self.offset;
            self.offset = self.samples.len();
            self.frames_out += 1;
            self.flushing = false;
            return Some(self.cepstrum(start, available));
        }
        None
    }

    /// Whether some sample was never covered by an emitted frame.
    fn has_unseen_samples(&self) -> bool {
        let covered = match self.frames_out {
            0 => 0,
            n => (n - 1) * self.frame_shift + self.frame_len,
        };
        self.total_samples > covered
    }

    fn cepstrum(&mut self, start: usize, len: usize) -> Vec<f32> {
        let frame = &self.samples[start..start + len];
        let dc = if self.remove_dc {
            frame.iter().sum::<f32>() / frame.len() as f32
        } else {
            0.0
        };

        self.fft_in.fill(0.0);
        for (i, (&s, &w)) in frame.iter().zip(&self.window).enumerate() {
            self.fft_in[i] = (s - dc) * w;
        }

        if self.fft.process(&mut self.fft_in, &mut self.spectrum).is_ok() {
            for (p, c) in self.power.iter_mut().zip(&self.spectrum) {
                *p = c.norm_sqr();
            }
        } else {
            self.power.fill(0.0);
        }

        for (out, filter) in self.log_mel.iter_mut().zip(&self.filters) {
            let energy: f32 = filter
                .weights
                .iter()
                .zip(&self.power[filter.first_bin..])
                .map(|(w, p)| w * p)
                .sum();
            *out = energy.max(LOG_FLOOR).ln();
        }

        let nfilt = self.log_mel.len();
        let mut cep: Vec<f32> = (0..self.ncep)
            .map(|i| {
                self.dct[i * nfilt..(i + 1) * nfilt]
                    .iter()
                    .zip(&self.log_mel)
                    .map(|(b, l)| b * l)
                    .sum()
            })
            .collect();
        if let Some(lifter) = &self.lifter {
            for (c, w) in cep.iter_mut().zip(lifter) {
                *c *= w;
            }
        }
        cep
    }
}
