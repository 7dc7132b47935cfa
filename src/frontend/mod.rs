//! Acoustic feature extraction.
//!
//! [`Frontend`] turns 16-bit PCM into fixed-size [`FeatureFrame`]s. It keeps only a sliding
//! window of state, so feeding the same samples in different chunk sizes produces the same
//! frames. Feature computation is lazy: [`Frontend::push`] buffers samples and returns an
//! iterator that produces frames as it is advanced.

mod feat;
mod mfcc;

use crate::config::Config;
use crate::{Error, Result};

use feat::FeatureStage;
use mfcc::MfccExtractor;

/// One feature vector, tagged with its frame index within the utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureFrame {
    pub index: usize,
    pub values: Vec<f32>,
}

/// Which dynamic features are appended to the cepstra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureType {
    /// Cepstra only (`1s_c`).
    Static,
    /// Cepstra and first differences (`1s_c_d`).
    Delta,
    /// Cepstra, first and second differences (`1s_c_d_dd`).
    DeltaDelta,
}

impl FeatureType {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "1s_c" => Some(Self::Static),
            "1s_c_d" => Some(Self::Delta),
            "1s_c_d_dd" => Some(Self::DeltaDelta),
            _ => None,
        }
    }

    pub fn streams(self) -> usize {
        match self {
            Self::Static => 1,
            Self::Delta => 2,
            Self::DeltaDelta => 3,
        }
    }

    /// Frames of context needed on each side.
    fn half_window(self) -> usize {
        match self {
            Self::Static => 0,
            Self::Delta => 2,
            Self::DeltaDelta => 3,
        }
    }
}

/// Cosine transform from log mel energies to cepstra.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    /// Unnormalized DCT with a half weight on the first filter.
    Legacy,
    /// Orthonormal DCT-II.
    Dct,
    /// DCT-II with the `sqrt(2/n)` scale on every coefficient, including `c0`.
    Htk,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmnMode {
    None,
    Live,
    Batch,
}

/// Validated frontend parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct FrontendConfig {
    pub sample_rate: u32,
    pub frame_rate: u32,
    /// Samples between frame starts.
    pub frame_shift: usize,
    /// Samples per analysis window.
    pub frame_len: usize,
    pub nfft: usize,
    pub nfilt: usize,
    pub lowerf: f32,
    pub upperf: f32,
    pub ncep: usize,
    pub alpha: f32,
    pub transform: Transform,
    /// Sine liftering period; 0 disables liftering.
    pub lifter: usize,
    pub dither: bool,
    pub seed: i64,
    pub remove_dc: bool,
    pub big_endian: bool,
    pub feat: FeatureType,
    pub cmn: CmnMode,
    pub cmninit: Vec<f32>,
}

fn positive(config: &Config, key: &str) -> Result<usize> {
    let v = config.get_int(key)?;
    usize::try_from(v)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| Error::config(format!("'-{key}' must be positive, got {v}")))
}

impl FrontendConfig {
    pub fn from_config(config: &Config) -> Result<Self> {
        let sample_rate = positive(config, "samprate")?;
        let frame_rate = positive(config, "frate")?;
        let frame_shift = ((sample_rate as f64 / frame_rate as f64).round() as usize).max(1);
        let wlen = config.get_float("wlen")?;
        let frame_len = (wlen * sample_rate as f64).round() as usize;
        if frame_len == 0 {
            return Err(Error::config(format!("window length {wlen} s is too short")));
        }

        let nfft = match config.get_int("nfft")? {
            0 => frame_len.next_power_of_two(),
            n if n > 0 && (n as usize).is_power_of_two() && n as usize >= frame_len => n as usize,
            n => {
                return Err(Error::config(format!(
                    "'-nfft' must be a power of two of at least {frame_len} samples, got {n}"
                )));
            }
        };

        let nfilt = positive(config, "nfilt")?;
        let ncep = positive(config, "ncep")?;
        if ncep > nfilt {
            return Err(Error::config(format!(
                "'-ncep' ({ncep}) cannot exceed '-nfilt' ({nfilt})"
            )));
        }
        let ceplen = positive(config, "ceplen")?;
        if ceplen != ncep {
            return Err(Error::config(format!(
                "'-ceplen' ({ceplen}) must equal '-ncep' ({ncep})"
            )));
        }

        let lowerf = config.get_float("lowerf")? as f32;
        let upperf = config.get_float("upperf")? as f32;
        let nyquist = sample_rate as f32 / 2.0;
        if lowerf < 0.0 || upperf <= lowerf || upperf > nyquist {
            return Err(Error::config(format!(
                "filter band {lowerf}..{upperf} Hz must lie within 0..{nyquist} Hz"
            )));
        }

        let transform = match config.get_str("transform")?.unwrap_or("legacy") {
            "legacy" => Transform::Legacy,
            "dct" => Transform::Dct,
            "htk" => Transform::Htk,
            other => return Err(Error::config(format!("unknown cepstral transform '{other}'"))),
        };
        let lifter = usize::try_from(config.get_int("lifter")?)
            .map_err(|_| Error::config("'-lifter' cannot be negative"))?;

        match config.get_str("agc")?.unwrap_or("none") {
            "none" => {}
            other => {
                return Err(Error::config(format!(
                    "automatic gain control '{other}' is not supported"
                )));
            }
        }
        if config.get_bool("varnorm")? {
            return Err(Error::config("cepstral variance normalization is not supported"));
        }

        let feat_name = config.get_str("feat")?.unwrap_or("1s_c_d_dd");
        let feat = FeatureType::parse(feat_name)
            .ok_or_else(|| Error::config(format!("unsupported feature type '{feat_name}'")))?;

        let cmn = match config.get_str("cmn")?.unwrap_or("live") {
            "none" => CmnMode::None,
            "live" => CmnMode::Live,
            "batch" | "current" => CmnMode::Batch,
            other => return Err(Error::config(format!("unknown CMN mode '{other}'"))),
        };

        let mut cmninit = Vec::with_capacity(ncep);
        for part in config
            .get_str("cmninit")?
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
        {
            let v: f32 = part
                .parse()
                .map_err(|_| Error::config(format!("bad '-cmninit' value '{part}'")))?;
            cmninit.push(v);
        }
        if cmninit.len() > ncep {
            return Err(Error::config(format!(
                "'-cmninit' has {} values but there are only {ncep} cepstra",
                cmninit.len()
            )));
        }
        cmninit.resize(ncep, 0.0);

        let big_endian = match config.get_str("input_endian")?.unwrap_or("little") {
            "little" => false,
            "big" => true,
            other => return Err(Error::config(format!("unknown input byte order '{other}'"))),
        };

        Ok(Self {
            sample_rate: sample_rate as u32,
            frame_rate: frame_rate as u32,
            frame_shift,
            frame_len,
            nfft,
            nfilt,
            lowerf,
            upperf,
            ncep,
            alpha: config.get_float("alpha")? as f32,
            transform,
            lifter,
            dither: config.get_bool("dither")?,
            seed: config.get_int("seed")?,
            remove_dc: config.get_bool("remove_dc")?,
            big_endian,
            feat,
            cmn,
            cmninit,
        })
    }

    /// Dimension of the feature vectors this frontend produces.
    pub fn feature_len(&self) -> usize {
        self.ncep * self.feat.streams()
    }
}

/// Streaming PCM-to-feature converter for one utterance at a time.
pub struct Frontend {
    config: FrontendConfig,
    mfcc: MfccExtractor,
    stage: FeatureStage,
}

impl Frontend {
    pub fn new(config: FrontendConfig) -> Self {
        Self {
            mfcc: MfccExtractor::new(&config),
            stage: FeatureStage::new(&config),
            config,
        }
    }

    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    /// Forget all state from the previous utterance.
    pub fn reset(&mut self) {
        self.mfcc.reset();
        self.stage.reset();
    }

    /// Buffer samples and iterate over the frames they complete.
    ///
    /// Frames not drained before the iterator is dropped are produced by the next call.
    pub fn push(&mut self, samples: &[i16]) -> Frames<'_> {
        self.mfcc.push(samples);
        Frames {
            frontend: self,
            flushing: false,
        }
    }

    /// End the utterance and iterate over every remaining frame, including a final zero-padded
    /// frame when some samples were not covered by a full window.
    pub fn flush(&mut self) -> Frames<'_> {
        self.mfcc.flush();
        Frames {
            frontend: self,
            flushing: true,
        }
    }
}

/// Lazy sequence of frames produced by [`Frontend::push`] or [`Frontend::flush`].
pub struct Frames<'a> {
    frontend: &'a mut Frontend,
    flushing: bool,
}

impl Iterator for Frames<'_> {
    type Item = FeatureFrame;

    fn next(&mut self) -> Option<FeatureFrame> {
        let fe = &mut *self.frontend;
        loop {
            if let Some(frame) = fe.stage.pop_ready() {
                return Some(frame);
            }
            if let Some(cep) = fe.mfcc.next_cepstrum() {
                fe.stage.push(cep);
                continue;
            }
            if self.flushing {
                self.flushing = false;
                fe.stage.finish();
                continue;
            }
            return None;
        }
    }
}
