//! Frame-level voice activity detection.
//!
//! [`Vad`] labels fixed-size frames of 16-bit PCM as speech or not. It tracks a running noise
//! floor (in dB) that drops immediately to quieter frames and rises slowly toward louder ones;
//! a frame is speech when it is far enough above that floor. [`VadMode`] sets how far.

use crate::{Error, Result};

pub const DEFAULT_FRAME_LENGTH: f64 = 0.03;

/// Frames quieter than this are never speech (about 32 RMS).
const MIN_SPEECH_DB: f32 = 30.0;
/// Starting noise floor; the first quiet frame pulls it down.
const INITIAL_FLOOR_DB: f32 = 40.0;
/// Fraction of the gap closed per frame when the level is above the floor.
const FLOOR_RISE: f32 = 0.01;

/// How readily frames are labelled as speech, loosest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadMode {
    #[default]
    Loose,
    MediumLoose,
    MediumStrict,
    Strict,
}

impl VadMode {
    /// Margin above the noise floor a frame needs to count as speech.
    fn margin_db(self) -> f32 {
        match self {
            Self::Loose => 6.0,
            Self::MediumLoose => 9.0,
            Self::MediumStrict => 12.0,
            Self::Strict => 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Vad {
    mode: VadMode,
    sample_rate: u32,
    frame_size: usize,
    noise_floor: f32,
}

impl Vad {
    /// `frame_length` is in seconds; 0 selects [`DEFAULT_FRAME_LENGTH`].
    pub fn new(mode: VadMode, sample_rate: u32, frame_length: f64) -> Result<Self> {
        let frame_length = if frame_length == 0.0 {
            DEFAULT_FRAME_LENGTH
        } else {
            frame_length
        };
        if sample_rate == 0 || !(frame_length > 0.0 && frame_length <= 0.1) {
            return Err(Error::config(format!(
                "VAD needs a positive sample rate and a frame of at most 100 ms, got {sample_rate} Hz and {frame_length} s"
            )));
        }
        let frame_size = (sample_rate as f64 * frame_length) as usize;
        if frame_size == 0 {
            return Err(Error::config(format!(
                "VAD frame of {frame_length} s holds no samples at {sample_rate} Hz"
            )));
        }
        Ok(Self {
            mode,
            sample_rate,
            frame_size,
            noise_floor: INITIAL_FLOOR_DB,
        })
    }

    pub fn mode(&self) -> VadMode {
        self.mode
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Samples per classified frame.
    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Frame duration in seconds.
    pub fn frame_length(&self) -> f64 {
        self.frame_size as f64 / self.sample_rate as f64
    }

    pub fn reset(&mut self) {
        self.noise_floor = INITIAL_FLOOR_DB;
    }

    /// Label one frame of exactly [`Self::frame_size`] samples.
    pub fn classify(&mut self, frame: &[i16]) -> Result<bool> {
        if frame.len() != self.frame_size {
            return Err(Error::msg(format!(
                "VAD frame must hold {} samples, got {}",
                self.frame_size,
                frame.len()
            )));
        }
        let level = level_db(frame);
        let is_speech = level > MIN_SPEECH_DB && level > self.noise_floor + self.mode.margin_db();
        if level < self.noise_floor {
            self.noise_floor = level;
        } else {
            self.noise_floor += (level - self.noise_floor) * FLOOR_RISE;
        }
        Ok(is_speech)
    }
}

/// Mean power of `frame` in dB relative to one sample step.
fn level_db(frame: &[i16]) -> f32 {
    let power = frame
        .iter()
        .map(|&s| {
            let s = s as f64;
            s * s
        })
        .sum::<f64>()
        / frame.len() as f64;
    (10.0 * (power + 1.0).log10()) as f32
}
