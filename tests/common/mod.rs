//! A tiny three-phone acoustic model trained on synthetic tones, written to a temp directory.
//!
//! `SIL` is low-level noise, `AA` a 440 Hz tone and `BB` a 2 kHz tone. The dictionary maps
//! `alpha -> AA` and `bravo -> BB`, so an utterance of silence, 440 Hz, silence, 2 kHz, silence
//! decodes as "alpha bravo".

#![allow(dead_code)]

use std::f32::consts::PI;
use std::fs;
use std::path::Path;

use anyhow::Result;
use tempfile::TempDir;

use murmur::config::Config;
use murmur::frontend::{Frontend, FrontendConfig};
use murmur::s3file::S3Writer;

pub const SAMPLE_RATE: usize = 16000;

const MDEF: &str = "\
0.3
3 n_base
0 n_tri
12 n_state_map
9 n_tied_state
9 n_tied_ci_state
3 n_tied_tmat
#base lft  rt p attrib tmat      ... state id's ...
SIL   -   -  - filler    0    0    1    2    N
AA    -   -  - n/a       1    3    4    5    N
BB    -   -  - n/a       2    6    7    8    N
";

const FEAT_PARAMS: &str = "-feat 1s_c\n-cmn none\n";

const DICT: &str = "alpha AA\nbravo BB\nalpha(2) AA AA\n";

const NOISEDICT: &str = "<s> SIL\n</s> SIL\n<sil> SIL\n";

const LM: &str = "\
\\data\\
ngram 1=4
ngram 2=3

\\1-grams:
-1.0 </s>
-99 <s> -0.30103
-0.47712 alpha -0.30103
-0.47712 bravo -0.30103

\\2-grams:
-0.09691 <s> alpha
-0.09691 alpha bravo
-0.09691 bravo </s>

\\end\\
";

/// A model directory plus a configuration pointing at it.
pub struct TestModel {
    pub dir: TempDir,
    pub config: Config,
}

/// Deterministic noise in `[-amp, amp]`.
pub fn noise(n: usize, amp: f32, seed: u32) -> Vec<i16> {
    let mut x = seed.max(1);
    (0..n)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            let u = (x as f32 / u32::MAX as f32) * 2.0 - 1.0;
            (u * amp) as i16
        })
        .collect()
}

pub fn tone(freq: f32, n: usize, seed: u32) -> Vec<i16> {
    noise(n, 200.0, seed)
        .into_iter()
        .enumerate()
        .map(|(i, v)| {
            let s = (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin() * 8000.0;
            (s + v as f32) as i16
        })
        .collect()
}

pub fn silence(n: usize, seed: u32) -> Vec<i16> {
    noise(n, 60.0, seed)
}

/// Silence, "alpha", silence, "bravo", silence.
pub fn alpha_bravo() -> Vec<i16> {
    let ms = SAMPLE_RATE / 1000;
    let mut out = silence(300 * ms, 11);
    out.extend(tone(440.0, 500 * ms, 12));
    out.extend(silence(250 * ms, 13));
    out.extend(tone(2000.0, 500 * ms, 14));
    out.extend(silence(300 * ms, 15));
    out
}

/// "alpha" and "bravo" separated by a full second of silence.
pub fn alpha_pause_bravo() -> Vec<i16> {
    let ms = SAMPLE_RATE / 1000;
    let mut out = silence(300 * ms, 21);
    out.extend(tone(440.0, 500 * ms, 22));
    out.extend(silence(1000 * ms, 23));
    out.extend(tone(2000.0, 500 * ms, 24));
    out.extend(silence(300 * ms, 25));
    out
}

/// Per-dimension mean and variance of the frontend's features over `samples`.
fn stats(config: &FrontendConfig, samples: &[i16]) -> (Vec<f32>, Vec<f32>) {
    let mut fe = Frontend::new(config.clone());
    let mut frames: Vec<Vec<f32>> = fe.push(samples).map(|f| f.values).collect();
    frames.extend(fe.flush().map(|f| f.values));
    // Edge frames see the zero padding.
    let frames = &frames[2..frames.len() - 2];

    let dims = config.feature_len();
    let n = frames.len() as f32;
    let mut mean = vec![0.0f32; dims];
    for f in frames {
        for (m, v) in mean.iter_mut().zip(f) {
            *m += v / n;
        }
    }
    let mut var = vec![0.0f32; dims];
    for f in frames {
        for ((s, v), m) in var.iter_mut().zip(f).zip(&mean) {
            *s += (v - m) * (v - m) / n;
        }
    }
    // Smooth so that boundary frames are not scored out of every beam.
    for v in &mut var {
        *v += 0.05;
    }
    (mean, var)
}

fn write_gaussians(path: &Path, per_phone: &[Vec<f32>]) -> Result<()> {
    let veclen = per_phone[0].len();
    let n_mgau = per_phone.len() * 3;
    let mut w = S3Writer::new(&[("version", "1.0")]);
    w.i32(n_mgau as i32)
        .i32(1)
        .i32(1)
        .i32(veclen as i32)
        .i32((n_mgau * veclen) as i32);
    for params in per_phone {
        for _ in 0..3 {
            w.f32s(params);
        }
    }
    w.write_to(path)?;
    Ok(())
}

fn write_mixture_weights(path: &Path, n_senones: usize) -> Result<()> {
    let mut w = S3Writer::new(&[("version", "1.0")]);
    w.i32(n_senones as i32)
        .i32(1)
        .i32(1)
        .i32(n_senones as i32)
        .f32s(&vec![1.0; n_senones]);
    w.write_to(path)?;
    Ok(())
}

fn write_transition_matrices(path: &Path) -> Result<()> {
    let one = [
        0.6, 0.4, 0.0, 0.0, //
        0.0, 0.6, 0.4, 0.0, //
        0.0, 0.0, 0.6, 0.4,
    ];
    let mut w = S3Writer::new(&[("version", "1.0")]);
    w.i32(3).i32(3).i32(4).i32(36);
    for _ in 0..3 {
        w.f32s(&one);
    }
    w.write_to(path)?;
    Ok(())
}

/// Build the tone model in a fresh temp directory.
pub fn build() -> Result<TestModel> {
    let dir = tempfile::tempdir()?;
    let hmm = dir.path().join("hmm");
    fs::create_dir(&hmm)?;

    fs::write(hmm.join("mdef"), MDEF)?;
    fs::write(hmm.join("feat.params"), FEAT_PARAMS)?;
    fs::write(hmm.join("noisedict"), NOISEDICT)?;
    fs::write(dir.path().join("test.dict"), DICT)?;
    fs::write(dir.path().join("test.lm"), LM)?;

    // Train the Gaussians with the same frontend settings the decoder will use.
    let mut train = Config::default_config();
    for line in FEAT_PARAMS.lines() {
        if let Some((k, v)) = line.split_once(' ') {
            train.set_str(k, v)?;
        }
    }
    let fe = FrontendConfig::from_config(&train)?;
    let (sil_m, sil_v) = stats(&fe, &silence(SAMPLE_RATE, 1));
    let (aa_m, aa_v) = stats(&fe, &tone(440.0, SAMPLE_RATE, 2));
    let (bb_m, bb_v) = stats(&fe, &tone(2000.0, SAMPLE_RATE, 3));

    write_gaussians(&hmm.join("means"), &[sil_m, aa_m, bb_m])?;
    write_gaussians(&hmm.join("variances"), &[sil_v, aa_v, bb_v])?;
    write_mixture_weights(&hmm.join("mixture_weights"), 9)?;
    write_transition_matrices(&hmm.join("transition_matrices"))?;

    let mut config = Config::default_config();
    config
        .set_str("-hmm", &hmm.to_string_lossy())?
        .set_str("-dict", &dir.path().join("test.dict").to_string_lossy())?
        .set_str("-lm", &dir.path().join("test.lm").to_string_lossy())?;

    Ok(TestModel { dir, config })
}
