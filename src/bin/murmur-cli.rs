use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{error, info};

use murmur::config::Config;
use murmur::ctm_encoder::CtmEncoder;
use murmur::decoder::Decoder;
use murmur::endpointer::{Endpointer, EndpointerConfig, SegmentedDecoder};
use murmur::hyp_encoder::HypEncoder;
use murmur::json_array_encoder::JsonArrayEncoder;
use murmur::logging;
use murmur::model::Models;
use murmur::output_type::OutputType;
use murmur::result_encoder::{DecodedUtterance, ResultEncoder};
use murmur::wav;

/// Bytes handed to `process_raw` per call.
const CHUNK_BYTES: usize = 4096;

#[derive(Parser, Debug)]
#[command(name = "murmur")]
#[command(about = "Batch speech decoding with a shared acoustic and language model")]
struct Params {
    /// Acoustic model directory.
    #[arg(long = "hmm")]
    hmm: PathBuf,

    /// Pronunciation dictionary.
    #[arg(long = "dict")]
    dict: PathBuf,

    /// ARPA language model.
    #[arg(long = "lm")]
    lm: PathBuf,

    /// Filler dictionary (defaults to `<hmm>/noisedict`).
    #[arg(long = "fdict")]
    fdict: Option<PathBuf>,

    /// Extra engine option as `key=value`; may be repeated (e.g. `-O beam=1e-60`).
    #[arg(short = 'O', long = "option", value_name = "KEY=VALUE")]
    options: Vec<String>,

    #[arg(
        short = 'o',
        long = "output-type",
        value_enum,
        default_value_t = OutputType::Hyp
    )]
    output_type: OutputType,

    /// Number of decoding threads.
    #[arg(short = 'j', long = "jobs", default_value_t = num_cpus::get())]
    jobs: usize,

    /// Alternatives to report per utterance.
    #[arg(short = 'n', long = "nbest", default_value_t = 0)]
    nbest: usize,

    /// Treat inputs as headerless 16-bit PCM in the `input_endian` byte order instead of WAV.
    #[arg(long = "raw", default_value_t = false)]
    raw: bool,

    /// Split each input into utterances at pauses instead of decoding it whole.
    #[arg(long = "segment", default_value_t = false)]
    segment: bool,

    /// Log more (repeat for more detail); `MURMUR_LOG` overrides.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,

    /// Audio files to decode, one utterance each.
    #[arg(required = true, num_args = 1..)]
    inputs: Vec<PathBuf>,
}

fn main() -> Result<()> {
    let params = Params::parse();
    logging::init_with_level(logging::verbosity(params.verbose));

    let config = build_config(&params)?;
    let models = Models::load(&config).context("failed to load models")?;
    info!(inputs = params.inputs.len(), jobs = params.jobs, "decoding");

    let stdout = io::stdout();
    let writer = BufWriter::new(stdout.lock());
    let mut encoder: Box<dyn ResultEncoder> = match params.output_type {
        OutputType::Json => Box::new(JsonArrayEncoder::new(writer)),
        OutputType::Ctm => Box::new(CtmEncoder::new(writer)),
        OutputType::Hyp => Box::new(HypEncoder::new(writer)),
    };

    let failures = decode_all(&params, &models, &mut *encoder)?;
    encoder.close()?;

    if failures > 0 {
        return Err(anyhow!("{failures} of {} inputs failed", params.inputs.len()));
    }
    Ok(())
}

fn build_config(params: &Params) -> Result<Config> {
    let mut config = Config::default_config();
    config
        .set_str("-hmm", &params.hmm.to_string_lossy())?
        .set_str("-dict", &params.dict.to_string_lossy())?
        .set_str("-lm", &params.lm.to_string_lossy())?;
    if let Some(fdict) = &params.fdict {
        config.set_str("-fdict", &fdict.to_string_lossy())?;
    }
    for option in &params.options {
        let (key, value) = option
            .split_once('=')
            .with_context(|| format!("option '{option}' is not of the form key=value"))?;
        config
            .set_str(key.trim(), value.trim())
            .with_context(|| format!("invalid option '{option}'"))?;
    }
    Ok(config)
}

/// Decode every input on a pool of `--jobs` threads, writing results in input order.
///
/// Returns the number of inputs that failed.
fn decode_all(
    params: &Params,
    models: &Arc<Models>,
    encoder: &mut dyn ResultEncoder,
) -> Result<usize> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(params.jobs.max(1))
        .thread_name(|i| format!("murmur-decode-{i}"))
        .build()
        .context("failed to start decoding threads")?;

    let results: Vec<Result<Vec<DecodedUtterance>>> = pool.install(|| {
        params
            .inputs
            .par_iter()
            .map_init(
                || Decoder::with_models(Arc::clone(models)),
                |decoder, path| {
                    let res = decode_file(decoder, path, params);
                    if decoder.in_utt() {
                        // A failed utterance leaves the session mid-lifecycle.
                        *decoder = Decoder::with_models(Arc::clone(models));
                    }
                    res
                },
            )
            .collect()
    });

    let mut failures = 0;
    for (path, res) in params.inputs.iter().zip(results) {
        match res {
            Ok(utts) => {
                for utt in &utts {
                    encoder.write_utterance(utt)?;
                }
            }
            Err(err) => {
                failures += 1;
                error!(input = %path.display(), error = ?err, "decode failed");
            }
        }
    }
    Ok(failures)
}

fn decode_file(
    decoder: &mut Decoder,
    path: &Path,
    params: &Params,
) -> Result<Vec<DecodedUtterance>> {
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    if params.segment {
        let samples = read_samples(decoder, path, params)?;
        let rate = decoder.models().frontend_config().sample_rate;
        let endpointer = Endpointer::new(EndpointerConfig::new(rate))?;
        let mut stream = SegmentedDecoder::new(decoder, endpointer)?.with_nbest(params.nbest);
        let mut found = Vec::new();
        for chunk in samples.chunks(CHUNK_BYTES / 2) {
            found.extend(stream.push(chunk)?);
        }
        found.extend(stream.finish()?);
        let frame_rate = stream.decoder().frame_rate();
        return Ok(found
            .into_iter()
            .map(|seg| DecodedUtterance {
                id: format!("{id}_{:.2}-{:.2}", seg.start, seg.end),
                hypothesis: seg.hypothesis,
                frame_rate,
                segments: seg.segments,
                nbest: seg.nbest,
            })
            .collect());
    }

    if params.raw {
        let audio =
            std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        decoder.start_utt()?;
        for chunk in audio.chunks(CHUNK_BYTES) {
            decoder.process_raw(chunk, false, false)?;
        }
    } else {
        let samples = read_samples(decoder, path, params)?;
        decoder.start_utt()?;
        for chunk in samples.chunks(CHUNK_BYTES / 2) {
            decoder.process_int16(chunk, false, false)?;
        }
    }
    decoder.end_utt()?;
    Ok(vec![DecodedUtterance::from_decoder(id, decoder, params.nbest)])
}

/// Load an input as samples: WAV at the model's rate, or raw PCM in the configured byte order.
fn read_samples(decoder: &Decoder, path: &Path, params: &Params) -> Result<Vec<i16>> {
    let fe = decoder.models().frontend_config();
    if params.raw {
        let audio =
            std::fs::read(path).with_context(|| format!("failed to read '{}'", path.display()))?;
        let big_endian = fe.big_endian;
        return Ok(audio
            .chunks_exact(2)
            .map(|p| {
                let pair = [p[0], p[1]];
                if big_endian {
                    i16::from_be_bytes(pair)
                } else {
                    i16::from_le_bytes(pair)
                }
            })
            .collect());
    }
    let (samples, _) = wav::read_file(path, fe.sample_rate)
        .with_context(|| format!("failed to read WAV '{}'", path.display()))?;
    Ok(samples)
}
