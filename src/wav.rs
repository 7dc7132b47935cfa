use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec};

use crate::{Error, Result};

/// Read a WAV stream as 16-bit PCM samples.
///
/// Format requirements:
/// - Mono (1 channel)
/// - 16-bit integer samples
/// - `sample_rate` Hz, the rate the acoustic model was trained on
pub fn read_samples<R: Read>(reader: R, sample_rate: u32) -> Result<(Vec<i16>, WavSpec)> {
    let mut reader = WavReader::new(reader)?;
    let spec = reader.spec();

    if spec.channels != 1 {
        return Err(Error::msg(format!(
            "expected mono WAV (1 channel), got {} channels",
            spec.channels
        )));
    }
    if spec.sample_format != SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(Error::msg(format!(
            "expected 16-bit integer PCM, got {} bits ({:?})",
            spec.bits_per_sample, spec.sample_format
        )));
    }
    if spec.sample_rate != sample_rate {
        return Err(Error::msg(format!(
            "expected {sample_rate} Hz sample rate, got {} Hz",
            spec.sample_rate
        )));
    }

    let samples = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((samples, spec))
}

/// Read a WAV file; see [`read_samples`].
pub fn read_file(path: impl AsRef<Path>, sample_rate: u32) -> Result<(Vec<i16>, WavSpec)> {
    let path = path.as_ref();
    let file = File::open(path)?;
    read_samples(BufReader::new(file), sample_rate)
}

/// Little-endian byte image of `samples`, as `Decoder::process_raw` expects by default.
pub fn to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hound::WavWriter;
    use std::io::Cursor;

    fn wav(spec: WavSpec, samples: &[i16]) -> anyhow::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        let mut w = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            w.write_sample(s)?;
        }
        w.finalize()?;
        Ok(cursor.into_inner())
    }

    fn spec(channels: u16, sample_rate: u32) -> WavSpec {
        WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    #[test]
    fn reads_mono_pcm() -> anyhow::Result<()> {
        let bytes = wav(spec(1, 16000), &[1, -2, 300])?;
        let (samples, spec) = read_samples(Cursor::new(bytes), 16000)?;
        assert_eq!(samples, vec![1, -2, 300]);
        assert_eq!(spec.sample_rate, 16000);
        Ok(())
    }

    #[test]
    fn rejects_stereo_and_wrong_rate() -> anyhow::Result<()> {
        let stereo = wav(spec(2, 16000), &[1, 2])?;
        assert!(read_samples(Cursor::new(stereo), 16000).is_err());

        let slow = wav(spec(1, 8000), &[1, 2])?;
        let err = read_samples(Cursor::new(slow), 16000).unwrap_err();
        assert!(err.to_string().contains("8000"));
        Ok(())
    }

    #[test]
    fn le_bytes_round_trip_sample_order() {
        assert_eq!(to_le_bytes(&[0x0102, -1]), vec![0x02, 0x01, 0xff, 0xff]);
    }
}
