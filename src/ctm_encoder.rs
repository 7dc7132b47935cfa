use std::io::Write;

use crate::Result;
use crate::result_encoder::{DecodedUtterance, ResultEncoder};

/// A `ResultEncoder` that writes word alignments in CTM format.
///
/// One line per word: `<utterance> 1 <start seconds> <duration seconds> <word>`. Utterances with
/// an empty hypothesis write nothing.
pub struct CtmEncoder<W: Write> {
    w: W,
    closed: bool,
}

impl<W: Write> CtmEncoder<W> {
    pub fn new(w: W) -> Self {
        Self { w, closed: false }
    }
}

impl<W: Write> ResultEncoder for CtmEncoder<W> {
    fn write_utterance(&mut self, utt: &DecodedUtterance) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot write utterance: encoder is already closed",
            ));
        }

        for seg in &utt.segments {
            let start = seg.start_seconds(utt.frame_rate);
            let dur = seg.end_seconds(utt.frame_rate) - start;
            writeln!(&mut self.w, "{} 1 {start:.2} {dur:.2} {}", utt.id, seg.word)?;
        }
        self.w.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::json_array_encoder::tests::utt;

    #[test]
    fn ctm_writes_one_line_per_word() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = CtmEncoder::new(&mut out);
        enc.write_utterance(&utt("u1", &[("go", 46, 76), ("forward", 77, 132)]))?;
        enc.write_utterance(&utt("u2", &[]))?;
        enc.close()?;

        assert_eq!(
            std::str::from_utf8(&out)?,
            "u1 1 0.46 0.31 go\nu1 1 0.77 0.56 forward\n"
        );
        Ok(())
    }

    #[test]
    fn ctm_write_after_close_errors() -> anyhow::Result<()> {
        let mut out = Vec::new();
        let mut enc = CtmEncoder::new(&mut out);
        enc.close()?;
        enc.close()?;
        assert!(enc.write_utterance(&utt("x", &[])).is_err());
        Ok(())
    }
}
