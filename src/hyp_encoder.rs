use std::io::Write;

use crate::Result;
use crate::result_encoder::{DecodedUtterance, ResultEncoder};

/// A `ResultEncoder` that writes one `<text> (<utterance> <score>)` line per utterance.
///
/// Any N-best alternatives follow on indented lines in rank order.
pub struct HypEncoder<W: Write> {
    w: W,
    closed: bool,
}

impl<W: Write> HypEncoder<W> {
    pub fn new(w: W) -> Self {
        Self { w, closed: false }
    }
}

impl<W: Write> ResultEncoder for HypEncoder<W> {
    fn write_utterance(&mut self, utt: &DecodedUtterance) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot write utterance: encoder is already closed",
            ));
        }

        writeln!(
            &mut self.w,
            "{} ({} {:.2})",
            utt.hypothesis.text, utt.id, utt.hypothesis.score
        )?;
        for entry in &utt.nbest {
            writeln!(
                &mut self.w,
                "  {} {} ({:.2})",
                entry.rank,
                entry.hypothesis.text,
                entry.score()
            )?;
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
