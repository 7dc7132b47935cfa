use std::io::Write;

use crate::Result;
use crate::result_encoder::{DecodedUtterance, ResultEncoder};

/// Streams utterances as the elements of one JSON array, closed by [`ResultEncoder::close`].
///
/// ```json
/// [
///   { "id": "goforward", "text": "go forward ten meters", "score": -7342.1, "confidence": 0.83,
///     "frame_rate": 100, "segments": [ { "word": "go", "start_frame": 46, ... } ] }
/// ]
/// ```
pub struct JsonArrayEncoder<W: Write> {
    w: W,
    started: bool,
    written: usize,
    closed: bool,
}

impl<W: Write> JsonArrayEncoder<W> {
    pub fn new(w: W) -> Self {
        Self {
            w,
            started: false,
            written: 0,
            closed: false,
        }
    }

    /// Utterances written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    fn start_if_needed(&mut self) -> Result<()> {
        if !self.started {
            self.w.write_all(b"[")?;
            self.started = true;
        }
        Ok(())
    }
}

impl<W: Write> ResultEncoder for JsonArrayEncoder<W> {
    fn write_utterance(&mut self, utt: &DecodedUtterance) -> Result<()> {
        if self.closed {
            return Err(crate::Error::msg(
                "cannot write utterance: encoder is already closed",
            ));
        }

        self.start_if_needed()?;
        if self.written > 0 {
            self.w.write_all(b",\n")?;
        }
        serde_json::to_writer(&mut self.w, utt)?;
        self.written += 1;
        self.w.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.start_if_needed()?;
        self.w.write_all(b"]")?;
        self.w.flush()?;
        self.closed = true;
        Ok(())
    }
}
