use serde::Serialize;

use crate::Result;
use crate::decoder::Decoder;
use crate::hypothesis::{Hypothesis, NBestEntry, Segment};

/// Everything an encoder needs to render one decoded utterance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedUtterance {
    /// Caller-chosen utterance id, usually derived from the input file name.
    pub id: String,
    #[serde(flatten)]
    pub hypothesis: Hypothesis,
    pub frame_rate: u32,
    pub segments: Vec<Segment>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub nbest: Vec<NBestEntry>,
}

impl DecodedUtterance {
    /// Snapshot the last result of `decoder` with up to `nbest` alternatives.
    pub fn from_decoder(id: impl Into<String>, decoder: &Decoder, nbest: usize) -> Self {
        Self {
            id: id.into(),
            hypothesis: decoder.hyp().cloned().unwrap_or_else(Hypothesis::empty),
            frame_rate: decoder.frame_rate(),
            segments: decoder.seg().cloned().collect(),
            nbest: if nbest > 0 {
                decoder.nbest(nbest)
            } else {
                Vec::new()
            },
        }
    }
}

pub trait ResultEncoder {
    fn write_utterance(&mut self, utt: &DecodedUtterance) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}
