use serde::Serialize;

/// The best decoding of one utterance.
///
/// An empty `text` is a valid result: it means no word sequence reached the end of the
/// utterance (or no audio was decoded).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Hypothesis {
    pub text: String,
    /// Total log score (acoustic plus weighted language model).
    pub score: f32,
    /// Posterior probability of this path among all complete paths, in `[0, 1]`.
    pub confidence: f32,
}

impl Hypothesis {
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            score: 0.0,
            confidence: 0.0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Whitespace-separated words of the hypothesis.
    pub fn words(&self) -> impl Iterator<Item = &str> {
        self.text.split_whitespace()
    }
}

/// One word of a hypothesis with its frame alignment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub word: String,
    pub start_frame: usize,
    /// Last frame of the word (inclusive).
    pub end_frame: usize,
    /// Acoustic log score of the word.
    pub ascore: f32,
    /// Language model (or filler) log score applied when entering the word.
    pub lscore: f32,
}

impl Segment {
    pub fn n_frames(&self) -> usize {
        self.end_frame + 1 - self.start_frame
    }

    pub fn start_seconds(&self, frame_rate: u32) -> f32 {
        self.start_frame as f32 / frame_rate as f32
    }

    pub fn end_seconds(&self, frame_rate: u32) -> f32 {
        (self.end_frame + 1) as f32 / frame_rate as f32
    }
}

/// An alternate hypothesis from the N-best list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NBestEntry {
    /// Zero-based rank; 0 is the best entry.
    pub rank: usize,
    pub hypothesis: Hypothesis,
    pub segments: Vec<Segment>,
}

impl NBestEntry {
    pub fn score(&self) -> f32 {
        self.hypothesis.score
    }
}
