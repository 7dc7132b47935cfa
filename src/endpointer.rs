//! Speech endpointing: split a continuous PCM stream into utterances.
//!
//! [`Endpointer`] runs a [`Vad`] over fixed-size frames and keeps the last `window` seconds of
//! labels. Speech starts once more than `ratio` of that window is speech and ends once less
//! than `1 - ratio` of it is. While in speech, audio comes out delayed by the window length,
//! so the start of each utterance is not clipped.
//!
//! [`SegmentedDecoder`] feeds those utterances through a [`Decoder`], one
//! `start_utt`/`end_utt` pair per stretch of speech.

use std::collections::VecDeque;

use tracing::debug;

use crate::decoder::Decoder;
use crate::hypothesis::{Hypothesis, NBestEntry, Segment};
use crate::vad::{DEFAULT_FRAME_LENGTH, Vad, VadMode};
use crate::{Error, Result};

pub const DEFAULT_WINDOW: f64 = 0.3;
pub const DEFAULT_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointerConfig {
    /// Seconds of VAD decisions considered at once.
    pub window: f64,
    /// Share of speech frames in the window that starts an utterance.
    pub ratio: f64,
    pub mode: VadMode,
    pub sample_rate: u32,
    /// VAD frame length in seconds.
    pub frame_length: f64,
}

impl EndpointerConfig {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            window: DEFAULT_WINDOW,
            ratio: DEFAULT_RATIO,
            mode: VadMode::default(),
            sample_rate,
            frame_length: DEFAULT_FRAME_LENGTH,
        }
    }
}

/// What the endpointer saw in the audio pushed so far.
#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEvent {
    /// An utterance begins; `time` is in seconds from the start of the stream.
    Start { time: f64 },
    /// Audio belonging to the current utterance.
    Audio(Vec<i16>),
    /// The current utterance is over.
    End { time: f64 },
}

/// One labelled VAD frame waiting in the window.
#[derive(Debug)]
struct Frame {
    samples: Vec<i16>,
    is_speech: bool,
}

pub struct Endpointer {
    vad: Vad,
    maxlen: usize,
    start_frames: usize,
    end_frames: usize,
    queue: VecDeque<Frame>,
    speech_count: usize,
    /// Stream time of the oldest queued frame.
    queue_start: f64,
    in_speech: bool,
    speech_start: f64,
    speech_end: f64,
    /// Samples not yet forming a whole VAD frame.
    pending: Vec<i16>,
}

impl Endpointer {
    pub fn new(config: EndpointerConfig) -> Result<Self> {
        let vad = Vad::new(config.mode, config.sample_rate, config.frame_length)?;
        let window = if config.window == 0.0 {
            DEFAULT_WINDOW
        } else {
            config.window
        };
        let ratio = if config.ratio == 0.0 {
            DEFAULT_RATIO
        } else {
            config.ratio
        };

        let maxlen = (window / vad.frame_length() + 0.5) as usize;
        let start_frames = (ratio * maxlen as f64) as usize;
        let end_frames = ((1.0 - ratio) * maxlen as f64 + 0.5) as usize;
        if start_frames == 0 || start_frames >= maxlen {
            return Err(Error::config(format!(
                "ratio {ratio:.2} leaves no room to detect speech start ({start_frames} of {maxlen} frames)"
            )));
        }
        if end_frames == 0 || end_frames >= maxlen {
            return Err(Error::config(format!(
                "ratio {ratio:.2} leaves no room to detect speech end ({end_frames} of {maxlen} frames)"
            )));
        }
        debug!(
            window = maxlen as f64 * vad.frame_length(),
            start_frames, end_frames, maxlen, "endpointer ready"
        );

        Ok(Self {
            vad,
            maxlen,
            start_frames,
            end_frames,
            queue: VecDeque::with_capacity(maxlen),
            speech_count: 0,
            queue_start: 0.0,
            in_speech: false,
            speech_start: 0.0,
            speech_end: 0.0,
            pending: Vec::new(),
        })
    }

    /// Samples per VAD frame.
    pub fn frame_size(&self) -> usize {
        self.vad.frame_size()
    }

    pub fn sample_rate(&self) -> u32 {
        self.vad.sample_rate()
    }

    pub fn in_speech(&self) -> bool {
        self.in_speech
    }

    /// Start time of the current or last utterance, in seconds.
    pub fn speech_start(&self) -> f64 {
        self.speech_start
    }

    /// End time of the last finished utterance, in seconds.
    pub fn speech_end(&self) -> f64 {
        self.speech_end
    }

    /// Forget everything and start a new stream at time 0.
    pub fn reset(&mut self) {
        self.vad.reset();
        self.queue.clear();
        self.speech_count = 0;
        self.queue_start = 0.0;
        self.in_speech = false;
        self.speech_start = 0.0;
        self.speech_end = 0.0;
        self.pending.clear();
    }

    /// Buffer `samples` and report every event the completed frames produce.
    ///
    /// The events do not depend on how the stream is split into calls.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<SpeechEvent>> {
        self.pending.extend_from_slice(samples);
        let frame_size = self.frame_size();
        let mut events = Vec::new();
        let mut consumed = 0;
        while self.pending.len() - consumed >= frame_size {
            let frame = self.pending[consumed..consumed + frame_size].to_vec();
            consumed += frame_size;
            self.process_frame(frame, &mut events)?;
        }
        self.pending.drain(..consumed);
        Ok(events)
    }

    /// End the stream. Closes an open utterance, returning its trailing speech.
    pub fn finish(&mut self) -> Vec<SpeechEvent> {
        let tail = std::mem::take(&mut self.pending);
        let mut events = Vec::new();
        if !self.in_speech {
            self.clear_queue();
            return events;
        }
        self.in_speech = false;
        self.speech_end = self.queue_start;

        while let Some(front) = self.queue.front() {
            if !front.is_speech {
                break;
            }
            if let Some(frame) = self.pop() {
                events.push(SpeechEvent::Audio(frame.samples));
            }
            self.speech_end = self.queue_start;
        }
        // Every queued frame was speech, so the partial tail belongs to it too.
        if self.queue.is_empty() && !tail.is_empty() {
            self.speech_end += tail.len() as f64 / self.sample_rate() as f64;
            events.push(SpeechEvent::Audio(tail));
        }
        self.clear_queue();
        events.push(SpeechEvent::End {
            time: self.speech_end,
        });
        events
    }

    fn process_frame(&mut self, samples: Vec<i16>, events: &mut Vec<SpeechEvent>) -> Result<()> {
        let is_speech = self.vad.classify(&samples)?;
        if self.queue.len() == self.maxlen {
            self.pop();
        }
        self.queue.push_back(Frame { samples, is_speech });
        if is_speech {
            self.speech_count += 1;
        }

        if self.in_speech {
            if self.speech_count < self.end_frames {
                // Hand over only the oldest frame so utterances never overlap.
                if let Some(frame) = self.pop() {
                    events.push(SpeechEvent::Audio(frame.samples));
                }
                self.speech_end = self.queue_start;
                self.in_speech = false;
                events.push(SpeechEvent::End {
                    time: self.speech_end,
                });
                return Ok(());
            }
        } else if self.speech_count > self.start_frames {
            self.speech_start = self.queue_start;
            self.speech_end = 0.0;
            self.in_speech = true;
            events.push(SpeechEvent::Start {
                time: self.speech_start,
            });
        }

        if self.in_speech {
            if let Some(frame) = self.pop() {
                events.push(SpeechEvent::Audio(frame.samples));
            }
        }
        Ok(())
    }

    fn pop(&mut self) -> Option<Frame> {
        let frame = self.queue.pop_front()?;
        self.queue_start += self.vad.frame_length();
        if frame.is_speech {
            self.speech_count -= 1;
        }
        Some(frame)
    }

    fn clear_queue(&mut self) {
        while self.pop().is_some() {}
    }
}

/// One utterance found and decoded by a [`SegmentedDecoder`].
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSegment {
    /// Stream time of the utterance, in seconds.
    pub start: f64,
    pub end: f64,
    pub hypothesis: Hypothesis,
    /// Word segments with frames relative to `start`.
    pub segments: Vec<Segment>,
    pub nbest: Vec<NBestEntry>,
}

/// Drives a [`Decoder`] from an [`Endpointer`]: every detected utterance becomes one
/// `start_utt`/`end_utt` pair.
pub struct SegmentedDecoder<'a> {
    decoder: &'a mut Decoder,
    endpointer: Endpointer,
    nbest: usize,
}

impl<'a> SegmentedDecoder<'a> {
    /// Fails with [`Error::Config`] when the endpointer and decoder sample rates differ, or
    /// with [`Error::Sequence`] when the decoder is inside an utterance.
    pub fn new(decoder: &'a mut Decoder, endpointer: Endpointer) -> Result<Self> {
        let rate = decoder.models().frontend_config().sample_rate;
        if endpointer.sample_rate() != rate {
            return Err(Error::config(format!(
                "endpointer runs at {} Hz but the acoustic model expects {rate} Hz",
                endpointer.sample_rate()
            )));
        }
        if decoder.in_utt() {
            return Err(Error::sequence(
                "cannot segment a stream while an utterance is in progress",
            ));
        }
        Ok(Self {
            decoder,
            endpointer,
            nbest: 0,
        })
    }

    /// Keep up to `n` alternatives per utterance.
    pub fn with_nbest(mut self, n: usize) -> Self {
        self.nbest = n;
        self
    }

    pub fn decoder(&self) -> &Decoder {
        &*self.decoder
    }

    pub fn endpointer(&self) -> &Endpointer {
        &self.endpointer
    }

    /// Feed stream audio; returns the utterances that ended within it.
    pub fn push(&mut self, samples: &[i16]) -> Result<Vec<DecodedSegment>> {
        let events = self.endpointer.push(samples)?;
        self.apply(events)
    }

    /// End the stream, decoding any utterance still open.
    pub fn finish(&mut self) -> Result<Vec<DecodedSegment>> {
        let events = self.endpointer.finish();
        self.apply(events)
    }

    fn apply(&mut self, events: Vec<SpeechEvent>) -> Result<Vec<DecodedSegment>> {
        let mut done = Vec::new();
        for event in events {
            match event {
                SpeechEvent::Start { .. } => self.decoder.start_utt()?,
                SpeechEvent::Audio(samples) => {
                    self.decoder.process_int16(&samples, false, false)?;
                }
                SpeechEvent::End { time } => {
                    self.decoder.end_utt()?;
                    done.push(self.collect(time));
                }
            }
        }
        Ok(done)
    }

    fn collect(&self, end: f64) -> DecodedSegment {
        DecodedSegment {
            start: self.endpointer.speech_start(),
            end,
            hypothesis: self
                .decoder
                .hyp()
                .cloned()
                .unwrap_or_else(Hypothesis::empty),
            segments: self.decoder.seg().cloned().collect(),
            nbest: if self.nbest > 0 {
                self.decoder.nbest(self.nbest)
            } else {
                Vec::new()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: usize = 16_000;

    fn hiss(n: usize, seed: u32) -> Vec<i16> {
        let mut x = seed.max(1);
        (0..n)
            .map(|_| {
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                ((x >> 24) as i16 - 128) / 4
            })
            .collect()
    }

    fn beep(n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| (6_000.0 * (i as f32 * 0.2).sin()) as i16)
            .collect()
    }

    /// 1 s quiet, 1 s beep, 1 s quiet, 0.5 s beep, 1 s quiet.
    fn two_bursts() -> Vec<i16> {
        let mut out = hiss(RATE, 1);
        out.extend(beep(RATE));
        out.extend(hiss(RATE, 2));
        out.extend(beep(RATE / 2));
        out.extend(hiss(RATE, 3));
        out
    }

    fn run(audio: &[i16], chunk: usize) -> anyhow::Result<Vec<SpeechEvent>> {
        let mut ep = Endpointer::new(EndpointerConfig::new(RATE as u32))?;
        let mut events = Vec::new();
        for piece in audio.chunks(chunk) {
            events.extend(ep.push(piece)?);
        }
        events.extend(ep.finish());
        Ok(events)
    }

    fn spans(events: &[SpeechEvent]) -> Vec<(f64, f64, usize)> {
        let mut out = Vec::new();
        let mut open = None;
        let mut samples = 0;
        for e in events {
            match e {
                SpeechEvent::Start { time } => {
                    open = Some(*time);
                    samples = 0;
                }
                SpeechEvent::Audio(a) => samples += a.len(),
                SpeechEvent::End { time } => {
                    if let Some(start) = open.take() {
                        out.push((start, *time, samples));
                    }
                }
            }
        }
        out
    }

    #[test]
    fn bursts_become_separate_utterances() -> anyhow::Result<()> {
        let events = run(&two_bursts(), 4096)?;
        let spans = spans(&events);
        assert_eq!(spans.len(), 2, "{spans:?}");

        let (s0, e0, n0) = spans[0];
        assert!((s0 - 1.0).abs() < 0.1, "first start {s0}");
        assert!((e0 - 2.0).abs() < 0.15, "first end {e0}");
        assert!(n0 >= RATE * 9 / 10);

        let (s1, e1, _) = spans[1];
        assert!((s1 - 3.0).abs() < 0.1, "second start {s1}");
        assert!((e1 - 3.5).abs() < 0.15, "second end {e1}");
        Ok(())
    }

    #[test]
    fn events_do_not_depend_on_chunking() -> anyhow::Result<()> {
        let audio = two_bursts();
        let whole = run(&audio, audio.len())?;
        for chunk in [1, 479, 481, 10_000] {
            assert_eq!(whole, run(&audio, chunk)?, "chunk {chunk}");
        }
        Ok(())
    }

    #[test]
    fn finish_closes_speech_running_to_the_end() -> anyhow::Result<()> {
        let mut audio = hiss(RATE, 4);
        audio.extend(beep(RATE + 100));
        let events = run(&audio, 1000)?;
        let spans = spans(&events);
        assert_eq!(spans.len(), 1);
        let (start, end, samples) = spans[0];
        assert!((start - 1.0).abs() < 0.1);
        assert!((end - audio.len() as f64 / RATE as f64).abs() < 1e-6);
        // Everything from the start of the window onwards, including the partial tail.
        assert!((samples as f64 - (end - start) * RATE as f64).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn quiet_streams_produce_nothing() -> anyhow::Result<()> {
        assert!(run(&hiss(3 * RATE, 9), 2048)?.is_empty());
        assert!(run(&[], 1)?.is_empty());
        Ok(())
    }

    #[test]
    fn impossible_ratios_are_rejected() {
        for ratio in [0.01, 0.999] {
            let config = EndpointerConfig {
                ratio,
                ..EndpointerConfig::new(RATE as u32)
            };
            assert!(matches!(Endpointer::new(config), Err(Error::Config(_))), "ratio {ratio}");
        }
    }
}
