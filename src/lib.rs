//! `murmur`: a streaming HMM speech decoder.
//!
//! This crate provides:
//! - A typed, schema-checked configuration store
//! - Model loading (Sphinx-3 acoustic models, pronunciation dictionaries, ARPA language models)
//! - An MFCC frontend that turns 16-bit PCM into feature frames incrementally
//! - Gaussian mixture scoring behind a pluggable [`scorer::AcousticScorer`] trait
//! - Time-synchronous Viterbi beam search with word segmentation and N-best lists
//! - Voice activity detection and an endpointer that splits streams into utterances
//! - Result encoders (JSON, CTM, hypothesis lines)
//!
//! Most consumers start with [`decoder::Decoder`]. Models load once into an `Arc` and can be
//! shared by any number of decoders on different threads.

mod error;
pub use error::{Error, Result};

// Configuration and high-level API.
pub mod config;
pub mod decoder;
pub mod hypothesis;

// Models and scoring.
pub mod model;
pub mod s3file;
pub mod scorer;

// Signal processing and search.
pub mod frontend;
pub mod search;

// Audio input and endpointing.
pub mod endpointer;
pub mod vad;
pub mod wav;

// Output selection and encoder interfaces.
pub mod output_type;
pub mod result_encoder;

// Output encoders that serialize decoding results into various formats.
pub mod ctm_encoder;
pub mod hyp_encoder;
pub mod json_array_encoder;

// Logging configuration.
#[cfg(feature = "logging")]
pub mod logging;
