//! # Span masking for masked language model pretraining
//!
//! Builds the corrupted inputs of masked language model pretraining batches. Instead of masking
//! independent tokens, masked positions are drawn as contiguous spans whose lengths follow a
//! calibrated distribution, so that the expected fraction of masked positions matches a target.
//! Several span regimes (maximum span length, mask fraction) can be mixed within a batch, each
//! example keeping exactly one regime. Selected positions are then replaced by the mask token
//! (80%), a random token (10%) or kept unchanged (10%); unknown, classification, separator and
//! padding positions are never corrupted.
//!
//! The masking of a sequence is simulated as a Markov chain with one step per position: each
//! span length owns a countdown chain of states, which guarantees that a span of length `k`
//! covers exactly `k` consecutive positions while every step performs the same amount of work.
//!
//! # Quick Start
//!
//! The [`SpanCorruptionGenerator`](pipelines::span_corruption::SpanCorruptionGenerator) takes
//! `tch` tensors as produced by a tokenizer and returns the corrupted ids and the loss mask.
//!
//! ```no_run
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rust_span_masking::pipelines::span_corruption::{
//!     SpanCorruptionConfig, SpanCorruptionGenerator, SpanRegimeConfig,
//! };
//! use tch::Tensor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = SpanCorruptionConfig {
//!     regimes: vec![
//!         SpanRegimeConfig::new(1, 0.15),
//!         SpanRegimeConfig::new(3, 0.15),
//!         SpanRegimeConfig::new(10, 0.15),
//!     ],
//!     regime_prior: Some(vec![0.3, 0.3, 0.3, 0.1]),
//!     ..Default::default()
//! };
//! let generator = SpanCorruptionGenerator::new(config)?;
//!
//! let input_ids = Tensor::from_slice(&[101i64, 2023, 2003, 1037, 7099, 102]).view([1, 6]);
//! let input_mask = Tensor::ones_like(&input_ids);
//! let mut rng = ChaCha8Rng::seed_from_u64(1234);
//! let output = generator.generate(&input_ids, &input_mask, None, &mut rng)?;
//!
//! output.input_ids.print();
//! output.touched_mask.print();
//! # Ok(())
//! # }
//! ```
//!
//! Configurations can also be loaded from a JSON training configuration with [`Config::from_file`].
//!
//! # Reproducibility
//!
//! Randomness is always injected. `generate` draws a single `u64` from the caller's generator,
//! which seeds a [`RandomSource`](common::random::RandomSource) split into independent
//! `ChaCha8Rng` streams per component and per example. Two runs from the same seed produce
//! identical outputs regardless of the number of threads used to process the batch.

pub mod common;
pub mod pipelines;
pub mod span_masking;

pub use common::error::SpanMaskingError;
pub use common::Config;
