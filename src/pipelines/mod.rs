//! # Ready-to-use pipelines
//!
//! #### 1. Span corruption
//! Turns a batch of token ids into corrupted masked language model inputs and the matching
//! loss mask, mixing several span-length regimes.
//!
//! ```no_run
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//! use rust_span_masking::pipelines::span_corruption::SpanCorruptionGenerator;
//! use tch::Tensor;
//!
//! # fn main() -> anyhow::Result<()> {
//! let generator = SpanCorruptionGenerator::new(Default::default())?;
//! let input_ids = Tensor::from_slice(&[101i64, 7592, 2088, 102]).view([1, 4]);
//! let input_mask = Tensor::ones_like(&input_ids);
//! let mut rng = ChaCha8Rng::seed_from_u64(0);
//!
//! let output = generator.generate(&input_ids, &input_mask, None, &mut rng)?;
//! # Ok(())
//! # }
//! ```

pub mod span_corruption;
