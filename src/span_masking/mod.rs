//! # Span masking for masked language model pretraining
//!
//! Masked positions are drawn as contiguous spans rather than independent tokens. The span
//! lengths follow a calibrated distribution whose expected masked fraction matches a target,
//! and several span-length regimes can be mixed within a batch (one regime per example).
//!
//! The components are layered as follows:
//! - `SpanLengthDistribution`: calibrates the probability of starting a span of each length
//! - `TransitionMatrix`: encodes the distribution as a Markov chain with one countdown chain per span length
//! - `ChainSimulator`: walks the chain one step per position, batched over examples
//! - `RegimeMixer`: simulates every regime (plus a uniform Bernoulli regime) and keeps one per example
//! - `CorruptionPolicy`: restricts the mask to maskable positions and applies the mask / random / keep recipe
//!
//! ```
//! use rust_span_masking::common::random::RandomSource;
//! use rust_span_masking::span_masking::{
//!     BatchShape, BernoulliSimulator, ChainSimulator, CorruptionConfig, CorruptionPolicy,
//!     LengthProfile, ProtectedTokens, RegimeMixer, TokenBatch,
//! };
//!
//! # fn main() -> Result<(), rust_span_masking::SpanMaskingError> {
//! let mixer = RegimeMixer::new(
//!     vec![ChainSimulator::from_config(3, 0.3, &LengthProfile::default())?],
//!     BernoulliSimulator::new(0.2)?,
//!     None,
//! )?;
//! let policy = CorruptionPolicy::new(CorruptionConfig::default(), 103, 30522)?;
//!
//! let shape = BatchShape::new(1, 6);
//! let batch = TokenBatch::new(
//!     shape,
//!     vec![101, 7592, 2088, 2003, 2307, 102],
//!     vec![true; 6],
//!     None,
//! )?;
//! let source = RandomSource::new(42);
//! let mixed = mixer.mix(shape, &source)?;
//! let maskable = batch.maskable_positions(&ProtectedTokens::default());
//! let output = policy.apply(&batch, &mixed.span_mask, &maskable, &source)?;
//! assert_eq!(output.corrupted_ids.len(), 6);
//! # Ok(())
//! # }
//! ```

mod corruption;
mod distribution;
mod maskable;
mod mixer;
mod simulator;
mod span_mask;
mod transition;

pub use corruption::{CorruptionAssignment, CorruptionConfig, CorruptionOutput, CorruptionPolicy};
pub use distribution::{LengthProfile, SpanLengthDistribution, MAX_SPAN_LENGTH};
pub use maskable::{
    ProtectedTokens, TokenBatch, BERT_CLS_TOKEN_ID, BERT_MASK_TOKEN_ID, BERT_SEP_TOKEN_ID,
    BERT_UNKNOWN_TOKEN_ID, BERT_VOCAB_SIZE,
};
pub use mixer::{MaskingRegime, MixedSpanMask, RegimeMixer};
pub use simulator::{BernoulliSimulator, ChainSimulator, SpanMaskSampler};
pub use span_mask::{BatchShape, SpanMask};
pub use transition::{
    chain_entry, chain_position, num_states, TransitionMatrix, FREE_STATE, MAX_DENSE_STATES,
};
