// Copyright 2024 The rust-span-masking Authors
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! # Span corruption pipeline
//! Builds the corrupted inputs and the loss mask of a masked language model pretraining batch.
//! Span regimes are calibrated once when the generator is created; every call to `generate`
//! draws a fresh batch seed from the caller's random number generator.
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
//!         SpanRegimeConfig::new(3, 0.15),
//!         SpanRegimeConfig::new(8, 0.15),
//!     ],
//!     ..Default::default()
//! };
//! let generator = SpanCorruptionGenerator::new(config)?;
//!
//! let input_ids = Tensor::from_slice(&[101i64, 7592, 2088, 2003, 2307, 102, 0, 0]).view([1, 8]);
//! let input_mask = Tensor::from_slice(&[1i64, 1, 1, 1, 1, 1, 0, 0]).view([1, 8]);
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let output = generator.generate(&input_ids, &input_mask, None, &mut rng)?;
//! # Ok(())
//! # }
//! ```

use crate::common::kind::rows_to_tensor;
use crate::common::random::RandomSource;
use crate::span_masking::{
    BernoulliSimulator, ChainSimulator, CorruptionAssignment, CorruptionConfig,
    CorruptionOutput, CorruptionPolicy, LengthProfile, ProtectedTokens, RegimeMixer, SpanMask,
    TokenBatch, BERT_MASK_TOKEN_ID, BERT_VOCAB_SIZE,
};
use crate::{Config, SpanMaskingError};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tch::Tensor;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// # Configuration of a span regime
pub struct SpanRegimeConfig {
    /// Longest span the regime can produce
    pub max_span_length: usize,
    /// Expected fraction of masked positions
    pub mask_fraction: f64,
    /// Relative frequency of the span lengths (default: geometric, p = 0.2)
    #[serde(default)]
    pub length_profile: LengthProfile,
}

impl SpanRegimeConfig {
    pub fn new(max_span_length: usize, mask_fraction: f64) -> SpanRegimeConfig {
        SpanRegimeConfig {
            max_span_length,
            mask_fraction,
            length_profile: LengthProfile::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
/// # Configuration for SpanCorruptionGenerator
/// Contains the span regimes, the regime prior and the corruption settings.
pub struct SpanCorruptionConfig {
    /// Span regimes, at least one
    pub regimes: Vec<SpanRegimeConfig>,
    /// Masking probability of the implicit uniform regime
    pub uniform_mask_probability: f64,
    /// Optional weights over the span regimes followed by the uniform regime (uniform when `None`)
    pub regime_prior: Option<Vec<f64>>,
    /// Split between mask token, random token and original token
    pub corruption: CorruptionConfig,
    /// Id of the mask token
    pub mask_token_id: i64,
    /// Size of the vocabulary random replacements are drawn from
    pub vocab_size: i64,
    /// Token ids never corrupted (unknown, classification and separator tokens by default)
    pub protected_token_ids: Vec<i64>,
}

impl Config for SpanCorruptionConfig {}

impl Default for SpanCorruptionConfig {
    fn default() -> SpanCorruptionConfig {
        SpanCorruptionConfig {
            regimes: vec![SpanRegimeConfig::new(3, 0.15)],
            uniform_mask_probability: 0.2,
            regime_prior: None,
            corruption: CorruptionConfig::default(),
            mask_token_id: BERT_MASK_TOKEN_ID,
            vocab_size: BERT_VOCAB_SIZE,
            protected_token_ids: ProtectedTokens::default().ids().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
/// # Corrupted batch with its diagnostics (plain buffers)
pub struct CorruptedBatch {
    /// Output of the corruption policy (corrupted ids, touched mask, assignments)
    pub corruption: CorruptionOutput,
    /// Mixed span mask before intersection with the maskable positions
    pub span_mask: SpanMask,
    /// Regime kept for every example
    pub regime_choices: Vec<usize>,
    /// Random source that produced the batch
    pub source: RandomSource,
}

impl CorruptedBatch {
    pub fn corrupted_ids(&self) -> &[i64] {
        &self.corruption.corrupted_ids
    }

    pub fn touched_mask(&self) -> &SpanMask {
        &self.corruption.touched_mask
    }
}

/// # Corrupted batch as tensors
pub struct SpanCorruptionOutput {
    /// Corrupted token ids `[batch, length]`
    pub input_ids: Tensor,
    /// Masked language model loss mask `[batch, length]`
    pub touched_mask: Tensor,
    /// Mixed span mask `[batch, length]`
    pub span_mask: Tensor,
    /// Regime index per example `[batch]`
    pub regime_choices: Tensor,
    /// Touched positions over real tokens
    pub mask_ratio: f64,
}

/// # SpanCorruptionGenerator
/// Mixes the span regimes and applies the corruption policy to token batches.
pub struct SpanCorruptionGenerator {
    mixer: RegimeMixer,
    policy: CorruptionPolicy,
    protected_tokens: ProtectedTokens,
}

impl SpanCorruptionGenerator {
    /// Build a new `SpanCorruptionGenerator`
    ///
    /// # Arguments
    ///
    /// * `config` - `SpanCorruptionConfig` object containing the regimes and corruption settings
    ///
    /// # Example
    ///
    /// ```
    /// # fn main() -> anyhow::Result<()> {
    /// use rust_span_masking::pipelines::span_corruption::SpanCorruptionGenerator;
    ///
    /// let generator = SpanCorruptionGenerator::new(Default::default())?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(config: SpanCorruptionConfig) -> Result<SpanCorruptionGenerator, SpanMaskingError> {
        let span_regimes = config
            .regimes
            .iter()
            .map(|regime| {
                ChainSimulator::from_config(
                    regime.max_span_length,
                    regime.mask_fraction,
                    &regime.length_profile,
                )
            })
            .collect::<Result<Vec<ChainSimulator>, SpanMaskingError>>()?;
        for (index, simulator) in span_regimes.iter().enumerate() {
            debug!(
                regime = index,
                max_span_length = simulator.distribution().max_span_length(),
                expected_span_length = simulator.distribution().expected_length(),
                start_probability = simulator.distribution().scale(),
                "span regime ready"
            );
        }
        let mixer = RegimeMixer::new(
            span_regimes,
            BernoulliSimulator::new(config.uniform_mask_probability)?,
            config.regime_prior.as_deref(),
        )?;
        let policy =
            CorruptionPolicy::new(config.corruption, config.mask_token_id, config.vocab_size)?;
        let protected_tokens = ProtectedTokens::new(config.protected_token_ids);

        Ok(SpanCorruptionGenerator {
            mixer,
            policy,
            protected_tokens,
        })
    }

    /// Replaces the protected token ids, e.g. with ids read from a tokenizer vocabulary.
    pub fn with_protected_tokens(mut self, protected_tokens: ProtectedTokens) -> Self {
        self.protected_tokens = protected_tokens;
        self
    }

    pub fn mixer(&self) -> &RegimeMixer {
        &self.mixer
    }

    pub fn policy(&self) -> &CorruptionPolicy {
        &self.policy
    }

    pub fn protected_tokens(&self) -> &ProtectedTokens {
        &self.protected_tokens
    }

    /// Corrupts a validated batch with an explicit random source.
    pub fn generate_batch(
        &self,
        batch: &TokenBatch,
        source: RandomSource,
    ) -> Result<CorruptedBatch, SpanMaskingError> {
        let mixed = self.mixer.mix(batch.shape(), &source)?;
        let maskable = batch.maskable_positions(&self.protected_tokens);
        let corruption = self
            .policy
            .apply(batch, &mixed.span_mask, &maskable, &source)?;
        debug!(
            mask_ratio = corruption.mask_ratio(),
            masked = corruption.count(CorruptionAssignment::ReplaceWithMask),
            random = corruption.count(CorruptionAssignment::ReplaceWithRandom),
            kept = corruption.count(CorruptionAssignment::KeepOriginal),
            "corrupted batch"
        );

        Ok(CorruptedBatch {
            corruption,
            span_mask: mixed.span_mask,
            regime_choices: mixed.regime_choices,
            source,
        })
    }

    /// Corrupts a batch of tensors.
    ///
    /// Inputs are validated before the batch seed is drawn from `rng`: a shape mismatch leaves
    /// the generator untouched.
    ///
    /// # Arguments
    ///
    /// * `input_ids` - `[batch, length]` original token ids
    /// * `input_mask` - `[batch, length]` non-zero for real tokens, zero for padding
    /// * `special_tokens_mask` - Optional `[batch, length]` non-zero for positions to protect
    /// * `rng` - Random number generator the batch seed is drawn from
    ///
    /// # Returns
    ///
    /// * `SpanCorruptionOutput` with tensors placed on the device of `input_ids`
    pub fn generate<R: RngCore + ?Sized>(
        &self,
        input_ids: &Tensor,
        input_mask: &Tensor,
        special_tokens_mask: Option<&Tensor>,
        rng: &mut R,
    ) -> Result<SpanCorruptionOutput, SpanMaskingError> {
        let batch = TokenBatch::from_tensors(input_ids, input_mask, special_tokens_mask)?;
        let source = RandomSource::from_rng(rng);
        let corrupted = self.generate_batch(&batch, source)?;

        let device = input_ids.device();
        let shape = batch.shape();
        let regime_choices = corrupted
            .regime_choices
            .iter()
            .map(|choice| *choice as i64)
            .collect::<Vec<i64>>();

        Ok(SpanCorruptionOutput {
            input_ids: rows_to_tensor(corrupted.corrupted_ids(), shape, device),
            touched_mask: corrupted.touched_mask().to_tensor(device),
            span_mask: corrupted.span_mask.to_tensor(device),
            regime_choices: Tensor::from_slice(&regime_choices).to(device),
            mask_ratio: corrupted.corruption.mask_ratio(),
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    #[ignore] // no need to run, compilation is enough to verify it is Send
    fn generator_is_send_and_sync() {
        let generator = SpanCorruptionGenerator::new(Default::default()).unwrap();
        let _: Box<dyn Send + Sync> = Box::new(generator);
    }

    #[test]
    fn prior_length_is_validated() {
        let config = SpanCorruptionConfig {
            regime_prior: Some(vec![1.0, 1.0, 1.0]),
            ..Default::default()
        };

        assert!(matches!(
            SpanCorruptionGenerator::new(config),
            Err(SpanMaskingError::InvalidConfigurationError(_))
        ));
    }

    #[test]
    fn partial_json_config_uses_defaults() {
        let config: SpanCorruptionConfig = serde_json::from_str(
            r#"{
                "regimes": [
                    {"max_span_length": 3, "mask_fraction": 0.15},
                    {"max_span_length": 5, "mask_fraction": 0.2,
                     "length_profile": {"type": "weights", "values": [1.0, 1.0, 1.0, 1.0, 1.0]}}
                ],
                "regime_prior": [0.4, 0.4, 0.2]
            }"#,
        )
        .unwrap();

        assert_eq!(config.regimes.len(), 2);
        assert_eq!(config.regimes[0].length_profile, LengthProfile::default());
        assert_eq!(config.mask_token_id, 103);
        assert_eq!(config.vocab_size, 30522);
        assert_eq!(config.protected_token_ids, vec![100, 101, 102]);
        assert!(SpanCorruptionGenerator::new(config).is_ok());
    }
}
