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

use crate::common::random::{Categorical, RandomSource, RandomStream};
use crate::span_masking::maskable::TokenBatch;
use crate::span_masking::span_mask::{BatchShape, SpanMask};
use crate::SpanMaskingError;
use rand::Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
/// # Corruption applied to a selected position
pub enum CorruptionAssignment {
    /// Replaced by the mask token
    ReplaceWithMask,
    /// Replaced by a token drawn uniformly from the vocabulary
    ReplaceWithRandom,
    /// Left unchanged (still predicted by the masked language model loss)
    KeepOriginal,
}

const ASSIGNMENTS: [CorruptionAssignment; 3] = [
    CorruptionAssignment::ReplaceWithMask,
    CorruptionAssignment::ReplaceWithRandom,
    CorruptionAssignment::KeepOriginal,
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
/// # Split of selected positions between the corruption types
/// The probability of keeping the original token is the remainder.
pub struct CorruptionConfig {
    pub mask_token_probability: f64,
    pub random_token_probability: f64,
}

impl Default for CorruptionConfig {
    fn default() -> Self {
        CorruptionConfig {
            mask_token_probability: 0.8,
            random_token_probability: 0.1,
        }
    }
}

impl CorruptionConfig {
    pub fn keep_probability(&self) -> f64 {
        1.0 - self.mask_token_probability - self.random_token_probability
    }
}

#[derive(Debug, Clone)]
/// # Output of the corruption policy
pub struct CorruptionOutput {
    pub shape: BatchShape,
    /// Corrupted token ids, `[batch, length]` row-major
    pub corrupted_ids: Vec<i64>,
    /// Positions the masked language model must predict (union of all assignments)
    pub touched_mask: SpanMask,
    /// Span mask restricted to maskable positions
    pub effective_mask: SpanMask,
    /// Assignment of every position, `None` for untouched positions
    pub assignments: Vec<Option<CorruptionAssignment>>,
    /// Examples without any maskable position inside their span mask
    pub degenerate_examples: Vec<usize>,
    /// Number of non-padding positions in the batch
    pub num_real_tokens: usize,
}

impl CorruptionOutput {
    /// Touched positions over real (non-padding) tokens.
    pub fn mask_ratio(&self) -> f64 {
        self.touched_mask.count() as f64 / (self.num_real_tokens as f64).max(1.0)
    }

    pub fn count(&self, assignment: CorruptionAssignment) -> usize {
        self.assignments
            .iter()
            .filter(|value| **value == Some(assignment))
            .count()
    }
}

#[derive(Debug, Clone)]
/// # Corruption policy
/// Restricts the span mask to maskable positions and assigns every selected position to
/// exactly one of mask token / random token / original token.
pub struct CorruptionPolicy {
    config: CorruptionConfig,
    mask_token_id: i64,
    vocab_size: i64,
    assignment_distribution: Categorical,
}

impl CorruptionPolicy {
    /// Creates a new corruption policy.
    ///
    /// # Arguments
    ///
    /// * `config` - `CorruptionConfig` with the mask / random / keep split
    /// * `mask_token_id` - Id written at `ReplaceWithMask` positions
    /// * `vocab_size` - Random replacement ids are drawn from `[0, vocab_size)`
    pub fn new(
        config: CorruptionConfig,
        mask_token_id: i64,
        vocab_size: i64,
    ) -> Result<CorruptionPolicy, SpanMaskingError> {
        let keep_probability = config.keep_probability();
        let probabilities = [
            config.mask_token_probability,
            config.random_token_probability,
            keep_probability,
        ];
        if probabilities
            .iter()
            .any(|probability| !probability.is_finite() || *probability < -1e-12)
        {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "corruption probabilities must be non-negative and sum to at most 1, got mask {} / random {}",
                config.mask_token_probability, config.random_token_probability
            )));
        }
        if vocab_size < 1 {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "vocab_size must be positive, got {}",
                vocab_size
            )));
        }
        if mask_token_id < 0 {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "mask_token_id must be non-negative, got {}",
                mask_token_id
            )));
        }
        let assignment_distribution = Categorical::new(&[
            config.mask_token_probability,
            config.random_token_probability,
            keep_probability.max(0.0),
        ])
        .map_err(|error| SpanMaskingError::InvalidConfigurationError(error.to_string()))?;

        Ok(CorruptionPolicy {
            config,
            mask_token_id,
            vocab_size,
            assignment_distribution,
        })
    }

    pub fn config(&self) -> &CorruptionConfig {
        &self.config
    }

    pub fn mask_token_id(&self) -> i64 {
        self.mask_token_id
    }

    pub fn vocab_size(&self) -> i64 {
        self.vocab_size
    }

    /// Applies the policy to a batch.
    ///
    /// # Arguments
    ///
    /// * `batch` - Original token ids and padding information
    /// * `span_mask` - Mixed span mask, same shape as the batch
    /// * `maskable` - Maskable positions, same shape as the batch
    /// * `source` - Random source of the batch
    pub fn apply(
        &self,
        batch: &TokenBatch,
        span_mask: &SpanMask,
        maskable: &[bool],
        source: &RandomSource,
    ) -> Result<CorruptionOutput, SpanMaskingError> {
        let shape = batch.shape();
        if span_mask.shape() != shape {
            return Err(SpanMaskingError::ShapeMismatchError(format!(
                "span mask shape {:?} differs from batch shape {:?}",
                span_mask.shape(),
                shape
            )));
        }
        let effective_mask = span_mask.and(maskable)?;

        let rows = (0..shape.batch_size)
            .into_par_iter()
            .map(|batch_index| {
                let start = batch_index * shape.seq_len;
                let end = start + shape.seq_len;
                let mut rng = source.stream(RandomStream::Corruption, batch_index);
                self.corrupt_row(
                    &batch.input_ids()[start..end],
                    effective_mask.row(batch_index),
                    &mut rng,
                )
            })
            .collect::<Vec<(Vec<i64>, Vec<Option<CorruptionAssignment>>)>>();

        let mut corrupted_ids = Vec::with_capacity(shape.numel());
        let mut assignments = Vec::with_capacity(shape.numel());
        let mut degenerate_examples = Vec::new();
        for (batch_index, (row_ids, row_assignments)) in rows.into_iter().enumerate() {
            if row_assignments.iter().all(Option::is_none) {
                degenerate_examples.push(batch_index);
            }
            corrupted_ids.extend(row_ids);
            assignments.extend(row_assignments);
        }
        if !degenerate_examples.is_empty() {
            warn!(
                "{} example(s) without any maskable span position: {:?}",
                degenerate_examples.len(),
                degenerate_examples
            );
        }

        let touched_mask = SpanMask::from_values(
            shape,
            assignments.iter().map(Option::is_some).collect(),
        )?;

        Ok(CorruptionOutput {
            shape,
            corrupted_ids,
            touched_mask,
            effective_mask,
            assignments,
            degenerate_examples,
            num_real_tokens: batch.num_real_tokens(),
        })
    }

    fn corrupt_row<R: Rng + ?Sized>(
        &self,
        input_ids: &[i64],
        effective_mask: &[bool],
        rng: &mut R,
    ) -> (Vec<i64>, Vec<Option<CorruptionAssignment>>) {
        let mut corrupted_ids = input_ids.to_vec();
        let mut assignments = vec![None; input_ids.len()];
        for (position, selected) in effective_mask.iter().enumerate() {
            if !*selected {
                continue;
            }
            let assignment = ASSIGNMENTS[self.assignment_distribution.sample(rng)];
            match assignment {
                CorruptionAssignment::ReplaceWithMask => {
                    corrupted_ids[position] = self.mask_token_id
                }
                CorruptionAssignment::ReplaceWithRandom => {
                    corrupted_ids[position] = rng.random_range(0..self.vocab_size)
                }
                CorruptionAssignment::KeepOriginal => {}
            }
            assignments[position] = Some(assignment);
        }
        (corrupted_ids, assignments)
    }
}
