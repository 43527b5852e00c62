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

use crate::SpanMaskingError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Longest span length accepted by the calibrator
pub const MAX_SPAN_LENGTH: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
/// # Shape of the span length distribution before calibration
pub enum LengthProfile {
    /// Geometric distribution truncated to `1..=max_span_length` and renormalized (closed form)
    Geometric { success_probability: f64 },
    /// Monte-Carlo estimate of the truncated geometric distribution, reproducible under `seed`
    SampledGeometric {
        success_probability: f64,
        num_samples: usize,
        seed: u64,
    },
    /// Explicit weight per span length, starting at length 1
    Weights { values: Vec<f64> },
}

impl Default for LengthProfile {
    fn default() -> Self {
        LengthProfile::Geometric {
            success_probability: 0.2,
        }
    }
}

impl LengthProfile {
    /// Returns the normalized probability of each span length `1..=max_span_length`.
    pub fn probabilities(&self, max_span_length: usize) -> Result<Vec<f64>, SpanMaskingError> {
        if max_span_length == 0 || max_span_length > MAX_SPAN_LENGTH {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "max_span_length must be in [1, {}], got {}",
                MAX_SPAN_LENGTH, max_span_length
            )));
        }
        let weights = match self {
            LengthProfile::Geometric {
                success_probability,
            } => {
                check_success_probability(*success_probability)?;
                let failure = 1.0 - success_probability;
                (0..max_span_length)
                    .map(|k| success_probability * failure.powi(k as i32))
                    .collect::<Vec<f64>>()
            }
            LengthProfile::SampledGeometric {
                success_probability,
                num_samples,
                seed,
            } => {
                check_success_probability(*success_probability)?;
                if *num_samples == 0 {
                    return Err(SpanMaskingError::InvalidConfigurationError(
                        "sampled geometric profile requires at least one sample".to_string(),
                    ));
                }
                sample_geometric_counts(
                    *success_probability,
                    *num_samples,
                    *seed,
                    max_span_length,
                )
            }
            LengthProfile::Weights { values } => {
                if values.len() != max_span_length {
                    return Err(SpanMaskingError::InvalidConfigurationError(format!(
                        "{} span length weights provided for max_span_length {}",
                        values.len(),
                        max_span_length
                    )));
                }
                if values.iter().any(|value| !value.is_finite() || *value < 0.0) {
                    return Err(SpanMaskingError::InvalidConfigurationError(
                        "span length weights must be finite and non-negative".to_string(),
                    ));
                }
                values.clone()
            }
        };

        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "span length profile has no mass on lengths 1..={}",
                max_span_length
            )));
        }
        Ok(weights.into_iter().map(|weight| weight / total).collect())
    }
}

fn check_success_probability(success_probability: f64) -> Result<(), SpanMaskingError> {
    if !(success_probability > 0.0 && success_probability <= 1.0) {
        return Err(SpanMaskingError::InvalidConfigurationError(format!(
            "geometric success probability must be in (0, 1], got {}",
            success_probability
        )));
    }
    Ok(())
}

// Counts of geometric draws landing on each length; draws above the maximum are discarded.
fn sample_geometric_counts(
    success_probability: f64,
    num_samples: usize,
    seed: u64,
    max_span_length: usize,
) -> Vec<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut counts = vec![0f64; max_span_length];
    if success_probability >= 1.0 {
        counts[0] = num_samples as f64;
        return counts;
    }
    let log_failure = (1.0 - success_probability).ln();
    for _ in 0..num_samples {
        let u: f64 = 1.0 - rng.random::<f64>();
        let length = (u.ln() / log_failure).floor() as usize + 1;
        if length <= max_span_length {
            counts[length - 1] += 1.0;
        }
    }
    counts
}

#[derive(Clone, Debug, PartialEq)]
/// # Calibrated span length distribution
/// Probability of starting a span of each length at a free step, scaled so that the long-run
/// fraction of masked positions equals the target mask fraction.
///
/// A free step draws one of two outcomes: a single unmasked step (`no_start_probability`) or a
/// span of `k` masked steps (`per_length_start_probability[k - 1]`). The masked fraction of
/// this renewal process is `scale * E / ((1 - scale) + scale * E)` where `E` is the expected
/// span length, which gives `scale = f / (E * (1 - f) + f)` for a target fraction `f`.
pub struct SpanLengthDistribution {
    max_span_length: usize,
    target_mask_fraction: f64,
    length_profile: Vec<f64>,
    per_length_start_probability: Vec<f64>,
    no_start_probability: f64,
    expected_length: f64,
    scale: f64,
}

impl SpanLengthDistribution {
    /// Calibrates the start probabilities for a given maximum span length and mask fraction.
    ///
    /// # Arguments
    ///
    /// * `max_span_length` - Longest span that can be drawn (at least 1)
    /// * `target_mask_fraction` - Expected fraction of masked positions, in `[0, 1)`
    /// * `length_profile` - Relative frequency of the span lengths before calibration
    ///
    /// # Example
    ///
    /// ```
    /// use rust_span_masking::span_masking::{LengthProfile, SpanLengthDistribution};
    /// # fn main() -> Result<(), rust_span_masking::SpanMaskingError> {
    /// let distribution = SpanLengthDistribution::calibrate(3, 0.3, &LengthProfile::default())?;
    /// let total = distribution.no_start_probability()
    ///     + distribution.per_length_start_probability().iter().sum::<f64>();
    /// assert!((total - 1.0).abs() < 1e-6);
    /// # Ok(())
    /// # }
    /// ```
    pub fn calibrate(
        max_span_length: usize,
        target_mask_fraction: f64,
        length_profile: &LengthProfile,
    ) -> Result<SpanLengthDistribution, SpanMaskingError> {
        if !(target_mask_fraction >= 0.0 && target_mask_fraction < 1.0) {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "target mask fraction must be in [0, 1), got {}",
                target_mask_fraction
            )));
        }
        let profile = length_profile.probabilities(max_span_length)?;
        let expected_length = profile
            .iter()
            .enumerate()
            .map(|(index, probability)| (index + 1) as f64 * probability)
            .sum::<f64>();

        let scale = target_mask_fraction
            / (expected_length * (1.0 - target_mask_fraction) + target_mask_fraction);
        if !scale.is_finite() || scale > 1.0 {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "target mask fraction {} is unreachable with max_span_length {} (scale {})",
                target_mask_fraction, max_span_length, scale
            )));
        }

        let per_length_start_probability = profile
            .iter()
            .map(|probability| probability * scale)
            .collect::<Vec<f64>>();
        debug!(
            max_span_length,
            target_mask_fraction, expected_length, scale, "calibrated span length distribution"
        );

        Ok(SpanLengthDistribution {
            max_span_length,
            target_mask_fraction,
            length_profile: profile,
            per_length_start_probability,
            no_start_probability: 1.0 - scale,
            expected_length,
            scale,
        })
    }

    pub fn max_span_length(&self) -> usize {
        self.max_span_length
    }

    pub fn target_mask_fraction(&self) -> f64 {
        self.target_mask_fraction
    }

    /// Normalized span length profile, index `k - 1` for length `k`
    pub fn length_profile(&self) -> &[f64] {
        &self.length_profile
    }

    /// Probability of starting a span of length `k` at a free step, index `k - 1`
    pub fn per_length_start_probability(&self) -> &[f64] {
        &self.per_length_start_probability
    }

    pub fn no_start_probability(&self) -> f64 {
        self.no_start_probability
    }

    pub fn expected_length(&self) -> f64 {
        self.expected_length
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Long-run fraction of masked positions produced by this distribution.
    pub fn expected_masked_fraction(&self) -> f64 {
        let masked = self.scale * self.expected_length;
        masked / (self.no_start_probability + masked)
    }
}
