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
use crate::span_masking::simulator::{BernoulliSimulator, ChainSimulator, SpanMaskSampler};
use crate::span_masking::span_mask::{BatchShape, SpanMask};
use crate::SpanMaskingError;
use tracing::info;

#[derive(Clone, Debug)]
/// # Masking regime
/// Either a calibrated span regime or the implicit uniform (Bernoulli) regime.
pub enum MaskingRegime {
    Span(ChainSimulator),
    Uniform(BernoulliSimulator),
}

impl MaskingRegime {
    fn sampler(&self) -> &dyn SpanMaskSampler {
        match self {
            MaskingRegime::Span(simulator) => simulator,
            MaskingRegime::Uniform(simulator) => simulator,
        }
    }
}

#[derive(Clone, Debug)]
/// # Span mask with the regime kept for each example
pub struct MixedSpanMask {
    pub span_mask: SpanMask,
    /// Regime index per example. Indices `0..N` refer to span regimes, `N` to the uniform regime.
    pub regime_choices: Vec<usize>,
}

#[derive(Clone, Debug)]
/// # Regime mixer
/// Simulates every configured regime over the whole batch, then keeps exactly one
/// regime's mask row per example according to the regime prior.
pub struct RegimeMixer {
    regimes: Vec<MaskingRegime>,
    prior: Categorical,
}

impl RegimeMixer {
    /// Creates a new mixer.
    ///
    /// # Arguments
    ///
    /// * `span_regimes` - At least one calibrated span regime
    /// * `uniform_regime` - Implicit uniform regime, appended after the span regimes
    /// * `prior` - Optional weights over the `N + 1` regimes (uniform when `None`)
    pub fn new(
        span_regimes: Vec<ChainSimulator>,
        uniform_regime: BernoulliSimulator,
        prior: Option<&[f64]>,
    ) -> Result<RegimeMixer, SpanMaskingError> {
        if span_regimes.is_empty() {
            return Err(SpanMaskingError::InvalidConfigurationError(
                "at least one span regime must be configured".to_string(),
            ));
        }
        let mut regimes = span_regimes
            .into_iter()
            .map(MaskingRegime::Span)
            .collect::<Vec<MaskingRegime>>();
        regimes.push(MaskingRegime::Uniform(uniform_regime));

        let prior = match prior {
            Some(weights) => {
                if weights.len() != regimes.len() {
                    return Err(SpanMaskingError::InvalidConfigurationError(format!(
                        "regime prior has {} entries, expected {} ({} span regimes + uniform)",
                        weights.len(),
                        regimes.len(),
                        regimes.len() - 1
                    )));
                }
                info!("apply predefined regime prior {:?}", weights);
                Categorical::new(weights).map_err(|error| {
                    SpanMaskingError::InvalidConfigurationError(format!(
                        "invalid regime prior: {}",
                        error
                    ))
                })?
            }
            None => {
                info!("apply uniform regime prior over {} regimes", regimes.len());
                Categorical::new(&vec![1.0; regimes.len()])?
            }
        };

        Ok(RegimeMixer { regimes, prior })
    }

    pub fn regimes(&self) -> &[MaskingRegime] {
        &self.regimes
    }

    pub fn num_regimes(&self) -> usize {
        self.regimes.len()
    }

    /// Normalized prior over the regimes
    pub fn prior(&self) -> Vec<f64> {
        self.prior.probabilities()
    }

    /// One candidate mask per regime, all with the batch shape.
    pub fn candidates(&self, shape: BatchShape, source: &RandomSource) -> Vec<SpanMask> {
        self.regimes
            .iter()
            .enumerate()
            .map(|(index, regime)| {
                let stream = match regime {
                    MaskingRegime::Span(_) => RandomStream::SpanRegime(index),
                    MaskingRegime::Uniform(_) => RandomStream::UniformRegime,
                };
                regime.sampler().sample(shape, source, stream)
            })
            .collect()
    }

    /// Draws the regime of every example from the prior.
    pub fn choose_regimes(&self, batch_size: usize, source: &RandomSource) -> Vec<usize> {
        (0..batch_size)
            .map(|batch_index| {
                let mut rng = source.stream(RandomStream::RegimeChoice, batch_index);
                self.prior.sample(&mut rng)
            })
            .collect()
    }

    /// Copies, for every example, the row of its chosen candidate.
    pub fn select(
        candidates: &[SpanMask],
        regime_choices: &[usize],
    ) -> Result<SpanMask, SpanMaskingError> {
        let shape = match candidates.first() {
            Some(candidate) => candidate.shape(),
            None => {
                return Err(SpanMaskingError::ValueError(
                    "no candidate masks to select from".to_string(),
                ))
            }
        };
        if regime_choices.len() != shape.batch_size {
            return Err(SpanMaskingError::ShapeMismatchError(format!(
                "{} regime choices for a batch of {}",
                regime_choices.len(),
                shape.batch_size
            )));
        }
        if let Some(candidate) = candidates.iter().find(|mask| mask.shape() != shape) {
            return Err(SpanMaskingError::ShapeMismatchError(format!(
                "candidate mask shape {:?} differs from {:?}",
                candidate.shape(),
                shape
            )));
        }

        let mut values = Vec::with_capacity(shape.numel());
        for (batch_index, choice) in regime_choices.iter().enumerate() {
            let candidate = candidates.get(*choice).ok_or_else(|| {
                SpanMaskingError::ValueError(format!(
                    "regime choice {} out of range for {} candidates",
                    choice,
                    candidates.len()
                ))
            })?;
            values.extend_from_slice(candidate.row(batch_index));
        }
        SpanMask::from_values(shape, values)
    }

    /// Simulates all regimes and keeps one regime's row per example.
    pub fn mix(
        &self,
        shape: BatchShape,
        source: &RandomSource,
    ) -> Result<MixedSpanMask, SpanMaskingError> {
        let candidates = self.candidates(shape, source);
        let regime_choices = self.choose_regimes(shape.batch_size, source);
        let span_mask = RegimeMixer::select(&candidates, &regime_choices)?;
        Ok(MixedSpanMask {
            span_mask,
            regime_choices,
        })
    }
}
