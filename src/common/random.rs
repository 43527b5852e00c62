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

//! # Seedable, splittable random source
//! Every batch is driven by a single `u64` seed. Each component (regime simulation, regime
//! choice, corruption) and each example within the batch draws from its own `ChaCha8Rng`
//! stream derived from that seed, so the output of a batch does not depend on how the
//! examples are scheduled across threads.

use crate::SpanMaskingError;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const STREAM_MULTIPLIER: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// # Purpose of a random stream
pub enum RandomStream {
    /// Chain simulation of the span regime with the given index
    SpanRegime(usize),
    /// Bernoulli draws of the implicit uniform regime
    UniformRegime,
    /// Per-example categorical draw of the regime to keep
    RegimeChoice,
    /// Corruption assignments and random replacement ids
    Corruption,
}

impl RandomStream {
    fn tag(self) -> u64 {
        match self {
            RandomStream::RegimeChoice => 1,
            RandomStream::Corruption => 2,
            RandomStream::UniformRegime => 3,
            RandomStream::SpanRegime(index) => 16 + index as u64,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// # Per-batch random source
/// Wraps the batch seed and hands out independent `ChaCha8Rng` streams.
///
/// ```
/// use rand::SeedableRng;
/// use rand_chacha::ChaCha8Rng;
/// use rust_span_masking::common::random::{RandomSource, RandomStream};
///
/// let mut rng = ChaCha8Rng::seed_from_u64(42);
/// let source = RandomSource::from_rng(&mut rng);
/// let _example_rng = source.stream(RandomStream::Corruption, 0);
/// let _next_batch = source.next_batch();
/// ```
pub struct RandomSource {
    seed: u64,
}

impl RandomSource {
    pub fn new(seed: u64) -> RandomSource {
        RandomSource { seed }
    }

    /// Draws the batch seed from a caller-provided generator (advances it by one `u64`).
    pub fn from_rng<R: RngCore + ?Sized>(rng: &mut R) -> RandomSource {
        RandomSource::new(rng.next_u64())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Deterministically derives the source for the following batch.
    pub fn next_batch(&self) -> RandomSource {
        RandomSource::new(splitmix64(self.seed))
    }

    /// Returns the generator for one (purpose, example) pair.
    pub fn stream(&self, stream: RandomStream, index: usize) -> ChaCha8Rng {
        let stream_seed = splitmix64(self.seed ^ stream.tag().wrapping_mul(STREAM_MULTIPLIER));
        let mut rng = ChaCha8Rng::seed_from_u64(stream_seed);
        rng.set_stream(index as u64);
        rng
    }
}

fn splitmix64(value: u64) -> u64 {
    let mut z = value.wrapping_add(STREAM_MULTIPLIER);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[derive(Clone, Debug)]
/// # Categorical distribution sampled by inverse CDF
pub struct Categorical {
    cumulative: Vec<f64>,
}

impl Categorical {
    /// Builds a categorical distribution from non-negative (unnormalized) weights.
    ///
    /// # Arguments
    ///
    /// * `weights` - Slice of non-negative, finite weights with a strictly positive sum.
    pub fn new(weights: &[f64]) -> Result<Categorical, SpanMaskingError> {
        if weights.is_empty() {
            return Err(SpanMaskingError::ValueError(
                "categorical distribution requires at least one weight".to_string(),
            ));
        }
        if let Some(weight) = weights.iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(SpanMaskingError::ValueError(format!(
                "categorical weights must be finite and non-negative, got {}",
                weight
            )));
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(SpanMaskingError::ValueError(
                "categorical weights must have a positive sum".to_string(),
            ));
        }

        let mut running = 0.0;
        let mut cumulative = weights
            .iter()
            .map(|weight| {
                running += weight / total;
                running
            })
            .collect::<Vec<f64>>();
        // Absorb rounding error into the last category carrying mass
        let last_positive = weights.iter().rposition(|w| *w > 0.0).unwrap_or(0);
        for value in cumulative[last_positive..].iter_mut() {
            *value = 1.0;
        }
        Ok(Categorical { cumulative })
    }

    pub fn len(&self) -> usize {
        self.cumulative.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cumulative.is_empty()
    }

    /// Normalized probabilities of each category
    pub fn probabilities(&self) -> Vec<f64> {
        let mut previous = 0.0;
        self.cumulative
            .iter()
            .map(|value| {
                let probability = value - previous;
                previous = *value;
                probability
            })
            .collect()
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let u: f64 = rng.random();
        let index = self.cumulative.partition_point(|value| *value <= u);
        index.min(self.cumulative.len() - 1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn streams_are_reproducible_and_distinct() {
        let source = RandomSource::new(7);
        let first = source.stream(RandomStream::Corruption, 3).next_u64();
        let replay = source.stream(RandomStream::Corruption, 3).next_u64();
        let other_example = source.stream(RandomStream::Corruption, 4).next_u64();
        let other_purpose = source.stream(RandomStream::RegimeChoice, 3).next_u64();

        assert_eq!(first, replay);
        assert_ne!(first, other_example);
        assert_ne!(first, other_purpose);
        assert_ne!(source.next_batch(), source);
    }

    #[test]
    fn categorical_never_samples_zero_weight() {
        let categorical = Categorical::new(&[0.0, 2.0, 0.0, 2.0, 0.0]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut counts = [0usize; 5];
        for _ in 0..20_000 {
            counts[categorical.sample(&mut rng)] += 1;
        }

        assert_eq!(counts[0], 0);
        assert_eq!(counts[2], 0);
        assert_eq!(counts[4], 0);
        let ratio = counts[1] as f64 / 20_000.0;
        assert!((ratio - 0.5).abs() < 0.02);
    }

    #[test]
    fn categorical_rejects_invalid_weights() {
        assert!(Categorical::new(&[]).is_err());
        assert!(Categorical::new(&[0.0, 0.0]).is_err());
        assert!(Categorical::new(&[1.0, -0.5]).is_err());
        assert!(Categorical::new(&[f64::NAN]).is_err());
    }

    #[test]
    fn categorical_probabilities_are_normalized() {
        let categorical = Categorical::new(&[1.0, 3.0]).unwrap();
        let probabilities = categorical.probabilities();

        assert!((probabilities[0] - 0.25).abs() < 1e-12);
        assert!((probabilities[1] - 0.75).abs() < 1e-12);
    }
}
