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

use crate::common::random::{RandomSource, RandomStream};
use crate::span_masking::distribution::{LengthProfile, SpanLengthDistribution};
use crate::span_masking::span_mask::{BatchShape, SpanMask};
use crate::span_masking::transition::{chain_entry, TransitionMatrix, FREE_STATE};
use crate::SpanMaskingError;
use rand::Rng;
use rayon::prelude::*;

/// # Common interface of the per-regime mask generators
/// Implementations produce a `[batch, length]` mask for a batch, drawing randomness from the
/// `stream` of the batch `source` (one sub-stream per example).
pub trait SpanMaskSampler {
    fn sample(&self, shape: BatchShape, source: &RandomSource, stream: RandomStream) -> SpanMask;

    /// Target fraction of masked positions
    fn mask_fraction(&self) -> f64;
}

#[derive(Clone, Debug)]
/// # Span chain simulator
/// Walks the span transition matrix one step per position. Examples are simulated in
/// parallel, each from its own random stream; within an example the `seq_len - 1` steps
/// are strictly ordered and only the current state is carried between them.
pub struct ChainSimulator {
    distribution: SpanLengthDistribution,
    transition_matrix: TransitionMatrix,
}

impl ChainSimulator {
    /// Builds a simulator from an existing calibrated distribution.
    pub fn new(distribution: SpanLengthDistribution) -> Result<ChainSimulator, SpanMaskingError> {
        let transition_matrix = TransitionMatrix::from_distribution(&distribution)?;
        Ok(ChainSimulator {
            distribution,
            transition_matrix,
        })
    }

    /// Calibrates the distribution and transition matrix for a regime.
    ///
    /// # Arguments
    ///
    /// * `max_span_length` - Longest span the regime can produce
    /// * `mask_fraction` - Target fraction of masked positions
    /// * `length_profile` - Relative frequency of span lengths
    ///
    /// # Example
    ///
    /// ```
    /// use rust_span_masking::common::random::{RandomSource, RandomStream};
    /// use rust_span_masking::span_masking::{
    ///     BatchShape, ChainSimulator, LengthProfile, SpanMaskSampler,
    /// };
    /// # fn main() -> Result<(), rust_span_masking::SpanMaskingError> {
    /// let simulator = ChainSimulator::from_config(3, 0.15, &LengthProfile::default())?;
    /// let source = RandomSource::new(0);
    /// let span_mask = simulator.sample(
    ///     BatchShape::new(4, 32),
    ///     &source,
    ///     RandomStream::SpanRegime(0),
    /// );
    /// assert_eq!(span_mask.values().len(), 4 * 32);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_config(
        max_span_length: usize,
        mask_fraction: f64,
        length_profile: &LengthProfile,
    ) -> Result<ChainSimulator, SpanMaskingError> {
        let distribution =
            SpanLengthDistribution::calibrate(max_span_length, mask_fraction, length_profile)?;
        ChainSimulator::new(distribution)
    }

    pub fn distribution(&self) -> &SpanLengthDistribution {
        &self.distribution
    }

    pub fn transition_matrix(&self) -> &TransitionMatrix {
        &self.transition_matrix
    }

    /// Walks the chain over `seq_len` steps and reports the state of every position. A span
    /// is drawn only at free or chain-terminal steps, then counted down one state per step.
    fn walk<R, F>(&self, seq_len: usize, rng: &mut R, mut visit: F)
    where
        R: Rng + ?Sized,
        F: FnMut(usize, usize),
    {
        let mut state = FREE_STATE;
        let mut remaining = 0usize;
        for position in 0..seq_len {
            if remaining > 0 {
                state += 1;
                remaining -= 1;
            } else {
                let span_length = self.transition_matrix.sample_span_length(rng);
                state = chain_entry(span_length);
                remaining = span_length.saturating_sub(1);
            }
            visit(position, state);
        }
    }

    /// Walks the chain over one row, writing the visited state at every position.
    pub fn simulate_row<R: Rng + ?Sized>(&self, states: &mut [usize], rng: &mut R) {
        self.walk(states.len(), rng, |position, state| states[position] = state);
    }

    /// Raw chain states, `[batch, length]` row-major.
    pub fn simulate_states(
        &self,
        shape: BatchShape,
        source: &RandomSource,
        stream: RandomStream,
    ) -> Vec<usize> {
        let mut states = vec![FREE_STATE; shape.numel()];
        if shape.seq_len == 0 {
            return states;
        }
        states
            .par_chunks_mut(shape.seq_len)
            .enumerate()
            .for_each(|(batch_index, row)| {
                let mut rng = source.stream(stream, batch_index);
                self.simulate_row(row, &mut rng);
            });
        states
    }
}

impl SpanMaskSampler for ChainSimulator {
    fn sample(&self, shape: BatchShape, source: &RandomSource, stream: RandomStream) -> SpanMask {
        let mut span_mask = SpanMask::zeros(shape);
        if shape.seq_len == 0 {
            return span_mask;
        }
        span_mask
            .values_mut()
            .par_chunks_mut(shape.seq_len)
            .enumerate()
            .for_each(|(batch_index, row)| {
                let mut rng = source.stream(stream, batch_index);
                self.walk(row.len(), &mut rng, |position, state| {
                    row[position] = state != FREE_STATE
                });
            });
        span_mask
    }

    fn mask_fraction(&self) -> f64 {
        self.distribution.target_mask_fraction()
    }
}

#[derive(Clone, Debug)]
/// # Uniform regime
/// Independent Bernoulli draw per position.
pub struct BernoulliSimulator {
    probability: f64,
}

impl BernoulliSimulator {
    pub fn new(probability: f64) -> Result<BernoulliSimulator, SpanMaskingError> {
        if !(0.0..=1.0).contains(&probability) {
            return Err(SpanMaskingError::InvalidConfigurationError(format!(
                "uniform mask probability must be in [0, 1], got {}",
                probability
            )));
        }
        Ok(BernoulliSimulator { probability })
    }
}

impl SpanMaskSampler for BernoulliSimulator {
    fn sample(&self, shape: BatchShape, source: &RandomSource, stream: RandomStream) -> SpanMask {
        let mut span_mask = SpanMask::zeros(shape);
        if shape.seq_len == 0 {
            return span_mask;
        }
        span_mask
            .values_mut()
            .par_chunks_mut(shape.seq_len)
            .enumerate()
            .for_each(|(batch_index, row)| {
                let mut rng = source.stream(stream, batch_index);
                for value in row.iter_mut() {
                    *value = rng.random::<f64>() < self.probability;
                }
            });
        span_mask
    }

    fn mask_fraction(&self) -> f64 {
        self.probability
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn simulator(max_span_length: usize, mask_fraction: f64) -> ChainSimulator {
        ChainSimulator::from_config(max_span_length, mask_fraction, &LengthProfile::default())
            .unwrap()
    }

    #[test]
    fn states_follow_countdown_chains() {
        let simulator = simulator(4, 0.4);
        let shape = BatchShape::new(64, 50);
        let states =
            simulator.simulate_states(shape, &RandomSource::new(5), RandomStream::SpanRegime(0));

        for row in states.chunks(shape.seq_len) {
            let first = row[0];
            assert!(
                first == FREE_STATE || (1..=4).any(|length| chain_entry(length) == first),
                "sequence started mid-span in state {}",
                first
            );
            for window in row.windows(2) {
                if let Some(next) = simulator.transition_matrix().successor(window[0]) {
                    assert_eq!(window[1], next);
                }
            }
        }
    }

    #[test]
    fn mask_matches_states() {
        let simulator = simulator(3, 0.3);
        let shape = BatchShape::new(8, 20);
        let source = RandomSource::new(9);
        let states = simulator.simulate_states(shape, &source, RandomStream::SpanRegime(1));
        let span_mask = simulator.sample(shape, &source, RandomStream::SpanRegime(1));

        let expected = states
            .iter()
            .map(|state| *state != FREE_STATE)
            .collect::<Vec<bool>>();
        assert_eq!(span_mask.values(), expected.as_slice());
    }

    #[test]
    fn countdown_walk_matches_matrix_steps() {
        let simulator = simulator(6, 0.35);
        let source = RandomSource::new(12);
        for batch_index in 0..16 {
            let mut states = vec![FREE_STATE; 96];
            simulator.simulate_row(
                &mut states,
                &mut source.stream(RandomStream::SpanRegime(0), batch_index),
            );

            let mut rng = source.stream(RandomStream::SpanRegime(0), batch_index);
            let matrix = simulator.transition_matrix();
            let mut state = matrix.sample_start(&mut rng);
            let mut expected = vec![state];
            for _ in 1..96 {
                state = matrix.sample_next(state, &mut rng);
                expected.push(state);
            }
            assert_eq!(states, expected);
        }
    }

    #[test]
    fn terminal_states_restart_from_start_row() {
        let simulator = simulator(5, 0.5);
        let shape = BatchShape::new(500, 64);
        let states =
            simulator.simulate_states(shape, &RandomSource::new(1), RandomStream::SpanRegime(0));
        let start_states = simulator
            .transition_matrix()
            .start_row()
            .map(|(state, _)| state)
            .collect::<Vec<usize>>();

        for row in states.chunks(shape.seq_len) {
            for window in row.windows(2) {
                if simulator.transition_matrix().is_terminal(window[0]) {
                    assert!(start_states.contains(&window[1]));
                }
            }
        }
    }

    #[test]
    fn long_spans_may_cover_whole_sequence() {
        let profile = LengthProfile::Weights {
            values: vec![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        };
        let simulator = ChainSimulator::from_config(8, 0.9, &profile).unwrap();
        let shape = BatchShape::new(200, 6);
        let span_mask = simulator.sample(shape, &RandomSource::new(2), RandomStream::SpanRegime(0));

        assert!((0..shape.batch_size).any(|batch_index| span_mask.row(batch_index).iter().all(|v| *v)));
    }

    #[test]
    fn bernoulli_rate_matches_probability() {
        let sampler = BernoulliSimulator::new(0.2).unwrap();
        let span_mask = sampler.sample(
            BatchShape::new(1000, 100),
            &RandomSource::new(4),
            RandomStream::UniformRegime,
        );

        assert!((span_mask.masked_fraction() - 0.2).abs() < 0.005);
        assert!(BernoulliSimulator::new(1.5).is_err());
    }

    #[test]
    fn empty_sequences_are_supported() {
        let simulator = simulator(3, 0.2);
        let span_mask = simulator.sample(
            BatchShape::new(3, 0),
            &RandomSource::new(0),
            RandomStream::SpanRegime(0),
        );

        assert!(span_mask.values().is_empty());
    }
}
