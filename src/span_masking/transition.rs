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

use crate::common::random::Categorical;
use crate::span_masking::distribution::SpanLengthDistribution;
use crate::SpanMaskingError;
use rand::Rng;
use tch::{Device, Tensor};

/// Index of the state outside of any span
pub const FREE_STATE: usize = 0;

/// Largest chain that `TransitionMatrix::to_tensor` materializes densely
pub const MAX_DENSE_STATES: usize = 4096;

/// Index of the first state of the countdown chain for spans of length `span_length`.
/// Length `0` (no span) maps to the free state.
pub fn chain_entry(span_length: usize) -> usize {
    match span_length {
        0 => FREE_STATE,
        _ => 1 + span_length * (span_length - 1) / 2,
    }
}

/// Total number of states for a maximum span length: the free state and one chain per length.
pub fn num_states(max_span_length: usize) -> usize {
    1 + max_span_length * (max_span_length + 1) / 2
}

/// Span length and offset within its chain of a state, `None` for the free state.
pub fn chain_position(state: usize) -> Option<(usize, usize)> {
    if state == FREE_STATE {
        return None;
    }
    // Largest `k` with `chain_entry(k) <= state`, corrected for floating point rounding
    let offset_from_first = (state - 1) as f64;
    let mut span_length = ((1.0 + (1.0 + 8.0 * offset_from_first).sqrt()) / 2.0).floor() as usize;
    span_length = span_length.max(1);
    while chain_entry(span_length) > state {
        span_length -= 1;
    }
    while chain_entry(span_length + 1) <= state {
        span_length += 1;
    }
    Some((span_length, state - chain_entry(span_length)))
}

#[derive(Clone, Debug)]
/// # Markov chain over span states
/// State `0` is free. A span of length `k` is the chain `chain_entry(k) .. chain_entry(k) + k`:
/// entering it commits the next `k` steps to the span. Interior states have a single
/// successor (one-hot row), while the free state and every chain-terminal state share the
/// same start row `[no_start, p_1 at chain_entry(1), ..., p_K at chain_entry(K)]`.
///
/// Only the start row is stored; successors follow from the chain layout, so memory grows
/// with `K` rather than with the `K (K + 1) / 2` states. `row` and `to_tensor` materialize
/// dense rows when needed.
pub struct TransitionMatrix {
    max_span_length: usize,
    start_probabilities: Vec<f64>,
    start_distribution: Categorical,
}

impl TransitionMatrix {
    pub fn from_distribution(
        distribution: &SpanLengthDistribution,
    ) -> Result<TransitionMatrix, SpanMaskingError> {
        let max_span_length = distribution.max_span_length();

        let mut start_probabilities = Vec::with_capacity(max_span_length + 1);
        start_probabilities.push(distribution.no_start_probability());
        start_probabilities.extend_from_slice(distribution.per_length_start_probability());
        let start_distribution = Categorical::new(&start_probabilities)?;

        Ok(TransitionMatrix {
            max_span_length,
            start_probabilities,
            start_distribution,
        })
    }

    pub fn num_states(&self) -> usize {
        num_states(self.max_span_length)
    }

    pub fn max_span_length(&self) -> usize {
        self.max_span_length
    }

    /// Deterministic next state of an interior chain state, `None` for free/terminal states.
    pub fn successor(&self, state: usize) -> Option<usize> {
        match chain_position(state) {
            Some((span_length, offset))
                if span_length <= self.max_span_length && offset + 1 < span_length =>
            {
                Some(state + 1)
            }
            _ => None,
        }
    }

    /// Whether the state draws its successor from the start row
    pub fn is_terminal(&self, state: usize) -> bool {
        self.successor(state).is_none()
    }

    /// Start-row outcomes as `(state, probability)` pairs
    pub fn start_row(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.start_probabilities
            .iter()
            .enumerate()
            .map(|(span_length, probability)| (chain_entry(span_length), *probability))
    }

    /// Dense transition row of a state
    pub fn row(&self, state: usize) -> Vec<f64> {
        let mut row = vec![0f64; self.num_states()];
        match self.successor(state) {
            Some(next) => row[next] = 1.0,
            None => {
                for (target, probability) in self.start_row() {
                    row[target] = probability;
                }
            }
        }
        row
    }

    /// Draws the length of the span started at a free or terminal step, `0` for no span.
    pub fn sample_span_length<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        self.start_distribution.sample(rng)
    }

    /// Draws a state from the start row (free state or the entry of a span chain).
    pub fn sample_start<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        chain_entry(self.sample_span_length(rng))
    }

    /// One categorical step of the chain.
    pub fn sample_next<R: Rng + ?Sized>(&self, state: usize, rng: &mut R) -> usize {
        match self.successor(state) {
            Some(next) => next,
            None => self.sample_start(rng),
        }
    }

    /// Dense `[num_states, num_states]` double tensor, for inspection of small chains.
    pub fn to_tensor(&self) -> Result<Tensor, SpanMaskingError> {
        let size = self.num_states();
        if size > MAX_DENSE_STATES {
            return Err(SpanMaskingError::ValueError(format!(
                "{} states exceed the dense export limit of {}",
                size, MAX_DENSE_STATES
            )));
        }
        let values = (0..size)
            .flat_map(|state| self.row(state))
            .collect::<Vec<f64>>();
        Ok(Tensor::from_slice(&values)
            .view([size as i64, size as i64])
            .to(Device::Cpu))
    }
}
