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
use tch::{Device, Tensor};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
/// # Shape of a `[batch, length]` token batch
pub struct BatchShape {
    pub batch_size: usize,
    pub seq_len: usize,
}

impl BatchShape {
    pub fn new(batch_size: usize, seq_len: usize) -> BatchShape {
        BatchShape {
            batch_size,
            seq_len,
        }
    }

    pub fn numel(&self) -> usize {
        self.batch_size * self.seq_len
    }

    pub(crate) fn check_len(&self, len: usize, name: &str) -> Result<(), SpanMaskingError> {
        if len != self.numel() {
            return Err(SpanMaskingError::ShapeMismatchError(format!(
                "{} has {} elements, expected [{}, {}] = {}",
                name,
                len,
                self.batch_size,
                self.seq_len,
                self.numel()
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// # Binary `[batch, length]` mask, stored row-major
/// A `true` value marks a position inside a masked span.
pub struct SpanMask {
    shape: BatchShape,
    values: Vec<bool>,
}

impl SpanMask {
    pub fn zeros(shape: BatchShape) -> SpanMask {
        SpanMask {
            shape,
            values: vec![false; shape.numel()],
        }
    }

    pub fn from_values(shape: BatchShape, values: Vec<bool>) -> Result<SpanMask, SpanMaskingError> {
        shape.check_len(values.len(), "span mask")?;
        Ok(SpanMask { shape, values })
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    pub fn values(&self) -> &[bool] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [bool] {
        &mut self.values
    }

    pub fn into_values(self) -> Vec<bool> {
        self.values
    }

    pub fn row(&self, batch_index: usize) -> &[bool] {
        let start = batch_index * self.shape.seq_len;
        &self.values[start..start + self.shape.seq_len]
    }

    pub fn get(&self, batch_index: usize, position: usize) -> bool {
        self.values[batch_index * self.shape.seq_len + position]
    }

    pub fn count(&self) -> usize {
        self.values.iter().filter(|value| **value).count()
    }

    /// Fraction of positions set over the whole batch (0 for an empty batch)
    pub fn masked_fraction(&self) -> f64 {
        if self.values.is_empty() {
            0.0
        } else {
            self.count() as f64 / self.values.len() as f64
        }
    }

    /// Lengths of every maximal run of `true` values in a row.
    pub fn run_lengths(&self, batch_index: usize) -> Vec<usize> {
        let mut runs = Vec::new();
        let mut current = 0;
        for value in self.row(batch_index) {
            if *value {
                current += 1;
            } else if current > 0 {
                runs.push(current);
                current = 0;
            }
        }
        if current > 0 {
            runs.push(current);
        }
        runs
    }

    /// Element-wise AND with a predicate of identical shape.
    pub fn and(&self, other: &[bool]) -> Result<SpanMask, SpanMaskingError> {
        self.shape.check_len(other.len(), "mask operand")?;
        let values = self
            .values
            .iter()
            .zip(other.iter())
            .map(|(left, right)| *left && *right)
            .collect();
        Ok(SpanMask {
            shape: self.shape,
            values,
        })
    }

    /// Converts the mask to a `[batch, length]` `Int64` tensor of zeros and ones.
    pub fn to_tensor(&self, device: Device) -> Tensor {
        let values = self
            .values
            .iter()
            .map(|value| *value as i64)
            .collect::<Vec<i64>>();
        Tensor::from_slice(&values)
            .view([self.shape.batch_size as i64, self.shape.seq_len as i64])
            .to(device)
    }
}
