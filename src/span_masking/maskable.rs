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

use crate::common::kind::tensor_to_rows;
use crate::span_masking::span_mask::BatchShape;
use crate::SpanMaskingError;
use rust_tokenizers::vocab::{BertVocab, Vocab};
use serde::{Deserialize, Serialize};
use tch::Tensor;

/// `[UNK]` id in the BERT uncased vocabulary
pub const BERT_UNKNOWN_TOKEN_ID: i64 = 100;
/// `[CLS]` id in the BERT uncased vocabulary
pub const BERT_CLS_TOKEN_ID: i64 = 101;
/// `[SEP]` id in the BERT uncased vocabulary
pub const BERT_SEP_TOKEN_ID: i64 = 102;
/// `[MASK]` id in the BERT uncased vocabulary
pub const BERT_MASK_TOKEN_ID: i64 = 103;
/// Size of the BERT uncased vocabulary
pub const BERT_VOCAB_SIZE: i64 = 30522;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "SerializedProtectedTokens", into = "SerializedProtectedTokens")]
/// # Token ids that must never be corrupted
/// Ids are kept sorted and unique, also when read from a serialized list.
pub struct ProtectedTokens {
    ids: Vec<i64>,
}

impl Default for ProtectedTokens {
    fn default() -> Self {
        ProtectedTokens::new(vec![
            BERT_UNKNOWN_TOKEN_ID,
            BERT_CLS_TOKEN_ID,
            BERT_SEP_TOKEN_ID,
        ])
    }
}

#[derive(Serialize, Deserialize)]
struct SerializedProtectedTokens {
    ids: Vec<i64>,
}

impl From<SerializedProtectedTokens> for ProtectedTokens {
    fn from(serialized: SerializedProtectedTokens) -> Self {
        ProtectedTokens::new(serialized.ids)
    }
}

impl From<ProtectedTokens> for SerializedProtectedTokens {
    fn from(protected_tokens: ProtectedTokens) -> Self {
        SerializedProtectedTokens {
            ids: protected_tokens.ids,
        }
    }
}

impl ProtectedTokens {
    pub fn new<I: IntoIterator<Item = i64>>(ids: I) -> ProtectedTokens {
        let mut ids = ids.into_iter().collect::<Vec<i64>>();
        ids.sort_unstable();
        ids.dedup();
        ProtectedTokens { ids }
    }

    /// Collects the unknown, classification, separator and padding ids of a BERT vocabulary.
    ///
    /// ```no_run
    /// use rust_span_masking::span_masking::ProtectedTokens;
    /// use rust_tokenizers::vocab::{BertVocab, Vocab};
    /// # fn main() -> anyhow::Result<()> {
    /// let vocab = BertVocab::from_file("path/to/vocab.txt")?;
    /// let protected_tokens = ProtectedTokens::from_bert_vocab(&vocab);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_bert_vocab(vocab: &BertVocab) -> ProtectedTokens {
        ProtectedTokens::new(vec![
            vocab.token_to_id(vocab.get_unknown_value()),
            vocab.token_to_id(vocab.get_cls_value()),
            vocab.token_to_id(vocab.get_sep_value()),
            vocab.token_to_id(vocab.get_pad_value()),
        ])
    }

    pub fn ids(&self) -> &[i64] {
        &self.ids
    }

    pub fn contains(&self, id: i64) -> bool {
        self.ids.binary_search(&id).is_ok()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// # Batch of token ids with its padding information
/// All buffers are `[batch, length]`, row-major.
pub struct TokenBatch {
    shape: BatchShape,
    input_ids: Vec<i64>,
    input_mask: Vec<bool>,
    special_tokens_mask: Option<Vec<bool>>,
}

impl TokenBatch {
    /// Validates that every buffer matches `shape`.
    ///
    /// # Arguments
    ///
    /// * `shape` - Batch size and sequence length
    /// * `input_ids` - Original token ids
    /// * `input_mask` - `true` for real tokens, `false` for padding
    /// * `special_tokens_mask` - Optional `true` for additional positions that must not be corrupted
    pub fn new(
        shape: BatchShape,
        input_ids: Vec<i64>,
        input_mask: Vec<bool>,
        special_tokens_mask: Option<Vec<bool>>,
    ) -> Result<TokenBatch, SpanMaskingError> {
        shape.check_len(input_ids.len(), "input_ids")?;
        shape.check_len(input_mask.len(), "input_mask")?;
        if let Some(special_tokens_mask) = &special_tokens_mask {
            shape.check_len(special_tokens_mask.len(), "special_tokens_mask")?;
        }
        Ok(TokenBatch {
            shape,
            input_ids,
            input_mask,
            special_tokens_mask,
        })
    }

    /// Builds a batch from `[batch, length]` integral tensors. Non-zero mask values are true.
    pub fn from_tensors(
        input_ids: &Tensor,
        input_mask: &Tensor,
        special_tokens_mask: Option<&Tensor>,
    ) -> Result<TokenBatch, SpanMaskingError> {
        let (shape, ids) = tensor_to_rows(input_ids, "input_ids")?;
        let (mask_shape, mask) = tensor_to_rows(input_mask, "input_mask")?;
        check_same_shape(shape, mask_shape, "input_mask")?;
        let special_tokens_mask = match special_tokens_mask {
            Some(tensor) => {
                let (special_shape, values) = tensor_to_rows(tensor, "special_tokens_mask")?;
                check_same_shape(shape, special_shape, "special_tokens_mask")?;
                Some(values.into_iter().map(|value| value != 0).collect())
            }
            None => None,
        };
        TokenBatch::new(
            shape,
            ids,
            mask.into_iter().map(|value| value != 0).collect(),
            special_tokens_mask,
        )
    }

    pub fn shape(&self) -> BatchShape {
        self.shape
    }

    pub fn input_ids(&self) -> &[i64] {
        &self.input_ids
    }

    pub fn input_mask(&self) -> &[bool] {
        &self.input_mask
    }

    pub fn special_tokens_mask(&self) -> Option<&[bool]> {
        self.special_tokens_mask.as_deref()
    }

    /// Number of non-padding positions
    pub fn num_real_tokens(&self) -> usize {
        self.input_mask.iter().filter(|value| **value).count()
    }

    /// Positions eligible for corruption: real tokens that are neither protected ids nor
    /// flagged in the special tokens mask.
    pub fn maskable_positions(&self, protected_tokens: &ProtectedTokens) -> Vec<bool> {
        (0..self.shape.numel())
            .map(|index| {
                self.input_mask[index]
                    && !protected_tokens.contains(self.input_ids[index])
                    && !self
                        .special_tokens_mask
                        .as_ref()
                        .map_or(false, |special| special[index])
            })
            .collect()
    }
}

fn check_same_shape(
    expected: BatchShape,
    actual: BatchShape,
    name: &str,
) -> Result<(), SpanMaskingError> {
    if expected != actual {
        return Err(SpanMaskingError::ShapeMismatchError(format!(
            "{} has shape [{}, {}], input_ids has shape [{}, {}]",
            name, actual.batch_size, actual.seq_len, expected.batch_size, expected.seq_len
        )));
    }
    Ok(())
}
