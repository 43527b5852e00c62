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

use rust_tokenizers::error::TokenizerError;
use tch::TchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpanMaskingError {
    #[error("Invalid configuration error: {0}")]
    InvalidConfigurationError(String),

    #[error("Shape mismatch error: {0}")]
    ShapeMismatchError(String),

    #[error("Value error: {0}")]
    ValueError(String),

    #[error("IO error: {0}")]
    IOError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Tch tensor error: {0}")]
    TchError(String),

    #[error("Tokenizer error: {0}")]
    TokenizerError(String),
}

impl From<std::io::Error> for SpanMaskingError {
    fn from(error: std::io::Error) -> Self {
        SpanMaskingError::IOError(error.to_string())
    }
}

impl From<serde_json::Error> for SpanMaskingError {
    fn from(error: serde_json::Error) -> Self {
        SpanMaskingError::SerializationError(error.to_string())
    }
}

impl From<TokenizerError> for SpanMaskingError {
    fn from(error: TokenizerError) -> Self {
        SpanMaskingError::TokenizerError(error.to_string())
    }
}

impl From<TchError> for SpanMaskingError {
    fn from(error: TchError) -> Self {
        SpanMaskingError::TchError(error.to_string())
    }
}
