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

use crate::span_masking::BatchShape;
use crate::SpanMaskingError;
use std::convert::TryFrom;
use tch::{Device, Kind, Tensor};

pub(crate) fn check_index_kind(kind: Kind, name: &str) -> Result<(), SpanMaskingError> {
    match kind {
        Kind::Uint8 | Kind::Int8 | Kind::Int16 | Kind::Int | Kind::Int64 | Kind::Bool => Ok(()),
        _ => Err(SpanMaskingError::ValueError(format!(
            "{} must be an integral or boolean tensor, got {:?}",
            name, kind
        ))),
    }
}

/// Copies a `[batch, length]` integral tensor into a row-major `i64` buffer.
pub(crate) fn tensor_to_rows(
    tensor: &Tensor,
    name: &str,
) -> Result<(BatchShape, Vec<i64>), SpanMaskingError> {
    let size = tensor.size();
    if size.len() != 2 {
        return Err(SpanMaskingError::ShapeMismatchError(format!(
            "{} must have shape [batch, length], got {:?}",
            name, size
        )));
    }
    check_index_kind(tensor.kind(), name)?;
    let shape = BatchShape::new(size[0] as usize, size[1] as usize);
    let flat = tensor
        .f_to_kind(Kind::Int64)?
        .to(Device::Cpu)
        .f_reshape([-1])?;
    let values = Vec::<i64>::try_from(&flat)?;
    Ok((shape, values))
}

/// Builds a `[batch, length]` `Int64` tensor from a row-major buffer.
pub(crate) fn rows_to_tensor(values: &[i64], shape: BatchShape, device: Device) -> Tensor {
    Tensor::from_slice(values)
        .view([shape.batch_size as i64, shape.seq_len as i64])
        .to(device)
}
