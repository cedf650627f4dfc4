//! Value-semantics tensors.
//!
//! A thin dtype-tagged wrapper over `ndarray::ArrayD`. Every operation
//! borrows its inputs and returns a new owned tensor.

use crate::core::{Error, Result};
use ndarray::{concatenate, ArrayD, Axis, IxDyn, Slice};
use serde::{Deserialize, Serialize};

/// Element types that can cross the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DType {
    #[serde(rename = "float32")]
    Float32,
    #[serde(rename = "int32")]
    Int32,
    #[serde(rename = "bool")]
    Bool,
}

impl DType {
    /// Size of one element in its byte representation.
    pub fn size(self) -> usize {
        match self {
            DType::Float32 | DType::Int32 => 4,
            DType::Bool => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DType::Float32 => "float32",
            DType::Int32 => "int32",
            DType::Bool => "bool",
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An n-dimensional array of one of the supported dtypes.
#[derive(Clone, Debug, PartialEq)]
pub enum Tensor {
    Float32(ArrayD<f32>),
    Int32(ArrayD<i32>),
    Bool(ArrayD<bool>),
}

macro_rules! map_array {
    ($tensor:expr, $a:ident => $body:expr) => {
        match $tensor {
            Tensor::Float32($a) => Tensor::Float32($body),
            Tensor::Int32($a) => Tensor::Int32($body),
            Tensor::Bool($a) => Tensor::Bool($body),
        }
    };
}

impl Tensor {
    pub fn from_f32(shape: &[usize], data: Vec<f32>) -> Result<Self> {
        Ok(Tensor::Float32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    pub fn from_i32(shape: &[usize], data: Vec<i32>) -> Result<Self> {
        Ok(Tensor::Int32(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    pub fn from_bool(shape: &[usize], data: Vec<bool>) -> Result<Self> {
        Ok(Tensor::Bool(ArrayD::from_shape_vec(IxDyn(shape), data)?))
    }

    pub fn zeros(dtype: DType, shape: &[usize]) -> Self {
        match dtype {
            DType::Float32 => Tensor::Float32(ArrayD::zeros(IxDyn(shape))),
            DType::Int32 => Tensor::Int32(ArrayD::zeros(IxDyn(shape))),
            DType::Bool => Tensor::Bool(ArrayD::from_elem(IxDyn(shape), false)),
        }
    }

    /// A tensor with zero rows and the given per-row shape.
    pub fn empty_rows(dtype: DType, unit_shape: &[usize]) -> Self {
        let mut shape = Vec::with_capacity(unit_shape.len() + 1);
        shape.push(0);
        shape.extend_from_slice(unit_shape);
        Self::zeros(dtype, &shape)
    }

    pub fn dtype(&self) -> DType {
        match self {
            Tensor::Float32(_) => DType::Float32,
            Tensor::Int32(_) => DType::Int32,
            Tensor::Bool(_) => DType::Bool,
        }
    }

    pub fn shape(&self) -> &[usize] {
        match self {
            Tensor::Float32(a) => a.shape(),
            Tensor::Int32(a) => a.shape(),
            Tensor::Bool(a) => a.shape(),
        }
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.shape().iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of the leading dimension (the example/batch axis).
    pub fn rows(&self) -> usize {
        self.shape().first().copied().unwrap_or(1)
    }

    pub fn as_f32(&self) -> Option<&ArrayD<f32>> {
        match self {
            Tensor::Float32(a) => Some(a),
            _ => None,
        }
    }

    /// Elements in logical (row-major) order, converted to `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match self {
            Tensor::Float32(a) => a.iter().copied().collect(),
            Tensor::Int32(a) => a.iter().map(|&v| v as f32).collect(),
            Tensor::Bool(a) => a.iter().map(|&v| if v { 1.0 } else { 0.0 }).collect(),
        }
    }

    /// Rows `[start, end)` along the leading axis.
    pub fn slice_rows(&self, start: usize, end: usize) -> Result<Self> {
        self.require_rows(end)?;
        if start > end {
            return Err(Error::ShapeMismatch(format!(
                "row range {start}..{end} is reversed"
            )));
        }
        Ok(map_array!(self, a => a.slice_axis(Axis(0), Slice::from(start..end)).to_owned()))
    }

    /// The given rows, in the given order (indices may repeat).
    pub fn select_rows(&self, indices: &[usize]) -> Result<Self> {
        let max = indices.iter().copied().max().map(|m| m + 1).unwrap_or(0);
        self.require_rows(max)?;
        Ok(map_array!(self, a => a.select(Axis(0), indices)))
    }

    /// Append `other`'s rows after this tensor's rows.
    pub fn concat_rows(&self, other: &Tensor) -> Result<Self> {
        let joined = match (self, other) {
            (Tensor::Float32(a), Tensor::Float32(b)) => {
                Tensor::Float32(concatenate(Axis(0), &[a.view(), b.view()])?)
            }
            (Tensor::Int32(a), Tensor::Int32(b)) => {
                Tensor::Int32(concatenate(Axis(0), &[a.view(), b.view()])?)
            }
            (Tensor::Bool(a), Tensor::Bool(b)) => {
                Tensor::Bool(concatenate(Axis(0), &[a.view(), b.view()])?)
            }
            (a, b) => {
                return Err(Error::ShapeMismatch(format!(
                    "cannot concatenate {} with {}",
                    a.dtype(),
                    b.dtype()
                )))
            }
        };
        Ok(joined)
    }

    /// Add a leading axis of size one.
    pub fn expand_dims(&self) -> Self {
        map_array!(self, a => a.clone().insert_axis(Axis(0)))
    }

    fn require_rows(&self, needed: usize) -> Result<()> {
        if self.shape().is_empty() {
            return Err(Error::ShapeMismatch("scalar tensor has no rows".to_string()));
        }
        if needed > self.rows() {
            return Err(Error::ShapeMismatch(format!(
                "row {} out of bounds for {} rows",
                needed - 1,
                self.rows()
            )));
        }
        Ok(())
    }
}
