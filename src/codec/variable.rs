//! Transport-safe tensor representation.
//!
//! A `SerializedVariable` carries dtype, shape and the raw native-endian
//! element bytes. Binary transports carry the payload as a byte string;
//! human-readable ones as base64. Decoding also accepts a plain sequence
//! of byte values, which is what some transports hand back for buffers.

use crate::codec::tensor::{DType, Tensor};
use crate::core::{Error, Result};
use base64::Engine;
use serde::de::{self, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw element bytes of a serialized variable.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VarData(pub Vec<u8>);

impl VarData {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for VarData {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Serialize for VarData {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
        } else {
            serializer.serialize_bytes(&self.0)
        }
    }
}

struct VarDataVisitor;

impl<'de> Visitor<'de> for VarDataVisitor {
    type Value = VarData;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a byte buffer, a sequence of bytes, or a base64 string")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> std::result::Result<VarData, E> {
        Ok(VarData(v.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, v: Vec<u8>) -> std::result::Result<VarData, E> {
        Ok(VarData(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<VarData, E> {
        base64::engine::general_purpose::STANDARD
            .decode(v)
            .map(VarData)
            .map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> std::result::Result<VarData, A::Error> {
        let mut bytes = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        Ok(VarData(bytes))
    }
}

impl<'de> Deserialize<'de> for VarData {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            deserializer.deserialize_any(VarDataVisitor)
        } else {
            deserializer.deserialize_byte_buf(VarDataVisitor)
        }
    }
}

/// A tensor flattened to `{dtype, shape, data}`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SerializedVariable {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub data: VarData,
}

impl SerializedVariable {
    /// Number of elements implied by the shape.
    pub fn numel(&self) -> usize {
        self.shape.iter().product()
    }

    /// Check that the payload length matches `numel * dtype.size()`.
    pub fn validate(&self) -> Result<()> {
        let expected = self.numel() * self.dtype.size();
        if self.data.len() != expected {
            return Err(Error::InvalidVariable(format!(
                "{} bytes for {} tensor of shape {:?}, expected {}",
                self.data.len(),
                self.dtype,
                self.shape,
                expected
            )));
        }
        Ok(())
    }
}

/// Copy a tensor's contents into a serialized variable.
pub fn serialize(tensor: &Tensor) -> SerializedVariable {
    let data = match tensor {
        Tensor::Float32(a) => {
            let values: Vec<f32> = a.iter().copied().collect();
            bytemuck::cast_slice::<f32, u8>(&values).to_vec()
        }
        Tensor::Int32(a) => {
            let values: Vec<i32> = a.iter().copied().collect();
            bytemuck::cast_slice::<i32, u8>(&values).to_vec()
        }
        Tensor::Bool(a) => a.iter().map(|&b| b as u8).collect(),
    };
    SerializedVariable {
        dtype: tensor.dtype(),
        shape: tensor.shape().to_vec(),
        data: VarData(data),
    }
}

/// Serialize each tensor, preserving order.
pub fn serialize_many(tensors: &[Tensor]) -> Vec<SerializedVariable> {
    tensors.iter().map(serialize).collect()
}

/// Rebuild a tensor from its serialized form.
pub fn deserialize(var: &SerializedVariable) -> Result<Tensor> {
    var.validate()?;
    let bytes = var.data.as_bytes();
    match var.dtype {
        DType::Float32 => Tensor::from_f32(&var.shape, bytemuck::pod_collect_to_vec(bytes)),
        DType::Int32 => Tensor::from_i32(&var.shape, bytemuck::pod_collect_to_vec(bytes)),
        DType::Bool => Tensor::from_bool(&var.shape, bytes.iter().map(|&b| b != 0).collect()),
    }
}

/// Deserialize each variable, preserving order.
pub fn deserialize_many(vars: &[SerializedVariable]) -> Result<Vec<Tensor>> {
    vars.iter().map(deserialize).collect()
}
