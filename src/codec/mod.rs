//! Variable Codec Module
//!
//! Moves model parameters across the wire:
//! - Value-semantics tensors over `ndarray`
//! - Byte-level serialization with dtype and shape
//! - Stacking per-client updates along a client axis
//! - Reduction of stacked updates

pub mod stack;
pub mod tensor;
pub mod variable;

pub use stack::{aggregate, stack, Aggregation};
pub use tensor::{DType, Tensor};
pub use variable::{
    deserialize, deserialize_many, serialize, serialize_many, SerializedVariable, VarData,
};
