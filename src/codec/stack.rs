//! Stacking per-client updates and reducing them.
//!
//! Parameter lists are matched by position, never by name.

use crate::codec::tensor::Tensor;
use crate::codec::variable::{SerializedVariable, VarData};
use crate::core::{Error, Result};
use ndarray::Axis;
use serde::{Deserialize, Serialize};

/// Stack N per-client update lists into one list whose i-th entry has shape
/// `[N, ...shape_i]`, the bytes of client k occupying slot k.
pub fn stack(updates: &[Vec<SerializedVariable>]) -> Result<Vec<SerializedVariable>> {
    let first = updates
        .first()
        .ok_or_else(|| Error::ShapeMismatch("no updates to stack".to_string()))?;

    for (k, update) in updates.iter().enumerate() {
        if update.len() != first.len() {
            return Err(Error::ShapeMismatch(format!(
                "update {k} has {} variables, update 0 has {}",
                update.len(),
                first.len()
            )));
        }
    }

    let mut stacked = Vec::with_capacity(first.len());
    for (i, reference) in first.iter().enumerate() {
        reference.validate()?;
        let mut data = Vec::with_capacity(reference.data.len() * updates.len());
        for (k, update) in updates.iter().enumerate() {
            let var = &update[i];
            if var.dtype != reference.dtype || var.shape != reference.shape {
                return Err(Error::ShapeMismatch(format!(
                    "variable {i} of update {k} is {} {:?}, expected {} {:?}",
                    var.dtype, var.shape, reference.dtype, reference.shape
                )));
            }
            var.validate()?;
            data.extend_from_slice(var.data.as_bytes());
        }

        let mut shape = Vec::with_capacity(reference.shape.len() + 1);
        shape.push(updates.len());
        shape.extend_from_slice(&reference.shape);
        stacked.push(SerializedVariable {
            dtype: reference.dtype,
            shape,
            data: VarData(data),
        });
    }

    Ok(stacked)
}

/// Reduction used to merge stacked updates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    Mean,
}

impl Aggregation {
    /// Parse a configured aggregation name.
    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "mean" => Ok(Aggregation::Mean),
            other => Err(Error::UnsupportedAggregation(other.to_string())),
        }
    }

    /// Reduce a stacked tensor over its leading (client) axis.
    pub fn reduce(self, stacked: &Tensor) -> Result<Tensor> {
        match self {
            Aggregation::Mean => mean_over_clients(stacked),
        }
    }
}

fn mean_over_clients(stacked: &Tensor) -> Result<Tensor> {
    if stacked.shape().is_empty() || stacked.rows() == 0 {
        return Err(Error::ShapeMismatch(
            "cannot average an empty stack".to_string(),
        ));
    }
    let n = stacked.rows();
    match stacked {
        Tensor::Float32(a) => Ok(Tensor::Float32(a.sum_axis(Axis(0)) / n as f32)),
        // integer mean truncates toward zero
        Tensor::Int32(a) => {
            let sums = a.mapv(i64::from).sum_axis(Axis(0));
            Ok(Tensor::Int32(sums.mapv(|s| (s / n as i64) as i32)))
        }
        Tensor::Bool(_) => Err(Error::UnsupportedAggregation(
            "mean of bool variables".to_string(),
        )),
    }
}

/// Stack `updates` and reduce each position with `aggregation`.
pub fn aggregate(
    updates: &[Vec<SerializedVariable>],
    aggregation: Aggregation,
) -> Result<Vec<Tensor>> {
    stack(updates)?
        .iter()
        .map(|var| aggregation.reduce(&crate::codec::deserialize(var)?))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{deserialize, serialize};
    use crate::codec::tensor::DType;

    fn f32s(shape: &[usize], data: Vec<f32>) -> SerializedVariable {
        serialize(&Tensor::from_f32(shape, data).unwrap())
    }

    fn i32s(shape: &[usize], data: Vec<i32>) -> SerializedVariable {
        serialize(&Tensor::from_i32(shape, data).unwrap())
    }

    #[test]
    fn test_stack_shapes_and_bytes() {
        let updates = vec![
            vec![f32s(&[2, 2], vec![1.0, 2.0, 3.0, 4.0]), i32s(&[2], vec![1, 2])],
            vec![f32s(&[2, 2], vec![0.0, 3.0, 0.0, 3.0]), i32s(&[2], vec![5, 4])],
            vec![f32s(&[2, 2], vec![-1.0, -2.0, -3.0, -4.0]), i32s(&[2], vec![0, 0])],
        ];

        let stacked = stack(&updates).unwrap();
        assert_eq!(stacked.len(), 2);
        assert_eq!(stacked[0].shape, vec![3, 2, 2]);
        assert_eq!(stacked[0].dtype, DType::Float32);
        assert_eq!(stacked[1].shape, vec![3, 2]);
        assert_eq!(stacked[1].dtype, DType::Int32);

        // slot k holds client k's bytes
        let width = updates[0][0].data.len();
        for (k, update) in updates.iter().enumerate() {
            assert_eq!(
                &stacked[0].data.as_bytes()[k * width..(k + 1) * width],
                update[0].data.as_bytes()
            );
        }

        let t = deserialize(&stacked[1]).unwrap();
        assert_eq!(t.to_f32_vec(), vec![1.0, 2.0, 5.0, 4.0, 0.0, 0.0]);
    }

    #[test]
    fn test_stack_unequal_lengths() {
        let updates = vec![
            vec![f32s(&[1], vec![1.0]), f32s(&[1], vec![2.0])],
            vec![f32s(&[1], vec![1.0])],
        ];
        assert!(matches!(stack(&updates), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_stack_unequal_shapes() {
        let updates = vec![vec![f32s(&[2], vec![1.0, 2.0])], vec![f32s(&[1], vec![1.0])]];
        assert!(matches!(stack(&updates), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_stack_empty() {
        assert!(matches!(stack(&[]), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_mean_aggregation() {
        let updates = vec![
            vec![f32s(&[2, 2], vec![2.0, 2.0, 2.0, 2.0]), f32s(&[1, 4], vec![1.0, 2.0, 3.0, 4.0])],
            vec![f32s(&[2, 2], vec![1.0, 1.0, 1.0, 1.0]), f32s(&[1, 4], vec![5.0, 4.0, 3.0, 1.0])],
        ];
        let merged = aggregate(&updates, Aggregation::Mean).unwrap();
        assert_eq!(merged[0].shape(), &[2, 2]);
        assert_eq!(merged[0].to_f32_vec(), vec![1.5, 1.5, 1.5, 1.5]);
        assert_eq!(merged[1].to_f32_vec(), vec![3.0, 3.0, 3.0, 2.5]);
    }

    #[test]
    fn test_int_mean_truncates() {
        let updates = vec![vec![i32s(&[1], vec![1])], vec![i32s(&[1], vec![2])]];
        let merged = aggregate(&updates, Aggregation::Mean).unwrap();
        assert_eq!(merged[0], Tensor::from_i32(&[1], vec![1]).unwrap());
    }

    #[test]
    fn test_parse_aggregation() {
        assert_eq!(Aggregation::parse("mean").unwrap(), Aggregation::Mean);
        assert!(matches!(
            Aggregation::parse("median"),
            Err(Error::UnsupportedAggregation(name)) if name == "median"
        ));
    }
}
