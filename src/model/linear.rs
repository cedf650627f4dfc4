//! Dense linear regression network.
//!
//! A single `y = xW + b` layer trained on mean squared error. Small enough
//! to run anywhere and exercise the trainable adapter end to end.

use crate::codec::Tensor;
use crate::core::{Error, Result};
use crate::model::trainable::Network;
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand_distr::{Distribution, Normal};

/// Weights are `[W: inputs x outputs, b: outputs]`.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearRegression {
    weights: Array2<f32>,
    bias: Array1<f32>,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl LinearRegression {
    pub fn zeros(inputs: usize, outputs: usize) -> Self {
        Self {
            weights: Array2::zeros((inputs, outputs)),
            bias: Array1::zeros(outputs),
            input_shape: vec![inputs],
            output_shape: vec![outputs],
        }
    }

    /// He-style random initialization.
    pub fn random(inputs: usize, outputs: usize) -> Result<Self> {
        let scale = (2.0 / inputs.max(1) as f32).sqrt();
        let normal = Normal::new(0.0, scale)
            .map_err(|e| Error::InvalidConfig(format!("weight init: {e}")))?;
        let mut rng = rand::thread_rng();
        let mut model = Self::zeros(inputs, outputs);
        model.weights.mapv_inplace(|_| normal.sample(&mut rng));
        Ok(model)
    }

    pub fn inputs(&self) -> usize {
        self.weights.nrows()
    }

    pub fn outputs(&self) -> usize {
        self.weights.ncols()
    }

    fn predict_matrix(&self, x: &Array2<f32>) -> Array2<f32> {
        x.dot(&self.weights) + &self.bias
    }
}

/// View `t` as an `[rows, cols]` float matrix.
fn as_matrix(t: &Tensor, cols: usize) -> Result<Array2<f32>> {
    if t.as_f32().is_none() {
        return Err(Error::Training(format!("expected float32 data, got {}", t.dtype())));
    }
    let rows = t.rows();
    if t.len() != rows * cols {
        return Err(Error::ShapeMismatch(format!(
            "cannot view {:?} as {rows} rows of {cols}",
            t.shape()
        )));
    }
    Ok(Array2::from_shape_vec((rows, cols), t.to_f32_vec())?)
}

impl Network for LinearRegression {
    fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let x = as_matrix(x, self.inputs())?;
        Ok(Tensor::Float32(self.predict_matrix(&x).into_dyn()))
    }

    fn loss_and_gradients(&self, x: &Tensor, y: &Tensor) -> Result<(f32, Vec<Tensor>)> {
        let x = as_matrix(x, self.inputs())?;
        let y = as_matrix(y, self.outputs())?;
        if x.nrows() == 0 || x.nrows() != y.nrows() {
            return Err(Error::Training(format!(
                "{} inputs and {} labels",
                x.nrows(),
                y.nrows()
            )));
        }

        let diff = self.predict_matrix(&x) - &y;
        let m = diff.len() as f32;
        let loss = diff.mapv(|d| d * d).sum() / m;

        let grad_w = x.t().dot(&diff) * (2.0 / m);
        let grad_b = diff.sum_axis(Axis(0)) * (2.0 / m);

        Ok((
            loss,
            vec![Tensor::Float32(grad_w.into_dyn()), Tensor::Float32(grad_b.into_dyn())],
        ))
    }

    fn weights(&self) -> Vec<Tensor> {
        vec![
            Tensor::Float32(self.weights.clone().into_dyn()),
            Tensor::Float32(self.bias.clone().into_dyn()),
        ]
    }

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()> {
        let [w, b] = weights else {
            return Err(Error::ShapeMismatch(format!(
                "linear regression has 2 variables, got {}",
                weights.len()
            )));
        };
        let (Some(w), Some(b)) = (w.as_f32(), b.as_f32()) else {
            return Err(Error::ShapeMismatch("weights must be float32".to_string()));
        };
        let w = w.clone().into_dimensionality::<Ix2>()?;
        let b = b.clone().into_dimensionality::<Ix1>()?;
        if w.dim() != self.weights.dim() || b.dim() != self.bias.dim() {
            return Err(Error::ShapeMismatch(format!(
                "expected {:?} and {:?}, got {:?} and {:?}",
                self.weights.dim(),
                self.bias.dim(),
                w.dim(),
                b.dim()
            )));
        }
        self.weights = w;
        self.bias = b;
        Ok(())
    }

    /// `[mse, mae]`.
    fn metrics(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        let x = as_matrix(x, self.inputs())?;
        let y = as_matrix(y, self.outputs())?;
        if x.nrows() == 0 {
            return Ok(vec![0.0, 0.0]);
        }
        let diff = self.predict_matrix(&x) - &y;
        let m = diff.len() as f32;
        Ok(vec![
            diff.mapv(|d| d * d).sum() / m,
            diff.mapv(f32::abs).sum() / m,
        ])
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }
}
