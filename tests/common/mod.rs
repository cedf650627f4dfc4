#![allow(dead_code)]

use fedsync::codec::Tensor;
use fedsync::model::{DistributedModel, DynamicModel, FitConfig};
use fedsync::Result;
use std::collections::VecDeque;

/// A model whose `fit` adopts the next weights from a script, so tests
/// control exactly what a client uploads.
pub struct ScriptedModel {
    vars: Vec<Tensor>,
    script: VecDeque<Vec<Tensor>>,
}

impl ScriptedModel {
    pub fn new(vars: Vec<Tensor>, script: Vec<Vec<Tensor>>) -> Self {
        Self {
            vars,
            script: script.into(),
        }
    }
}

impl DistributedModel for ScriptedModel {
    fn fit(&mut self, _x: &Tensor, _y: &Tensor, _config: &FitConfig) -> Result<Option<Vec<Tensor>>> {
        if let Some(next) = self.script.pop_front() {
            self.vars = next;
        }
        Ok(None)
    }

    fn update(&mut self, _gradients: &[Tensor]) -> Result<()> {
        Ok(())
    }

    fn predict(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.clone())
    }

    fn evaluate(&self, _x: &Tensor, _y: &Tensor) -> Result<Vec<f32>> {
        Ok(vec![0.0])
    }

    fn get_vars(&self) -> Vec<Tensor> {
        self.vars.clone()
    }

    fn set_vars(&mut self, vars: &[Tensor]) -> Result<()> {
        self.vars = vars.to_vec();
        Ok(())
    }

    fn input_shape(&self) -> &[usize] {
        &[1]
    }

    fn output_shape(&self) -> &[usize] {
        &[1]
    }
}

pub fn f32s(shape: &[usize], data: &[f32]) -> Tensor {
    Tensor::from_f32(shape, data.to_vec()).unwrap()
}

/// The two-variable model used by the federated scenarios.
pub fn zero_vars() -> Vec<Tensor> {
    vec![f32s(&[2, 2], &[0.0; 4]), f32s(&[1, 4], &[0.0; 4])]
}

pub fn one_example() -> (Tensor, Tensor) {
    (f32s(&[1], &[1.0]), f32s(&[1], &[1.0]))
}

/// `y = w * x` with a scalar weight and MSE loss.
pub fn scalar_regression(learning_rate: f32) -> DynamicModel {
    DynamicModel::new(
        vec![f32s(&[1], &[0.0])],
        vec![1],
        vec![1],
        Box::new(|vars: &[Tensor], x: &Tensor| {
            let w = vars[0].to_f32_vec()[0];
            Tensor::from_f32(x.shape(), x.to_f32_vec().iter().map(|v| v * w).collect())
        }),
        Box::new(|vars: &[Tensor], x: &Tensor, y: &Tensor| {
            let w = vars[0].to_f32_vec()[0];
            let xs = x.to_f32_vec();
            let ys = y.to_f32_vec();
            let n = xs.len() as f32;
            Ok(xs.iter().zip(&ys).map(|(x, y)| (w * x - y).powi(2)).sum::<f32>() / n)
        }),
        Box::new(|vars: &[Tensor], x: &Tensor, y: &Tensor| {
            let w = vars[0].to_f32_vec()[0];
            let xs = x.to_f32_vec();
            let ys = y.to_f32_vec();
            let n = xs.len() as f32;
            let g = xs.iter().zip(&ys).map(|(x, y)| 2.0 * (w * x - y) * x).sum::<f32>() / n;
            Ok(vec![Tensor::from_f32(&[1], vec![g])?])
        }),
    )
    .with_learning_rate(learning_rate)
}
