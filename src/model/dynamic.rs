//! Raw-parameter model driven by external closures.

use crate::codec::Tensor;
use crate::core::Result;
use crate::model::adapter::{replace_vars, sgd_step, DistributedModel, FitConfig};

pub type PredictFn = Box<dyn Fn(&[Tensor], &Tensor) -> Result<Tensor> + Send + Sync>;
pub type LossFn = Box<dyn Fn(&[Tensor], &Tensor, &Tensor) -> Result<f32> + Send + Sync>;
pub type GradientFn = Box<dyn Fn(&[Tensor], &Tensor, &Tensor) -> Result<Vec<Tensor>> + Send + Sync>;

/// Holds only the parameter list; prediction, loss and gradients come from
/// the caller. `fit` never steps: it returns gradients, and the caller
/// applies them with `update`.
pub struct DynamicModel {
    vars: Vec<Tensor>,
    predict: PredictFn,
    loss: LossFn,
    gradients: GradientFn,
    learning_rate: f32,
    input_shape: Vec<usize>,
    output_shape: Vec<usize>,
}

impl DynamicModel {
    pub fn new(
        vars: Vec<Tensor>,
        input_shape: Vec<usize>,
        output_shape: Vec<usize>,
        predict: PredictFn,
        loss: LossFn,
        gradients: GradientFn,
    ) -> Self {
        Self {
            vars,
            predict,
            loss,
            gradients,
            learning_rate: 0.001,
            input_shape,
            output_shape,
        }
    }

    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    pub fn learning_rate(&self) -> f32 {
        self.learning_rate
    }
}

impl DistributedModel for DynamicModel {
    fn fit(&mut self, x: &Tensor, y: &Tensor, _config: &FitConfig) -> Result<Option<Vec<Tensor>>> {
        (self.gradients)(&self.vars, x, y).map(Some)
    }

    fn update(&mut self, gradients: &[Tensor]) -> Result<()> {
        sgd_step(&mut self.vars, gradients, self.learning_rate)
    }

    fn predict(&self, x: &Tensor) -> Result<Tensor> {
        (self.predict)(&self.vars, x)
    }

    fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        Ok(vec![(self.loss)(&self.vars, x, y)?])
    }

    fn get_vars(&self) -> Vec<Tensor> {
        self.vars.clone()
    }

    fn set_vars(&mut self, vars: &[Tensor]) -> Result<()> {
        replace_vars(&mut self.vars, vars)
    }

    fn input_shape(&self) -> &[usize] {
        &self.input_shape
    }

    fn output_shape(&self) -> &[usize] {
        &self.output_shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `y = w * x` with a scalar weight.
    fn scalar_model() -> DynamicModel {
        DynamicModel::new(
            vec![Tensor::from_f32(&[1], vec![0.0]).unwrap()],
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
        .with_learning_rate(0.1)
    }

    #[test]
    fn test_fit_returns_gradients_without_stepping() {
        let mut model = scalar_model();
        let x = Tensor::from_f32(&[2, 1], vec![1.0, 2.0]).unwrap();
        let y = Tensor::from_f32(&[2, 1], vec![3.0, 6.0]).unwrap();

        let grads = model.fit(&x, &y, &FitConfig::default()).unwrap().unwrap();
        assert_eq!(model.get_vars()[0].to_f32_vec(), vec![0.0]);
        // mean of 2 * (0 - 3) * 1 and 2 * (0 - 6) * 2
        assert_eq!(grads[0].to_f32_vec(), vec![-15.0]);

        model.update(&grads).unwrap();
        assert_eq!(model.get_vars()[0].to_f32_vec(), vec![1.5]);
        assert!(model.evaluate(&x, &y).unwrap()[0] < 22.5);
    }

    #[test]
    fn test_predict_uses_vars() {
        let mut model = scalar_model();
        model
            .set_vars(&[Tensor::from_f32(&[1], vec![2.0]).unwrap()])
            .unwrap();
        let out = model
            .predict(&Tensor::from_f32(&[2, 1], vec![1.0, 4.0]).unwrap())
            .unwrap();
        assert_eq!(out.to_f32_vec(), vec![2.0, 8.0]);
    }
}
