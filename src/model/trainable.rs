//! Adapter over a full trainable network.

use crate::codec::Tensor;
use crate::core::{Error, Result};
use crate::model::adapter::{sgd_step, DistributedModel, FitConfig};

/// The numerical backend behind a [`TrainableModel`].
pub trait Network: Send + Sync {
    fn forward(&self, x: &Tensor) -> Result<Tensor>;

    /// Loss over `(x, y)` and its gradient with respect to every weight, in
    /// weight order.
    fn loss_and_gradients(&self, x: &Tensor, y: &Tensor) -> Result<(f32, Vec<Tensor>)>;

    fn weights(&self) -> Vec<Tensor>;

    fn set_weights(&mut self, weights: &[Tensor]) -> Result<()>;

    /// Metric values, loss first.
    fn metrics(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        Ok(vec![self.loss_and_gradients(x, y)?.0])
    }

    fn input_shape(&self) -> &[usize];

    fn output_shape(&self) -> &[usize];
}

/// How [`TrainableModel::fit`] reports its work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FitMode {
    /// Run minibatch SGD in place and return nothing.
    #[default]
    Step,
    /// Leave the weights untouched and return the full-batch gradients.
    Gradients,
}

/// Wraps a [`Network`] and performs the optimizer step itself.
pub struct TrainableModel<N: Network> {
    net: N,
    learning_rate: f32,
    mode: FitMode,
}

impl<N: Network> TrainableModel<N> {
    pub fn new(net: N) -> Self {
        Self {
            net,
            learning_rate: 0.001,
            mode: FitMode::Step,
        }
    }

    /// Learning rate used by [`DistributedModel::update`].
    pub fn with_learning_rate(mut self, learning_rate: f32) -> Self {
        self.learning_rate = learning_rate;
        self
    }

    /// Return gradients from `fit` instead of stepping.
    pub fn with_gradient_fit(mut self) -> Self {
        self.mode = FitMode::Gradients;
        self
    }

    pub fn mode(&self) -> FitMode {
        self.mode
    }

    pub fn network(&self) -> &N {
        &self.net
    }

    pub fn into_inner(self) -> N {
        self.net
    }

    fn step(&mut self, x: &Tensor, y: &Tensor, learning_rate: f32) -> Result<()> {
        let (_, grads) = self.net.loss_and_gradients(x, y)?;
        let mut weights = self.net.weights();
        sgd_step(&mut weights, &grads, learning_rate)?;
        self.net.set_weights(&weights)
    }
}

impl<N: Network> DistributedModel for TrainableModel<N> {
    fn fit(&mut self, x: &Tensor, y: &Tensor, config: &FitConfig) -> Result<Option<Vec<Tensor>>> {
        if x.rows() != y.rows() {
            return Err(Error::Training(format!(
                "{} inputs but {} labels",
                x.rows(),
                y.rows()
            )));
        }

        if self.mode == FitMode::Gradients {
            let (_, grads) = self.net.loss_and_gradients(x, y)?;
            return Ok(Some(grads));
        }

        let n = x.rows();
        let batch_size = config.batch_size.max(1);
        for _ in 0..config.epochs {
            let mut start = 0;
            while start < n {
                let end = (start + batch_size).min(n);
                let bx = x.slice_rows(start, end)?;
                let by = y.slice_rows(start, end)?;
                self.step(&bx, &by, config.learning_rate)?;
                start = end;
            }
        }
        Ok(None)
    }

    fn update(&mut self, gradients: &[Tensor]) -> Result<()> {
        let mut weights = self.net.weights();
        sgd_step(&mut weights, gradients, self.learning_rate)?;
        self.net.set_weights(&weights)
    }

    fn predict(&self, x: &Tensor) -> Result<Tensor> {
        self.net.forward(x)
    }

    fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        self.net.metrics(x, y)
    }

    fn get_vars(&self) -> Vec<Tensor> {
        self.net.weights()
    }

    fn set_vars(&mut self, vars: &[Tensor]) -> Result<()> {
        self.net.set_weights(vars)
    }

    fn input_shape(&self) -> &[usize] {
        self.net.input_shape()
    }

    fn output_shape(&self) -> &[usize] {
        self.net.output_shape()
    }
}
