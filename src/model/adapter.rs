//! The model capability interface shared by client and server sessions.

use crate::codec::Tensor;
use crate::core::{Error, Result};

/// Settings for one call to [`DistributedModel::fit`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FitConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f32,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            batch_size: 32,
            learning_rate: 0.001,
        }
    }
}

/// A model as seen by the synchronization layer.
///
/// Variables are an ordered list; position is the only identity a variable
/// has on the wire.
pub trait DistributedModel: Send + Sync {
    /// One-time initialization before the first use.
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Train on `(x, y)`.
    ///
    /// Implementations either step their own weights and return `None`, or
    /// leave the weights alone and return the gradients for the caller to
    /// aggregate and [`update`](DistributedModel::update) with.
    fn fit(&mut self, x: &Tensor, y: &Tensor, config: &FitConfig) -> Result<Option<Vec<Tensor>>>;

    /// Apply one learning-rate-scaled gradient step.
    fn update(&mut self, gradients: &[Tensor]) -> Result<()>;

    fn predict(&self, x: &Tensor) -> Result<Tensor>;

    /// Metric values in a fixed, model-defined order; the loss comes first.
    fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>>;

    fn get_vars(&self) -> Vec<Tensor>;

    fn set_vars(&mut self, vars: &[Tensor]) -> Result<()>;

    /// Shape of a single example, without the batch axis.
    fn input_shape(&self) -> &[usize];

    /// Shape of a single label, without the batch axis.
    fn output_shape(&self) -> &[usize];
}

impl<M: DistributedModel + ?Sized> DistributedModel for Box<M> {
    fn setup(&mut self) -> Result<()> {
        (**self).setup()
    }

    fn fit(&mut self, x: &Tensor, y: &Tensor, config: &FitConfig) -> Result<Option<Vec<Tensor>>> {
        (**self).fit(x, y, config)
    }

    fn update(&mut self, gradients: &[Tensor]) -> Result<()> {
        (**self).update(gradients)
    }

    fn predict(&self, x: &Tensor) -> Result<Tensor> {
        (**self).predict(x)
    }

    fn evaluate(&self, x: &Tensor, y: &Tensor) -> Result<Vec<f32>> {
        (**self).evaluate(x, y)
    }

    fn get_vars(&self) -> Vec<Tensor> {
        (**self).get_vars()
    }

    fn set_vars(&mut self, vars: &[Tensor]) -> Result<()> {
        (**self).set_vars(vars)
    }

    fn input_shape(&self) -> &[usize] {
        (**self).input_shape()
    }

    fn output_shape(&self) -> &[usize] {
        (**self).output_shape()
    }
}

/// `vars[i] -= learning_rate * gradients[i]` for every float variable.
pub fn sgd_step(vars: &mut [Tensor], gradients: &[Tensor], learning_rate: f32) -> Result<()> {
    if vars.len() != gradients.len() {
        return Err(Error::ShapeMismatch(format!(
            "{} gradients for {} variables",
            gradients.len(),
            vars.len()
        )));
    }
    for (i, (var, grad)) in vars.iter_mut().zip(gradients).enumerate() {
        if var.shape() != grad.shape() {
            return Err(Error::ShapeMismatch(format!(
                "gradient {i} has shape {:?}, variable has {:?}",
                grad.shape(),
                var.shape()
            )));
        }
        match (var, grad) {
            (Tensor::Float32(w), Tensor::Float32(g)) => w.scaled_add(-learning_rate, g),
            (var, grad) => {
                return Err(Error::ShapeMismatch(format!(
                    "cannot step a {} variable with a {} gradient",
                    var.dtype(),
                    grad.dtype()
                )))
            }
        }
    }
    Ok(())
}

/// Replace `current` with `vars`, checking that dtypes and shapes line up.
pub fn replace_vars(current: &mut Vec<Tensor>, vars: &[Tensor]) -> Result<()> {
    if current.len() != vars.len() {
        return Err(Error::ShapeMismatch(format!(
            "expected {} variables, got {}",
            current.len(),
            vars.len()
        )));
    }
    for (i, (old, new)) in current.iter().zip(vars).enumerate() {
        if old.dtype() != new.dtype() || old.shape() != new.shape() {
            return Err(Error::ShapeMismatch(format!(
                "variable {i} is {} {:?}, got {} {:?}",
                old.dtype(),
                old.shape(),
                new.dtype(),
                new.shape()
            )));
        }
    }
    *current = vars.to_vec();
    Ok(())
}
