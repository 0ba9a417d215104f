use crate::{
    config::OptimizerConfig,
    error::{PipelineError, Result},
};

/// Maps a gradient into an in-place parameter update.
pub trait Optimizer: Send {
    /// Applies one update step.
    ///
    /// # Errors
    /// Returns `PipelineError::ShapeMismatch` if `grad` and `params` differ
    /// in length.
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()>;
}

/// Builds the optimizer selected by `cfg` for a parameter buffer of `len`.
pub fn build_optimizer(cfg: OptimizerConfig, len: usize) -> Box<dyn Optimizer> {
    match cfg {
        OptimizerConfig::GradientDescent { lr } => Box::new(GradientDescent::new(lr)),
        OptimizerConfig::Adam { lr, b1, b2, eps } => Box::new(Adam::new(len, lr, b1, b2, eps)),
    }
}

fn check_len(grad: &[f32], params: &[f32]) -> Result<()> {
    if grad.len() != params.len() {
        return Err(PipelineError::ShapeMismatch {
            what: "gradient",
            got: grad.len(),
            expected: params.len(),
        });
    }
    Ok(())
}

/// Plain stochastic gradient descent.
#[derive(Debug)]
pub struct GradientDescent {
    learning_rate: f32,
}

impl GradientDescent {
    pub fn new(learning_rate: f32) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for GradientDescent {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params)?;

        let lr = self.learning_rate;
        for (p, g) in params.iter_mut().zip(grad) {
            *p -= lr * g;
        }

        Ok(())
    }
}

/// Adam with bias-corrected first and second moment estimates.
#[derive(Debug)]
pub struct Adam {
    learning_rate: f32,
    beta1: f32,
    beta2: f32,
    beta1_t: f32,
    beta2_t: f32,
    v: Box<[f32]>,
    s: Box<[f32]>,
    epsilon: f32,
}

impl Adam {
    /// Creates an `Adam` optimizer for `len` parameters.
    pub fn new(len: usize, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            beta1_t: 1.,
            beta2_t: 1.,
            v: vec![0.; len].into_boxed_slice(),
            s: vec![0.; len].into_boxed_slice(),
            epsilon,
        }
    }
}

impl Optimizer for Adam {
    fn update_params(&mut self, grad: &[f32], params: &mut [f32]) -> Result<()> {
        check_len(grad, params)?;
        if grad.len() != self.v.len() {
            return Err(PipelineError::ShapeMismatch {
                what: "optimizer state",
                got: grad.len(),
                expected: self.v.len(),
            });
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;

        let bc1 = 1. - self.beta1_t;
        let bc2 = 1. - self.beta2_t;
        let step_size = lr * (bc2.sqrt() / bc1);

        params
            .iter_mut()
            .zip(grad)
            .zip(self.v.iter_mut())
            .zip(self.s.iter_mut())
            .for_each(|(((p, g), v), s)| {
                *v = b1 * *v + (1. - b1) * g;
                *s = b2 * *s + (1. - b2) * g.powi(2);
                *p -= step_size * *v / (s.sqrt() + eps);
            });

        Ok(())
    }
}
