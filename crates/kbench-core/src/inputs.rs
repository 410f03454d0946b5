//! Matched input generation.
//!
//! Both sides of a comparison receive inputs from the same pure function
//! of `(spec, seed)`, so equal seeds always mean equal tensors.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::domain::{Tensor, TensorError};
use crate::toolchain::InputSpec;

/// The inputs for one trial.
#[derive(Debug, Clone, PartialEq)]
pub struct InputBatch {
    pub seed: u64,
    pub tensors: Vec<Tensor>,
}

impl InputBatch {
    pub fn shapes(&self) -> Vec<Vec<usize>> {
        self.tensors.iter().map(|t| t.shape().to_vec()).collect()
    }
}

/// Standard-normal inputs for `spec`, drawn in input order from `seed`.
pub fn generate_inputs(spec: &InputSpec, seed: u64) -> Result<InputBatch, TensorError> {
    let mut rng = StdRng::seed_from_u64(seed);
    let tensors = spec
        .shapes()
        .iter()
        .map(|shape| Tensor::randn(shape, &mut rng))
        .collect::<Result<_, _>>()?;
    Ok(InputBatch { seed, tensors })
}
