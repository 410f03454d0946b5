//! Dense row-major `f32` tensors exchanged between the harness and models.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::error::TensorError;

/// Upper bound on the elements a declared shape may allocate.
pub const MAX_ELEMENTS: usize = 1 << 26;

/// Number of elements held by a tensor of `shape`, `None` on overflow.
/// A 0-d shape holds one.
pub fn numel(shape: &[usize]) -> Option<usize> {
    shape.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Like [`numel`], but also rejects shapes above [`MAX_ELEMENTS`].
pub fn bounded_numel(shape: &[usize]) -> Result<usize, TensorError> {
    numel(shape)
        .filter(|&n| n <= MAX_ELEMENTS)
        .ok_or_else(|| TensorError::TooLarge {
            shape: shape.to_vec(),
            limit: MAX_ELEMENTS,
        })
}

/// A dense tensor. Shape and data length always agree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TensorRepr")]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

#[derive(Deserialize)]
struct TensorRepr {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl TryFrom<TensorRepr> for Tensor {
    type Error = TensorError;

    fn try_from(repr: TensorRepr) -> Result<Self, Self::Error> {
        Tensor::new(repr.shape, repr.data)
    }
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorError> {
        let expected = numel(&shape).ok_or_else(|| TensorError::TooLarge {
            shape: shape.clone(),
            limit: MAX_ELEMENTS,
        })?;
        if expected != data.len() {
            return Err(TensorError::ShapeDataMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// 0-d tensor holding a single value.
    pub fn scalar(value: f32) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn full(shape: &[usize], value: f32) -> Result<Self, TensorError> {
        Ok(Self {
            shape: shape.to_vec(),
            data: vec![value; bounded_numel(shape)?],
        })
    }

    /// Standard-normal samples drawn with the Box-Muller transform.
    pub fn randn<R: Rng + ?Sized>(shape: &[usize], rng: &mut R) -> Result<Self, TensorError> {
        let data = (0..bounded_numel(shape)?)
            .map(|_| {
                let u1: f32 = rng.gen_range(1e-7f32..1.0f32);
                let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
                (-2.0 * u1.ln()).sqrt() * u2.cos()
            })
            .collect();
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn is_scalar(&self) -> bool {
        self.shape.is_empty()
    }

    /// Apply `f` to every element, keeping the shape.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Self {
        Self {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&v| f(v)).collect(),
        }
    }

    pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
        (self.shape, self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_new_rejects_mismatched_data() {
        let err = Tensor::new(vec![2, 2], vec![1.0; 3]).unwrap_err();
        assert!(matches!(
            err,
            TensorError::ShapeDataMismatch {
                expected: 4,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn test_scalar_has_empty_shape() {
        let t = Tensor::scalar(3.5);
        assert!(t.is_scalar());
        assert_eq!(t.numel(), 1);
        assert_eq!(numel(&[]), Some(1));
    }

    #[test]
    fn test_randn_is_deterministic_for_seed() {
        let a = Tensor::randn(&[4, 4], &mut StdRng::seed_from_u64(7)).unwrap();
        let b = Tensor::randn(&[4, 4], &mut StdRng::seed_from_u64(7)).unwrap();
        let c = Tensor::randn(&[4, 4], &mut StdRng::seed_from_u64(8)).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_oversized_shapes_rejected() {
        let huge = [usize::MAX, 2];
        assert_eq!(numel(&huge), None);
        assert!(matches!(
            Tensor::randn(&huge, &mut StdRng::seed_from_u64(1)),
            Err(TensorError::TooLarge { .. })
        ));
        assert!(Tensor::full(&[MAX_ELEMENTS + 1], 0.0).is_err());
        assert!(Tensor::new(huge.to_vec(), vec![]).is_err());
    }

    #[test]
    fn test_deserialize_validates_shape() {
        let bad = r#"{"shape":[3],"data":[1.0,2.0]}"#;
        assert!(serde_json::from_str::<Tensor>(bad).is_err());

        let good = r#"{"shape":[2],"data":[1.0,2.0]}"#;
        let t: Tensor = serde_json::from_str(good).unwrap();
        assert_eq!(t.shape(), &[2]);
    }
}
