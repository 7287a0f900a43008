//! Identity expert: returns its slots unchanged.

use ndarray::{Array3, ArrayView3};

use crate::error::{Result, SoftMoeError};
use crate::experts::{Expert, ExpertConfig, ExpertFactory};

#[derive(Clone, Debug)]
pub struct IdentityExpert {
    dim: usize,
}

impl IdentityExpert {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Expert for IdentityExpert {
    fn forward(&self, slots: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let width = slots.dim().2;
        if width != self.dim {
            return Err(SoftMoeError::DimMismatch {
                expected: self.dim,
                actual: width,
            });
        }
        Ok(slots.to_owned())
    }
}

/// Factory producing [`IdentityExpert`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityFactory;

impl ExpertFactory for IdentityFactory {
    fn create(&self, _index: usize, config: &ExpertConfig) -> Result<Box<dyn Expert>> {
        config.validate()?;
        Ok(Box::new(IdentityExpert::new(config.dim)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_passthrough() {
        let expert = IdentityExpert::new(3);
        let x = Array3::from_shape_fn((2, 2, 3), |(a, b, c)| (a + b * c) as f32);
        assert_eq!(expert.forward(x.view()).unwrap(), x);
        assert_eq!(expert.param_count(), 0);
    }

    #[test]
    fn test_identity_rejects_wrong_width() {
        let expert = IdentityExpert::new(3);
        let x = Array3::<f32>::zeros((1, 1, 4));
        assert!(expert.forward(x.view()).is_err());
    }
}
