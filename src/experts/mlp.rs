//! Two-layer feed-forward expert: `fc2(act(fc1(x)))`.
//!
//! Weights are stored input-major so a row-batch of slots multiplies on the left:
//! `W1 ∈ R^{dim × hidden}`, `W2 ∈ R^{hidden × dim}`.

use ndarray::{Array1, Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::lecun_std;
use crate::error::{Result, SoftMoeError};
use crate::experts::{Activation, Expert, ExpertConfig, ExpertFactory};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MlpExpert {
    /// Up projection: W1 ∈ R^{dim × hidden}
    pub w1: Array2<f32>,

    /// Up bias: b1 ∈ R^{hidden}
    pub b1: Option<Array1<f32>>,

    /// Down projection: W2 ∈ R^{hidden × dim}
    pub w2: Array2<f32>,

    /// Down bias: b2 ∈ R^{dim}
    pub b2: Option<Array1<f32>>,

    pub activation: Activation,
}

impl MlpExpert {
    /// Build from `config` with N(0, 1/sqrt(fan_in)) weights and zero biases.
    pub fn new(config: &ExpertConfig) -> Result<Self> {
        config.validate()?;
        let dim = config.dim;
        let hidden = config.hidden();
        let mut rng = StdRng::seed_from_u64(config.seed);

        let w1 = sample_normal(&mut rng, (dim, hidden), lecun_std(dim))?;
        let w2 = sample_normal(&mut rng, (hidden, dim), lecun_std(hidden))?;

        Ok(Self {
            w1,
            b1: config.bias.then(|| Array1::zeros(hidden)),
            w2,
            b2: config.bias.then(|| Array1::zeros(dim)),
            activation: config.activation,
        })
    }

    /// All-zero weights; the expert maps everything to zero.
    pub fn zeros(dim: usize, hidden: usize, activation: Activation) -> Self {
        Self {
            w1: Array2::zeros((dim, hidden)),
            b1: Some(Array1::zeros(hidden)),
            w2: Array2::zeros((hidden, dim)),
            b2: Some(Array1::zeros(dim)),
            activation,
        }
    }

    pub fn dim(&self) -> usize {
        self.w1.nrows()
    }

    pub fn hidden_dim(&self) -> usize {
        self.w1.ncols()
    }

    /// Forward a row-batch `[rows, dim] -> [rows, dim]`.
    pub fn forward_rows(&self, x: &Array2<f32>) -> Array2<f32> {
        let mut h = x.dot(&self.w1);
        if let Some(b1) = &self.b1 {
            h += b1;
        }
        h.mapv_inplace(|v| self.activation.apply(v));

        let mut out = h.dot(&self.w2);
        if let Some(b2) = &self.b2 {
            out += b2;
        }
        out
    }
}

impl Expert for MlpExpert {
    fn forward(&self, slots: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (batch, count, width) = slots.dim();
        if width != self.dim() {
            return Err(SoftMoeError::DimMismatch {
                expected: self.dim(),
                actual: width,
            });
        }
        if self.w2.dim() != (self.hidden_dim(), self.dim()) {
            return Err(SoftMoeError::shape(
                "expert down projection",
                &[self.hidden_dim(), self.dim()],
                self.w2.shape(),
            ));
        }
        if let Some(b1) = &self.b1 {
            if b1.len() != self.hidden_dim() {
                return Err(SoftMoeError::shape("expert up bias", &[self.hidden_dim()], b1.shape()));
            }
        }
        if let Some(b2) = &self.b2 {
            if b2.len() != self.dim() {
                return Err(SoftMoeError::shape("expert down bias", &[self.dim()], b2.shape()));
            }
        }

        let rows = Array2::from_shape_vec((batch * count, width), slots.iter().copied().collect())
            .map_err(|_| SoftMoeError::shape("expert input", &[batch, count, width], slots.shape()))?;
        let out = self.forward_rows(&rows);
        out.into_shape_with_order((batch, count, width))
            .map_err(|_| SoftMoeError::shape("expert output", &[batch, count, width], &[]))
    }

    fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params = vec![("fc1.weight".to_string(), self.w1.view().into_dyn())];
        if let Some(b1) = &self.b1 {
            params.push(("fc1.bias".to_string(), b1.view().into_dyn()));
        }
        params.push(("fc2.weight".to_string(), self.w2.view().into_dyn()));
        if let Some(b2) = &self.b2 {
            params.push(("fc2.bias".to_string(), b2.view().into_dyn()));
        }
        params
    }

    fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        let mut params = vec![("fc1.weight".to_string(), self.w1.view_mut().into_dyn())];
        if let Some(b1) = &mut self.b1 {
            params.push(("fc1.bias".to_string(), b1.view_mut().into_dyn()));
        }
        params.push(("fc2.weight".to_string(), self.w2.view_mut().into_dyn()));
        if let Some(b2) = &mut self.b2 {
            params.push(("fc2.bias".to_string(), b2.view_mut().into_dyn()));
        }
        params
    }
}

/// Factory producing freshly initialised [`MlpExpert`]s.
#[derive(Clone, Copy, Debug, Default)]
pub struct MlpFactory;

impl ExpertFactory for MlpFactory {
    fn create(&self, _index: usize, config: &ExpertConfig) -> Result<Box<dyn Expert>> {
        Ok(Box::new(MlpExpert::new(config)?))
    }
}

fn sample_normal(rng: &mut StdRng, shape: (usize, usize), std: f32) -> Result<Array2<f32>> {
    let normal = Normal::new(0.0f32, std)
        .map_err(|e| SoftMoeError::InvalidConfig(format!("expert init: {}", e)))?;
    Ok(Array2::from_shape_simple_fn(shape, || normal.sample(&mut *rng)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(dim: usize, hidden: usize, seed: u64) -> ExpertConfig {
        ExpertConfig {
            hidden_dim: Some(hidden),
            seed,
            ..ExpertConfig::default().for_expert(dim, 0)
        }
    }

    #[test]
    fn test_mlp_shapes() {
        let expert = MlpExpert::new(&config(8, 32, 1)).unwrap();
        assert_eq!(expert.w1.dim(), (8, 32));
        assert_eq!(expert.w2.dim(), (32, 8));
        let x = Array3::from_elem((2, 3, 8), 0.5);
        let y = expert.forward(x.view()).unwrap();
        assert_eq!(y.dim(), (2, 3, 8));
    }

    #[test]
    fn test_mlp_zeros_output_zero() {
        let expert = MlpExpert::zeros(4, 8, Activation::Gelu);
        let x = Array3::from_elem((1, 2, 4), 3.0);
        let y = expert.forward(x.view()).unwrap();
        assert!(y.iter().all(|v| v.abs() < 1e-6));
    }

    #[test]
    fn test_mlp_matches_rowwise_forward() {
        let expert = MlpExpert::new(&config(4, 6, 9)).unwrap();
        let x = Array3::from_shape_fn((2, 2, 4), |(b, p, d)| (b * 8 + p * 4 + d) as f32 * 0.1 - 0.5);
        let y = expert.forward(x.view()).unwrap();

        for b in 0..2 {
            for p in 0..2 {
                let row = x.slice(ndarray::s![b, p, ..]).to_owned().insert_axis(ndarray::Axis(0));
                let expected = expert.forward_rows(&row);
                for d in 0..4 {
                    assert!((y[[b, p, d]] - expected[[0, d]]).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_mlp_param_count() {
        let expert = MlpExpert::new(&config(8, 32, 0)).unwrap();
        assert_eq!(expert.param_count(), 8 * 32 + 32 + 32 * 8 + 8);

        let no_bias = MlpExpert::new(&ExpertConfig {
            bias: false,
            ..config(8, 32, 0)
        })
        .unwrap();
        assert_eq!(no_bias.param_count(), 2 * 8 * 32);
        assert_eq!(no_bias.named_parameters().len(), 2);
    }

    #[test]
    fn test_mlp_seeds_differ() {
        let a = MlpExpert::new(&config(4, 4, 1)).unwrap();
        let b = MlpExpert::new(&config(4, 4, 2)).unwrap();
        assert_ne!(a.w1, b.w1);
    }

    #[test]
    fn test_mlp_rejects_wrong_width() {
        let expert = MlpExpert::new(&config(4, 4, 1)).unwrap();
        let x = Array3::<f32>::zeros((1, 1, 5));
        assert!(matches!(
            expert.forward(x.view()),
            Err(SoftMoeError::DimMismatch { expected: 4, actual: 5 })
        ));
    }

    #[test]
    fn test_mlp_rejects_malformed_bias() {
        let x = Array3::<f32>::ones((1, 3, 4));

        let mut expert = MlpExpert::new(&config(4, 8, 1)).unwrap();
        expert.b1 = Some(Array1::zeros(3));
        let err = expert.forward(x.view()).unwrap_err();
        assert!(matches!(
            err,
            SoftMoeError::ShapeMismatch { context: "expert up bias", .. }
        ));

        let mut expert = MlpExpert::new(&config(4, 8, 1)).unwrap();
        expert.b2 = Some(Array1::zeros(5));
        let err = expert.forward(x.view()).unwrap_err();
        assert!(matches!(
            err,
            SoftMoeError::ShapeMismatch { context: "expert down bias", .. }
        ));
    }

    #[test]
    fn test_mlp_exact_gelu_close_to_tanh() {
        let x = Array3::from_shape_fn((1, 2, 4), |(_, p, d)| (p * 4 + d) as f32 * 0.3 - 1.0);
        let tanh = MlpExpert::new(&ExpertConfig {
            activation: Activation::Gelu,
            ..config(4, 8, 5)
        })
        .unwrap();
        let exact = MlpExpert {
            activation: Activation::GeluExact,
            ..tanh.clone()
        };
        let a = tanh.forward(x.view()).unwrap();
        let b = exact.forward(x.view()).unwrap();
        for (u, v) in a.iter().zip(b.iter()) {
            assert!((u - v).abs() < 1e-2);
        }
    }

    #[test]
    fn test_mlp_factory() {
        let cfg = config(4, 8, 3);
        let expert = MlpFactory.create(0, &cfg).unwrap();
        assert_eq!(expert.param_count(), 4 * 8 + 8 + 8 * 4 + 4);
    }
}
