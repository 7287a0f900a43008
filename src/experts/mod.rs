//! Experts: independent sub-networks applied to groups of slots.
//!
//! The layer never looks inside an expert. It only relies on the [`Expert`]
//! contract: `[batch, slots, dim] -> [batch, slots, dim]`, with parameters the
//! expert owns exclusively. Experts are built by an [`ExpertFactory`] from an
//! explicit [`ExpertConfig`], once per expert index.

pub mod bank;
pub mod identity;
pub mod mlp;

use ndarray::{Array3, ArrayView3, ArrayViewD, ArrayViewMutD};
use serde::{Deserialize, Serialize};

use crate::config::FFN_RATIO;
use crate::error::{Result, SoftMoeError};

pub use bank::ExpertBank;
pub use identity::{IdentityExpert, IdentityFactory};
pub use mlp::{MlpExpert, MlpFactory};

/// A computation unit applied to the slots of one expert.
///
/// Implementations must be reentrant: the bank may call `forward` for
/// different experts from several threads at once.
pub trait Expert: Send + Sync {
    /// Map slot inputs `[batch, slots, dim]` to slot outputs of the same shape.
    fn forward(&self, slots: ArrayView3<'_, f32>) -> Result<Array3<f32>>;

    /// Learned tensors, by name, for read access.
    fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        Vec::new()
    }

    /// Learned tensors, by name, for external gradient updates.
    fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        Vec::new()
    }

    fn param_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// Nonlinearity between the two expert projections.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// GELU, tanh approximation.
    Gelu,
    /// GELU with the exact error function: `x · Φ(x)`.
    GeluExact,
    Silu,
    Relu,
}

impl Activation {
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Activation::Gelu => gelu(x),
            Activation::GeluExact => gelu_exact(x),
            Activation::Silu => silu(x),
            Activation::Relu => x.max(0.0),
        }
    }
}

impl std::str::FromStr for Activation {
    type Err = SoftMoeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gelu" | "gelu-tanh" => Ok(Activation::Gelu),
            "gelu-exact" | "gelu-erf" => Ok(Activation::GeluExact),
            "silu" | "swish" => Ok(Activation::Silu),
            "relu" => Ok(Activation::Relu),
            other => Err(SoftMoeError::InvalidConfig(format!(
                "unknown activation '{}'",
                other
            ))),
        }
    }
}

/// Construction options handed to the expert factory.
///
/// `dim` is filled in by the layer; the rest comes from the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExpertConfig {
    /// Input and output width. Must equal the layer dim.
    pub dim: usize,

    /// Hidden width. `None` means `FFN_RATIO × dim`.
    pub hidden_dim: Option<usize>,

    pub activation: Activation,

    /// Whether the projections carry biases.
    pub bias: bool,

    /// Seed for this expert's parameter init.
    pub seed: u64,
}

impl Default for ExpertConfig {
    fn default() -> Self {
        Self {
            dim: 0,
            hidden_dim: None,
            activation: Activation::GeluExact,
            bias: true,
            seed: 0,
        }
    }
}

impl ExpertConfig {
    pub fn hidden(&self) -> usize {
        self.hidden_dim.unwrap_or(FFN_RATIO * self.dim)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(SoftMoeError::InvalidConfig(
                "expert dim must be positive".to_string(),
            ));
        }
        if self.hidden_dim == Some(0) {
            return Err(SoftMoeError::InvalidConfig(
                "expert hidden_dim must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of this config for expert `index` of a layer with width `dim`.
    pub fn for_expert(&self, dim: usize, index: usize) -> Self {
        Self {
            dim,
            seed: self.seed.wrapping_add(index as u64),
            ..self.clone()
        }
    }
}

/// Builds one fresh expert per index.
pub trait ExpertFactory {
    fn create(&self, index: usize, config: &ExpertConfig) -> Result<Box<dyn Expert>>;
}

impl<F> ExpertFactory for F
where
    F: Fn(usize, &ExpertConfig) -> Result<Box<dyn Expert>>,
{
    fn create(&self, index: usize, config: &ExpertConfig) -> Result<Box<dyn Expert>> {
        self(index, config)
    }
}

fn gelu(x: f32) -> f32 {
    const SQRT_2_OVER_PI: f32 = 0.797_884_6;
    0.5 * x * (1.0 + (SQRT_2_OVER_PI * (x + 0.044_715 * x * x * x)).tanh())
}

fn gelu_exact(x: f32) -> f32 {
    0.5 * x * (1.0 + libm::erff(x * std::f32::consts::FRAC_1_SQRT_2))
}

fn silu(x: f32) -> f32 {
    x / (1.0 + (-x).exp())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activations() {
        assert_eq!(Activation::Relu.apply(-2.0), 0.0);
        assert_eq!(Activation::Relu.apply(3.0), 3.0);
        assert!((Activation::Silu.apply(0.0)).abs() < 1e-6);
        assert!(Activation::Silu.apply(1.0) > 0.5);
        assert!((Activation::Gelu.apply(0.0)).abs() < 1e-6);
        // gelu(1) ≈ 0.8412
        assert!((Activation::Gelu.apply(1.0) - 0.8412).abs() < 1e-3);
        assert!(Activation::Gelu.apply(-1.0) < 0.0);
        // exact gelu(1) = 0.841345
        assert!((Activation::GeluExact.apply(1.0) - 0.841_345).abs() < 1e-5);
        assert!((Activation::GeluExact.apply(-3.0) + 0.004_05).abs() < 1e-4);
        assert!((Activation::GeluExact.apply(0.5) - Activation::Gelu.apply(0.5)).abs() < 1e-3);
    }

    #[test]
    fn test_activation_from_str() {
        assert_eq!("GELU".parse::<Activation>().unwrap(), Activation::Gelu);
        assert_eq!("swish".parse::<Activation>().unwrap(), Activation::Silu);
        assert_eq!("gelu-erf".parse::<Activation>().unwrap(), Activation::GeluExact);
        assert!("tanh".parse::<Activation>().is_err());
    }

    #[test]
    fn test_expert_config_defaults() {
        let cfg = ExpertConfig::default().for_expert(192, 3);
        assert_eq!(cfg.hidden(), 768);
        assert_eq!(cfg.seed, 3);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_expert_config_rejects_zero() {
        assert!(ExpertConfig::default().validate().is_err());
        let cfg = ExpertConfig {
            hidden_dim: Some(0),
            ..ExpertConfig::default().for_expert(8, 0)
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_closure_factory() {
        let factory = |_i: usize, _cfg: &ExpertConfig| -> Result<Box<dyn Expert>> {
            Ok(Box::new(IdentityExpert::new(4)))
        };
        let expert = factory
            .create(0, &ExpertConfig::default().for_expert(4, 0))
            .unwrap();
        assert_eq!(expert.param_count(), 0);
    }
}
