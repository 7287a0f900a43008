//! Causal extra-mixing stage applied after combine.
//!
//! Given combined tokens `y` and router tokens `x` (both `[B, M, D]`):
//!
//! 1. `y ← y ⊙ x ⊙ bias`, with `bias ∈ R^D` broadcast over batch and position
//! 2. `sim[b,i,j] = Σ_d x[b,i,d] · x[b,j,d]`
//! 3. entries with `j > i` are masked
//! 4. `w = softmax(sim)` over `j`
//! 5. `out[b] = w[b] · y[b]`
//!
//! With [`MaskFill::Zero`] the masked entries are set to 0 *before* the
//! softmax, so they still receive weight `exp(0)`: position `i` draws from
//! every later position too, and row 0 is close to uniform over the whole
//! sequence. [`MaskFill::NegInfinity`] removes masked entries from the
//! softmax entirely.

use ndarray::{s, Array1, Array2, Array3, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use serde::{Deserialize, Serialize};

use crate::core::softmax::softmax_last;
use crate::error::{Result, SoftMoeError};

/// Value written into the strictly-upper triangle of the similarity matrix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskFill {
    /// Masked entries become `0.0` (a `tril` before softmax).
    Zero,
    /// Masked entries become `-inf` and get zero weight.
    NegInfinity,
}

impl MaskFill {
    fn value(self) -> f32 {
        match self {
            MaskFill::Zero => 0.0,
            MaskFill::NegInfinity => f32::NEG_INFINITY,
        }
    }
}

impl std::str::FromStr for MaskFill {
    type Err = SoftMoeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "zero" => Ok(MaskFill::Zero),
            "neg-inf" | "neginf" | "neg-infinity" => Ok(MaskFill::NegInfinity),
            other => Err(SoftMoeError::InvalidConfig(format!(
                "unknown mask fill '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CausalMixer {
    /// Per-feature scale: bias ∈ R^D, initialised to ones.
    pub bias: Array1<f32>,

    pub mask_fill: MaskFill,
}

impl CausalMixer {
    pub fn new(dim: usize, mask_fill: MaskFill) -> Self {
        Self {
            bias: Array1::ones(dim),
            mask_fill,
        }
    }

    pub fn dim(&self) -> usize {
        self.bias.len()
    }

    /// Mix combined tokens `y` along the sequence using similarities of `x`.
    pub fn apply(&self, y: ArrayView3<'_, f32>, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        if y.dim() != x.dim() {
            return Err(SoftMoeError::shape("mixing tokens", y.shape(), x.shape()));
        }
        let (batch, seq, dim) = y.dim();
        if dim != self.bias.len() {
            return Err(SoftMoeError::shape("mixing bias", &[dim], self.bias.shape()));
        }

        let scaled = &(&y * &x) * &self.bias;
        let weights = self.similarity_weights(x)?;

        let mut out = Array3::zeros((batch, seq, dim));
        for b in 0..batch {
            let mixed = weights
                .index_axis(Axis(0), b)
                .dot(&scaled.index_axis(Axis(0), b));
            out.slice_mut(s![b, .., ..]).assign(&mixed);
        }
        Ok(out)
    }

    /// Masked, softmax-normalised token similarities: `[B, M, M]`.
    pub fn similarity_weights(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        let (batch, seq, _) = x.dim();
        let fill = self.mask_fill.value();

        let mut sim = Array3::zeros((batch, seq, seq));
        for b in 0..batch {
            let xb = x.index_axis(Axis(0), b);
            let mut gram: Array2<f32> = xb.dot(&xb.t());
            for i in 0..seq {
                for j in (i + 1)..seq {
                    gram[[i, j]] = fill;
                }
            }
            sim.slice_mut(s![b, .., ..]).assign(&gram);
        }
        softmax_last(sim.view())
    }

    pub fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        vec![("bias".to_string(), self.bias.view().into_dyn())]
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        vec![("bias".to_string(), self.bias.view_mut().into_dyn())]
    }
}
