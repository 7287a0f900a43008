//! Soft router: turns tokens into dispatch and combine weights.
//!
//! The router owns the learned routing tensor `phi ∈ R^{dim × experts × slots}`
//! and, when normalisation is on, a learned scalar `scale`. For tokens
//! `x ∈ R^{B × M × dim}`:
//!
//! 1. optionally `x ← x / ‖x‖` per token and `phi ← scale · phi / ‖phi‖` per slot
//! 2. `logits[b,m,n,p] = Σ_d x[b,m,d] · phi[d,n,p]`
//! 3. dispatch = softmax over the token axis `m`
//! 4. combine  = softmax jointly over the slot axes `(n, p)`
//!
//! `phi` is shared across the whole batch and every sequence position.

use std::path::Path;

use ndarray::{Array1, Array3, Array4, ArrayView3, ArrayViewD, ArrayViewMutD, Axis};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use crate::config::{lecun_std, INITIAL_SCALE};
use crate::core::contraction::route_logits;
use crate::core::norm::l2_normalize;
use crate::core::softmax::softmax;
use crate::error::{Result, SoftMoeError};

/// Token axis of the logits.
const TOKEN_AXIS: usize = 1;
/// Joint `(expert, slot)` axes of the logits.
const SLOT_AXES: [usize; 2] = [2, 3];

/// Learned routing parameters for one Soft-MoE layer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftRouter {
    /// Routing tensor: `phi ∈ R^{dim × num_experts × slots_per_expert}`.
    pub phi: Array3<f32>,

    /// Learned scale applied to the normalised `phi`. Present iff normalising.
    pub scale: Option<Array1<f32>>,
}

impl SoftRouter {
    /// Create a router with LeCun-normal `phi`: N(0, 1/sqrt(dim)).
    pub fn new(
        dim: usize,
        num_experts: usize,
        slots_per_expert: usize,
        normalize: bool,
        seed: u64,
    ) -> Result<Self> {
        check_sizes(dim, num_experts, slots_per_expert)?;
        let normal = Normal::new(0.0f32, lecun_std(dim))
            .map_err(|e| SoftMoeError::InvalidConfig(format!("phi init: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(seed);
        let phi = Array3::from_shape_simple_fn((dim, num_experts, slots_per_expert), || {
            normal.sample(&mut rng)
        });

        Ok(Self {
            phi,
            scale: normalize.then(|| Array1::from_elem(1, INITIAL_SCALE)),
        })
    }

    /// Create a router with an all-zero `phi` (uniform routing).
    pub fn zeros(dim: usize, num_experts: usize, slots_per_expert: usize, normalize: bool) -> Self {
        Self {
            phi: Array3::zeros((dim, num_experts, slots_per_expert)),
            scale: normalize.then(|| Array1::from_elem(1, INITIAL_SCALE)),
        }
    }

    /// Wrap externally supplied weights after checking their shapes.
    pub fn from_weights(phi: Array3<f32>, scale: Option<f32>) -> Result<Self> {
        let (dim, experts, slots) = phi.dim();
        check_sizes(dim, experts, slots)?;
        Ok(Self {
            phi,
            scale: scale.map(|s| Array1::from_elem(1, s)),
        })
    }

    pub fn dim(&self) -> usize {
        self.phi.dim().0
    }

    pub fn num_experts(&self) -> usize {
        self.phi.dim().1
    }

    pub fn slots_per_expert(&self) -> usize {
        self.phi.dim().2
    }

    /// Total routing slots: `num_experts × slots_per_expert`.
    pub fn num_slots(&self) -> usize {
        self.num_experts() * self.slots_per_expert()
    }

    pub fn normalizes(&self) -> bool {
        self.scale.is_some()
    }

    /// Current value of the learned scale, if any.
    pub fn scale_value(&self) -> Result<Option<f32>> {
        match &self.scale {
            None => Ok(None),
            Some(s) if s.len() == 1 => Ok(Some(s[0])),
            Some(s) => Err(SoftMoeError::shape("routing scale", &[1], s.shape())),
        }
    }

    /// The routing tensor as used in the contraction: `scale · phi / ‖phi‖`
    /// (normalised over `dim` per slot) when normalising, `phi` otherwise.
    pub fn effective_phi(&self) -> Result<Array3<f32>> {
        match self.scale_value()? {
            Some(scale) => Ok(l2_normalize(self.phi.view(), 0)? * scale),
            None => Ok(self.phi.clone()),
        }
    }

    /// Tokens as seen by the router: L2-normalised per token when normalising,
    /// an untouched copy otherwise.
    pub fn prepare_tokens(&self, x: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        if self.normalizes() {
            l2_normalize(x, 2)
        } else {
            Ok(x.to_owned())
        }
    }

    /// Compute dispatch and combine weights for `x: [B, M, dim]`.
    pub fn route(&self, x: ArrayView3<'_, f32>) -> Result<RoutingPlan> {
        let tokens = self.prepare_tokens(x)?;
        let phi = self.effective_phi()?;

        let logits = route_logits(tokens.view(), phi.view())?;
        let dispatch = softmax(logits.view(), &[TOKEN_AXIS])?;
        let combine = softmax(logits.view(), &SLOT_AXES)?;
        tracing::trace!(shape = ?logits.shape(), "routing logits");

        Ok(RoutingPlan {
            tokens,
            logits,
            dispatch,
            combine,
        })
    }

    /// Router with `phi`'s expert axis reordered so that new expert `i` is old expert `order[i]`.
    pub fn permute_experts(&self, order: &[usize]) -> Result<Self> {
        check_permutation(order, self.num_experts())?;
        Ok(Self {
            phi: self.phi.select(Axis(1), order),
            scale: self.scale.clone(),
        })
    }

    pub fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params = vec![("phi".to_string(), self.phi.view().into_dyn())];
        if let Some(scale) = &self.scale {
            params.push(("scale".to_string(), scale.view().into_dyn()));
        }
        params
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        let mut params = vec![("phi".to_string(), self.phi.view_mut().into_dyn())];
        if let Some(scale) = &mut self.scale {
            params.push(("scale".to_string(), scale.view_mut().into_dyn()));
        }
        params
    }

    pub fn param_count(&self) -> usize {
        self.phi.len() + self.scale.as_ref().map_or(0, |s| s.len())
    }

    /// Serialise the routing weights (for checkpointing).
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialise routing weights and check they are well-formed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let router: SoftRouter = bincode::deserialize(bytes)?;
        let (dim, experts, slots) = router.phi.dim();
        check_sizes(dim, experts, slots)
            .map_err(|e| SoftMoeError::Checkpoint(e.to_string()))?;
        router
            .scale_value()
            .map_err(|e| SoftMoeError::Checkpoint(e.to_string()))?;
        Ok(router)
    }

    /// Write the routing weights to `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path, bytes).map_err(|e| {
            SoftMoeError::Checkpoint(format!("failed to write {}: {}", path.display(), e))
        })
    }

    /// Read routing weights from `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            SoftMoeError::Checkpoint(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_bytes(&bytes)
    }
}

/// Everything the router produces for one batch.
#[derive(Clone, Debug)]
pub struct RoutingPlan {
    /// Tokens after optional normalisation: [B, M, dim].
    pub tokens: Array3<f32>,

    /// Bilinear logits: [B, M, N, P].
    pub logits: Array4<f32>,

    /// Softmax over tokens: for each (b, n, p), sums to 1 over m.
    pub dispatch: Array4<f32>,

    /// Softmax over slots: for each (b, m), sums to 1 over (n, p).
    pub combine: Array4<f32>,
}

impl RoutingPlan {
    /// Mean combine mass each expert receives per token. Sums to 1.
    pub fn expert_importance(&self) -> Array1<f32> {
        let (batch, seq, experts, _) = self.combine.dim();
        let tokens = (batch * seq) as f32;
        if tokens == 0.0 {
            return Array1::zeros(experts);
        }
        self.combine
            .sum_axis(Axis(3))
            .sum_axis(Axis(1))
            .sum_axis(Axis(0))
            / tokens
    }

    /// Largest deviation from 1 of any dispatch slice (over m) or combine slice (over n, p).
    pub fn max_normalization_error(&self) -> f32 {
        let dispatch_err = self
            .dispatch
            .sum_axis(Axis(1))
            .iter()
            .fold(0.0f32, |acc, s| acc.max((s - 1.0).abs()));
        let combine_err = self
            .combine
            .sum_axis(Axis(3))
            .sum_axis(Axis(2))
            .iter()
            .fold(0.0f32, |acc, s| acc.max((s - 1.0).abs()));
        dispatch_err.max(combine_err)
    }
}

fn check_sizes(dim: usize, num_experts: usize, slots_per_expert: usize) -> Result<()> {
    if dim == 0 || num_experts == 0 || slots_per_expert == 0 {
        return Err(SoftMoeError::InvalidConfig(format!(
            "dim ({}), num_experts ({}) and slots_per_expert ({}) must all be positive",
            dim, num_experts, slots_per_expert
        )));
    }
    Ok(())
}

pub(crate) fn check_permutation(order: &[usize], n: usize) -> Result<()> {
    let mut seen = vec![false; n];
    if order.len() != n {
        return Err(SoftMoeError::InvalidConfig(format!(
            "permutation has {} entries, expected {}",
            order.len(),
            n
        )));
    }
    for &i in order {
        if i >= n || seen[i] {
            return Err(SoftMoeError::InvalidConfig(format!(
                "{:?} is not a permutation of 0..{}",
                order, n
            )));
        }
        seen[i] = true;
    }
    Ok(())
}
