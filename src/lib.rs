//! # softmoe
//!
//! **Soft Mixture-of-Experts**: slot-based soft routing over dense tensors,
//! after Puigcerver et al., "From Sparse to Soft Mixtures of Experts" (2023).
//!
//! ## Pipeline
//!
//! 1. **Router**: bilinear contraction of tokens with a learned routing tensor
//!    `phi`, normalised twice: over tokens (dispatch) and jointly over slots (combine)
//! 2. **Slot aggregation**: each slot is a dispatch-weighted average of all tokens
//! 3. **Expert bank**: one independent expert per group of slots
//! 4. **Combine**: each token is a combine-weighted average of all slot outputs
//! 5. **Causal mixing** (optional): elementwise rescale plus a lower-triangular
//!    similarity pass over the sequence
//!
//! ## Shapes
//!
//! - tokens `[batch, seq, dim]`
//! - `phi` `[dim, num_experts, slots_per_expert]`
//! - logits / dispatch / combine `[batch, seq, num_experts, slots_per_expert]`
//! - slot inputs / outputs `[batch, num_experts, slots_per_expert, dim]`

pub mod core;
pub mod error;
pub mod experts;
pub mod layer;
pub mod routing;

pub use error::{Result, SoftMoeError};
pub use experts::{Activation, Expert, ExpertConfig, ExpertFactory};
pub use layer::config::SoftMoeConfig;
pub use layer::mixing::MaskFill;
pub use layer::soft_moe::{SoftMoeLayer, SoftMoeTrace};
pub use routing::router::{RoutingPlan, SoftRouter};

/// Crate-wide constants.
pub mod config {
    /// Lower bound on a vector norm during L2 normalisation.
    pub const NORM_EPS: f32 = 1e-12;

    /// Normalise tokens and `phi` unless told otherwise.
    pub const DEFAULT_NORMALIZE: bool = true;

    /// Initial value of the learned routing scale.
    pub const INITIAL_SCALE: f32 = 1.0;

    /// Default RNG seed for parameter initialisation.
    pub const DEFAULT_SEED: u64 = 0x5EED_0F_50F7;

    /// Expert hidden width as a multiple of the model dim (192 -> 768 in the reference MLP).
    pub const FFN_RATIO: usize = 4;

    /// Tolerance used when checking that a normalised slice sums to one.
    pub const SUM_TOLERANCE: f32 = 1e-5;

    /// Standard deviation of the LeCun-normal init for a fan-in of `dim`.
    pub fn lecun_std(dim: usize) -> f32 {
        1.0 / (dim.max(1) as f32).sqrt()
    }
}
