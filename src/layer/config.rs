//! Construction-time options for a Soft-MoE layer.

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_NORMALIZE, DEFAULT_SEED};
use crate::error::{Result, SoftMoeError};
use crate::experts::ExpertConfig;
use crate::layer::mixing::MaskFill;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftMoeConfig {
    /// Token feature width; also every expert's input/output width.
    pub dim: usize,

    /// Number of experts (router expert axis).
    pub num_experts: usize,

    /// Slots per expert.
    pub slots_per_expert: usize,

    /// L2-normalise tokens and `phi`, and learn a routing scale.
    pub normalize: bool,

    /// Enable the causal extra-mixing stage after combine.
    pub causal_mixing: bool,

    /// How the causal mask fills masked similarity entries.
    pub mask_fill: MaskFill,

    /// Evaluate experts on the rayon pool.
    pub parallel_experts: bool,

    /// Seed for the routing tensor; experts derive their own from `expert.seed`.
    pub seed: u64,

    /// Options handed to the expert factory.
    pub expert: ExpertConfig,
}

impl Default for SoftMoeConfig {
    fn default() -> Self {
        Self {
            dim: 192,
            num_experts: 128,
            slots_per_expert: 5,
            normalize: DEFAULT_NORMALIZE,
            causal_mixing: false,
            mask_fill: MaskFill::Zero,
            parallel_experts: true,
            seed: DEFAULT_SEED,
            expert: ExpertConfig {
                seed: DEFAULT_SEED.wrapping_add(1),
                ..ExpertConfig::default()
            },
        }
    }
}

impl SoftMoeConfig {
    /// Config with the given sizes and every other option at its default.
    pub fn new(dim: usize, num_experts: usize, slots_per_expert: usize) -> Self {
        Self {
            dim,
            num_experts,
            slots_per_expert,
            ..Self::default()
        }
    }

    /// Total routing slots: `num_experts × slots_per_expert`.
    pub fn num_slots(&self) -> Result<usize> {
        self.num_experts
            .checked_mul(self.slots_per_expert)
            .ok_or_else(|| {
                SoftMoeError::InvalidConfig(format!(
                    "num_experts ({}) x slots_per_expert ({}) overflows",
                    self.num_experts, self.slots_per_expert
                ))
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(SoftMoeError::InvalidConfig("dim must be positive".to_string()));
        }
        if self.num_experts == 0 {
            return Err(SoftMoeError::InvalidConfig(
                "num_experts must be positive".to_string(),
            ));
        }
        if self.slots_per_expert == 0 {
            return Err(SoftMoeError::InvalidConfig(
                "slots_per_expert must be positive".to_string(),
            ));
        }
        self.num_slots()?;
        self.expert.for_expert(self.dim, 0).validate()
    }
}
