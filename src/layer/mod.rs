//! Layer configuration, the Soft-MoE forward pass and the optional causal mixer.

pub mod config;
pub mod mixing;
pub mod soft_moe;
