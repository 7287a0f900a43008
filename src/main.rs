//! softmoe: run one Soft-MoE forward pass on seeded random tokens.
//!
//! This is the CLI binary entry point.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use softmoe::experts::{IdentityFactory, MlpFactory};
use softmoe::{Activation, ExpertConfig, ExpertFactory, MaskFill, SoftMoeConfig, SoftMoeLayer};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExpertKind {
    Mlp,
    Identity,
}

/// Soft-MoE forward-pass CLI.
#[derive(Parser, Debug)]
#[command(
    name = "softmoe",
    about = "Soft Mixture-of-Experts: slot routing over dense tokens",
    version
)]
struct Cli {
    /// Token feature width.
    #[arg(long, default_value_t = 192)]
    dim: usize,

    /// Number of experts.
    #[arg(short = 'n', long, default_value_t = 128)]
    num_experts: usize,

    /// Slots per expert.
    #[arg(short = 'p', long, default_value_t = 5)]
    slots_per_expert: usize,

    /// Batch size of the random input.
    #[arg(short, long, default_value_t = 2)]
    batch: usize,

    /// Sequence length of the random input.
    #[arg(short = 'm', long, default_value_t = 16)]
    seq_len: usize,

    /// Expert kind.
    #[arg(long, value_enum, default_value_t = ExpertKind::Mlp)]
    expert: ExpertKind,

    /// MLP activation: gelu-exact, gelu (tanh), silu or relu.
    #[arg(long, default_value = "gelu-exact")]
    activation: Activation,

    /// MLP hidden width (defaults to 4 x dim).
    #[arg(long)]
    hidden_dim: Option<usize>,

    /// Skip L2 normalisation of tokens and phi.
    #[arg(long, default_value_t = false)]
    no_normalize: bool,

    /// Enable the causal mixing stage after combine.
    #[arg(long, default_value_t = false)]
    causal_mixing: bool,

    /// Mask fill for causal mixing: zero or neg-inf.
    #[arg(long, default_value = "zero")]
    mask_fill: MaskFill,

    /// Evaluate experts on one thread.
    #[arg(long, default_value_t = false)]
    sequential: bool,

    /// Seed for parameters and input.
    #[arg(long, default_value_t = softmoe::config::DEFAULT_SEED)]
    seed: u64,

    /// Load routing weights from this file before the pass.
    #[arg(long)]
    load_router: Option<PathBuf>,

    /// Write the routing weights here after the pass.
    #[arg(long)]
    save_router: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    tracing::info!("softmoe v{}", env!("CARGO_PKG_VERSION"));

    let config = SoftMoeConfig {
        dim: cli.dim,
        num_experts: cli.num_experts,
        slots_per_expert: cli.slots_per_expert,
        normalize: !cli.no_normalize,
        causal_mixing: cli.causal_mixing,
        mask_fill: cli.mask_fill,
        parallel_experts: !cli.sequential,
        seed: cli.seed,
        expert: ExpertConfig {
            hidden_dim: cli.hidden_dim,
            activation: cli.activation,
            seed: cli.seed.wrapping_add(1),
            ..ExpertConfig::default()
        },
    };

    tracing::info!(
        "Config: dim={}, {} experts x {} slots, normalize={}, causal_mixing={}",
        config.dim,
        config.num_experts,
        config.slots_per_expert,
        config.normalize,
        config.causal_mixing,
    );

    let factory: &dyn ExpertFactory = match cli.expert {
        ExpertKind::Mlp => &MlpFactory,
        ExpertKind::Identity => &IdentityFactory,
    };
    let mut layer =
        SoftMoeLayer::new(config, factory).context("failed to build soft-moe layer")?;
    if let Some(path) = &cli.load_router {
        layer
            .load_router(path)
            .with_context(|| format!("failed to load router from {}", path.display()))?;
        tracing::info!("Router loaded from {}", path.display());
    }
    tracing::info!("Parameters: {}", layer.param_count());

    let x = random_tokens(cli.batch, cli.seq_len, cli.dim, cli.seed.wrapping_add(2))?;
    let trace = layer
        .forward_traced(x.view())
        .context("forward pass failed")?;

    tracing::info!("Output shape: {:?}", trace.output.shape());
    tracing::info!(
        "Max routing normalisation error: {:.2e}",
        trace.routing.max_normalization_error()
    );

    let importance = trace.routing.expert_importance();
    let (busiest, weight) = importance
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |best, (i, &w)| if w > best.1 { (i, w) } else { best });
    tracing::info!(
        "Expert importance: busiest={} ({:.4}), uniform={:.4}",
        busiest,
        weight,
        1.0 / importance.len().max(1) as f32,
    );

    let mean_abs = trace.output.mapv(f32::abs).mean().unwrap_or(0.0);
    tracing::info!("Mean |output|: {:.6}", mean_abs);

    if let Some(path) = &cli.save_router {
        layer
            .router
            .save(path)
            .with_context(|| format!("failed to save router to {}", path.display()))?;
        tracing::info!("Router saved to {}", path.display());
    }

    Ok(())
}

fn random_tokens(batch: usize, seq: usize, dim: usize, seed: u64) -> Result<Array3<f32>> {
    let normal = Normal::new(0.0f32, 1.0).context("invalid token distribution")?;
    let mut rng = StdRng::seed_from_u64(seed);
    Ok(Array3::from_shape_simple_fn((batch, seq, dim), || {
        normal.sample(&mut rng)
    }))
}
