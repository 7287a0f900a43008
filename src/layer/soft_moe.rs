//! The Soft-MoE layer: routing, expert evaluation and recombination.
//!
//! Forward pass for `x ∈ R^{B × M × D}` (algorithm 1 of the Soft-MoE paper):
//!
//! ```text
//! plan = router.route(x)                      // dispatch d, combine c: [B, M, N, P]
//! xs[b,n,p,:] = Σ_m d[b,m,n,p] · x[b,m,:]     // [B, N, P, D]
//! ys[:,i]     = expert_i(xs[:,i])             // [B, N, P, D]
//! y[b,m,:]    = Σ_{n,p} c[b,m,n,p] · ys[b,n,p,:]
//! ```
//!
//! followed by the causal mixer when `causal_mixing` is enabled.

use std::path::Path;

use ndarray::{Array3, Array4, ArrayView, ArrayViewD, ArrayViewMutD, Dimension, Ix3};

use crate::core::contraction::{aggregate_slots, combine_slots};
use crate::error::{Result, SoftMoeError};
use crate::experts::{ExpertBank, ExpertFactory, MlpFactory};
use crate::layer::config::SoftMoeConfig;
use crate::layer::mixing::{CausalMixer, MaskFill};
use crate::routing::router::{RoutingPlan, SoftRouter};

pub struct SoftMoeLayer {
    config: SoftMoeConfig,

    /// Learned routing tensor and scale.
    pub router: SoftRouter,

    /// One expert per router expert index.
    pub experts: ExpertBank,

    /// Present iff `config.causal_mixing`.
    pub mixer: Option<CausalMixer>,
}

/// Every intermediate of one forward pass.
#[derive(Clone, Debug)]
pub struct SoftMoeTrace {
    /// Router outputs, including the (normalised) tokens.
    pub routing: RoutingPlan,

    /// Dispatch-weighted token averages: [B, N, P, D].
    pub slot_inputs: Array4<f32>,

    /// Expert outputs: [B, N, P, D].
    pub slot_outputs: Array4<f32>,

    /// Combine-weighted slot averages, before mixing: [B, M, D].
    pub combined: Array3<f32>,

    /// Final output: [B, M, D].
    pub output: Array3<f32>,
}

impl SoftMoeLayer {
    /// Build a layer, calling `factory` once per expert.
    pub fn new(config: SoftMoeConfig, factory: &dyn ExpertFactory) -> Result<Self> {
        config.validate()?;

        let router = SoftRouter::new(
            config.dim,
            config.num_experts,
            config.slots_per_expert,
            config.normalize,
            config.seed,
        )?;
        let experts = ExpertBank::build(
            factory,
            config.num_experts,
            config.dim,
            &config.expert,
            config.parallel_experts,
        )?;
        let mixer = config
            .causal_mixing
            .then(|| CausalMixer::new(config.dim, config.mask_fill));

        Self::from_parts(config, router, experts, mixer)
    }

    /// Build a layer whose experts are two-layer feed-forward blocks.
    pub fn with_mlp_experts(config: SoftMoeConfig) -> Result<Self> {
        Self::new(config, &MlpFactory)
    }

    /// Assemble a layer from existing parts, checking they agree with `config`.
    pub fn from_parts(
        config: SoftMoeConfig,
        router: SoftRouter,
        experts: ExpertBank,
        mixer: Option<CausalMixer>,
    ) -> Result<Self> {
        config.validate()?;
        check_router(&config, &router)?;
        if experts.len() != config.num_experts {
            return Err(SoftMoeError::InvalidConfig(format!(
                "expected {} experts, got {}",
                config.num_experts,
                experts.len()
            )));
        }
        match (&mixer, config.causal_mixing) {
            (Some(m), true) if m.dim() != config.dim => {
                return Err(SoftMoeError::shape("mixing bias", &[config.dim], &[m.dim()]));
            }
            (Some(_), true) | (None, false) => {}
            (None, true) | (Some(_), false) => {
                return Err(SoftMoeError::InvalidConfig(
                    "mixer must be present exactly when causal_mixing is enabled".to_string(),
                ));
            }
        }

        if let Some(m) = &mixer {
            if m.mask_fill == MaskFill::Zero {
                tracing::warn!(
                    "causal mixing with zero-filled mask: masked positions keep exp(0) weight"
                );
            }
        }
        tracing::debug!(
            dim = config.dim,
            num_experts = config.num_experts,
            slots_per_expert = config.slots_per_expert,
            normalize = config.normalize,
            causal_mixing = config.causal_mixing,
            params = router.param_count() + experts.param_count(),
            "built soft-moe layer"
        );

        Ok(Self {
            config,
            router,
            experts,
            mixer,
        })
    }

    pub fn config(&self) -> &SoftMoeConfig {
        &self.config
    }

    /// Evaluate the layer: `[B, M, dim] -> [B, M, dim]`.
    pub fn forward<D: Dimension>(&self, x: ArrayView<'_, f32, D>) -> Result<Array3<f32>> {
        Ok(self.forward_traced(x)?.output)
    }

    /// Evaluate the layer and keep every intermediate tensor.
    pub fn forward_traced<D: Dimension>(&self, x: ArrayView<'_, f32, D>) -> Result<SoftMoeTrace> {
        let x = self.check_input(x)?;
        let (batch, seq, _) = x.dim();
        tracing::debug!(batch, seq, "soft-moe forward");

        let routing = self.router.route(x)?;
        let slot_inputs = aggregate_slots(routing.tokens.view(), routing.dispatch.view())?;
        let slot_outputs = self.experts.apply(slot_inputs.view())?;
        let combined = combine_slots(slot_outputs.view(), routing.combine.view())?;
        tracing::trace!(
            slots = ?slot_inputs.shape(),
            combined = ?combined.shape(),
            "soft-moe stages"
        );

        let output = match &self.mixer {
            Some(mixer) => mixer.apply(combined.view(), routing.tokens.view())?,
            None => combined.clone(),
        };

        Ok(SoftMoeTrace {
            routing,
            slot_inputs,
            slot_outputs,
            combined,
            output,
        })
    }

    /// Rank must be 3 and the trailing axis must equal `dim`, checked in that order.
    fn check_input<'a, D: Dimension>(
        &self,
        x: ArrayView<'a, f32, D>,
    ) -> Result<ndarray::ArrayView3<'a, f32>> {
        if x.ndim() != 3 {
            return Err(SoftMoeError::InvalidRank { actual: x.ndim() });
        }
        let width = x.shape()[2];
        if width != self.config.dim {
            return Err(SoftMoeError::DimMismatch {
                expected: self.config.dim,
                actual: width,
            });
        }
        x.into_dimensionality::<Ix3>()
            .map_err(|_| SoftMoeError::InvalidRank { actual: 3 })
    }

    /// Swap in new routing weights, checking they fit this layer.
    pub fn set_router(&mut self, router: SoftRouter) -> Result<()> {
        check_router(&self.config, &router)?;
        self.router = router;
        Ok(())
    }

    /// Load routing weights written by [`SoftRouter::save`]. The layer is
    /// left untouched if the checkpoint does not fit it.
    pub fn load_router(&mut self, path: &Path) -> Result<()> {
        let router = SoftRouter::load(path)?;
        self.set_router(router).map_err(|e| match e {
            SoftMoeError::InvalidConfig(reason) => SoftMoeError::Checkpoint(format!(
                "{}: {}",
                path.display(),
                reason
            )),
            other => other,
        })?;
        tracing::debug!(path = %path.display(), "loaded router weights");
        Ok(())
    }

    /// Reorder experts together with `phi`'s expert axis. The output is unchanged.
    pub fn permute_experts(&mut self, order: &[usize]) -> Result<()> {
        let router = self.router.permute_experts(order)?;
        self.experts.permute(order)?;
        self.router = router;
        Ok(())
    }

    /// All learned tensors: `router.*`, `mixing.*`, then `experts.{i}.*`.
    pub fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        let mut params: Vec<(String, ArrayViewD<'_, f32>)> = self
            .router
            .named_parameters()
            .into_iter()
            .map(|(n, p)| (format!("router.{}", n), p))
            .collect();
        if let Some(mixer) = &self.mixer {
            params.extend(
                mixer
                    .named_parameters()
                    .into_iter()
                    .map(|(n, p)| (format!("mixing.{}", n), p)),
            );
        }
        params.extend(
            self.experts
                .named_parameters()
                .into_iter()
                .map(|(n, p)| (format!("experts.{}", n), p)),
        );
        params
    }

    /// Mutable views of every learned tensor, in the same order as [`Self::named_parameters`].
    pub fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        let mut params: Vec<(String, ArrayViewMutD<'_, f32>)> = self
            .router
            .named_parameters_mut()
            .into_iter()
            .map(|(n, p)| (format!("router.{}", n), p))
            .collect();
        if let Some(mixer) = &mut self.mixer {
            params.extend(
                mixer
                    .named_parameters_mut()
                    .into_iter()
                    .map(|(n, p)| (format!("mixing.{}", n), p)),
            );
        }
        params.extend(
            self.experts
                .named_parameters_mut()
                .into_iter()
                .map(|(n, p)| (format!("experts.{}", n), p)),
        );
        params
    }

    pub fn param_count(&self) -> usize {
        self.named_parameters().iter().map(|(_, p)| p.len()).sum()
    }
}

/// `phi` must be `[dim, num_experts, slots_per_expert]` and carry a scale
/// exactly when the config normalises.
fn check_router(config: &SoftMoeConfig, router: &SoftRouter) -> Result<()> {
    let expected_phi = [config.dim, config.num_experts, config.slots_per_expert];
    if router.phi.shape() != expected_phi {
        return Err(SoftMoeError::shape("routing tensor", &expected_phi, router.phi.shape()));
    }
    if router.normalizes() != config.normalize {
        return Err(SoftMoeError::InvalidConfig(format!(
            "router normalisation ({}) does not match config ({})",
            router.normalizes(),
            config.normalize
        )));
    }
    router.scale_value()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SUM_TOLERANCE;
    use crate::experts::{Expert, ExpertConfig, IdentityFactory, MlpExpert};
    use ndarray::{Array1, Array2, Array4, Axis};
    use tempfile::tempdir;

    fn small_config() -> SoftMoeConfig {
        SoftMoeConfig {
            expert: ExpertConfig {
                hidden_dim: Some(16),
                seed: 100,
                ..ExpertConfig::default()
            },
            ..SoftMoeConfig::new(8, 3, 2)
        }
    }

    fn tokens(batch: usize, seq: usize, dim: usize) -> Array3<f32> {
        Array3::from_shape_fn((batch, seq, dim), |(b, m, d)| {
            ((b * 19 + m * 7 + d * 3) as f32 * 0.41).sin() * 1.5
        })
    }

    fn max_abs_diff(a: &Array3<f32>, b: &Array3<f32>) -> f32 {
        a.iter()
            .zip(b.iter())
            .fold(0.0f32, |acc, (x, y)| acc.max((x - y).abs()))
    }

    #[test]
    fn test_output_shape_matches_input() {
        let layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        for (batch, seq) in [(1, 1), (2, 5), (3, 7)] {
            let out = layer.forward(tokens(batch, seq, 8).view()).unwrap();
            assert_eq!(out.dim(), (batch, seq, 8));
            assert!(out.iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_routing_weights_normalised() {
        let layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let trace = layer.forward_traced(tokens(2, 6, 8).view()).unwrap();
        let plan = &trace.routing;

        let dispatch_sums = plan.dispatch.sum_axis(Axis(1)); // [B, N, P]
        assert!(dispatch_sums.iter().all(|s| (s - 1.0).abs() < SUM_TOLERANCE));

        let combine_sums = plan.combine.sum_axis(Axis(3)).sum_axis(Axis(2)); // [B, M]
        assert!(combine_sums.iter().all(|s| (s - 1.0).abs() < SUM_TOLERANCE));

        assert_eq!(trace.slot_inputs.dim(), (2, 3, 2, 8));
        assert_eq!(trace.slot_outputs.dim(), (2, 3, 2, 8));
    }

    #[test]
    fn test_deterministic() {
        let x = tokens(2, 4, 8);
        let a = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let b = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let first = a.forward(x.view()).unwrap();
        assert_eq!(first, a.forward(x.view()).unwrap());
        assert_eq!(first, b.forward(x.view()).unwrap());
    }

    #[test]
    fn test_permutation_covariance() {
        let x = tokens(2, 5, 8);
        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let before = layer.forward(x.view()).unwrap();
        layer.permute_experts(&[2, 0, 1]).unwrap();
        let after = layer.forward(x.view()).unwrap();
        assert!(max_abs_diff(&before, &after) < 1e-5);
    }

    #[test]
    fn test_permuting_router_alone_changes_output() {
        let x = tokens(1, 4, 8);
        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let before = layer.forward(x.view()).unwrap();
        layer.router = layer.router.permute_experts(&[1, 2, 0]).unwrap();
        let after = layer.forward(x.view()).unwrap();
        assert!(max_abs_diff(&before, &after) > 1e-6);
    }

    #[test]
    fn test_rank_violations() {
        let layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();

        let rank2 = Array2::<f32>::zeros((3, 8));
        let err = layer.forward(rank2.view()).unwrap_err();
        assert_eq!(err, SoftMoeError::InvalidRank { actual: 2 });
        assert!(err.to_string().contains("expected to have 3 dimensions but has 2"));

        let rank4 = Array4::<f32>::zeros((1, 2, 3, 8));
        let err = layer.forward(rank4.view()).unwrap_err();
        assert_eq!(err, SoftMoeError::InvalidRank { actual: 4 });
        assert!(err.to_string().contains("but has 4"));
    }

    #[test]
    fn test_dim_mismatch() {
        let layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let x = Array3::<f32>::zeros((1, 3, 5));
        let err = layer.forward(x.view()).unwrap_err();
        assert_eq!(
            err,
            SoftMoeError::DimMismatch {
                expected: 8,
                actual: 5
            }
        );
        assert!(err
            .to_string()
            .contains("input feature dim of 5 does not match layer dim of 8"));
    }

    #[test]
    fn test_identity_experts_stay_in_convex_hull() {
        let config = SoftMoeConfig::new(8, 2, 2);
        let layer = SoftMoeLayer::new(config, &IdentityFactory).unwrap();
        let x = Array3::from_shape_fn((1, 3, 8), |(_, m, d)| (m * 8 + d + 1) as f32 * 0.5 - 6.0);

        let trace = layer.forward_traced(x.view()).unwrap();
        assert_eq!(trace.output.dim(), (1, 3, 8));

        let max_input = x.iter().fold(0.0f32, |acc, v| acc.max(v.abs()));
        let max_routed = trace
            .routing
            .tokens
            .iter()
            .fold(0.0f32, |acc, v| acc.max(v.abs()));
        for v in trace.output.iter() {
            assert!(v.abs() <= max_routed + 1e-6);
            assert!(v.abs() <= max_input);
        }
        // Identity experts: slot outputs are the slot inputs.
        assert_eq!(trace.slot_inputs, trace.slot_outputs);
    }

    #[test]
    fn test_uniform_routing_averages_tokens() {
        // With phi = 0 every weight is uniform, so each output token is the
        // mean of all (unnormalised) input tokens.
        let config = SoftMoeConfig {
            normalize: false,
            ..SoftMoeConfig::new(4, 2, 3)
        };
        let router = SoftRouter::zeros(4, 2, 3, false);
        let experts = ExpertBank::build(&IdentityFactory, 2, 4, &config.expert, false).unwrap();
        let layer = SoftMoeLayer::from_parts(config, router, experts, None).unwrap();

        let x = tokens(2, 5, 4);
        let out = layer.forward(x.view()).unwrap();
        let mean = x.mean_axis(Axis(1)).unwrap(); // [B, D]
        for b in 0..2 {
            for m in 0..5 {
                for d in 0..4 {
                    assert!((out[[b, m, d]] - mean[[b, d]]).abs() < 1e-5);
                }
            }
        }
    }

    #[test]
    fn test_mixing_single_position_regression() {
        let config = SoftMoeConfig {
            causal_mixing: true,
            ..small_config()
        };
        let layer = SoftMoeLayer::with_mlp_experts(config).unwrap();
        let trace = layer.forward_traced(tokens(3, 1, 8).view()).unwrap();

        // One position: the mask keeps only self, softmax gives 1, so the
        // output is the rescaled combined tokens.
        let expected = &trace.combined * &trace.routing.tokens;
        assert!(max_abs_diff(&trace.output, &expected) < 1e-6);
    }

    #[test]
    fn test_mixing_changes_longer_sequences() {
        let config = SoftMoeConfig {
            causal_mixing: true,
            ..small_config()
        };
        let layer = SoftMoeLayer::with_mlp_experts(config).unwrap();
        let trace = layer.forward_traced(tokens(1, 4, 8).view()).unwrap();
        assert_eq!(trace.output.dim(), (1, 4, 8));
        assert!(max_abs_diff(&trace.output, &trace.combined) > 1e-6);
    }

    #[test]
    fn test_normalize_off_has_no_scale() {
        let config = SoftMoeConfig {
            normalize: false,
            ..small_config()
        };
        let layer = SoftMoeLayer::with_mlp_experts(config).unwrap();
        let names: Vec<String> = layer.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert!(!names.iter().any(|n| n == "router.scale"));

        let x = tokens(1, 3, 8);
        let trace = layer.forward_traced(x.view()).unwrap();
        assert_eq!(trace.routing.tokens, x);
    }

    #[test]
    fn test_parameter_names_and_count() {
        let config = SoftMoeConfig {
            causal_mixing: true,
            ..small_config()
        };
        let layer = SoftMoeLayer::with_mlp_experts(config).unwrap();
        let names: Vec<String> = layer.named_parameters().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names[0], "router.phi");
        assert_eq!(names[1], "router.scale");
        assert_eq!(names[2], "mixing.bias");
        assert_eq!(names[3], "experts.0.fc1.weight");
        assert_eq!(names.len(), 3 + 3 * 4);

        let expert_params = 8 * 16 + 16 + 16 * 8 + 8;
        assert_eq!(layer.param_count(), 8 * 3 * 2 + 1 + 8 + 3 * expert_params);
    }

    #[test]
    fn test_external_update_changes_output() {
        let x = tokens(1, 3, 8);
        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let before = layer.forward(x.view()).unwrap();
        for (name, mut p) in layer.named_parameters_mut() {
            if name == "router.phi" {
                p.mapv_inplace(|v| -v);
            }
        }
        let after = layer.forward(x.view()).unwrap();
        assert!(max_abs_diff(&before, &after) > 1e-6);
    }

    #[test]
    fn test_from_parts_rejects_mismatches() {
        let config = small_config();
        let expert_config = config.expert.clone();
        let experts = || ExpertBank::build(&IdentityFactory, 3, 8, &expert_config, false).unwrap();

        let wrong_phi = SoftRouter::from_weights(Array3::zeros((8, 2, 2)), Some(1.0)).unwrap();
        assert!(matches!(
            SoftMoeLayer::from_parts(config.clone(), wrong_phi, experts(), None),
            Err(SoftMoeError::ShapeMismatch { context: "routing tensor", .. })
        ));

        let wrong_norm = SoftRouter::from_weights(Array3::zeros((8, 3, 2)), None).unwrap();
        assert!(SoftMoeLayer::from_parts(config.clone(), wrong_norm, experts(), None).is_err());

        let router = SoftRouter::from_weights(Array3::zeros((8, 3, 2)), Some(1.0)).unwrap();
        let two = ExpertBank::build(&IdentityFactory, 2, 8, &expert_config, false).unwrap();
        assert!(SoftMoeLayer::from_parts(config.clone(), router.clone(), two, None).is_err());

        let stray_mixer = Some(CausalMixer::new(8, MaskFill::Zero));
        assert!(SoftMoeLayer::from_parts(config.clone(), router.clone(), experts(), stray_mixer).is_err());

        assert!(SoftMoeLayer::from_parts(config, router, experts(), None).is_ok());
    }

    #[test]
    fn test_load_router_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("router.bin");
        let x = tokens(2, 3, 8);

        let source = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        source.router.save(&path).unwrap();

        let mut target = SoftMoeLayer::with_mlp_experts(SoftMoeConfig {
            seed: 4242,
            ..small_config()
        })
        .unwrap();
        assert_ne!(target.router, source.router);
        target.load_router(&path).unwrap();
        assert_eq!(target.router, source.router);
        assert_eq!(target.forward(x.view()).unwrap(), source.forward(x.view()).unwrap());
    }

    #[test]
    fn test_load_router_rejects_wrong_shape() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("narrow.bin");
        SoftRouter::new(4, 3, 2, true, 1).unwrap().save(&path).unwrap();

        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let before = layer.router.clone();
        let err = layer.load_router(&path).unwrap_err();
        assert!(matches!(
            err,
            SoftMoeError::ShapeMismatch { context: "routing tensor", .. }
        ));
        assert_eq!(layer.router, before);
    }

    #[test]
    fn test_load_router_rejects_missing_scale() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unscaled.bin");
        SoftRouter::new(8, 3, 2, false, 1).unwrap().save(&path).unwrap();

        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        assert!(matches!(
            layer.load_router(&path),
            Err(SoftMoeError::Checkpoint(_))
        ));
    }

    #[test]
    fn test_set_router_rejects_wrong_scale_length() {
        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        let mut router = layer.router.clone();
        router.scale = Some(Array1::ones(2));
        assert!(layer.set_router(router).is_err());
    }

    #[test]
    fn test_malformed_expert_bias_errors() {
        let config = small_config();
        let mut broken = MlpExpert::new(&config.expert.for_expert(8, 0)).unwrap();
        broken.b1 = Some(Array1::zeros(3));
        let mut experts: Vec<Box<dyn Expert>> = vec![Box::new(broken)];
        for i in 1..3 {
            experts.push(Box::new(MlpExpert::new(&config.expert.for_expert(8, i)).unwrap()));
        }
        let bank = ExpertBank::new(experts, false);
        let router = SoftRouter::new(8, 3, 2, true, config.seed).unwrap();
        let layer = SoftMoeLayer::from_parts(config, router, bank, None).unwrap();

        let err = layer.forward(Array3::<f32>::ones((1, 3, 8)).view()).unwrap_err();
        assert!(matches!(err, SoftMoeError::Expert { index: 0, .. }));
        assert!(err.to_string().contains("expert up bias"));
    }

    #[test]
    fn test_tampered_expert_bank_fails_fast() {
        let mut layer = SoftMoeLayer::with_mlp_experts(small_config()).unwrap();
        layer.experts = ExpertBank::build(&IdentityFactory, 2, 8, &ExpertConfig::default(), false).unwrap();
        assert!(layer.forward(tokens(1, 2, 8).view()).is_err());
    }

    #[test]
    fn test_closure_factory_sees_each_index() {
        let factory = |i: usize, cfg: &ExpertConfig| -> Result<Box<dyn Expert>> {
            assert_eq!(cfg.dim, 8);
            assert_eq!(cfg.seed, 100 + i as u64);
            Ok(Box::new(crate::experts::IdentityExpert::new(cfg.dim)))
        };
        let layer = SoftMoeLayer::new(small_config(), &factory).unwrap();
        assert_eq!(layer.experts.len(), 3);
        assert!(layer.experts.get(2).is_some());
        assert!(layer.experts.get(3).is_none());
        let out = layer.forward(tokens(1, 2, 8).view()).unwrap();
        assert_eq!(out.dim(), (1usize, 2usize, 8usize));
    }
}
