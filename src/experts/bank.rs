//! Expert bank: applies expert `i` to slot group `i`.
//!
//! Experts share nothing, so the bank can evaluate them in any order. With
//! `parallel` set, rayon spreads experts across its thread pool; the result
//! is identical to the sequential path.

use ndarray::{stack, Array3, Array4, ArrayView3, ArrayView4, ArrayViewD, ArrayViewMutD, Axis};
use rayon::prelude::*;

use crate::error::{Result, SoftMoeError};
use crate::experts::{Expert, ExpertConfig, ExpertFactory};
use crate::routing::router::check_permutation;

pub struct ExpertBank {
    experts: Vec<Box<dyn Expert>>,

    /// Evaluate experts on the rayon pool.
    pub parallel: bool,
}

impl ExpertBank {
    /// Wrap an ordered list of experts.
    pub fn new(experts: Vec<Box<dyn Expert>>, parallel: bool) -> Self {
        Self { experts, parallel }
    }

    /// Build `count` experts from `factory`, handing expert `i` the config
    /// `config.for_expert(dim, i)`.
    pub fn build(
        factory: &dyn ExpertFactory,
        count: usize,
        dim: usize,
        config: &ExpertConfig,
        parallel: bool,
    ) -> Result<Self> {
        let experts = (0..count)
            .map(|i| {
                let cfg = config.for_expert(dim, i);
                cfg.validate()?;
                factory.create(i, &cfg)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(experts, parallel))
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&dyn Expert> {
        self.experts.get(index).map(|e| e.as_ref())
    }

    /// Apply every expert to its slots: `xs[:, i] -> ys[:, i]`, both `[B, N, P, D]`.
    pub fn apply(&self, xs: ArrayView4<'_, f32>) -> Result<Array4<f32>> {
        let (_, experts, _, _) = xs.dim();
        if experts != self.experts.len() {
            return Err(SoftMoeError::shape(
                "slot inputs (experts axis)",
                &[self.experts.len()],
                &[experts],
            ));
        }

        let outputs: Vec<Array3<f32>> = if self.parallel {
            self.experts
                .par_iter()
                .enumerate()
                .map(|(i, expert)| run_expert(i, expert.as_ref(), xs.index_axis(Axis(1), i)))
                .collect::<Result<_>>()?
        } else {
            self.experts
                .iter()
                .enumerate()
                .map(|(i, expert)| run_expert(i, expert.as_ref(), xs.index_axis(Axis(1), i)))
                .collect::<Result<_>>()?
        };

        let views: Vec<ArrayView3<'_, f32>> = outputs.iter().map(|o| o.view()).collect();
        stack(Axis(1), &views).map_err(|_| {
            SoftMoeError::shape("slot outputs", xs.shape(), &[outputs.len()])
        })
    }

    /// Reorder experts so that new expert `i` is old expert `order[i]`.
    pub fn permute(&mut self, order: &[usize]) -> Result<()> {
        check_permutation(order, self.experts.len())?;
        let mut slots: Vec<Option<Box<dyn Expert>>> = self.experts.drain(..).map(Some).collect();
        let mut reordered = Vec::with_capacity(slots.len());
        for &i in order {
            match slots[i].take() {
                Some(expert) => reordered.push(expert),
                None => {
                    return Err(SoftMoeError::InvalidConfig(format!(
                        "expert {} used twice in permutation",
                        i
                    )))
                }
            }
        }
        self.experts = reordered;
        Ok(())
    }

    pub fn named_parameters(&self) -> Vec<(String, ArrayViewD<'_, f32>)> {
        self.experts
            .iter()
            .enumerate()
            .flat_map(|(i, e)| {
                e.named_parameters()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", i, name), p))
            })
            .collect()
    }

    pub fn named_parameters_mut(&mut self) -> Vec<(String, ArrayViewMutD<'_, f32>)> {
        self.experts
            .iter_mut()
            .enumerate()
            .flat_map(|(i, e)| {
                e.named_parameters_mut()
                    .into_iter()
                    .map(move |(name, p)| (format!("{}.{}", i, name), p))
            })
            .collect()
    }

    pub fn param_count(&self) -> usize {
        self.experts.iter().map(|e| e.param_count()).sum()
    }
}

fn run_expert(index: usize, expert: &dyn Expert, slots: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
    let out = expert.forward(slots).map_err(|e| SoftMoeError::Expert {
        index,
        reason: e.to_string(),
    })?;
    if out.dim() != slots.dim() {
        return Err(SoftMoeError::Expert {
            index,
            reason: format!(
                "output shape {:?} does not match input shape {:?}",
                out.shape(),
                slots.shape()
            ),
        });
    }
    Ok(out)
}
