//! Numerically-stable softmax over one axis or a joint set of axes.
//!
//! For a set of axes `A`, every slice obtained by fixing the remaining axes is
//! normalised as a single distribution:
//!
//!   softmax(x)_i = exp(x_i - max_A x) / Σ_A exp(x_j - max_A x)
//!
//! The max and the sum both keep the reduced axes with length 1 so they
//! broadcast back over `x`. Reducing several axes at once is *not* the same
//! as applying single-axis softmaxes one after another.

use ndarray::{Array, ArrayD, ArrayView, ArrayView1, ArrayViewD, Axis, Dimension};

use crate::error::{Result, SoftMoeError};

/// Softmax of `x` jointly over `axes`.
///
/// `axes` must be non-empty, in range, and free of duplicates.
pub fn softmax<D: Dimension>(x: ArrayView<'_, f32, D>, axes: &[usize]) -> Result<Array<f32, D>> {
    check_axes(x.ndim(), axes)?;

    let x = x.into_dyn();
    let max = reduce_keep(x.view(), axes, |lane| {
        lane.fold(f32::NEG_INFINITY, |acc, &v| acc.max(v))
    });
    let exp = (&x - &max).mapv(f32::exp);
    let sum = reduce_keep(exp.view(), axes, |lane| lane.sum());
    let out = exp / &sum;

    out.into_dimensionality::<D>()
        .map_err(|e| SoftMoeError::InvalidAxes(e.to_string()))
}

/// Softmax over the last axis.
pub fn softmax_last<D: Dimension>(x: ArrayView<'_, f32, D>) -> Result<Array<f32, D>> {
    let ndim = x.ndim();
    if ndim == 0 {
        return Err(SoftMoeError::InvalidAxes(
            "cannot take softmax of a rank-0 array".to_string(),
        ));
    }
    softmax(x, &[ndim - 1])
}

/// Reduce `x` over each of `axes` in turn, keeping every reduced axis with length 1.
///
/// Max-of-max and sum-of-sum are associative, so sequential reduction gives the
/// joint statistic.
fn reduce_keep<F>(x: ArrayViewD<'_, f32>, axes: &[usize], reduce: F) -> ArrayD<f32>
where
    F: Fn(ArrayView1<'_, f32>) -> f32,
{
    let mut acc = x.to_owned();
    for &axis in axes {
        acc = acc
            .map_axis(Axis(axis), |lane| reduce(lane))
            .insert_axis(Axis(axis));
    }
    acc
}

fn check_axes(ndim: usize, axes: &[usize]) -> Result<()> {
    if axes.is_empty() {
        return Err(SoftMoeError::InvalidAxes(
            "at least one axis is required".to_string(),
        ));
    }
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= ndim {
            return Err(SoftMoeError::InvalidAxes(format!(
                "axis {} out of range for rank {}",
                axis, ndim
            )));
        }
        if axes[..i].contains(&axis) {
            return Err(SoftMoeError::InvalidAxes(format!("axis {} repeated", axis)));
        }
    }
    Ok(())
}
