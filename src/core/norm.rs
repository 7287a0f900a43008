//! L2 normalisation along a single axis.

use ndarray::{Array, ArrayView, Axis, Dimension};

use crate::config::NORM_EPS;
use crate::error::{Result, SoftMoeError};

/// Divide every lane of `x` along `axis` by its L2 norm, clamped below at `NORM_EPS`.
///
/// A zero lane stays zero rather than turning into NaN.
pub fn l2_normalize<D: Dimension>(x: ArrayView<'_, f32, D>, axis: usize) -> Result<Array<f32, D>> {
    if axis >= x.ndim() {
        return Err(SoftMoeError::InvalidAxes(format!(
            "axis {} out of range for rank {}",
            axis,
            x.ndim()
        )));
    }

    let x = x.into_dyn();
    let norms = x
        .map_axis(Axis(axis), |lane| lane.dot(&lane).sqrt().max(NORM_EPS))
        .insert_axis(Axis(axis));
    let out = &x / &norms;

    out.into_dimensionality::<D>()
        .map_err(|e| SoftMoeError::InvalidAxes(e.to_string()))
}
