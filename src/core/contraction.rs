//! Batched contractions between tokens, slots and routing weights.
//!
//! All three stages reduce to one batched matrix product once the
//! `(expert, slot)` axes are flattened into a single slot axis of length
//! `N·P`:
//!
//! | stage     | einsum              | per-batch product           |
//! |-----------|---------------------|-----------------------------|
//! | logits    | `bmd,dnp->bmnp`     | `[M,D] · [D,NP] -> [M,NP]`  |
//! | aggregate | `bmd,bmnp->bnpd`    | `[M,NP]ᵀ · [M,D] -> [NP,D]` |
//! | combine   | `bnpd,bmnp->bmd`    | `[M,NP] · [NP,D] -> [M,D]`  |

use ndarray::{s, Array2, Array3, Array4, ArrayView2, ArrayView3, ArrayView4, Axis};

use crate::error::{Result, SoftMoeError};

/// `logits[b,m,n,p] = Σ_d x[b,m,d] · phi[d,n,p]`.
pub fn route_logits(x: ArrayView3<'_, f32>, phi: ArrayView3<'_, f32>) -> Result<Array4<f32>> {
    let (batch, seq, dim) = x.dim();
    let (phi_dim, experts, slots) = phi.dim();
    if phi_dim != dim {
        return Err(SoftMoeError::shape(
            "routing tensor",
            &[dim, experts, slots],
            phi.shape(),
        ));
    }

    let phi_flat = Array2::from_shape_vec((dim, experts * slots), phi.iter().copied().collect())
        .map_err(|_| SoftMoeError::shape("routing tensor", &[dim, experts, slots], phi.shape()))?;
    let out = batched_matmul(x, Rhs::Shared(phi_flat.view()), false)?;
    reshape4(out, (batch, seq, experts, slots), "logits")
}

/// `xs[b,n,p,d] = Σ_m x[b,m,d] · dispatch[b,m,n,p]`.
pub fn aggregate_slots(
    x: ArrayView3<'_, f32>,
    dispatch: ArrayView4<'_, f32>,
) -> Result<Array4<f32>> {
    let (batch, seq, dim) = x.dim();
    let (wb, wm, experts, slots) = dispatch.dim();
    if (wb, wm) != (batch, seq) {
        return Err(SoftMoeError::shape(
            "dispatch weights",
            &[batch, seq, experts, slots],
            dispatch.shape(),
        ));
    }

    let weights = merge_slot_axes(dispatch, "dispatch weights")?;
    let out = batched_matmul(weights.view(), Rhs::Batched(x), true)?;
    reshape4(out, (batch, experts, slots, dim), "slot inputs")
}

/// `y[b,m,d] = Σ_{n,p} ys[b,n,p,d] · combine[b,m,n,p]`.
pub fn combine_slots(ys: ArrayView4<'_, f32>, combine: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
    let (batch, experts, slots, _dim) = ys.dim();
    let (cb, seq, cn, cp) = combine.dim();
    if (cb, cn, cp) != (batch, experts, slots) {
        return Err(SoftMoeError::shape(
            "combine weights",
            &[batch, seq, experts, slots],
            combine.shape(),
        ));
    }

    let weights = merge_slot_axes(combine, "combine weights")?;
    let values = merge_leading_slot_axes(ys)?;
    batched_matmul(weights.view(), Rhs::Batched(values.view()), false)
}

enum Rhs<'a> {
    /// One matrix used for every batch element.
    Shared(ArrayView2<'a, f32>),
    /// One matrix per batch element.
    Batched(ArrayView3<'a, f32>),
}

/// `out[b] = op(lhs[b]) · rhs[b]`, where `op` optionally transposes.
fn batched_matmul(
    lhs: ArrayView3<'_, f32>,
    rhs: Rhs<'_>,
    transpose_lhs: bool,
) -> Result<Array3<f32>> {
    let (batch, rows, inner) = if transpose_lhs {
        let (b, m, k) = lhs.dim();
        (b, k, m)
    } else {
        lhs.dim()
    };
    let cols = match &rhs {
        Rhs::Shared(r) => {
            if r.nrows() != inner {
                return Err(SoftMoeError::shape("contraction", &[inner, r.ncols()], r.shape()));
            }
            r.ncols()
        }
        Rhs::Batched(r) => {
            let (rb, rk, rc) = r.dim();
            if rb != batch || rk != inner {
                return Err(SoftMoeError::shape("contraction", &[batch, inner, rc], r.shape()));
            }
            rc
        }
    };

    let mut out = Array3::zeros((batch, rows, cols));
    for b in 0..batch {
        let a = lhs.index_axis(Axis(0), b);
        let a = if transpose_lhs { a.reversed_axes() } else { a };
        let product = match &rhs {
            Rhs::Shared(r) => a.dot(r),
            Rhs::Batched(r) => a.dot(&r.index_axis(Axis(0), b)),
        };
        out.slice_mut(s![b, .., ..]).assign(&product);
    }
    Ok(out)
}

/// `[B, M, N, P]` -> `[B, M, N·P]`.
fn merge_slot_axes(w: ArrayView4<'_, f32>, context: &'static str) -> Result<Array3<f32>> {
    let (b, m, n, p) = w.dim();
    Array3::from_shape_vec((b, m, n * p), w.iter().copied().collect())
        .map_err(|_| SoftMoeError::shape(context, &[b, m, n * p], w.shape()))
}

/// `[B, N, P, D]` -> `[B, N·P, D]`.
fn merge_leading_slot_axes(ys: ArrayView4<'_, f32>) -> Result<Array3<f32>> {
    let (b, n, p, d) = ys.dim();
    Array3::from_shape_vec((b, n * p, d), ys.iter().copied().collect())
        .map_err(|_| SoftMoeError::shape("slot outputs", &[b, n * p, d], ys.shape()))
}

fn reshape4(
    out: Array3<f32>,
    shape: (usize, usize, usize, usize),
    context: &'static str,
) -> Result<Array4<f32>> {
    let actual = out.shape().to_vec();
    out.into_shape_with_order(shape)
        .map_err(|_| SoftMoeError::shape(context, &[shape.0, shape.1, shape.2, shape.3], &actual))
}
