//! Broadcast elementwise arithmetic with fused activation.
//!
//! Three execution shapes, selected by the caller once per kernel instance:
//! - equal shapes: a flat element loop
//! - one single-element operand: the scalar ("opt") loop
//! - general broadcast: outer indices over the dimensions up to the last
//!   differing one, with a flat element loop over the contiguous tail
//!
//! Operand shapes must be padded to a common rank before calling the
//! broadcast entry points.

use crate::activation::Activation;

/// Binary arithmetic operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    #[inline]
    fn eval_f32(self, a: f32, b: f32) -> f32 {
        match self {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
            ArithOp::Div => a / b,
        }
    }

    #[inline]
    fn eval_i32(self, a: i32, b: i32) -> i32 {
        match self {
            ArithOp::Add => a.wrapping_add(b),
            ArithOp::Sub => a.wrapping_sub(b),
            ArithOp::Mul => a.wrapping_mul(b),
            // Integer division is rejected when the kernel is built; this arm
            // stays total so the operator table is uniform.
            ArithOp::Div => a.checked_div(b).unwrap_or(0),
        }
    }
}

#[inline]
fn element_loop<T: Copy>(a: &[T], b: &[T], out: &mut [T], f: impl Fn(T, T) -> T) {
    debug_assert_eq!(a.len(), out.len());
    debug_assert_eq!(b.len(), out.len());
    for i in 0..out.len() {
        out[i] = f(a[i], b[i]);
    }
}

/// Elementwise `out[i] = act(op(a[i], b[i]))` over equal-length slices.
pub fn element_binary_f32(op: ArithOp, act: Activation, a: &[f32], b: &[f32], out: &mut [f32]) {
    element_loop(a, b, out, |x, y| act.apply_f32(op.eval_f32(x, y)));
}

/// Elementwise arithmetic over i32 slices.
pub fn element_binary_i32(op: ArithOp, act: Activation, a: &[i32], b: &[i32], out: &mut [i32]) {
    element_loop(a, b, out, |x, y| act.apply_i32(op.eval_i32(x, y)));
}

/// Scalar fast path: one operand has a single element. `scalar_is_lhs`
/// preserves operand order for the non-commutative operators.
pub fn element_binary_opt_f32(
    op: ArithOp,
    act: Activation,
    scalar: f32,
    v: &[f32],
    out: &mut [f32],
    scalar_is_lhs: bool,
) {
    debug_assert_eq!(v.len(), out.len());
    if scalar_is_lhs {
        for i in 0..out.len() {
            out[i] = act.apply_f32(op.eval_f32(scalar, v[i]));
        }
    } else {
        for i in 0..out.len() {
            out[i] = act.apply_f32(op.eval_f32(v[i], scalar));
        }
    }
}

/// Scalar fast path over i32 slices.
pub fn element_binary_opt_i32(
    op: ArithOp,
    act: Activation,
    scalar: i32,
    v: &[i32],
    out: &mut [i32],
    scalar_is_lhs: bool,
) {
    debug_assert_eq!(v.len(), out.len());
    if scalar_is_lhs {
        for i in 0..out.len() {
            out[i] = act.apply_i32(op.eval_i32(scalar, v[i]));
        }
    } else {
        for i in 0..out.len() {
            out[i] = act.apply_i32(op.eval_i32(v[i], scalar));
        }
    }
}

/// Index of the last dimension where two rank-aligned shapes differ, or
/// `None` when they are identical (the element path applies).
pub fn last_differing_dim(a_dims: &[usize], b_dims: &[usize]) -> Option<usize> {
    debug_assert_eq!(a_dims.len(), b_dims.len());
    (0..a_dims.len()).rev().find(|&i| a_dims[i] != b_dims[i])
}

/// Contiguous strides for `dims`, zeroed on broadcast (size-1) dimensions.
fn broadcast_strides(dims: &[usize]) -> Vec<usize> {
    let ndim = dims.len();
    let mut strides = vec![0usize; ndim];
    let mut acc = 1usize;
    for i in (0..ndim).rev() {
        strides[i] = if dims[i] == 1 { 0 } else { acc };
        acc *= dims[i];
    }
    strides
}

#[allow(clippy::too_many_arguments)]
fn broadcast_loop<T: Copy>(
    a: &[T],
    a_dims: &[usize],
    b: &[T],
    b_dims: &[usize],
    out: &mut [T],
    out_dims: &[usize],
    outer_start: usize,
    f: impl Fn(T, T) -> T,
) {
    let Some(break_pos) = last_differing_dim(a_dims, b_dims) else {
        element_loop(&a[..out.len()], &b[..out.len()], out, f);
        return;
    };

    let inner: usize = out_dims[break_pos + 1..].iter().product();
    debug_assert!(inner > 0 && out.len() % inner == 0);
    let a_strides = broadcast_strides(a_dims);
    let b_strides = broadcast_strides(b_dims);

    for (block, out_chunk) in out.chunks_exact_mut(inner).enumerate() {
        // Decompose the flat outer index over out_dims[..=break_pos].
        let mut rest = outer_start + block;
        let mut a_off = 0usize;
        let mut b_off = 0usize;
        for k in (0..=break_pos).rev() {
            let idx = rest % out_dims[k];
            rest /= out_dims[k];
            a_off += idx * a_strides[k];
            b_off += idx * b_strides[k];
        }
        let a_block = &a[a_off..a_off + inner];
        let b_block = &b[b_off..b_off + inner];
        element_loop(a_block, b_block, out_chunk, &f);
    }
}

/// Broadcast binary arithmetic over f32 data.
///
/// `out` is the contiguous destination for outer blocks starting at flat
/// outer index `outer_start`; callers hand disjoint chunks to workers.
#[allow(clippy::too_many_arguments)]
pub fn broadcast_binary_f32(
    op: ArithOp,
    act: Activation,
    a: &[f32],
    a_dims: &[usize],
    b: &[f32],
    b_dims: &[usize],
    out: &mut [f32],
    out_dims: &[usize],
    outer_start: usize,
) {
    broadcast_loop(a, a_dims, b, b_dims, out, out_dims, outer_start, |x, y| {
        act.apply_f32(op.eval_f32(x, y))
    });
}

/// Broadcast binary arithmetic over i32 data.
#[allow(clippy::too_many_arguments)]
pub fn broadcast_binary_i32(
    op: ArithOp,
    act: Activation,
    a: &[i32],
    a_dims: &[usize],
    b: &[i32],
    b_dims: &[usize],
    out: &mut [i32],
    out_dims: &[usize],
    outer_start: usize,
) {
    broadcast_loop(a, a_dims, b, b_dims, out, out_dims, outer_start, |x, y| {
        act.apply_i32(op.eval_i32(x, y))
    });
}
