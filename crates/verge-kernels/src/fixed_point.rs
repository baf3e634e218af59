//! Fixed-point primitives for int8 requantization.
//!
//! Quantized kernels express a real-valued scale `r` as an integer multiplier
//! `m` and a shift `s` with `r = m * 2^(s - 31)`, where `m` is in
//! `[2^30, 2^31)`. Applying the scale is then a doubling high multiply
//! followed by a rounding power-of-two divide, with no floating point on the
//! hot path.

/// Decompose a positive real multiplier into `(multiplier, shift)` such that
/// `real = multiplier * 2^(shift - 31)` with `multiplier` in `[2^30, 2^31)`.
///
/// Returns `(0, 0)` for a zero input.
pub fn quantize_multiplier(real: f64) -> (i32, i32) {
    if real == 0.0 {
        return (0, 0);
    }
    debug_assert!(real > 0.0 && real.is_finite());

    let mut shift = 0i32;
    let mut m = real;
    while m < 0.5 {
        m *= 2.0;
        shift -= 1;
    }
    while m >= 1.0 {
        m *= 0.5;
        shift += 1;
    }

    let mut q = (m * (1i64 << 31) as f64).round() as i64;
    // Rounding can push the mantissa to exactly 2^31; renormalize.
    if q == 1i64 << 31 {
        q /= 2;
        shift += 1;
    }
    (q as i32, shift)
}

/// Variant for multipliers in `(0, 1]`: returns `(multiplier, right_shift)`
/// where `right_shift = -shift` is non-negative for inputs below one.
pub fn quantize_multiplier_smaller_than_one(real: f64) -> (i32, i32) {
    let (m, shift) = quantize_multiplier(real);
    (m, -shift)
}

/// High 32 bits of `a * b * 2`, with round-to-nearest on the discarded bits.
///
/// The single overflow case `i32::MIN * i32::MIN` saturates to `i32::MAX`.
pub fn saturating_rounding_doubling_high_mul(a: i32, b: i32) -> i32 {
    if a == i32::MIN && b == i32::MIN {
        return i32::MAX;
    }
    let prod = a as i64 * b as i64;
    let nudge = if prod >= 0 { 1i64 << 30 } else { 1 - (1i64 << 30) };
    ((prod + nudge) / (1i64 << 31)) as i32
}

/// Divide by `2^exponent`, rounding to nearest with exact ties toward zero.
///
/// Tie direction matters: the final requantization step of the int8 add
/// pipeline lands on exact `.5` values whenever operand scales divide the
/// output scale, and those must not drift upward.
pub fn rounding_divide_by_pot(x: i32, exponent: i32) -> i32 {
    debug_assert!((0..=31).contains(&exponent));
    if exponent == 0 {
        return x;
    }
    let xl = x as i64;
    let floor = xl >> exponent;
    let rem = xl - (floor << exponent);
    let half = 1i64 << (exponent - 1);
    let round_up = if x >= 0 { rem > half } else { rem >= half };
    (floor + round_up as i64) as i32
}

/// Apply a quantized multiplier: shift `value` left, scale by `multiplier`,
/// then shift right with rounding.
///
/// The left shift is computed in i64 and saturated to i32 before the high
/// multiply, so callers passing large headroom shifts get clamped rather
/// than wrapped values.
pub fn multiply_by_quantized_multiplier(
    value: i32,
    multiplier: i32,
    left_shift: i32,
    right_shift: i32,
) -> i32 {
    debug_assert!((0..=31).contains(&left_shift));
    debug_assert!((0..=31).contains(&right_shift));
    let shifted = ((value as i64) << left_shift).clamp(i32::MIN as i64, i32::MAX as i64) as i32;
    rounding_divide_by_pot(
        saturating_rounding_doubling_high_mul(shifted, multiplier),
        right_shift,
    )
}
