//! Quantized int8 addition.
//!
//! Two int8 operands with arbitrary scales cannot be added directly; both are
//! rescaled to twice the larger input scale with 20 bits of headroom, summed
//! in i32, then requantized to the output scale. All scale applications use
//! the fixed-point multiplier scheme from [`crate::fixed_point`].

use verge_core::{QuantParam, Result, VergeError};

use crate::activation::Activation;
use crate::fixed_point::{
    multiply_by_quantized_multiplier, quantize_multiplier_smaller_than_one,
    rounding_divide_by_pot, saturating_rounding_doubling_high_mul,
};

/// Headroom shift applied to both operands before rescaling.
const LEFT_SHIFT: i32 = 20;

/// Per-operand rescale arguments.
#[derive(Debug, Clone, Copy)]
struct InputArgs {
    zp: i32,
    multiplier: i32,
    /// `(1 << LEFT_SHIFT) << left_shift`, applied as a plain multiply.
    left_shift_result: i32,
    right_shift: i32,
}

/// Precomputed quantization arguments for the int8 add, derived once at
/// kernel init from the three tensors' quantization parameters.
#[derive(Debug, Clone, Copy)]
pub struct AddQuantArgs {
    in0: InputArgs,
    in1: InputArgs,
    out_zp: i32,
    out_multiplier: i32,
    out_left_shift: i32,
    out_right_shift: i32,
    min: i32,
    max: i32,
}

fn input_args(qp: QuantParam, twice_max_input_scale: f64) -> InputArgs {
    let (multiplier, right_shift) = quantize_multiplier_smaller_than_one(qp.scale / twice_max_input_scale);
    let left = (-right_shift).max(0);
    InputArgs {
        zp: qp.zero_point,
        multiplier,
        left_shift_result: (1 << LEFT_SHIFT) << left,
        right_shift: right_shift.max(0),
    }
}

impl AddQuantArgs {
    /// Derive rescale arguments from the operand and output quantization
    /// parameters. Scales must be positive.
    pub fn new(in0: QuantParam, in1: QuantParam, out: QuantParam, act: Activation) -> Result<Self> {
        for qp in [in0, in1, out] {
            if qp.scale <= 0.0 || !qp.scale.is_finite() {
                return Err(VergeError::contract(format!(
                    "int8 add requires positive finite scales, got {}",
                    qp.scale
                )));
            }
        }

        let twice_max_input_scale = 2.0 * in0.scale.max(in1.scale);
        let real_out_multiplier =
            twice_max_input_scale / ((1i64 << LEFT_SHIFT) as f64 * out.scale);
        let (out_multiplier, out_shift) = quantize_multiplier_smaller_than_one(real_out_multiplier);
        let (min, max) = act.int8_bounds();

        Ok(Self {
            in0: input_args(in0, twice_max_input_scale),
            in1: input_args(in1, twice_max_input_scale),
            out_zp: out.zero_point,
            out_multiplier,
            out_left_shift: (-out_shift).max(0),
            out_right_shift: out_shift.max(0),
            min,
            max,
        })
    }

    #[inline]
    fn rescale(&self, args: &InputArgs, v: i8) -> i32 {
        let shifted = (v as i32 - args.zp) * args.left_shift_result;
        rounding_divide_by_pot(
            saturating_rounding_doubling_high_mul(shifted, args.multiplier),
            args.right_shift,
        )
    }

    #[inline]
    fn requantize(&self, sum: i32) -> i8 {
        let raw = multiply_by_quantized_multiplier(
            sum,
            self.out_multiplier,
            self.out_left_shift,
            self.out_right_shift,
        ) + self.out_zp;
        raw.clamp(self.min, self.max) as i8
    }
}

/// Elementwise int8 add over equal-length slices.
pub fn add_int8(a: &[i8], b: &[i8], out: &mut [i8], args: &AddQuantArgs) {
    debug_assert_eq!(a.len(), out.len());
    debug_assert_eq!(b.len(), out.len());
    for i in 0..out.len() {
        let sum = args.rescale(&args.in0, a[i]) + args.rescale(&args.in1, b[i]);
        out[i] = args.requantize(sum);
    }
}

/// Scalar fast path: one operand is a single element. Addition commutes, so
/// the scalar always rides on the `in0` rescale arguments only if it came
/// from input 0; `scalar_is_in0` keeps the right arguments paired.
pub fn add_int8_opt(scalar: i8, v: &[i8], out: &mut [i8], args: &AddQuantArgs, scalar_is_in0: bool) {
    debug_assert_eq!(v.len(), out.len());
    let (s_args, v_args) = if scalar_is_in0 {
        (&args.in0, &args.in1)
    } else {
        (&args.in1, &args.in0)
    };
    let scaled = args.rescale(s_args, scalar);
    for i in 0..out.len() {
        let sum = scaled + args.rescale(v_args, v[i]);
        out[i] = args.requantize(sum);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qp(scale: f64, zp: i32) -> QuantParam {
        QuantParam { scale, zero_point: zp }
    }

    #[test]
    fn test_rejects_bad_scale() {
        assert!(AddQuantArgs::new(qp(0.0, 0), qp(1.0, 0), qp(1.0, 0), Activation::None).is_err());
        assert!(AddQuantArgs::new(qp(0.5, 0), qp(0.5, 0), qp(1.0, 0), Activation::None).is_ok());
    }

    #[test]
    fn test_add_exact_half_scales() {
        // in0 = [10,20,30] at scale 0.5 (reals 5,10,15)
        // in1 = [1,1,1]    at scale 0.5 (reals 0.5 each)
        // out scale 1.0, relu6: real sums 5.5, 10.5, 15.5 land on exact
        // ties, which round toward zero before the clamp.
        let args = AddQuantArgs::new(qp(0.5, 0), qp(0.5, 0), qp(1.0, 0), Activation::Relu6).unwrap();
        let a = [10i8, 20, 30];
        let b = [1i8, 1, 1];
        let mut out = [0i8; 3];
        add_int8(&a, &b, &mut out, &args);
        assert_eq!(out, [5, 6, 6]);
    }

    #[test]
    fn test_add_identical_scales_no_activation() {
        // scale 1.0 everywhere: plain integer addition.
        let args = AddQuantArgs::new(qp(1.0, 0), qp(1.0, 0), qp(1.0, 0), Activation::None).unwrap();
        let a = [3i8, -7, 100];
        let b = [4i8, 2, -50];
        let mut out = [0i8; 3];
        add_int8(&a, &b, &mut out, &args);
        assert_eq!(out, [7, -5, 50]);
    }

    #[test]
    fn test_add_saturates_output_range() {
        let args = AddQuantArgs::new(qp(1.0, 0), qp(1.0, 0), qp(1.0, 0), Activation::None).unwrap();
        let a = [120i8, -120];
        let b = [100i8, -100];
        let mut out = [0i8; 2];
        add_int8(&a, &b, &mut out, &args);
        assert_eq!(out, [127, -128]);
    }

    #[test]
    fn test_add_zero_points() {
        // in0 zp 10 means stored 13 is real 3; in1 zp -5 means stored -3 is
        // real 2; out zp 1 at scale 1.0 stores real 5 as 6.
        let args = AddQuantArgs::new(qp(1.0, 10), qp(1.0, -5), qp(1.0, 1), Activation::None).unwrap();
        let a = [13i8];
        let b = [-3i8];
        let mut out = [0i8];
        add_int8(&a, &b, &mut out, &args);
        assert_eq!(out, [6]);
    }

    #[test]
    fn test_relu_clamps_negative_sums() {
        let args = AddQuantArgs::new(qp(1.0, 0), qp(1.0, 0), qp(1.0, 0), Activation::Relu).unwrap();
        let a = [-5i8, 5];
        let b = [-1i8, 1];
        let mut out = [0i8; 2];
        add_int8(&a, &b, &mut out, &args);
        assert_eq!(out, [0, 6]);
    }

    #[test]
    fn test_opt_matches_element_path() {
        let args = AddQuantArgs::new(qp(0.25, 3), qp(0.5, -2), qp(0.4, 0), Activation::None).unwrap();
        let scalar = 7i8;
        let v = [-20i8, 0, 15, 127, -128];
        let expanded = [scalar; 5];

        let mut want = [0i8; 5];
        add_int8(&expanded, &v, &mut want, &args);
        let mut got = [0i8; 5];
        add_int8_opt(scalar, &v, &mut got, &args, true);
        assert_eq!(got, want);

        // Scalar on the other side pairs with the in1 arguments.
        let mut want = [0i8; 5];
        add_int8(&v, &expanded, &mut want, &args);
        let mut got = [0i8; 5];
        add_int8_opt(scalar, &v, &mut got, &args, false);
        assert_eq!(got, want);
    }
}
