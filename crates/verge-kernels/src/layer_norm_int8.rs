//! Int8 layer normalization over the trailing (normalized) dimensions.
//!
//! Each row of `inner` elements is normalized independently: mean and
//! variance are computed over the dequantized row, the normalized value is
//! re-expressed on the input scale, and a single fixed-point multiplier
//! carries `in_scale * gamma_scale / out_scale` into the output space. The
//! optional affine step applies an int8 gamma and an int32 beta per element.
//!
//! One unit is one row of `inner` elements; `out` must be the destination
//! slice for rows starting at `unit_start`.

use verge_core::{QuantParam, Result, VergeError};

use crate::fixed_point::{multiply_by_quantized_multiplier, quantize_multiplier};

/// Requantization arguments derived once from the input, gamma, and output
/// quantization parameters.
#[derive(Debug, Clone, Copy)]
pub struct LayerNormQuantArgs {
    in_zp: i32,
    in_scale: f32,
    out_zp: i32,
    gamma_zp: i32,
    multiplier: i32,
    left_shift: i32,
    right_shift: i32,
}

impl LayerNormQuantArgs {
    /// `qgamma` is `None` for the non-affine form; gamma then contributes a
    /// unit scale and a zero offset.
    pub fn new(qin: QuantParam, qgamma: Option<QuantParam>, qout: QuantParam) -> Result<Self> {
        if qin.scale <= 0.0 || qout.scale <= 0.0 {
            return Err(VergeError::contract(
                "layer norm requires positive quantization scales",
            ));
        }
        let gamma_scale = match qgamma {
            Some(g) if g.scale <= 0.0 => {
                return Err(VergeError::contract(
                    "layer norm requires positive quantization scales",
                ));
            }
            Some(g) => g.scale,
            None => 1.0,
        };
        let (multiplier, shift) = quantize_multiplier(qin.scale * gamma_scale / qout.scale);
        Ok(Self {
            in_zp: qin.zero_point,
            in_scale: qin.scale as f32,
            out_zp: qout.zero_point,
            gamma_zp: qgamma.map_or(0, |g| g.zero_point),
            multiplier,
            left_shift: shift.max(0),
            right_shift: (-shift).max(0),
        })
    }
}

/// Normalize rows `[unit_start, ..)` of `src` into `out`.
///
/// `affine` carries `(gamma, beta)` slices of `inner` elements each. `src`
/// is the full tensor; `out.len()` selects how many rows are produced.
pub fn layer_norm_int8(
    src: &[i8],
    affine: Option<(&[i8], &[i32])>,
    out: &mut [i8],
    unit_start: usize,
    inner: usize,
    epsilon: f32,
    q: &LayerNormQuantArgs,
) {
    debug_assert!(inner > 0 && out.len() % inner == 0);
    let n = inner as f32;

    for (i, row_out) in out.chunks_exact_mut(inner).enumerate() {
        let row = &src[(unit_start + i) * inner..][..inner];
        let mut mean = 0.0f32;
        let mut square_mean = 0.0f32;
        for &s in row {
            let v = (s as i32 - q.in_zp) as f32 * q.in_scale;
            mean += v;
            square_mean += v * v;
        }
        mean /= n;
        square_mean /= n;
        let deno = 1.0 / (square_mean - mean * mean + epsilon).sqrt();

        for (j, (&s, d)) in row.iter().zip(row_out.iter_mut()).enumerate() {
            let v = (s as i32 - q.in_zp) as f32 * q.in_scale;
            let norm = (v - mean) * deno;
            // Back onto the input scale so the affine step stays integer.
            let base = (norm / q.in_scale).round() as i32;
            let acc = match affine {
                Some((gamma, beta)) => base * (gamma[j] as i32 - q.gamma_zp) + beta[j],
                None => base,
            };
            let v =
                multiply_by_quantized_multiplier(acc, q.multiplier, q.left_shift, q.right_shift)
                    + q.out_zp;
            *d = v.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
        }
    }
}
