//! Int8 image resize (nearest-neighbor and bilinear) over NHWC data.
//!
//! Interpolation positions and weights use 10-bit fixed point; the bilinear
//! accumulator carries 20 fractional bits, folded back with 20 bits of
//! base-offset headroom during requantization. Nearest-neighbor resize with
//! identical input/output quantization degenerates to row copies.
//!
//! All entry points compute a contiguous range of output rows: one unit is
//! one `(batch, y)` row of `out_w * channels` elements, and `out` must be the
//! destination slice for units starting at `unit_start`.

use verge_core::{QuantParam, Result, VergeError};

use crate::fixed_point::{multiply_by_quantized_multiplier, quantize_multiplier};

/// Fractional bits of interpolation positions and weights.
const POS_BITS: i32 = 10;
/// Extra shift headroom applied on both sides of the requantize multiply.
const BASE_OFFSET: i32 = 20;

/// Resize interpolation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMethod {
    NearestNeighbor,
    Bilinear,
}

/// Spatial geometry of one resize, shared by every row unit.
#[derive(Debug, Clone, Copy)]
pub struct ResizeGeometry {
    pub batch: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub channels: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub align_corners: bool,
}

impl ResizeGeometry {
    /// Number of parallelizable output row units.
    pub fn units(&self) -> usize {
        self.batch * self.out_h
    }

    /// Elements per output row unit.
    pub fn unit_len(&self) -> usize {
        self.out_w * self.channels
    }
}

/// Requantization arguments derived once from the input/output quantization
/// parameters.
#[derive(Debug, Clone, Copy)]
pub struct ResizeQuantArgs {
    in_zp: i32,
    out_zp: i32,
    multiplier: i32,
    left_shift: i32,
    right_shift: i32,
    /// Same scale and zero point: nearest-neighbor can copy rows verbatim.
    identity: bool,
}

impl ResizeQuantArgs {
    pub fn new(qin: QuantParam, qout: QuantParam) -> Result<Self> {
        if qin.scale <= 0.0 || qout.scale <= 0.0 {
            return Err(VergeError::contract(
                "resize requires positive quantization scales",
            ));
        }
        let (multiplier, shift) = quantize_multiplier(qin.scale / qout.scale);
        Ok(Self {
            in_zp: qin.zero_point,
            out_zp: qout.zero_point,
            multiplier,
            left_shift: shift.max(0),
            right_shift: (-shift).max(0),
            identity: qin.zero_point == qout.zero_point && (qin.scale - qout.scale).abs() < 1e-6,
        })
    }

    #[inline]
    fn requantize(&self, value: i32, extra_shift: i32) -> i32 {
        multiply_by_quantized_multiplier(
            value,
            self.multiplier,
            self.left_shift + extra_shift,
            self.right_shift + extra_shift,
        ) + self.out_zp
    }
}

/// 10-bit fixed-point scale mapping output positions to input positions.
fn axis_scale(in_size: usize, out_size: usize, align_corners: bool) -> i32 {
    debug_assert!(out_size > 0);
    let (in_size, out_size) = (in_size as i32, out_size as i32);
    if align_corners && out_size > 1 {
        ((in_size - 1) * (1 << POS_BITS) + (out_size - 1) / 2) / (out_size - 1)
    } else {
        (in_size * (1 << POS_BITS) + out_size / 2) / out_size
    }
}

/// Source index for nearest-neighbor sampling, clamped to the input extent.
fn nearest_index(pos: usize, in_size: usize, new_size: usize, align_corners: bool) -> usize {
    debug_assert!(new_size > 0);
    let (pos, in_size, new_size) = (pos as i32, in_size as i32, new_size as i32);
    let mut nearest = (in_size * pos) / new_size;
    if align_corners && new_size != 1 {
        nearest = ((in_size - 1) * pos + (new_size - 1) / 2) / (new_size - 1);
    }
    nearest.min(in_size - 1) as usize
}

/// Low/high sample indices and their 10-bit weights for one output position.
fn interp_args(pos: usize, scale: i32, size: usize) -> (usize, usize, i32, i32) {
    let scaled_pos = pos as i32 * scale;
    let scale_back = scaled_pos / (1 << POS_BITS);
    // The rounded scale can map the last output positions past the input
    // extent; clamp both samples. The weights still sum to 1 << POS_BITS,
    // so a clamped pair reproduces the edge sample exactly.
    let low = scale_back.clamp(0, size as i32 - 1);
    let high = (low + 1).min(size as i32 - 1);
    let high_weight = scaled_pos - (low << POS_BITS);
    let low_weight = (1 << POS_BITS) - high_weight;
    (low as usize, high as usize, low_weight, high_weight)
}

/// Float-weight variant, used when the input zero point is nonzero and the
/// 20-bit accumulator would lose the offset.
fn interp_args_float(pos: usize, scale: f32, size: usize) -> (usize, usize, f32, f32) {
    let actual = pos as f32 * scale;
    let low = if actual > 0.0 { actual.floor() as i32 } else { 0 }.min(size as i32 - 1);
    let high = (low + 1).min(size as i32 - 1);
    let high_weight = actual - low as f32;
    (low as usize, high as usize, 1.0 - high_weight, high_weight)
}

fn axis_scale_float(in_size: usize, out_size: usize, align_corners: bool) -> f32 {
    debug_assert!(out_size > 0);
    if align_corners && out_size > 1 {
        (in_size - 1) as f32 / (out_size - 1) as f32
    } else {
        in_size as f32 / out_size as f32
    }
}

/// Nearest-neighbor resize over output row units `[unit_start, ..)`.
pub fn resize_nearest_int8(
    g: &ResizeGeometry,
    input: &[i8],
    out: &mut [i8],
    unit_start: usize,
    q: &ResizeQuantArgs,
) {
    let unit_len = g.unit_len();
    debug_assert!(out.len() % unit_len == 0);
    let c = g.channels;
    let in_row = g.in_w * c;
    let in_image = g.in_h * in_row;

    for (i, row) in out.chunks_exact_mut(unit_len).enumerate() {
        let unit = unit_start + i;
        let (n, y) = (unit / g.out_h, unit % g.out_h);
        let src_y = nearest_index(y, g.in_h, g.out_h, g.align_corners);
        for x in 0..g.out_w {
            let src_x = nearest_index(x, g.in_w, g.out_w, g.align_corners);
            let src = &input[n * in_image + src_y * in_row + src_x * c..][..c];
            let dst = &mut row[x * c..x * c + c];
            if q.identity {
                dst.copy_from_slice(src);
            } else {
                for (d, &s) in dst.iter_mut().zip(src) {
                    let v = q.requantize(s as i32 - q.in_zp, BASE_OFFSET);
                    *d = v.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
                }
            }
        }
    }
}

/// Bilinear resize over output row units `[unit_start, ..)`.
///
/// With a zero input zero point the whole interpolation runs in fixed point;
/// otherwise weights are computed in f32 and only the requantize is integer.
pub fn resize_bilinear_int8(
    g: &ResizeGeometry,
    input: &[i8],
    out: &mut [i8],
    unit_start: usize,
    q: &ResizeQuantArgs,
) {
    if q.in_zp == 0 {
        bilinear_fixed(g, input, out, unit_start, q);
    } else {
        bilinear_float_weight(g, input, out, unit_start, q);
    }
}

fn bilinear_fixed(
    g: &ResizeGeometry,
    input: &[i8],
    out: &mut [i8],
    unit_start: usize,
    q: &ResizeQuantArgs,
) {
    let unit_len = g.unit_len();
    debug_assert!(out.len() % unit_len == 0);
    let c = g.channels;
    let in_row = g.in_w * c;
    let in_image = g.in_h * in_row;
    let h_scale = axis_scale(g.in_h, g.out_h, g.align_corners);
    let w_scale = axis_scale(g.in_w, g.out_w, g.align_corners);

    for (i, row) in out.chunks_exact_mut(unit_len).enumerate() {
        let unit = unit_start + i;
        let (n, y) = (unit / g.out_h, unit % g.out_h);
        let (top, bottom, top_w, bottom_w) = interp_args(y, h_scale, g.in_h);
        for x in 0..g.out_w {
            let (left, right, left_w, right_w) = interp_args(x, w_scale, g.in_w);
            let base = n * in_image;
            for ch in 0..c {
                let sample = |yy: usize, xx: usize| -> i64 {
                    (input[base + yy * in_row + xx * c + ch] as i32 - q.in_zp) as i64
                };
                let acc = sample(top, left) * top_w as i64 * left_w as i64
                    + sample(top, right) * top_w as i64 * right_w as i64
                    + sample(bottom, left) * bottom_w as i64 * left_w as i64
                    + sample(bottom, right) * bottom_w as i64 * right_w as i64;
                // Fold 20 fractional bits, rounding half away from zero.
                let interp = if acc >= 0 {
                    ((acc + (1 << 19)) / (1 << 20)) as i32
                } else {
                    ((acc - (1 << 19)) / (1 << 20)) as i32
                };
                let v = q.requantize(interp, BASE_OFFSET);
                row[x * c + ch] = v.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
            }
        }
    }
}

fn bilinear_float_weight(
    g: &ResizeGeometry,
    input: &[i8],
    out: &mut [i8],
    unit_start: usize,
    q: &ResizeQuantArgs,
) {
    let unit_len = g.unit_len();
    debug_assert!(out.len() % unit_len == 0);
    let c = g.channels;
    let in_row = g.in_w * c;
    let in_image = g.in_h * in_row;
    let h_scale = axis_scale_float(g.in_h, g.out_h, g.align_corners);
    let w_scale = axis_scale_float(g.in_w, g.out_w, g.align_corners);

    for (i, row) in out.chunks_exact_mut(unit_len).enumerate() {
        let unit = unit_start + i;
        let (n, y) = (unit / g.out_h, unit % g.out_h);
        let (top, bottom, top_w, bottom_w) = interp_args_float(y, h_scale, g.in_h);
        for x in 0..g.out_w {
            let (left, right, left_w, right_w) = interp_args_float(x, w_scale, g.in_w);
            let base = n * in_image;
            for ch in 0..c {
                let sample = |yy: usize, xx: usize| -> f32 {
                    (input[base + yy * in_row + xx * c + ch] as i32 - q.in_zp) as f32
                };
                let interp = sample(top, left) * top_w * left_w
                    + sample(top, right) * top_w * right_w
                    + sample(bottom, left) * bottom_w * left_w
                    + sample(bottom, right) * bottom_w * right_w;
                let v = q.requantize(interp as i32, 0);
                row[x * c + ch] = v.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
            }
        }
    }
}
