//! Direct f32 2D convolution over NHWC data.
//!
//! Weights arrive in OHWI order (`[out_c, kh, kw, in_c]`) and are repacked
//! once to HWIO so the inner loop writes a contiguous output-channel vector.
//! The bias slice always has `out_c` entries; a missing bias is passed as
//! zeros by the caller. Work splits over `(batch, out_y)` row units.

use crate::activation::Activation;

/// Static geometry of one convolution, fixed at kernel init.
#[derive(Debug, Clone, Copy)]
pub struct ConvGeometry {
    pub batch: usize,
    pub in_h: usize,
    pub in_w: usize,
    pub in_c: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub out_c: usize,
    pub kernel_h: usize,
    pub kernel_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub pad_top: usize,
    pub pad_left: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
}

impl ConvGeometry {
    /// Number of parallelizable output row units.
    pub fn units(&self) -> usize {
        self.batch * self.out_h
    }

    /// Elements per output row unit.
    pub fn unit_len(&self) -> usize {
        self.out_w * self.out_c
    }

    /// Output spatial extent for the given input extent and padding totals.
    pub fn output_extent(
        in_size: usize,
        kernel: usize,
        stride: usize,
        pad_total: usize,
        dilation: usize,
    ) -> usize {
        let effective_kernel = dilation * (kernel - 1) + 1;
        let padded = in_size + pad_total;
        if padded < effective_kernel {
            0
        } else {
            (padded - effective_kernel) / stride + 1
        }
    }
}

/// Repack OHWI weights to HWIO
/// (`dst[((ky*kw + kx)*in_c + ic)*out_c + oc]`).
pub fn pack_weight_ohwi_to_hwio(
    w: &[f32],
    out_c: usize,
    kh: usize,
    kw: usize,
    in_c: usize,
    dst: &mut [f32],
) {
    debug_assert_eq!(w.len(), out_c * kh * kw * in_c);
    debug_assert_eq!(dst.len(), w.len());
    for oc in 0..out_c {
        for ky in 0..kh {
            for kx in 0..kw {
                for ic in 0..in_c {
                    let src = ((oc * kh + ky) * kw + kx) * in_c + ic;
                    let dst_idx = ((ky * kw + kx) * in_c + ic) * out_c + oc;
                    dst[dst_idx] = w[src];
                }
            }
        }
    }
}

/// Convolve a contiguous range of output row units starting at `unit_start`.
pub fn conv2d_rows_f32(
    g: &ConvGeometry,
    input: &[f32],
    w_hwio: &[f32],
    bias: &[f32],
    out: &mut [f32],
    unit_start: usize,
    act: Activation,
) {
    let unit_len = g.unit_len();
    debug_assert!(out.len() % unit_len == 0);
    debug_assert_eq!(bias.len(), g.out_c);
    let in_row = g.in_w * g.in_c;
    let in_image = g.in_h * in_row;

    for (i, row) in out.chunks_exact_mut(unit_len).enumerate() {
        let unit = unit_start + i;
        let (n, oy) = (unit / g.out_h, unit % g.out_h);
        let iy_origin = (oy * g.stride_h) as isize - g.pad_top as isize;

        for ox in 0..g.out_w {
            let ix_origin = (ox * g.stride_w) as isize - g.pad_left as isize;
            let pixel = &mut row[ox * g.out_c..(ox + 1) * g.out_c];
            pixel.copy_from_slice(bias);

            for ky in 0..g.kernel_h {
                let iy = iy_origin + (ky * g.dilation_h) as isize;
                if iy < 0 || iy >= g.in_h as isize {
                    continue;
                }
                for kx in 0..g.kernel_w {
                    let ix = ix_origin + (kx * g.dilation_w) as isize;
                    if ix < 0 || ix >= g.in_w as isize {
                        continue;
                    }
                    let in_base = n * in_image + iy as usize * in_row + ix as usize * g.in_c;
                    let w_base = (ky * g.kernel_w + kx) * g.in_c * g.out_c;
                    for ic in 0..g.in_c {
                        let x = input[in_base + ic];
                        let w_row = &w_hwio[w_base + ic * g.out_c..w_base + (ic + 1) * g.out_c];
                        for (p, &w) in pixel.iter_mut().zip(w_row) {
                            *p += x * w;
                        }
                    }
                }
            }
            for p in pixel.iter_mut() {
                *p = act.apply_f32(*p);
            }
        }
    }
}
