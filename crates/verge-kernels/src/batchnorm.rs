//! Batch normalization over NHWC data.
//!
//! Channel statistics index with `i % channels`, so any unit-aligned slice
//! of the flattened tensor normalizes independently; callers split work on
//! channel-multiple boundaries.

/// `out = (in - mean) / sqrt(variance + epsilon)`, per channel.
pub fn batchnorm_f32(
    input: &[f32],
    mean: &[f32],
    variance: &[f32],
    epsilon: f32,
    channels: usize,
    out: &mut [f32],
) {
    debug_assert_eq!(input.len(), out.len());
    debug_assert!(channels > 0 && out.len() % channels == 0);
    debug_assert_eq!(mean.len(), channels);
    debug_assert_eq!(variance.len(), channels);

    for (i, o) in out.iter_mut().enumerate() {
        let c = i % channels;
        let denom = (variance[c] + epsilon).sqrt();
        *o = (input[i] - mean[c]) / denom;
    }
}

/// Fused variant with learned scale and offset:
/// `out = (in - mean) / sqrt(variance + epsilon) * scale + offset`.
#[allow(clippy::too_many_arguments)]
pub fn fused_batchnorm_f32(
    input: &[f32],
    scale: &[f32],
    offset: &[f32],
    mean: &[f32],
    variance: &[f32],
    epsilon: f32,
    channels: usize,
    out: &mut [f32],
) {
    debug_assert_eq!(input.len(), out.len());
    debug_assert!(channels > 0 && out.len() % channels == 0);
    debug_assert_eq!(scale.len(), channels);
    debug_assert_eq!(offset.len(), channels);
    debug_assert_eq!(mean.len(), channels);
    debug_assert_eq!(variance.len(), channels);

    for (i, o) in out.iter_mut().enumerate() {
        let c = i % channels;
        let denom = (variance[c] + epsilon).sqrt();
        *o = (input[i] - mean[c]) / denom * scale[c] + offset[c];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batchnorm_normalizes_channels() {
        // Two channels: ch0 mean 2 var 4, ch1 mean 0 var 1.
        let input = [4.0f32, 3.0, 0.0, -3.0];
        let mean = [2.0f32, 0.0];
        let variance = [4.0f32, 1.0];
        let mut out = [0.0f32; 4];
        batchnorm_f32(&input, &mean, &variance, 0.0, 2, &mut out);
        assert_eq!(out, [1.0, 3.0, -1.0, -3.0]);
    }

    #[test]
    fn test_epsilon_guards_zero_variance() {
        let input = [5.0f32];
        let mut out = [0.0f32];
        batchnorm_f32(&input, &[5.0], &[0.0], 1e-5, 1, &mut out);
        assert_eq!(out, [0.0]);
        batchnorm_f32(&input, &[0.0], &[0.0], 1e-5, 1, &mut out);
        assert!(out[0].is_finite());
    }

    #[test]
    fn test_fused_applies_scale_offset() {
        let input = [4.0f32, 3.0];
        let mean = [2.0f32, 0.0];
        let variance = [4.0f32, 1.0];
        let scale = [10.0f32, 2.0];
        let offset = [1.0f32, -1.0];
        let mut out = [0.0f32; 2];
        fused_batchnorm_f32(&input, &scale, &offset, &mean, &variance, 0.0, 2, &mut out);
        assert_eq!(out, [11.0, 5.0]);
    }

    #[test]
    fn test_split_slices_match_full() {
        let input: Vec<f32> = (0..12).map(|i| i as f32 * 0.3).collect();
        let mean = [0.5f32, -0.5, 1.0];
        let variance = [1.0f32, 2.0, 0.25];

        let mut full = vec![0.0f32; 12];
        batchnorm_f32(&input, &mean, &variance, 1e-5, 3, &mut full);

        let mut lo = vec![0.0f32; 6];
        let mut hi = vec![0.0f32; 6];
        batchnorm_f32(&input[..6], &mean, &variance, 1e-5, 3, &mut lo);
        batchnorm_f32(&input[6..], &mean, &variance, 1e-5, 3, &mut hi);
        lo.extend_from_slice(&hi);
        assert_eq!(lo, full);
    }
}
