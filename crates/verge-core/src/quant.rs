use crate::error::VergeError;
use crate::Result;

/// Quantization parameters for one tensor or one channel.
///
/// Maps the quantized integer `q` to the real value `(q - zero_point) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuantParam {
    pub scale: f64,
    pub zero_point: i32,
}

impl QuantParam {
    /// Create a quantization parameter set. `scale` must be strictly positive.
    pub fn new(scale: f64, zero_point: i32) -> Result<Self> {
        if scale <= 0.0 || !scale.is_finite() {
            return Err(VergeError::contract(format!(
                "quantization scale must be positive and finite, got {scale}"
            )));
        }
        Ok(Self { scale, zero_point })
    }

    /// Dequantize an int8 value to a real value.
    pub fn dequantize(&self, q: i8) -> f64 {
        (q as i32 - self.zero_point) as f64 * self.scale
    }

    /// Quantize a real value to int8, rounding to nearest and saturating.
    pub fn quantize(&self, real: f64) -> i8 {
        let q = (real / self.scale).round() as i64 + self.zero_point as i64;
        q.clamp(i8::MIN as i64, i8::MAX as i64) as i8
    }
}
