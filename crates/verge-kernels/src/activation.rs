//! Fused activation applied by arithmetic and matmul kernels.

/// Activation fused into a kernel's output write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    #[default]
    None,
    Relu,
    Relu6,
}

impl Activation {
    #[inline]
    pub fn apply_f32(self, v: f32) -> f32 {
        match self {
            Activation::None => v,
            Activation::Relu => v.max(0.0),
            Activation::Relu6 => v.clamp(0.0, 6.0),
        }
    }

    #[inline]
    pub fn apply_i32(self, v: i32) -> i32 {
        match self {
            Activation::None => v,
            Activation::Relu => v.max(0),
            Activation::Relu6 => v.clamp(0, 6),
        }
    }

    /// Clamp bounds for a quantized int8 output. Relu6 clamps to the
    /// quantized-domain literal 6 rather than a rescaled real value.
    pub fn int8_bounds(self) -> (i32, i32) {
        match self {
            Activation::None => (i8::MIN as i32, i8::MAX as i32),
            Activation::Relu => (0, i8::MAX as i32),
            Activation::Relu6 => (0, 6),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_f32() {
        assert_eq!(Activation::None.apply_f32(-3.0), -3.0);
        assert_eq!(Activation::Relu.apply_f32(-3.0), 0.0);
        assert_eq!(Activation::Relu.apply_f32(9.0), 9.0);
        assert_eq!(Activation::Relu6.apply_f32(9.0), 6.0);
        assert_eq!(Activation::Relu6.apply_f32(2.5), 2.5);
    }

    #[test]
    fn test_int8_bounds() {
        assert_eq!(Activation::None.int8_bounds(), (-128, 127));
        assert_eq!(Activation::Relu.int8_bounds(), (0, 127));
        assert_eq!(Activation::Relu6.int8_bounds(), (0, 6));
    }
}
