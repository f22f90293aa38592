use glam::Vec4;

/// Straight-alpha RGBA color pushed to shaders as a `vec4` uniform.
///
/// Components are expected in `[0, 1]`. Use [`Color::clamped`] for
/// user-provided values.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    #[inline]
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    #[inline]
    pub const fn transparent() -> Self {
        Self::new(0.0, 0.0, 0.0, 0.0)
    }

    #[inline]
    pub const fn white() -> Self {
        Self::new(1.0, 1.0, 1.0, 1.0)
    }

    /// Creates a color from 8-bit channels (`0`–`255`).
    #[inline]
    pub fn from_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self::new(r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0, a as f32 / 255.0)
    }

    /// Clamps all channels to `[0, 1]`. NaN channels become `0`.
    #[inline]
    pub fn clamped(self) -> Self {
        let c = |v: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, 1.0) };
        Self::new(c(self.r), c(self.g), c(self.b), c(self.a))
    }

    #[inline]
    pub fn is_finite(self) -> bool {
        self.r.is_finite() && self.g.is_finite() && self.b.is_finite() && self.a.is_finite()
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.r, self.g, self.b, self.a]
    }

    #[inline]
    pub fn to_vec4(self) -> Vec4 {
        Vec4::from_array(self.to_array())
    }

    #[inline]
    pub fn to_wgpu(self) -> wgpu::Color {
        wgpu::Color {
            r: self.r as f64,
            g: self.g as f64,
            b: self.b as f64,
            a: self.a as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamped_limits_channels() {
        let c = Color::new(-1.0, 0.5, 2.0, f32::NAN).clamped();
        assert_eq!(c, Color::new(0.0, 0.5, 1.0, 0.0));
    }

    #[test]
    fn from_u8_scales_to_unit_range() {
        let c = Color::from_u8(64, 255, 0, 0);
        assert!((c.r - 64.0 / 255.0).abs() < 1e-6);
        assert_eq!(c.g, 1.0);
        assert_eq!(c.b, 0.0);
    }

    #[test]
    fn vec4_matches_array_order() {
        let c = Color::new(0.1, 0.2, 0.3, 0.4);
        assert_eq!(c.to_vec4().to_array(), [0.1, 0.2, 0.3, 0.4]);
    }
}
