/// Linear premultiplied RGBA color.
///
/// `r`, `g` and `b` are expected to be multiplied by `a`.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

impl Color {
    pub const BLACK: Self = Self::from_premul(0.0, 0.0, 0.0, 1.0);

    #[inline]
    pub const fn from_premul(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self { r, g, b, a }
    }

    /// Premultiplies straight-alpha components, clamping to `[0, 1]`.
    #[inline]
    pub fn from_straight(r: f32, g: f32, b: f32, a: f32) -> Self {
        let a = a.clamp(0.0, 1.0);
        Self {
            r: r.clamp(0.0, 1.0) * a,
            g: g.clamp(0.0, 1.0) * a,
            b: b.clamp(0.0, 1.0) * a,
            a,
        }
    }

    /// From straight sRGB bytes, e.g. a hex literal.
    #[inline]
    pub fn from_srgb_u8(r: u8, g: u8, b: u8, a: u8) -> Self {
        let lin = |c: u8| srgb_to_linear(c as f32 / 255.0);
        Self::from_straight(lin(r), lin(g), lin(b), a as f32 / 255.0)
    }

    /// Componentwise interpolation; `t` is clamped to `[0, 1]`.
    #[inline]
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        let mix = |a: f32, b: f32| a + (b - a) * t;
        Self {
            r: mix(self.r, other.r),
            g: mix(self.g, other.g),
            b: mix(self.b, other.b),
            a: mix(self.a, other.a),
        }
    }

    /// Clamps channels to `[0, 1]` and keeps rgb at or below alpha.
    #[inline]
    pub fn clamped(self) -> Self {
        let a = self.a.clamp(0.0, 1.0);
        Self {
            r: self.r.clamp(0.0, a),
            g: self.g.clamp(0.0, a),
            b: self.b.clamp(0.0, a),
            a,
        }
    }

    pub fn to_wgpu(self) -> wgpu::Color {
        let c = self.clamped();
        wgpu::Color {
            r: c.r as f64,
            g: c.g as f64,
            b: c.b as f64,
            a: c.a as f64,
        }
    }
}

fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}
