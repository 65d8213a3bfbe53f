//! Lookup table mapping normalized intensity to color and opacity.

use glam::{Vec3, Vec4};

use crate::enums::TransferPolicy;

/// Number of entries in every transfer function table.
pub const TRANSFER_FUNCTION_RESOLUTION: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferFunction {
    policy_name: &'static str,
    texels: Vec<[u8; 4]>,
}

impl TransferFunction {
    /// Builds the table for `policy`. The same policy always yields the same
    /// bytes.
    pub fn build(policy: &TransferPolicy) -> Self {
        let last = (TRANSFER_FUNCTION_RESOLUTION - 1) as f32;
        let texels = (0..TRANSFER_FUNCTION_RESOLUTION)
            .map(|i| {
                let t = i as f32 / last;
                match *policy {
                    TransferPolicy::Ramp {
                        hue_start,
                        hue_end,
                        cutoff,
                    } => {
                        let hue = hue_start + (hue_end - hue_start) * t;
                        let [r, g, b] = hsl_to_rgb(hue, 1.0, 0.5);
                        let alpha = if t < cutoff { 0 } else { 255 };
                        [to_byte(r), to_byte(g), to_byte(b), alpha]
                    }
                    TransferPolicy::Hotspot {
                        threshold,
                        color,
                        opacity,
                    } => {
                        if t < threshold {
                            [0, 0, 0, 0]
                        } else {
                            let alpha = (opacity.clamp(0.0, 1.0) * 255.0).round() as u8;
                            [color[0], color[1], color[2], alpha]
                        }
                    }
                }
            })
            .collect();
        let policy_name = match policy {
            TransferPolicy::Ramp { .. } => "ramp",
            TransferPolicy::Hotspot { .. } => "hotspot",
        };
        Self {
            policy_name,
            texels,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy_name
    }

    pub fn texels(&self) -> &[[u8; 4]] {
        &self.texels
    }

    /// Raw RGBA bytes, ready for a texture upload.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }

    pub fn len(&self) -> usize {
        self.texels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.texels.is_empty()
    }

    /// Nearest-texel lookup, matching a nearest sampler at `(t, 0.5)`.
    pub fn lookup(&self, t: f32) -> Vec4 {
        let n = self.texels.len();
        let index = ((t.clamp(0.0, 1.0) * n as f32) as usize).min(n - 1);
        let [r, g, b, a] = self.texels[index];
        Vec4::new(r as f32, g as f32, b as f32, a as f32) / 255.0
    }

    /// Lowest normalized intensity with non-zero opacity.
    pub fn first_visible(&self) -> Option<f32> {
        let last = (self.texels.len() - 1) as f32;
        self.texels
            .iter()
            .position(|texel| texel[3] > 0)
            .map(|i| i as f32 / last)
    }
}

#[inline]
fn to_byte(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0) as u8
}

/// HSL to RGB with all components in [0, 1]. Hue wraps.
pub(crate) fn hsl_to_rgb(hue: f32, saturation: f32, lightness: f32) -> [f32; 3] {
    let h = hue.rem_euclid(1.0);
    if saturation <= 0.0 {
        return [lightness; 3];
    }
    let q = if lightness <= 0.5 {
        lightness * (1.0 + saturation)
    } else {
        lightness + saturation - lightness * saturation
    };
    let p = 2.0 * lightness - q;
    let rgb = Vec3::new(
        hue_to_channel(p, q, h + 1.0 / 3.0),
        hue_to_channel(p, q, h),
        hue_to_channel(p, q, h - 1.0 / 3.0),
    );
    rgb.to_array()
}

fn hue_to_channel(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * 6.0 * (2.0 / 3.0 - t)
    } else {
        p
    }
}
