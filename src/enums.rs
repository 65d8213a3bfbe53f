use serde::Deserialize;

/// How scalar intensity is mapped to color and opacity.
#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum TransferPolicy {
    /// Continuous hue ramp with a binary opacity cutoff.
    Ramp {
        hue_start: f32,
        hue_end: f32,
        cutoff: f32,
    },
    /// Only intensities at or above `threshold` are shown, in a single color.
    Hotspot {
        threshold: f32,
        color: [u8; 3],
        opacity: f32,
    },
}

impl TransferPolicy {
    pub const fn ramp() -> Self {
        TransferPolicy::Ramp {
            hue_start: 0.7,
            hue_end: 0.0,
            cutoff: 0.02,
        }
    }

    pub const fn hotspot() -> Self {
        TransferPolicy::Hotspot {
            threshold: 0.9,
            color: [255, 48, 32],
            opacity: 0.6,
        }
    }
}

impl Default for TransferPolicy {
    fn default() -> Self {
        Self::hotspot()
    }
}

/// Order in which the two translucent objects are blended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawOrder {
    #[default]
    ShellFirst,
    VolumeFirst,
}

/// What the volume proxy box is sized from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxySizing {
    /// Voxel spacing from the affine times the grid dimensions.
    #[default]
    AffineExtent,
    /// Bounding box of the surface mesh.
    MeshBounds,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Processor {
    CPU,
    #[default]
    GPU,
}
