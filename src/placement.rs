//! Sizing of the volume proxy box from the voxel-to-world affine.
//!
//! Only the per-axis voxel spacing is taken from the affine. Rotation and
//! translation are dropped and the proxy sits at the world origin: the
//! backend delivers the mesh and the volume in the same template space, and
//! the scene re-centers the mesh on its bounding box.

use glam::{Mat4, Vec3};
use log::warn;

use crate::enums::ProxySizing;
use crate::mesh::Bounds;

/// World units per voxel along x, y and z.
///
/// Norms of the first three columns of the linear block, so a rotated or
/// sheared affine still yields the spacing along each voxel axis.
pub fn voxel_spacing(affine: &Mat4) -> Vec3 {
    Vec3::new(
        affine.x_axis.truncate().length(),
        affine.y_axis.truncate().length(),
        affine.z_axis.truncate().length(),
    )
}

/// Physical size of the grid in world units.
pub fn physical_extent(affine: &Mat4, dims: (usize, usize, usize)) -> Vec3 {
    voxel_spacing(affine) * Vec3::new(dims.0 as f32, dims.1 as f32, dims.2 as f32)
}

/// Converts a row-major `number[4][4]` as sent by the backend.
pub fn affine_from_rows(rows: &[[f32; 4]; 4]) -> Mat4 {
    Mat4::from_cols_array_2d(rows).transpose()
}

/// Placement of the unit-cube proxy for one loaded volume.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct VolumePlacement {
    pub spacing: Vec3,
    pub extent: Vec3,
}

impl VolumePlacement {
    /// Resolves the placement for a grid. With [`ProxySizing::MeshBounds`]
    /// the proxy takes the size of `mesh_bounds` instead of the affine
    /// extent.
    pub fn resolve(
        affine: &Mat4,
        dims: (usize, usize, usize),
        sizing: ProxySizing,
        mesh_bounds: &Bounds,
    ) -> Self {
        let spacing = voxel_spacing(affine);
        let extent = match sizing {
            ProxySizing::AffineExtent => physical_extent(affine, dims),
            ProxySizing::MeshBounds => {
                let size = mesh_bounds.size();
                if size.is_finite() && size.cmpgt(Vec3::ZERO).all() {
                    size
                } else {
                    warn!("Mesh bounds {size:?} are flat, sizing the proxy from the affine");
                    physical_extent(affine, dims)
                }
            }
        };
        Self { spacing, extent }
    }

    /// Proxy model matrix: scale by the extent, origin position, no rotation.
    ///
    /// Always built from scratch, so calling it on every frame never
    /// compounds the transform.
    pub fn model_matrix(&self) -> Mat4 {
        Mat4::from_scale(self.extent)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds {
            min: -self.extent * 0.5,
            max: self.extent * 0.5,
        }
    }
}
