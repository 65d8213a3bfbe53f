#![allow(dead_code)]

use async_trait::async_trait;
use glass_brain::volume_loader::{MeshPayload, VolumePayload};
use glass_brain::{LoadError, RefreshTrigger, VolumeSource};

/// Tetrahedron around the origin, about 10 units across.
pub fn mesh_payload() -> MeshPayload {
    MeshPayload {
        vertices: Some(vec![
            [-5.0, -5.0, -5.0],
            [5.0, -5.0, -5.0],
            [0.0, 5.0, -5.0],
            [0.0, 0.0, 5.0],
        ]),
        faces: Some(vec![[0, 2, 1], [0, 1, 3], [1, 2, 3], [2, 0, 3]]),
        error: None,
    }
}

/// Uniform volume of `value` with 2 x 2 x 4 mm voxels.
pub fn volume_payload(dims: [usize; 3], value: f32) -> VolumePayload {
    VolumePayload {
        dims: Some(dims),
        raw_data: Some(vec![value; dims.iter().product()]),
        affine: Some([
            [2.0, 0.0, 0.0, -90.0],
            [0.0, 2.0, 0.0, -126.0],
            [0.0, 0.0, 4.0, -72.0],
            [0.0, 0.0, 0.0, 1.0],
        ]),
        original_range: Some([0.0, 1.0]),
        error: None,
    }
}

/// Serves the same payloads for every trigger.
pub struct StaticSource {
    pub mesh: MeshPayload,
    pub volume: VolumePayload,
}

impl StaticSource {
    pub fn new(volume: VolumePayload) -> Self {
        Self {
            mesh: mesh_payload(),
            volume,
        }
    }
}

#[async_trait]
impl VolumeSource for StaticSource {
    async fn fetch_mesh(&self, _trigger: RefreshTrigger) -> Result<MeshPayload, LoadError> {
        Ok(self.mesh.clone())
    }

    async fn fetch_volume(&self, _trigger: RefreshTrigger) -> Result<VolumePayload, LoadError> {
        Ok(self.volume.clone())
    }
}
