//! World-space layout shared by the GPU and CPU render paths.

use glam::{Mat4, Vec3, Vec4};
use image::RgbaImage;

use crate::camera::Camera;
use crate::config::ViewerConfig;
use crate::enums::DrawOrder;
use crate::mesh::Bounds;
use crate::raymarch::{CpuRaycaster, MarchParams};
use crate::volume_loader::LoadedVolume;

/// Both objects are turned from the data's z-up frame into the viewer's
/// y-up frame.
pub fn world_rotation() -> Mat4 {
    Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)
}

const SHELL_LIGHT_DIRECTION: Vec3 = Vec3::new(1.0, 1.0, 1.0);

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct VolumeUniforms {
    pub model: [[f32; 4]; 4],
    pub inv_model: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub camera_position: [f32; 4],
    pub volume_dims: [f32; 4],
    pub threshold: f32,
    pub steps: f32,
    pub opacity_scale: f32,
    pub alpha_cutoff: f32,
    pub saturation: f32,
    pub _padding: [f32; 3],
}

#[repr(C)]
#[derive(Copy, Clone, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct ShellUniforms {
    pub model: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub color: [f32; 4],
    pub light_direction: [f32; 4],
}

/// Placement of the shell and the volume proxy for one loaded volume.
#[derive(Clone, Debug)]
pub struct SceneComposition {
    mesh_model: Mat4,
    volume_model: Mat4,
    dims: (usize, usize, usize),
    draw_order: DrawOrder,
    march_params: MarchParams,
    shell_color: Vec4,
    bounds: Bounds,
}

impl SceneComposition {
    pub fn new(volume: &LoadedVolume, config: &ViewerConfig) -> Self {
        let rotation = world_rotation();
        // The shell is recentred on the origin, where the proxy cube sits.
        let mesh_model = rotation * Mat4::from_translation(-volume.mesh.center());
        let volume_model = rotation * volume.placement.model_matrix();

        let half_mesh = volume.mesh.size() * 0.5;
        let half_volume = volume.placement.extent * 0.5;
        let half = half_mesh.max(half_volume);
        let corners: Vec<Vec3> = (0..8)
            .map(|i| {
                let sign = Vec3::new(
                    if i & 1 == 0 { -1.0 } else { 1.0 },
                    if i & 2 == 0 { -1.0 } else { 1.0 },
                    if i & 4 == 0 { -1.0 } else { 1.0 },
                );
                rotation.transform_point3(sign * half)
            })
            .collect();
        let bounds = Bounds::from_points(&corners).unwrap_or(Bounds {
            min: -half,
            max: half,
        });

        let [r, g, b] = config.shell_color.map(|c| c as f32 / 255.0);
        Self {
            mesh_model,
            volume_model,
            dims: volume.grid.dims(),
            draw_order: config.draw_order,
            march_params: volume.march_params,
            shell_color: Vec4::new(r, g, b, config.shell_opacity.clamp(0.0, 1.0)),
            bounds,
        }
    }

    pub fn mesh_model(&self) -> Mat4 {
        self.mesh_model
    }

    pub fn volume_model(&self) -> Mat4 {
        self.volume_model
    }

    pub fn draw_order(&self) -> DrawOrder {
        self.draw_order
    }

    pub fn march_params(&self) -> MarchParams {
        self.march_params
    }

    /// World-space box around both objects.
    pub fn bounds(&self) -> Bounds {
        self.bounds
    }

    pub fn frame_camera(&self, camera: &mut Camera) {
        camera.frame_bounds(&self.bounds);
    }

    pub fn volume_uniforms(&self, camera: &Camera) -> VolumeUniforms {
        let (nx, ny, nz) = self.dims;
        let params = self.march_params;
        VolumeUniforms {
            model: self.volume_model.to_cols_array_2d(),
            inv_model: self.volume_model.inverse().to_cols_array_2d(),
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            camera_position: camera.position.extend(1.0).to_array(),
            volume_dims: [nx as f32, ny as f32, nz as f32, 0.0],
            threshold: params.threshold,
            steps: params.steps as f32,
            opacity_scale: params.opacity_scale,
            alpha_cutoff: params.alpha_cutoff,
            saturation: params.saturation,
            _padding: [0.0; 3],
        }
    }

    pub fn shell_uniforms(&self, camera: &Camera) -> ShellUniforms {
        ShellUniforms {
            model: self.mesh_model.to_cols_array_2d(),
            view_proj: camera.view_projection_matrix().to_cols_array_2d(),
            color: self.shell_color.to_array(),
            light_direction: SHELL_LIGHT_DIRECTION.normalize().extend(0.0).to_array(),
        }
    }

    /// Software rendering of the volume alone, for hosts without a GPU.
    pub fn render_cpu(
        &self,
        volume: &LoadedVolume,
        camera: &Camera,
        width: u32,
        height: u32,
        background: [u8; 4],
    ) -> Option<RgbaImage> {
        CpuRaycaster {
            grid: &volume.grid,
            transfer_function: &volume.transfer_function,
            params: self.march_params,
            model: self.volume_model,
        }
        .render(
            camera.view_projection_matrix(),
            camera.position,
            width,
            height,
            background,
        )
    }
}
