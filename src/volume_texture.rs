use half::f16;

use crate::gpu_renderer::RenderError;
use crate::transfer_function::{TRANSFER_FUNCTION_RESOLUTION, TransferFunction};
use crate::volume::VolumeGrid;

pub const VOLUME_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Float;
pub const TRANSFER_TEXTURE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// Texel data for the 3D volume texture, x fastest then y then z.
pub struct PackedVolume {
    pub extent: wgpu::Extent3d,
    pub texels: Vec<f16>,
}

impl PackedVolume {
    /// Packs `grid` as half floats and checks it against a 3D texture limit.
    pub fn pack(grid: &VolumeGrid, max_dimension: u32) -> Result<Self, RenderError> {
        let (nx, ny, nz) = grid.dims();
        let fits = |n: usize| u32::try_from(n).is_ok_and(|n| n <= max_dimension);
        if !(fits(nx) && fits(ny) && fits(nz)) {
            return Err(RenderError::VolumeTooLarge {
                dims: [nx, ny, nz],
                limit: max_dimension,
            });
        }
        let extent = wgpu::Extent3d {
            width: nx as u32,
            height: ny as u32,
            depth_or_array_layers: nz as u32,
        };
        let texels = grid.to_f16_texels();
        let expected = nx * ny * nz;
        if texels.len() != expected {
            return Err(RenderError::TexelCountMismatch {
                expected,
                actual: texels.len(),
            });
        }
        Ok(Self { extent, texels })
    }

    pub fn layout(&self) -> wgpu::TexelCopyBufferLayout {
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(self.extent.width * std::mem::size_of::<f16>() as u32),
            rows_per_image: Some(self.extent.height),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.texels)
    }
}

/// GPU side of one loaded volume: the scalar field and its transfer
/// function, each with its sampler.
pub struct VolumeTextures {
    volume_texture: wgpu::Texture,
    pub volume_view: wgpu::TextureView,
    pub volume_sampler: wgpu::Sampler,
    transfer_texture: wgpu::Texture,
    pub transfer_view: wgpu::TextureView,
    pub transfer_sampler: wgpu::Sampler,
    extent: wgpu::Extent3d,
    released: bool,
}

impl VolumeTextures {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        grid: &VolumeGrid,
        transfer_function: &TransferFunction,
    ) -> Result<Self, RenderError> {
        let packed = PackedVolume::pack(grid, device.limits().max_texture_dimension_3d)?;
        let extent = packed.extent;

        let volume_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Volume 3D Texture"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D3,
            format: VOLUME_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture: &volume_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            packed.as_bytes(),
            packed.layout(),
            extent,
        );
        let volume_view = volume_texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Trilinear filtering inside the grid, no wrap at the faces.
        let volume_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Volume Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let transfer_extent = wgpu::Extent3d {
            width: TRANSFER_FUNCTION_RESOLUTION as u32,
            height: 1,
            depth_or_array_layers: 1,
        };
        let transfer_texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Transfer Function Texture"),
            size: transfer_extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TRANSFER_TEXTURE_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture: &transfer_texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            transfer_function.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * TRANSFER_FUNCTION_RESOLUTION as u32),
                rows_per_image: Some(1),
            },
            transfer_extent,
        );
        let transfer_view = transfer_texture.create_view(&wgpu::TextureViewDescriptor::default());

        // Table lookups must not blend neighbouring entries.
        let transfer_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Transfer Function Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        log::debug!(
            "Uploaded volume texture {}x{}x{} and {}-entry transfer function ({})",
            extent.width,
            extent.height,
            extent.depth_or_array_layers,
            transfer_function.len(),
            transfer_function.policy_name()
        );

        Ok(Self {
            volume_texture,
            volume_view,
            volume_sampler,
            transfer_texture,
            transfer_view,
            transfer_sampler,
            extent,
            released: false,
        })
    }

    pub fn extent(&self) -> wgpu::Extent3d {
        self.extent
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Frees the GPU memory now instead of waiting for the last handle to
    /// drop. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.volume_texture.destroy();
        self.transfer_texture.destroy();
        self.released = true;
    }
}

impl Drop for VolumeTextures {
    fn drop(&mut self) {
        self.release();
    }
}
