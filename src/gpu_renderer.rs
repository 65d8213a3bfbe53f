use std::borrow::Cow;

use image::{ImageBuffer, RgbaImage};
use log::{debug, info, warn};
use thiserror::Error;
use wgpu::{PollType, util::DeviceExt};

use crate::camera::Camera;
use crate::config::ViewerConfig;
use crate::enums::DrawOrder;
use crate::scene::{SceneComposition, ShellUniforms, VolumeUniforms};
use crate::viewer::ViewerState;
use crate::volume_loader::LoadedVolume;
use crate::volume_texture::VolumeTextures;

/// Format of the offscreen target used by [`GpuRenderer::render_to_image`].
pub const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No suitable graphics adapter: {0}")]
    AdapterUnavailable(#[from] wgpu::RequestAdapterError),
    #[error("Failed to create graphics device: {0}")]
    DeviceUnavailable(#[from] wgpu::RequestDeviceError),
    #[error("Volume {dims:?} exceeds the 3D texture limit of {limit} texels per axis")]
    VolumeTooLarge { dims: [usize; 3], limit: u32 },
    #[error("Volume texture expects {expected} texels, got {actual}")]
    TexelCountMismatch { expected: usize, actual: usize },
    #[error("Failed to map readback buffer: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("Readback was cancelled before the buffer was mapped")]
    ReadbackCancelled,
    #[error("Device poll failed: {0}")]
    Poll(#[from] wgpu::PollError),
    #[error("Invalid output size {width}x{height}")]
    Image { width: u32, height: u32 },
    #[error("No volume is loaded")]
    NotLoaded,
}

pub struct WGPU {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl WGPU {
    /// Requests a device without a surface, for offscreen rendering.
    pub async fn request() -> Result<Self, RenderError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;
        let info = adapter.get_info();
        info!("Using adapter {} ({:?})", info.name, info.backend);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Glass Brain Device"),
                ..Default::default()
            })
            .await?;
        Ok(Self { device, queue })
    }
}

/// Unit cube [-0.5, 0.5]^3 as 36 vertices, counter-clockwise seen from
/// outside.
pub fn proxy_cube_vertices() -> Vec<[f32; 3]> {
    let mut vertices = Vec::with_capacity(36);
    for axis in 0..3 {
        for sign in [1.0f32, -1.0] {
            let mut n = [0.0f32; 3];
            let mut u = [0.0f32; 3];
            let mut v = [0.0f32; 3];
            n[axis] = sign;
            u[(axis + 1) % 3] = 1.0;
            v[(axis + 2) % 3] = sign;
            let corner = |a: f32, b: f32| -> [f32; 3] {
                std::array::from_fn(|i| 0.5 * n[i] + a * u[i] + b * v[i])
            };
            let p00 = corner(-0.5, -0.5);
            let p10 = corner(0.5, -0.5);
            let p11 = corner(0.5, 0.5);
            let p01 = corner(-0.5, 0.5);
            vertices.extend_from_slice(&[p00, p10, p11, p00, p11, p01]);
        }
    }
    vertices
}

/// Shell vertices interleaved as position then normal.
fn shell_vertex_data(volume: &LoadedVolume) -> Vec<[f32; 6]> {
    volume
        .mesh
        .vertices()
        .iter()
        .zip(volume.mesh.normals())
        .map(|(p, n)| [p.x, p.y, p.z, n.x, n.y, n.z])
        .collect()
}

/// Bytes per row of a readback buffer, padded to the copy alignment.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * 4;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Indexed shell triangles. Absent when the mesh has no faces.
struct ShellGeometry {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl ShellGeometry {
    fn new(device: &wgpu::Device, volume: &LoadedVolume) -> Option<Self> {
        let indices = volume.mesh.indices();
        if indices.is_empty() {
            return None;
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Shell Vertex Buffer"),
            contents: bytemuck::cast_slice(&shell_vertex_data(volume)),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Shell Index Buffer"),
            contents: bytemuck::cast_slice(&indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Some(Self {
            vertex_buffer,
            index_buffer,
            index_count: indices.len() as u32,
        })
    }
}

/// GPU resources for one loaded volume.
struct SceneResources {
    generation: u64,
    composition: SceneComposition,
    textures: VolumeTextures,
    volume_uniform_buffer: wgpu::Buffer,
    volume_bind_group: wgpu::BindGroup,
    shell: Option<ShellGeometry>,
    shell_uniform_buffer: wgpu::Buffer,
    shell_bind_group: wgpu::BindGroup,
}

impl SceneResources {
    fn release(&mut self) {
        self.textures.release();
        self.volume_uniform_buffer.destroy();
        if let Some(shell) = &self.shell {
            shell.vertex_buffer.destroy();
            shell.index_buffer.destroy();
        }
        self.shell_uniform_buffer.destroy();
    }
}

/// Draws the translucent shell and the ray-marched volume into a color
/// target, without a depth attachment.
pub struct GpuRenderer {
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: ViewerConfig,
    volume_pipeline: wgpu::RenderPipeline,
    volume_bind_group_layout: wgpu::BindGroupLayout,
    shell_pipeline: wgpu::RenderPipeline,
    shell_bind_group_layout: wgpu::BindGroupLayout,
    cube_vertex_buffer: wgpu::Buffer,
    scene: Option<SceneResources>,
}

impl GpuRenderer {
    pub fn new(wgpu: WGPU, format: wgpu::TextureFormat, config: ViewerConfig) -> Self {
        let WGPU { device, queue } = wgpu;

        let volume_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Volume Raycast Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/volume_raycast.wgsl"
            ))),
        });
        let shell_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Glass Shell Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(include_str!(
                "shaders/glass_shell.wgsl"
            ))),
        });

        let uniform_entry = |visibility| wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let texture_entry = |binding, view_dimension| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let sampler_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        };

        let volume_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Volume Raycast Bind Group Layout"),
                entries: &[
                    uniform_entry(wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT),
                    texture_entry(1, wgpu::TextureViewDimension::D3),
                    sampler_entry(2),
                    texture_entry(3, wgpu::TextureViewDimension::D2),
                    sampler_entry(4),
                ],
            });
        let shell_bind_group_layout =
            device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some("Glass Shell Bind Group Layout"),
                entries: &[uniform_entry(
                    wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                )],
            });

        let volume_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Volume Raycast Pipeline Layout"),
            bind_group_layouts: &[&volume_bind_group_layout],
            push_constant_ranges: &[],
        });
        let shell_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Glass Shell Pipeline Layout"),
            bind_group_layouts: &[&shell_bind_group_layout],
            push_constant_ranges: &[],
        });

        // Back faces only, so the camera may sit inside the proxy.
        let volume_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Volume Raycast Pipeline"),
            layout: Some(&volume_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &volume_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 3]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &volume_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::PREMULTIPLIED_ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: Some(wgpu::Face::Front),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let shell_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Glass Shell Pipeline"),
            layout: Some(&shell_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shell_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<[f32; 6]>() as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &wgpu::vertex_attr_array![0 => Float32x3, 1 => Float32x3],
                }],
                compilation_options: Default::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shell_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let cube_vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Proxy Cube Vertex Buffer"),
            contents: bytemuck::cast_slice(&proxy_cube_vertices()),
            usage: wgpu::BufferUsages::VERTEX,
        });

        Self {
            device,
            queue,
            config,
            volume_pipeline,
            volume_bind_group_layout,
            shell_pipeline,
            shell_bind_group_layout,
            cube_vertex_buffer,
            scene: None,
        }
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    pub fn has_scene(&self) -> bool {
        self.scene.is_some()
    }

    pub fn loaded_generation(&self) -> Option<u64> {
        self.scene.as_ref().map(|s| s.generation)
    }

    /// Whether the loaded scene has shell triangles to draw.
    pub fn has_shell(&self) -> bool {
        self.scene.as_ref().is_some_and(|s| s.shell.is_some())
    }

    pub fn composition(&self) -> Option<&SceneComposition> {
        self.scene.as_ref().map(|s| &s.composition)
    }

    /// Brings the GPU resources in line with `state`. Resources are only
    /// rebuilt when the committed generation changes; anything that is not
    /// `Ready` releases them. Returns whether anything changed.
    pub fn sync(&mut self, state: &ViewerState) -> Result<bool, RenderError> {
        match state {
            ViewerState::Ready { generation, volume } => {
                if self.loaded_generation() == Some(*generation) {
                    return Ok(false);
                }
                self.rebuild(*generation, volume)?;
                Ok(true)
            }
            _ => {
                let had_scene = self.has_scene();
                self.release();
                Ok(had_scene)
            }
        }
    }

    /// Replaces the current scene with one built from `volume`. The old
    /// resources are released first, even when the build fails.
    pub fn rebuild(&mut self, generation: u64, volume: &LoadedVolume) -> Result<(), RenderError> {
        self.release();

        let textures = VolumeTextures::new(
            &self.device,
            &self.queue,
            &volume.grid,
            &volume.transfer_function,
        )?;
        let composition = SceneComposition::new(volume, &self.config);

        let volume_uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Volume Uniform Buffer"),
            size: std::mem::size_of::<VolumeUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let volume_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Volume Raycast Bind Group"),
            layout: &self.volume_bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: volume_uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&textures.volume_view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&textures.volume_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(&textures.transfer_view),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::Sampler(&textures.transfer_sampler),
                },
            ],
        });

        let shell = ShellGeometry::new(&self.device, volume);
        if shell.is_none() {
            warn!("Surface mesh has no faces, drawing the volume alone");
        }
        let shell_uniform_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Shell Uniform Buffer"),
            size: std::mem::size_of::<ShellUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let shell_bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Glass Shell Bind Group"),
            layout: &self.shell_bind_group_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: shell_uniform_buffer.as_entire_binding(),
            }],
        });

        info!(
            "Built scene for generation {generation}: {} shell triangles, volume {:?}",
            volume.mesh.faces().len(),
            volume.grid.dims()
        );
        self.scene = Some(SceneResources {
            generation,
            composition,
            textures,
            volume_uniform_buffer,
            volume_bind_group,
            shell,
            shell_uniform_buffer,
            shell_bind_group,
        });
        Ok(())
    }

    /// Drops the current scene and frees its GPU memory.
    pub fn release(&mut self) {
        if let Some(mut scene) = self.scene.take() {
            debug!("Releasing scene for generation {}", scene.generation);
            scene.release();
        }
    }

    fn background(&self) -> wgpu::Color {
        let [r, g, b, a] = self.config.background.map(|c| c as f64 / 255.0);
        wgpu::Color { r, g, b, a }
    }

    /// Records one frame into `view`: background clear, then the shell and
    /// the volume in the configured order. With no scene loaded only the
    /// clear is recorded.
    pub fn encode(&self, encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, camera: &Camera) {
        if let Some(scene) = &self.scene {
            self.queue.write_buffer(
                &scene.volume_uniform_buffer,
                0,
                bytemuck::bytes_of(&scene.composition.volume_uniforms(camera)),
            );
            self.queue.write_buffer(
                &scene.shell_uniform_buffer,
                0,
                bytemuck::bytes_of(&scene.composition.shell_uniforms(camera)),
            );
        }

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Glass Brain Render Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(self.background()),
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        let Some(scene) = &self.scene else {
            return;
        };
        let draw_shell = |pass: &mut wgpu::RenderPass<'_>| {
            let Some(shell) = &scene.shell else {
                return;
            };
            pass.set_pipeline(&self.shell_pipeline);
            pass.set_bind_group(0, &scene.shell_bind_group, &[]);
            pass.set_vertex_buffer(0, shell.vertex_buffer.slice(..));
            pass.set_index_buffer(shell.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..shell.index_count, 0, 0..1);
        };
        let draw_volume = |pass: &mut wgpu::RenderPass<'_>| {
            pass.set_pipeline(&self.volume_pipeline);
            pass.set_bind_group(0, &scene.volume_bind_group, &[]);
            pass.set_vertex_buffer(0, self.cube_vertex_buffer.slice(..));
            pass.draw(0..36, 0..1);
        };
        match scene.composition.draw_order() {
            DrawOrder::ShellFirst => {
                draw_shell(&mut render_pass);
                draw_volume(&mut render_pass);
            }
            DrawOrder::VolumeFirst => {
                draw_volume(&mut render_pass);
                draw_shell(&mut render_pass);
            }
        }
    }

    /// Renders one frame offscreen and reads it back. The renderer must
    /// have been created with [`OFFSCREEN_FORMAT`].
    pub async fn render_to_image(
        &self,
        camera: &Camera,
        width: u32,
        height: u32,
    ) -> Result<RgbaImage, RenderError> {
        if width == 0 || height == 0 {
            return Err(RenderError::Image { width, height });
        }
        if self.scene.is_none() {
            return Err(RenderError::NotLoaded);
        }

        let extent = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };
        let target = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Offscreen Target"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: OFFSCREEN_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let view = target.create_view(&wgpu::TextureViewDescriptor::default());

        let padded_row = padded_bytes_per_row(width);
        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Offscreen Render Encoder"),
            });
        self.encode(&mut encoder, &view, camera);
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfoBase {
                texture: &target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(height),
                },
            },
            extent,
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        receiver
            .await
            .map_err(|_| RenderError::ReadbackCancelled)??;

        let data = buffer_slice.get_mapped_range();
        let row_bytes = (width * 4) as usize;
        let pixels: Vec<u8> = data
            .chunks(padded_row as usize)
            .flat_map(|row| &row[..row_bytes])
            .copied()
            .collect();
        drop(data);
        staging_buffer.unmap();
        target.destroy();

        ImageBuffer::from_raw(width, height, pixels).ok_or(RenderError::Image { width, height })
    }
}

impl Drop for GpuRenderer {
    fn drop(&mut self) {
        self.release();
    }
}
