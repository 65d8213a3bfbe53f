//! # Glass-brain library
//!
//! This crate renders a translucent brain surface ("glass shell") together
//! with a ray-marched 3D scalar volume, such as a statistical map, placed
//! inside it.
//!
//! Both datasets are fetched from a backend over HTTP in parallel. The
//! surface arrives as a triangle mesh and the volume as a flat array of
//! intensities with a voxel-to-world affine. Intensities are normalized to
//! [0, 1] using rayon and uploaded as a 3D texture, then colored through a
//! 256 entry transfer function while the shader marches rays front to back.
//!
//!  - The shell is drawn first with straight alpha blending, the volume
//!    after it with premultiplied blending. Neither writes depth.
//!  - The volume proxy is a unit cube scaled by voxel spacing times grid
//!    size. Rotation and translation in the affine are ignored.
//!  - A refresh discards the scene and loads it again. When refreshes
//!    overlap only the newest one is committed.
//!
//! Hosts without a GPU can use the CPU raycaster, which shares the same
//! marching rules but draws the volume alone.
//!
//! # Roadmap
//!
//!  - Gradient shading of the volume
//!  - Depth aware compositing of shell and volume
//!
//! # Examples
//!
//! ## Rendering a snapshot of the scene
//!
//! ```no_run
//! # use glass_brain::{Camera, GpuRenderer, HttpVolumeSource, RefreshTrigger, ViewerConfig, VolumeViewer, WGPU};
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ViewerConfig::new("http://localhost:5000");
//! let viewer = VolumeViewer::new(HttpVolumeSource::new(&config)?, config.clone());
//! viewer.refresh(RefreshTrigger(0)).await;
//!
//! let mut renderer = GpuRenderer::new(
//!     WGPU::request().await?,
//!     glass_brain::gpu_renderer::OFFSCREEN_FORMAT,
//!     config,
//! );
//! renderer.sync(&viewer.state())?;
//! let mut camera = Camera::new(1.0);
//! if let Some(scene) = renderer.composition() {
//!     scene.frame_camera(&mut camera);
//! }
//! let image = renderer.render_to_image(&camera, 512, 512).await?;
//! image.save("glass_brain.png")?;
//! # Ok(())
//! # }
//! ```

pub mod camera;
pub mod config;
pub mod enums;
pub mod gpu_renderer;
pub mod mesh;
pub mod placement;
pub mod raymarch;
pub mod scene;
pub mod transfer_function;
pub mod viewer;
pub mod volume;
pub mod volume_loader;
pub mod volume_texture;

pub use camera::Camera;
pub use config::ViewerConfig;
pub use enums::{DrawOrder, Processor, ProxySizing, TransferPolicy};
pub use gpu_renderer::{GpuRenderer, RenderError, WGPU};
pub use mesh::SurfaceMesh;
pub use scene::SceneComposition;
pub use transfer_function::TransferFunction;
pub use viewer::{RefreshOutcome, ViewerState, VolumeViewer};
pub use volume::VolumeGrid;
pub use volume_loader::{
    HttpVolumeSource, LoadError, LoadedVolume, RefreshTrigger, VolumeLoader, VolumeSource,
};
