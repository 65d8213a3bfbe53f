use std::error::Error;

use glass_brain::{
    Camera, GpuRenderer, HttpVolumeSource, Processor, RefreshOutcome, RefreshTrigger,
    SceneComposition, ViewerConfig, ViewerState, VolumeViewer, WGPU, gpu_renderer::OFFSCREEN_FORMAT,
};
use image::RgbaImage;
use log::{error, info, warn};

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run().await {
        error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn Error>> {
    let config = ViewerConfig::from_env();
    let output =
        std::env::var("GLASS_BRAIN_OUTPUT").unwrap_or_else(|_| "glass_brain.png".to_string());
    let processor = match std::env::var("GLASS_BRAIN_PROCESSOR").as_deref() {
        Ok("cpu") | Ok("CPU") => Processor::CPU,
        _ => Processor::GPU,
    };

    let viewer = VolumeViewer::new(HttpVolumeSource::new(&config)?, config.clone());
    if viewer.refresh(RefreshTrigger(0)).await != RefreshOutcome::Ready {
        let state = viewer.state();
        return Err(state
            .status_message()
            .unwrap_or_else(|| "Volume did not load".to_string())
            .into());
    }
    let state = viewer.state();

    let mut camera = Camera::new(WIDTH as f32 / HEIGHT as f32);
    let image = match processor {
        Processor::GPU => match render_gpu(&state, &config, &mut camera).await {
            Ok(image) => image,
            Err(e) => {
                warn!("GPU rendering failed ({e}), falling back to the CPU raycaster");
                render_cpu(&state, &config, &mut camera)?
            }
        },
        Processor::CPU => render_cpu(&state, &config, &mut camera)?,
    };
    image.save(&output)?;
    info!("Wrote {output}");
    Ok(())
}

async fn render_gpu(
    state: &ViewerState,
    config: &ViewerConfig,
    camera: &mut Camera,
) -> Result<RgbaImage, Box<dyn Error>> {
    let mut renderer = GpuRenderer::new(WGPU::request().await?, OFFSCREEN_FORMAT, config.clone());
    renderer.sync(state)?;
    if let Some(scene) = renderer.composition() {
        scene.frame_camera(camera);
    }
    Ok(renderer.render_to_image(camera, WIDTH, HEIGHT).await?)
}

fn render_cpu(
    state: &ViewerState,
    config: &ViewerConfig,
    camera: &mut Camera,
) -> Result<RgbaImage, Box<dyn Error>> {
    let volume = state.volume().ok_or("No volume is loaded")?;
    let scene = SceneComposition::new(volume, config);
    scene.frame_camera(camera);
    scene
        .render_cpu(volume, camera, WIDTH, HEIGHT, config.background)
        .ok_or_else(|| "CPU raycaster produced no image".into())
}
