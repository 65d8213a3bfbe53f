//! Offscreen rendering through the GPU pipeline.
//!
//! Needs a GPU adapter (real or software). Without one the test logs and
//! returns early.

mod common;

use glass_brain::gpu_renderer::OFFSCREEN_FORMAT;
use glass_brain::{
    Camera, GpuRenderer, RefreshOutcome, RefreshTrigger, RenderError, TransferPolicy,
    ViewerConfig, ViewerState, VolumeViewer, WGPU,
};

use common::{StaticSource, volume_payload};

#[tokio::test]
async fn headless_render_tests() {
    let wgpu = match WGPU::request().await {
        Ok(wgpu) => wgpu,
        Err(e) => {
            eprintln!("Skipping headless tests: no GPU adapter available ({e})");
            return;
        }
    };
    let config = ViewerConfig::default().with_transfer_policy(TransferPolicy::Hotspot {
        threshold: 0.0,
        color: [255, 255, 255],
        opacity: 1.0,
    });
    let viewer = VolumeViewer::new(
        StaticSource::new(volume_payload([8, 8, 8], 1.0)),
        config.clone(),
    );
    let mut renderer = GpuRenderer::new(wgpu, OFFSCREEN_FORMAT, config);
    let mut camera = Camera::new(1.0);

    // --- Nothing loaded ---
    assert!(!renderer.sync(&viewer.state()).unwrap());
    assert!(matches!(
        renderer.render_to_image(&camera, 32, 32).await,
        Err(RenderError::NotLoaded)
    ));

    // --- Loaded volume ---
    viewer.refresh(RefreshTrigger(1)).await;
    assert!(renderer.sync(&viewer.state()).unwrap());
    assert_eq!(renderer.loaded_generation(), Some(1));
    // Same generation again is a no-op.
    assert!(!renderer.sync(&viewer.state()).unwrap());

    renderer.composition().unwrap().frame_camera(&mut camera);
    let image = renderer.render_to_image(&camera, 64, 64).await.unwrap();
    assert_eq!(image.dimensions(), (64, 64));
    assert_eq!(image.get_pixel(0, 0).0, [0xe0, 0xe0, 0xe0, 0xff]);
    let center = image.get_pixel(32, 32).0;
    assert!(center[0] > 235, "volume should dominate the center: {center:?}");

    // --- Reload releases the old scene ---
    let loading = ViewerState::Loading {
        generation: 2,
        trigger: RefreshTrigger(2),
    };
    assert!(renderer.sync(&loading).unwrap());
    assert!(!renderer.has_scene());

    viewer.refresh(RefreshTrigger(2)).await;
    assert!(renderer.sync(&viewer.state()).unwrap());
    assert_eq!(renderer.loaded_generation(), Some(2));
    assert!(renderer.has_shell());

    // --- Mesh without faces draws the volume alone ---
    let mut source = StaticSource::new(volume_payload([8, 8, 8], 1.0));
    source.mesh.faces = Some(Vec::new());
    let bare_viewer = VolumeViewer::new(source, ViewerConfig::default());
    assert_eq!(
        bare_viewer.refresh(RefreshTrigger(3)).await,
        RefreshOutcome::Ready
    );
    assert!(renderer.sync(&bare_viewer.state()).unwrap());
    assert!(!renderer.has_shell());
    let image = renderer.render_to_image(&camera, 32, 32).await.unwrap();
    assert_eq!(image.get_pixel(0, 0).0, [0xe0, 0xe0, 0xe0, 0xff]);
}
