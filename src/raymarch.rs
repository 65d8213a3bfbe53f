//! Ray marching through the unit volume proxy.
//!
//! This is the CPU counterpart of `shaders/volume_raycast.wgsl`. Both work
//! in proxy-local space, where the volume occupies `[-0.5, 0.5]^3`, and both
//! must stay in sync: the GPU path is what users see, this one backs the
//! tests and the [`Processor::CPU`](crate::enums::Processor) renderer.

use glam::{Mat4, Vec3, Vec4};
use image::{ImageBuffer, Rgba, RgbaImage};
use ndarray::ArrayView3;
use rayon::prelude::*;

use crate::transfer_function::TransferFunction;
use crate::volume::VolumeGrid;

/// Accumulated opacity at which marching stops.
pub const SATURATION_ALPHA: f32 = 0.95;
/// Fragments whose final opacity stays below this are discarded.
pub const DISCARD_ALPHA: f32 = 0.0001;
/// Per-sample opacity is `tf.a * OPACITY_GAIN / steps`, which keeps the
/// integrated opacity independent of the sample budget.
pub const OPACITY_GAIN: f32 = 20.0;

const BOX_MIN: Vec3 = Vec3::splat(-0.5);
const BOX_MAX: Vec3 = Vec3::splat(0.5);

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchParams {
    /// Samples at or below this intensity contribute nothing.
    pub threshold: f32,
    /// Samples along the longest axis of the box.
    pub steps: u32,
    pub opacity_scale: f32,
    pub saturation: f32,
    pub alpha_cutoff: f32,
}

impl MarchParams {
    pub fn new(threshold: f32, steps: u32) -> Self {
        let steps = steps.max(1);
        Self {
            threshold,
            steps,
            opacity_scale: OPACITY_GAIN / steps as f32,
            saturation: SATURATION_ALPHA,
            alpha_cutoff: DISCARD_ALPHA,
        }
    }
}

impl Default for MarchParams {
    fn default() -> Self {
        Self::new(0.01, 100)
    }
}

/// Result of one ray.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MarchOutcome {
    /// Premultiplied color and accumulated opacity.
    pub color: Vec4,
    /// Number of volume samples taken.
    pub samples: u32,
    /// Marching stopped because opacity saturated.
    pub saturated: bool,
}

/// Slab test against the unit box. Returns the entry and exit distances;
/// the ray misses when `t0 >= t1`.
pub fn intersect_unit_box(origin: Vec3, direction: Vec3) -> (f32, f32) {
    let inv_dir = direction.recip();
    let t_a = (BOX_MIN - origin) * inv_dir;
    let t_b = (BOX_MAX - origin) * inv_dir;
    let t_min = t_a.min(t_b);
    let t_max = t_a.max(t_b);
    (t_min.max_element(), t_max.min_element())
}

/// Step length that puts `steps` samples along the longest axis, taking the
/// smallest per-axis step so thin axes are not under-sampled.
pub fn step_size(direction: Vec3, steps: u32) -> f32 {
    (direction.abs() * steps.max(1) as f32).recip().min_element()
}

/// Front-to-back "under" compositing of one sample onto `acc`.
///
/// `acc.w` never decreases and never leaves [0, 1].
#[inline]
pub fn composite(acc: Vec4, rgb: Vec3, opacity: f32) -> Vec4 {
    let opacity = opacity.clamp(0.0, 1.0);
    let remaining = 1.0 - acc.w;
    (acc.truncate() + remaining * rgb * opacity).extend(acc.w + remaining * opacity)
}

/// Marches one ray through the box. `sample` receives texture coordinates
/// in `[0, 1]^3`. Returns `None` for a discarded fragment.
pub fn march<F>(
    origin: Vec3,
    direction: Vec3,
    params: &MarchParams,
    transfer_function: &TransferFunction,
    sample: F,
) -> Option<MarchOutcome>
where
    F: Fn(Vec3) -> f32,
{
    let direction = direction.try_normalize()?;
    let (t0, t1) = intersect_unit_box(origin, direction);
    // also rejects NaN from rays grazing a face
    if !(t0 < t1) {
        return None;
    }
    let t0 = t0.max(0.0);
    let dt = step_size(direction, params.steps);

    let mut acc = Vec4::ZERO;
    let mut samples = 0;
    let mut saturated = false;
    let mut t = t0;
    while t < t1 {
        let p = origin + direction * t;
        let value = sample(p + 0.5);
        samples += 1;
        if value > params.threshold {
            let tf = transfer_function.lookup(value);
            acc = composite(acc, tf.truncate(), tf.w * params.opacity_scale);
            if acc.w >= params.saturation {
                saturated = true;
                break;
            }
        }
        t += dt;
    }

    if acc.w < params.alpha_cutoff {
        return None;
    }
    Some(MarchOutcome {
        color: acc,
        samples,
        saturated,
    })
}

/// Trilinear sample of a (z, y, x) grid at texture coordinates `uvw`, with
/// texel-center addressing and clamp-to-edge, as a linear GPU sampler does.
pub fn trilinear_sample(samples: &ArrayView3<f32>, uvw: Vec3) -> f32 {
    let (depth, height, width) = samples.dim();
    let to_texel = |u: f32, n: usize| (u * n as f32 - 0.5).clamp(0.0, (n - 1) as f32);
    let x = to_texel(uvw.x, width);
    let y = to_texel(uvw.y, height);
    let z = to_texel(uvw.z, depth);

    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let z0 = z.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let z1 = (z0 + 1).min(depth - 1);
    let dx = x - x0 as f32;
    let dy = y - y0 as f32;
    let dz = z - z0 as f32;

    let lerp = |a: f32, b: f32, t: f32| a.mul_add(1.0 - t, b * t);
    let plane = |zi: usize| {
        let v0 = lerp(samples[[zi, y0, x0]], samples[[zi, y0, x1]], dx);
        let v1 = lerp(samples[[zi, y1, x0]], samples[[zi, y1, x1]], dx);
        lerp(v0, v1, dy)
    };
    lerp(plane(z0), plane(z1), dz)
}

/// Renders the volume alone on the CPU, composited over an opaque
/// background.
pub struct CpuRaycaster<'a> {
    pub grid: &'a VolumeGrid,
    pub transfer_function: &'a TransferFunction,
    pub params: MarchParams,
    /// Proxy model matrix (unit cube to world).
    pub model: Mat4,
}

impl CpuRaycaster<'_> {
    pub fn render(
        &self,
        view_projection: Mat4,
        camera_position: Vec3,
        width: u32,
        height: u32,
        background: [u8; 4],
    ) -> Option<RgbaImage> {
        let inv_view_projection = view_projection.inverse();
        let inv_model = self.model.inverse();
        let local_origin = inv_model.transform_point3(camera_position);
        let samples = self.grid.samples().view();
        let bg = Vec4::from_array(background.map(|c| c as f32 / 255.0));

        let pixel_data: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map(|y| {
                (0..width)
                    .flat_map(|x| {
                        let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
                        let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
                        let far = inv_view_projection.project_point3(Vec3::new(ndc_x, ndc_y, 1.0));
                        let local_far = inv_model.transform_point3(far);
                        let outcome = march(
                            local_origin,
                            local_far - local_origin,
                            &self.params,
                            self.transfer_function,
                            |uvw| trilinear_sample(&samples, uvw),
                        );
                        let color = match outcome {
                            Some(outcome) => outcome.color + (1.0 - outcome.color.w) * bg,
                            None => bg,
                        };
                        color
                            .to_array()
                            .map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
                    })
                    .collect::<Vec<u8>>()
            })
            .collect();
        ImageBuffer::<Rgba<u8>, _>::from_raw(width, height, pixel_data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::TransferPolicy;
    use ndarray::Array3;
    use proptest::prelude::*;

    fn opaque_transfer_function() -> TransferFunction {
        TransferFunction::build(&TransferPolicy::Hotspot {
            threshold: 0.0,
            color: [255, 255, 255],
            opacity: 1.0,
        })
    }

    #[test]
    fn test_ray_outside_box_misses() {
        let (t0, t1) = intersect_unit_box(Vec3::splat(10.0), Vec3::X);
        assert!(t0 >= t1);
        let outcome = march(
            Vec3::splat(10.0),
            Vec3::X,
            &MarchParams::default(),
            &opaque_transfer_function(),
            |_| 1.0,
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn test_ray_through_center_hits() {
        let (t0, t1) = intersect_unit_box(Vec3::new(0.0, 0.0, -10.0), Vec3::Z);
        assert!(t0 < t1);
        assert!(t0.is_finite() && t1.is_finite());
        assert!((t0 - 9.5).abs() < 1e-5);
        assert!((t1 - 10.5).abs() < 1e-5);
    }

    #[test]
    fn test_box_behind_camera_is_discarded() {
        let outcome = march(
            Vec3::new(0.0, 0.0, 5.0),
            Vec3::Z,
            &MarchParams::default(),
            &opaque_transfer_function(),
            |_| 1.0,
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn test_camera_inside_box_starts_at_zero() {
        let outcome = march(
            Vec3::ZERO,
            Vec3::X,
            &MarchParams::new(0.01, 100),
            &opaque_transfer_function(),
            |_| 1.0,
        )
        .unwrap();
        assert!(outcome.color.w > 0.0);
    }

    #[test]
    fn test_step_size_uses_longest_axis() {
        assert!((step_size(Vec3::Z, 100) - 0.01).abs() < 1e-7);
        let diagonal = Vec3::ONE.normalize();
        let dt = step_size(diagonal, 100);
        assert!((dt - 1.0 / (100.0 * diagonal.x)).abs() < 1e-6);
    }

    #[test]
    fn test_early_termination_on_saturation() {
        let params = MarchParams::new(0.01, 100);
        let outcome = march(
            Vec3::new(0.0, 0.0, -10.0),
            Vec3::Z,
            &params,
            &opaque_transfer_function(),
            |_| 1.0,
        )
        .unwrap();
        // opacity 0.2 per sample saturates after 14 samples, far below 100
        assert!(outcome.saturated);
        assert_eq!(outcome.samples, 14);
        assert!(outcome.color.w >= SATURATION_ALPHA);
    }

    #[test]
    fn test_below_threshold_is_discarded() {
        let outcome = march(
            Vec3::new(0.0, 0.0, -10.0),
            Vec3::Z,
            &MarchParams::new(0.5, 100),
            &opaque_transfer_function(),
            |_| 0.4,
        );
        assert!(outcome.is_none());
    }

    #[test]
    fn test_trilinear_matches_texel_centers() {
        let grid = Array3::from_shape_vec((1, 1, 2), vec![0.0, 1.0]).unwrap();
        let view = grid.view();
        assert_eq!(trilinear_sample(&view, Vec3::new(0.25, 0.5, 0.5)), 0.0);
        assert_eq!(trilinear_sample(&view, Vec3::new(0.75, 0.5, 0.5)), 1.0);
        assert!((trilinear_sample(&view, Vec3::new(0.5, 0.5, 0.5)) - 0.5).abs() < 1e-6);
        assert_eq!(trilinear_sample(&view, Vec3::new(1.5, 0.5, 0.5)), 1.0);
    }

    #[test]
    fn test_cpu_raycaster_colors_center_pixel() {
        let grid = VolumeGrid::new((2, 2, 2), vec![1.0; 8], Mat4::IDENTITY, None).unwrap();
        let tf = opaque_transfer_function();
        let raycaster = CpuRaycaster {
            grid: &grid,
            transfer_function: &tf,
            params: MarchParams::default(),
            model: Mat4::from_scale(Vec3::splat(2.0)),
        };
        let eye = Vec3::new(0.0, 0.0, 5.0);
        let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(0.8, 1.0, 0.1, 100.0);
        let image = raycaster
            .render(projection * view, eye, 9, 9, [0, 0, 0, 255])
            .unwrap();
        let center = image.get_pixel(4, 4).0;
        // saturated white over black: rgb equals the accumulated opacity
        assert!(center[0] >= 242 && center[0] == center[1] && center[1] == center[2]);
        assert_eq!(center[3], 255);
        assert_eq!(image.get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    proptest! {
        #[test]
        fn prop_alpha_monotone_and_bounded(opacities in prop::collection::vec(0.0f32..2.0, 0..64)) {
            let mut acc = Vec4::ZERO;
            for opacity in opacities {
                let next = composite(acc, Vec3::ONE, opacity);
                prop_assert!(next.w >= acc.w);
                prop_assert!(next.w <= 1.0);
                prop_assert!(next.w >= 0.0);
                acc = next;
            }
        }

        #[test]
        fn prop_hit_through_box_center(x in -0.4f32..0.4, y in -0.4f32..0.4) {
            let (t0, t1) = intersect_unit_box(Vec3::new(x, y, -3.0), Vec3::Z);
            prop_assert!(t0 < t1);
            prop_assert!((t1 - t0 - 1.0).abs() < 1e-5);
        }
    }
}
