//! Orbit camera driven by user input.

use glam::{Mat4, Vec3};

use crate::mesh::Bounds;

/// A perspective camera orbiting a target point.
#[derive(Debug, Clone)]
pub struct Camera {
    /// Camera position in world space.
    pub position: Vec3,
    /// Point the camera orbits around.
    pub target: Vec3,
    pub up: Vec3,
    /// Vertical field of view in radians.
    pub fov: f32,
    /// Aspect ratio (width / height).
    pub aspect_ratio: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    #[must_use]
    pub fn new(aspect_ratio: f32) -> Self {
        Self {
            position: Vec3::new(0.0, 0.0, 250.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            fov: 50f32.to_radians(),
            aspect_ratio,
            near: 0.1,
            far: 2000.0,
        }
    }

    pub fn set_aspect_ratio(&mut self, aspect_ratio: f32) {
        self.aspect_ratio = aspect_ratio;
    }

    #[must_use]
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    #[must_use]
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov, self.aspect_ratio, self.near, self.far)
    }

    #[must_use]
    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }

    #[must_use]
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    #[must_use]
    pub fn right(&self) -> Vec3 {
        self.forward().cross(self.up).normalize()
    }

    /// Turntable rotation around the target, in radians.
    pub fn orbit(&mut self, delta_x: f32, delta_y: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }
        let mut theta = offset.x.atan2(offset.z);
        let mut phi = (offset.y / radius).clamp(-1.0, 1.0).acos();

        theta -= delta_x;
        phi = (phi - delta_y).clamp(0.01, std::f32::consts::PI - 0.01);

        self.position = self.target
            + Vec3::new(
                radius * phi.sin() * theta.sin(),
                radius * phi.cos(),
                radius * phi.sin() * theta.cos(),
            );
    }

    /// Moves camera and target together in the view plane.
    pub fn pan(&mut self, delta_x: f32, delta_y: f32) {
        let right = self.right();
        let up = right.cross(self.forward());
        let offset = right * delta_x + up * delta_y;
        self.position += offset;
        self.target += offset;
    }

    /// Dollies toward (positive) or away from the target.
    pub fn zoom(&mut self, delta: f32) {
        let direction = self.forward();
        let distance = (self.position - self.target).length();
        let new_distance = (distance - delta).max(self.near * 10.0);
        self.position = self.target - direction * new_distance;
    }

    /// Aims at `bounds` from +Z, far enough to fit them in view.
    pub fn frame_bounds(&mut self, bounds: &Bounds) {
        let center = bounds.center();
        let radius = (bounds.size().length() * 0.5).max(1e-3);
        let distance = radius / (self.fov * 0.5).sin();

        self.target = center;
        self.position = center + Vec3::new(0.0, 0.0, distance);
        self.near = (distance - radius).max(distance * 1e-3);
        self.far = distance + radius * 4.0;
    }
}

impl Default for Camera {
    fn default() -> Self {
        Self::new(1.0)
    }
}
