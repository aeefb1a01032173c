use glam::{DMat4, DVec3};
use serde::Deserialize;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    Perspective {
        /// Vertical field of view, radians.
        fov_y: f64,
        aspect: f64,
        near: f64,
        far: f64,
    },
    Orthographic {
        left: f64,
        right: f64,
        top: f64,
        bottom: f64,
        zoom: f64,
        near: f64,
        far: f64,
    },
}

/// A viewer: where it is (`world`, camera to world) and how it projects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Camera {
    pub world: DMat4,
    pub projection: Projection,
}

/// Render surface size in pixels.
#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn aspect(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl Camera {
    pub fn perspective(eye: DVec3, target: DVec3, up: DVec3, fov_y: f64, aspect: f64, near: f64, far: f64) -> Self {
        Self {
            world: DMat4::look_at_rh(eye, target, up).inverse(),
            projection: Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            },
        }
    }

    /// Orthographic camera whose frustum spans `left..right` and
    /// `bottom..top` at `zoom = 1`.
    pub fn orthographic(
        eye: DVec3,
        target: DVec3,
        up: DVec3,
        (left, right, top, bottom): (f64, f64, f64, f64),
        zoom: f64,
        near: f64,
        far: f64,
    ) -> Self {
        Self {
            world: DMat4::look_at_rh(eye, target, up).inverse(),
            projection: Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                zoom,
                near,
                far,
            },
        }
    }

    pub fn position(&self) -> DVec3 {
        self.world.w_axis.truncate()
    }

    pub fn view_matrix(&self) -> DMat4 {
        self.world.inverse()
    }

    pub fn projection_matrix(&self) -> DMat4 {
        match self.projection {
            Projection::Perspective {
                fov_y,
                aspect,
                near,
                far,
            } => DMat4::perspective_rh_gl(fov_y, aspect, near, far),
            Projection::Orthographic {
                left,
                right,
                top,
                bottom,
                zoom,
                near,
                far,
            } => {
                let zoom = if zoom > 0.0 { zoom } else { 1.0 };
                let dx = (right - left) / (2.0 * zoom);
                let dy = (top - bottom) / (2.0 * zoom);
                let cx = (right + left) / 2.0;
                let cy = (top + bottom) / 2.0;
                DMat4::orthographic_rh_gl(cx - dx, cx + dx, cy - dy, cy + dy, near, far)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_and_view() {
        let eye = DVec3::new(3.0, 4.0, 5.0);
        let camera = Camera::perspective(eye, DVec3::ZERO, DVec3::Y, 1.0, 1.5, 0.1, 100.0);

        assert!((camera.position() - eye).length() < 1e-9);
        let target_in_view = camera.view_matrix().transform_point3(DVec3::ZERO);
        // the target sits straight ahead on -z
        assert!(target_in_view.x.abs() < 1e-9 && target_in_view.y.abs() < 1e-9);
        assert!((target_in_view.z + eye.length()).abs() < 1e-9);
    }

    #[test]
    fn test_orthographic_zoom_narrows_frustum() {
        let camera = Camera::orthographic(
            DVec3::Z * 10.0,
            DVec3::ZERO,
            DVec3::Y,
            (-10.0, 10.0, 10.0, -10.0),
            2.0,
            0.1,
            100.0,
        );

        // x = 5 is at the right edge once zoomed in twice
        let clip = camera.projection_matrix().project_point3(DVec3::new(5.0, 0.0, -10.0));
        assert!((clip.x - 1.0).abs() < 1e-9);
    }
}
