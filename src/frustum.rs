use crate::octree::aabb::Aabb;
use glam::{DMat4, DVec3};

/// Six inward-facing planes of a clip-space volume.
#[derive(Debug, Clone, Copy)]
pub struct Frustum {
    /// Each plane is (normal, distance); points with
    /// `normal.dot(p) + distance >= 0` are on the inside.
    planes: [(DVec3, f64); 6],
}

impl Frustum {
    /// Extracts the planes of `matrix`, which maps a space into OpenGL clip
    /// coordinates (`[-1, 1]` on every axis).
    pub fn from_matrix(matrix: DMat4) -> Self {
        let m = matrix.to_cols_array_2d();
        let plane = |axis: usize, sign: f64| {
            Self::normalize_plane(
                m[0][3] + sign * m[0][axis],
                m[1][3] + sign * m[1][axis],
                m[2][3] + sign * m[2][axis],
                m[3][3] + sign * m[3][axis],
            )
        };

        // left, right, bottom, top, near, far
        let planes = [
            plane(0, 1.0),
            plane(0, -1.0),
            plane(1, 1.0),
            plane(1, -1.0),
            plane(2, 1.0),
            plane(2, -1.0),
        ];

        Self { planes }
    }

    fn normalize_plane(a: f64, b: f64, c: f64, d: f64) -> (DVec3, f64) {
        let normal = DVec3::new(a, b, c);
        let length = normal.length();
        if length > 0.0 {
            (normal / length, d / length)
        } else {
            (DVec3::ZERO, 0.0)
        }
    }

    /// Conservative box test: false only when the box lies entirely behind one
    /// of the planes.
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        self.planes.iter().all(|&(normal, distance)| {
            // corner furthest along the normal
            let positive = DVec3::select(normal.cmpge(DVec3::ZERO), aabb.max, aabb.min);
            normal.dot(positive) + distance >= 0.0
        })
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        self.planes
            .iter()
            .all(|&(normal, distance)| normal.dot(point) + distance >= 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_frustum() -> Frustum {
        // at the origin looking down -z
        let projection = DMat4::perspective_rh_gl(60f64.to_radians(), 1.0, 0.1, 100.0);
        let view = DMat4::look_at_rh(DVec3::ZERO, DVec3::NEG_Z, DVec3::Y);
        Frustum::from_matrix(projection * view)
    }

    #[test]
    fn test_box_in_front_is_inside() {
        let frustum = camera_frustum();
        let aabb = Aabb::new(DVec3::new(-1.0, -1.0, -11.0), DVec3::new(1.0, 1.0, -9.0));

        assert!(frustum.intersects_aabb(&aabb));
        assert!(frustum.contains_point(DVec3::new(0.0, 0.0, -10.0)));
    }

    #[test]
    fn test_box_behind_or_aside_is_outside() {
        let frustum = camera_frustum();
        let behind = Aabb::new(DVec3::new(-1.0, -1.0, 9.0), DVec3::new(1.0, 1.0, 11.0));
        let aside = Aabb::new(DVec3::new(50.0, -1.0, -11.0), DVec3::new(52.0, 1.0, -9.0));
        let too_far = Aabb::new(DVec3::new(-1.0, -1.0, -300.0), DVec3::new(1.0, 1.0, -200.0));

        assert!(!frustum.intersects_aabb(&behind));
        assert!(!frustum.intersects_aabb(&aside));
        assert!(!frustum.intersects_aabb(&too_far));
    }

    #[test]
    fn test_box_straddling_a_plane_intersects() {
        let frustum = camera_frustum();
        let straddling = Aabb::new(DVec3::new(-1.0, -1.0, -20.0), DVec3::new(100.0, 1.0, -10.0));

        assert!(frustum.intersects_aabb(&straddling));
    }
}
