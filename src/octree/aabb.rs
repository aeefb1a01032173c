use glam::{DMat4, DVec3};

/// Axis-aligned box in an octree's local (object) space.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Aabb {
    pub min: DVec3,
    pub max: DVec3,
}

/// Sphere enclosing an [`Aabb`]; drives the screen-space weight of a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    pub center: DVec3,
    pub radius: f64,
}

impl Aabb {
    pub fn new(min: DVec3, max: DVec3) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> DVec3 {
        self.max - self.min
    }

    pub fn center(&self) -> DVec3 {
        (self.min + self.max) * 0.5
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        BoundingSphere {
            center: self.center(),
            radius: self.size().length() * 0.5,
        }
    }

    pub fn contains_point(&self, point: DVec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Touching boxes count as intersecting.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    /// Axis-aligned bounds of the eight transformed corners.
    pub fn transform(&self, matrix: &DMat4) -> Aabb {
        let mut min = DVec3::splat(f64::INFINITY);
        let mut max = DVec3::splat(f64::NEG_INFINITY);

        for corner in 0..8 {
            let point = DVec3::new(
                if corner & 0b100 != 0 { self.max.x } else { self.min.x },
                if corner & 0b010 != 0 { self.max.y } else { self.min.y },
                if corner & 0b001 != 0 { self.max.z } else { self.min.z },
            );
            let point = matrix.transform_point3(point);
            min = min.min(point);
            max = max.max(point);
        }

        Aabb::new(min, max)
    }
}

/// Box of the child at octant `index` (0..8).
///
/// Bit 0 selects the z half, bit 1 the y half and bit 2 the x half; a set bit
/// keeps the upper half. Decoders and the converter rely on this layout.
pub fn create_child_aabb(aabb: &Aabb, index: usize) -> Aabb {
    let mut min = aabb.min;
    let mut max = aabb.max;
    let size = (max - min) * 0.5;

    if (index & 0b0001) > 0 {
        min.z += size.z;
    } else {
        max.z -= size.z;
    }
    if (index & 0b0010) > 0 {
        min.y += size.y;
    } else {
        max.y -= size.y;
    }
    if (index & 0b0100) > 0 {
        min.x += size.x;
    } else {
        max.x -= size.x;
    }

    Aabb::new(min, max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_octant_bit_layout() {
        let parent = Aabb::new(DVec3::ZERO, DVec3::splat(2.0));

        assert_eq!(create_child_aabb(&parent, 0), Aabb::new(DVec3::ZERO, DVec3::ONE));
        // bit 0 is z
        assert_eq!(
            create_child_aabb(&parent, 0b001),
            Aabb::new(DVec3::new(0.0, 0.0, 1.0), DVec3::new(1.0, 1.0, 2.0))
        );
        // bit 1 is y
        assert_eq!(
            create_child_aabb(&parent, 0b010),
            Aabb::new(DVec3::new(0.0, 1.0, 0.0), DVec3::new(1.0, 2.0, 1.0))
        );
        // bit 2 is x
        assert_eq!(
            create_child_aabb(&parent, 0b100),
            Aabb::new(DVec3::new(1.0, 0.0, 0.0), DVec3::new(2.0, 1.0, 1.0))
        );
        assert_eq!(create_child_aabb(&parent, 7), Aabb::new(DVec3::ONE, DVec3::splat(2.0)));
    }

    #[test]
    fn test_bounding_sphere() {
        let aabb = Aabb::new(DVec3::ZERO, DVec3::new(2.0, 2.0, 1.0));
        let sphere = aabb.bounding_sphere();
        assert_eq!(sphere.center, DVec3::new(1.0, 1.0, 0.5));
        assert!((sphere.radius - 1.5).abs() < EPS);
    }

    #[test]
    fn test_transform_and_intersect() {
        let unit = Aabb::new(DVec3::splat(-0.5), DVec3::splat(0.5));
        let rotated = unit.transform(&DMat4::from_rotation_z(45f64.to_radians()));
        let half_diagonal = 0.5 * 2f64.sqrt();

        assert!((rotated.max.x - half_diagonal).abs() < EPS);
        assert!((rotated.max.z - 0.5).abs() < EPS);

        let moved = unit.transform(&DMat4::from_translation(DVec3::new(1.0, 0.0, 0.0)));
        assert!(unit.intersects(&moved));
        let far = unit.transform(&DMat4::from_translation(DVec3::new(1.5, 0.0, 0.0)));
        assert!(!unit.intersects(&far));
    }

    fn arb_aabb() -> impl Strategy<Value = Aabb> {
        (
            prop::array::uniform3(-1.0e4..1.0e4f64),
            prop::array::uniform3(0.01..1.0e3f64),
        )
            .prop_map(|(min, extent)| {
                let min = DVec3::from_array(min);
                Aabb::new(min, min + DVec3::from_array(extent))
            })
    }

    proptest! {
        #[test]
        fn children_tile_parent(parent in arb_aabb()) {
            let children: Vec<Aabb> = (0..8).map(|i| create_child_aabb(&parent, i)).collect();
            let half = parent.size() * 0.5;
            let tolerance = (parent.min.abs().max_element() + parent.size().max_element()) * EPS;

            for child in &children {
                // half extent on every axis
                prop_assert!((child.size() - half).abs().max_element() <= tolerance);
                // inside the parent
                prop_assert!(child.min.cmpge(parent.min - tolerance).all());
                prop_assert!(child.max.cmple(parent.max + tolerance).all());
            }

            // volumes add up and no two children overlap with positive volume
            let volume: f64 = children.iter().map(|c| c.size().x * c.size().y * c.size().z).sum();
            let parent_volume = parent.size().x * parent.size().y * parent.size().z;
            prop_assert!((volume - parent_volume).abs() <= parent_volume * 1e-6);

            for (i, a) in children.iter().enumerate() {
                for b in children.iter().skip(i + 1) {
                    let overlap = (a.max.min(b.max) - a.min.max(b.min)).max(DVec3::ZERO);
                    prop_assert!(overlap.x * overlap.y * overlap.z <= parent_volume * 1e-6);
                }
            }
        }
    }
}
