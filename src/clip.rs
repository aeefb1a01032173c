use crate::octree::aabb::Aabb;
use glam::{DMat4, DVec3};
use serde::Deserialize;

/// How clip boxes affect an octree.
///
/// Only `ClipOutside` changes traversal; the other modes only matter to the
/// renderer.
#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ClipMode {
    #[default]
    Disabled,
    Highlight,
    ClipInside,
    /// Points outside every clip box are hidden, so nodes that intersect no
    /// clip box are skipped.
    ClipOutside,
}

/// An oriented box: `world` maps the unit cube `[-0.5, 0.5]³` into world space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClipBox {
    pub world: DMat4,
}

impl ClipBox {
    pub fn new(world: DMat4) -> Self {
        Self { world }
    }

    pub fn from_center_size(center: DVec3, size: DVec3) -> Self {
        Self::new(DMat4::from_scale_rotation_translation(
            size,
            glam::DQuat::IDENTITY,
            center,
        ))
    }

    pub fn world_bounds(&self) -> Aabb {
        Aabb::new(DVec3::splat(-0.5), DVec3::splat(0.5)).transform(&self.world)
    }
}

/// Whether a node box in octree space may hold points that survive the clip.
///
/// Compares world-space bounds, so a rotated box is treated as its enclosing
/// axis-aligned box.
pub fn intersects_any(node_box: &Aabb, octree_world: &DMat4, clip_boxes: &[ClipBox]) -> bool {
    if clip_boxes.is_empty() {
        return true;
    }

    let node_world = node_box.transform(octree_world);
    clip_boxes
        .iter()
        .any(|clip_box| node_world.intersects(&clip_box.world_bounds()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersects_any() {
        let node = Aabb::new(DVec3::ZERO, DVec3::ONE);
        let clip = ClipBox::from_center_size(DVec3::splat(10.0), DVec3::splat(2.0));

        assert!(!intersects_any(&node, &DMat4::IDENTITY, &[clip]));
        // moving the octree next to the box
        let moved = DMat4::from_translation(DVec3::splat(8.5));
        assert!(intersects_any(&node, &moved, &[clip]));
        assert!(intersects_any(&node, &DMat4::IDENTITY, &[]));
    }

    #[test]
    fn test_mode_from_json() {
        let mode: ClipMode = serde_json::from_str("\"clipOutside\"").unwrap();
        assert_eq!(mode, ClipMode::ClipOutside);
    }
}
