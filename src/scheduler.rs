use crate::camera::{Camera, Projection, Viewport};
use crate::clip::{intersects_any, ClipMode};
use crate::frustum::Frustum;
use crate::lru::Lru;
use crate::octree::aabb::BoundingSphere;
use crate::octree::tree_node::{NodeSlot, TreeNodeId};
use crate::octree::NodeId;
use crate::point_cloud::{NodeKey, PointCloudOctree};
use glam::DVec3;
use serde::Deserialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use tracing::{debug, span, Level};

/// Global limits shared by every octree the scheduler drives.
#[derive(Deserialize, Clone, Debug, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedulerConfig {
    /// Points that may be selected in one frame, across all octrees.
    pub point_budget: u64,
    /// Loads started per frame, and loads in flight across all octrees.
    pub max_nodes_loading: usize,
    /// Nodes promoted to tree nodes per frame.
    pub max_loads_to_gpu: usize,
    /// Loaded points kept resident, as a multiple of the point budget.
    pub point_load_limit_factor: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            point_budget: 1_000_000,
            max_nodes_loading: 4,
            max_loads_to_gpu: 2,
            point_load_limit_factor: 2.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VisibleNode {
    /// Index of the octree in the slice passed to [`Scheduler::update`].
    pub cloud: usize,
    pub node: TreeNodeId,
    pub geometry: NodeId,
}

/// What one frame selected and started.
#[derive(Clone, Debug, Default)]
pub struct FrameResult {
    pub visible_nodes: Vec<VisibleNode>,
    pub num_visible_points: u64,
    /// Smallest spacing among admitted nodes, `f64::INFINITY` when none.
    pub lowest_spacing: f64,
    /// Some loaded node waited for a later frame to be promoted.
    pub exceeded_max_loads_to_gpu: bool,
    /// A load failed since the previous frame.
    pub node_load_failed: bool,
    pub started_loads: Vec<NodeKey>,
    /// Admitted nodes that are not realized yet.
    pub visible_geometry: usize,
}

#[derive(Debug)]
struct QueueEntry {
    weight: f64,
    sequence: u64,
    cloud: usize,
    node: NodeId,
    parent: Option<NodeSlot>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    // heaviest first, then first pushed
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Radius in pixels of a sphere of `radius` seen at `distance` through a
/// perspective camera.
pub fn screen_pixel_radius(radius: f64, distance: f64, fov_y: f64, viewport_height: f64) -> f64 {
    let slope = (fov_y / 2.0).tan();
    let projection_factor = (0.5 * viewport_height) / (slope * distance);
    radius * projection_factor
}

/// Priority of a child, `None` when it is too small on screen to refine.
fn child_weight(
    sphere: &BoundingSphere,
    camera_position: DVec3,
    projection: &Projection,
    viewport: Viewport,
    min_node_pixel_size: f64,
) -> Option<f64> {
    let height = viewport.height as f64;

    match *projection {
        Projection::Perspective { fov_y, .. } => {
            let distance = sphere.center.distance(camera_position);
            let radius = sphere.radius;
            let pixels = screen_pixel_radius(radius, distance, fov_y, height);
            if pixels < min_node_pixel_size {
                return None;
            }

            if distance - radius < 0.0 {
                Some(f64::MAX)
            } else {
                Some(pixels)
            }
        }
        Projection::Orthographic { top, bottom, zoom, .. } => {
            let pixels = sphere.radius * height * zoom / (top - bottom);
            (pixels >= min_node_pixel_size).then_some(pixels)
        }
    }
}

/// Per-frame driver: picks the nodes to show, starts loads and keeps the
/// resident set bounded.
#[derive(Debug, Default)]
pub struct Scheduler {
    pub config: SchedulerConfig,
    lru: Lru,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            lru: Lru::default(),
        }
    }

    pub fn lru(&self) -> &Lru {
        &self.lru
    }

    /// Runs one frame: applies finished loads, selects visible nodes, evicts,
    /// then refreshes each octree's visibility texture.
    ///
    /// Eviction runs once, after every octree was traversed, so a node
    /// touched by a later octree is never evicted for an earlier one. Visible
    /// nodes it disposes leave the frame result and its point count.
    pub fn update(&mut self, clouds: &mut [PointCloudOctree], camera: &Camera, viewport: Viewport) -> FrameResult {
        let mut frame = self.update_visibility(clouds, camera, viewport);

        self.lru.point_load_limit = (self.config.point_budget as f64 * self.config.point_load_limit_factor) as u64;
        self.lru.free_memory(|key| {
            clouds
                .iter_mut()
                .find(|cloud| cloud.id() == key.cloud)
                .map(|cloud| cloud.dispose_subtree(key.node))
                .unwrap_or_default()
        });

        let mut evicted = Vec::new();
        frame.visible_nodes.retain(|visible| {
            let cloud = &clouds[visible.cloud];
            let kept = cloud
                .tree_node(visible.node)
                .is_some_and(|tree_node| tree_node.geometry_node() == visible.geometry);
            if !kept {
                evicted.push((visible.cloud, cloud.octree()[visible.geometry].num_points() as u64));
            }
            kept
        });
        for (cloud, num_points) in evicted {
            frame.num_visible_points -= num_points;
            clouds[cloud].num_visible_points -= num_points;
        }

        for cloud in clouds.iter_mut() {
            cloud.update_visibility_texture();
        }
        frame
    }

    /// Best-first traversal of every visible octree under the point budget.
    pub fn update_visibility(
        &mut self,
        clouds: &mut [PointCloudOctree],
        camera: &Camera,
        viewport: Viewport,
    ) -> FrameResult {
        let span = span!(Level::TRACE, "update_visibility", clouds = clouds.len());
        let _enter = span.enter();

        let mut frame = FrameResult {
            lowest_spacing: f64::INFINITY,
            ..FrameResult::default()
        };

        for cloud in clouds.iter_mut() {
            if cloud.apply_completed_loads().failed > 0 {
                frame.node_load_failed = true;
            }
        }

        let view_projection = camera.projection_matrix() * camera.view_matrix();
        let mut frustums = Vec::with_capacity(clouds.len());
        let mut camera_positions = Vec::with_capacity(clouds.len());
        let mut queue = BinaryHeap::new();
        let mut sequence = 0u64;

        for (index, cloud) in clouds.iter_mut().enumerate() {
            cloud.begin_frame();

            let world = cloud.world_matrix();
            frustums.push(Frustum::from_matrix(view_projection * world));
            camera_positions.push(world.inverse().transform_point3(camera.position()));

            if !cloud.settings.visible {
                continue;
            }
            queue.push(QueueEntry {
                weight: f64::INFINITY,
                sequence,
                cloud: index,
                node: cloud.octree().root_id(),
                parent: None,
            });
            sequence += 1;
        }

        let mut loaded_to_gpu = 0;
        let mut unloaded: Vec<(usize, NodeId)> = Vec::new();

        while let Some(entry) = queue.pop() {
            let cloud = &mut clouds[entry.cloud];
            let node = &cloud.octree()[entry.node];
            let num_points = node.num_points() as u64;
            let level = node.level();
            let spacing = node.spacing();
            let bounding_box = *node.bounding_box();

            if frame.num_visible_points + num_points > self.config.point_budget {
                break;
            }

            if let Some(budget) = cloud.settings.point_budget {
                if cloud.num_visible_points + num_points > budget {
                    continue;
                }
            }
            if cloud.settings.max_level.is_some_and(|max_level| level > max_level) {
                continue;
            }
            if !frustums[entry.cloud].intersects_aabb(&bounding_box) {
                continue;
            }
            if cloud.settings.clip_mode == ClipMode::ClipOutside
                && !intersects_any(&bounding_box, &cloud.world_matrix(), &cloud.settings.clip_boxes)
            {
                continue;
            }

            frame.num_visible_points += num_points;
            cloud.num_visible_points += num_points;
            frame.lowest_spacing = frame.lowest_spacing.min(spacing);

            let mut slot = cloud.slot_of(entry.node);
            let parent_realized = !matches!(entry.parent, Some(NodeSlot::Geometry(_)));

            if let (NodeSlot::Geometry(node_id), true) = (slot, parent_realized) {
                let loaded = cloud.octree()[node_id].is_loaded();
                let failed = cloud.octree()[node_id].has_failed();
                let parent = match entry.parent {
                    Some(NodeSlot::Tree(parent)) => Some(parent),
                    _ => None,
                };

                if loaded && loaded_to_gpu < self.config.max_loads_to_gpu {
                    if let Some(tree_node) = cloud.promote(node_id, parent) {
                        slot = NodeSlot::Tree(tree_node);
                        loaded_to_gpu += 1;
                    }
                } else if failed {
                    continue;
                } else {
                    if loaded {
                        frame.exceeded_max_loads_to_gpu = true;
                    } else {
                        unloaded.push((entry.cloud, node_id));
                    }
                    cloud.visible_geometry.push(node_id);
                }
            }

            if let NodeSlot::Tree(tree_node) = slot {
                let key = cloud.key(entry.node);
                self.lru.touch(key, &cloud.octree()[entry.node]);
                cloud.show(tree_node);
                frame.visible_nodes.push(VisibleNode {
                    cloud: entry.cloud,
                    node: tree_node,
                    geometry: entry.node,
                });
            }

            for child in cloud.child_slots(slot).into_iter().flatten() {
                let child_id = cloud.geometry_id(child);
                let sphere = cloud.octree()[child_id].bounding_sphere();

                let Some(weight) = child_weight(
                    &sphere,
                    camera_positions[entry.cloud],
                    &camera.projection,
                    viewport,
                    cloud.settings.min_node_pixel_size,
                ) else {
                    continue;
                };

                queue.push(QueueEntry {
                    weight,
                    sequence,
                    cloud: entry.cloud,
                    node: child_id,
                    parent: Some(slot),
                });
                sequence += 1;
            }
        }

        let mut in_flight: usize = clouds.iter().map(PointCloudOctree::num_nodes_loading).sum();
        for (cloud, node) in unloaded.into_iter().take(self.config.max_nodes_loading) {
            if in_flight >= self.config.max_nodes_loading {
                break;
            }
            let cloud = &mut clouds[cloud];
            if cloud.load_node(node) {
                in_flight += 1;
                frame.started_loads.push(cloud.key(node));
            }
        }

        frame.visible_geometry = clouds.iter().map(|cloud| cloud.visible_geometry().len()).sum();
        debug!(
            visible = frame.visible_nodes.len(),
            points = frame.num_visible_points,
            started = frame.started_loads.len(),
            "visibility updated"
        );

        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clip::ClipBox;
    use crate::point_cloud::tests::{mark_loaded, open_synthetic};

    fn camera() -> Camera {
        Camera::perspective(
            DVec3::new(30.0, 25.0, 20.0),
            DVec3::splat(4.0),
            DVec3::Y,
            60f64.to_radians(),
            800.0 / 600.0,
            0.1,
            1000.0,
        )
    }

    #[test]
    fn test_screen_pixel_radius() {
        let pixels = screen_pixel_radius(1.0, 10.0, 60f64.to_radians(), 800.0);
        assert!((pixels - 69.28).abs() < 0.01);
    }

    #[test]
    fn test_weight_inside_sphere_is_max() {
        let sphere = BoundingSphere {
            center: DVec3::ZERO,
            radius: 2.0,
        };
        let projection = Projection::Perspective {
            fov_y: 1.0,
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        };

        let weight = child_weight(&sphere, DVec3::X, &projection, Viewport::new(100, 100), 10.0);
        assert_eq!(weight, Some(f64::MAX));
    }

    #[test]
    fn test_small_children_are_pruned() {
        let sphere = BoundingSphere {
            center: DVec3::new(0.0, 0.0, -10.0),
            radius: 1.0,
        };
        let projection = Projection::Perspective {
            fov_y: 60f64.to_radians(),
            aspect: 1.0,
            near: 0.1,
            far: 100.0,
        };
        let viewport = Viewport::new(800, 800);

        assert!(child_weight(&sphere, DVec3::ZERO, &projection, viewport, 70.0).is_none());
        assert!(child_weight(&sphere, DVec3::ZERO, &projection, viewport, 69.0).is_some());
    }

    #[test]
    fn test_orthographic_weight_ignores_distance() {
        let projection = Projection::Orthographic {
            left: -10.0,
            right: 10.0,
            top: 10.0,
            bottom: -10.0,
            zoom: 2.0,
            near: 0.1,
            far: 100.0,
        };
        let near = BoundingSphere {
            center: DVec3::new(0.0, 0.0, -1.0),
            radius: 1.0,
        };
        let far = BoundingSphere {
            center: DVec3::new(0.0, 0.0, -50.0),
            radius: 1.0,
        };
        let viewport = Viewport::new(100, 100);

        let near = child_weight(&near, DVec3::ZERO, &projection, viewport, 0.0);
        let far = child_weight(&far, DVec3::ZERO, &projection, viewport, 0.0);
        assert_eq!(near, Some(10.0));
        assert_eq!(near, far);
    }

    #[test]
    fn test_queue_ties_pop_in_insertion_order() {
        let entry = |weight, sequence| QueueEntry {
            weight,
            sequence,
            cloud: 0,
            node: NodeId(sequence as usize),
            parent: None,
        };
        let mut queue = BinaryHeap::from([entry(1.0, 0), entry(5.0, 1), entry(1.0, 2), entry(5.0, 3)]);

        let order: Vec<u64> = std::iter::from_fn(|| queue.pop()).map(|entry| entry.sequence).collect();
        assert_eq!(order, vec![1, 3, 0, 2]);
    }

    #[test]
    fn test_budget_stops_traversal() {
        let mut cloud = open_synthetic();
        cloud.settings.min_node_pixel_size = 1.0;
        let root = cloud.octree().root_id();
        {
            let node = cloud.node_mut(root).unwrap();
            node.begin_load();
            node.finish_load(crate::decode::DecodedBuffers {
                num_points: 1000,
                ..crate::decode::DecodedBuffers::empty()
            });
        }

        let mut scheduler = Scheduler::new(SchedulerConfig {
            point_budget: 1250,
            ..SchedulerConfig::default()
        });
        let mut clouds = [cloud];
        let frame = scheduler.update_visibility(&mut clouds, &camera(), Viewport::new(800, 600));

        // root plus two of the 100 point children
        assert_eq!(frame.num_visible_points, 1200);
        assert_eq!(frame.visible_nodes.len(), 1);
        assert_eq!(frame.visible_geometry, 2);
        assert!(frame.started_loads.len() <= 2);
        assert!(scheduler.lru().contains(clouds[0].key(root)));
    }

    #[test]
    fn test_invisible_cloud_is_skipped() {
        let mut cloud = open_synthetic();
        cloud.settings.visible = false;

        let mut scheduler = Scheduler::default();
        let mut clouds = [cloud];
        let frame = scheduler.update(&mut clouds, &camera(), Viewport::new(800, 600));

        assert_eq!(frame.num_visible_points, 0);
        assert!(frame.started_loads.is_empty());
        assert_eq!(frame.lowest_spacing, f64::INFINITY);
    }

    #[test]
    fn test_max_level_rejects_children() {
        let mut cloud = open_synthetic();
        cloud.settings.min_node_pixel_size = 1.0;
        cloud.settings.max_level = Some(0);

        let mut scheduler = Scheduler::default();
        let mut clouds = [cloud];
        let frame = scheduler.update_visibility(&mut clouds, &camera(), Viewport::new(800, 600));

        assert_eq!(frame.num_visible_points, 1000);
        assert_eq!(frame.started_loads, vec![clouds[0].key(clouds[0].octree().root_id())]);
    }

    fn clipped_frame(clip_mode: ClipMode, clip_box: ClipBox) -> FrameResult {
        let mut cloud = open_synthetic();
        cloud.settings.min_node_pixel_size = 1.0;
        cloud.settings.clip_mode = clip_mode;
        cloud.settings.clip_boxes = vec![clip_box];

        let mut scheduler = Scheduler::default();
        scheduler.update_visibility(&mut [cloud], &camera(), Viewport::new(800, 600))
    }

    #[test]
    fn test_clip_outside_skips_nodes_outside_every_box() {
        let far_away = ClipBox::from_center_size(DVec3::splat(100.0), DVec3::ONE);
        let frame = clipped_frame(ClipMode::ClipOutside, far_away);
        assert_eq!(frame.num_visible_points, 0);
        assert_eq!(frame.visible_geometry, 0);
        assert!(frame.started_loads.is_empty());

        // only the root and the corner child r7 touch this box
        let corner = ClipBox::from_center_size(DVec3::splat(7.0), DVec3::ONE);
        let frame = clipped_frame(ClipMode::ClipOutside, corner);
        assert_eq!(frame.num_visible_points, 1100);
        assert_eq!(frame.lowest_spacing, 0.25);
    }

    #[test]
    fn test_other_clip_modes_never_cull() {
        let far_away = ClipBox::from_center_size(DVec3::splat(100.0), DVec3::ONE);

        for clip_mode in [ClipMode::Disabled, ClipMode::Highlight, ClipMode::ClipInside] {
            let frame = clipped_frame(clip_mode, far_away);
            assert_eq!(frame.num_visible_points, 1800, "{clip_mode:?}");
        }
    }

    #[test]
    fn test_eviction_updates_frame_and_texture() {
        let mut cloud = open_synthetic();
        cloud.settings.min_node_pixel_size = 1.0;
        let root = cloud.octree().root_id();
        for index in 0..8 {
            let child = cloud.node_by_name(&format!("r{index}")).unwrap();
            mark_loaded(&mut cloud, child);
        }
        mark_loaded(&mut cloud, root);

        // the resident limit is below what a single frame shows
        let mut scheduler = Scheduler::new(SchedulerConfig {
            point_budget: 1250,
            point_load_limit_factor: 0.5,
            ..SchedulerConfig::default()
        });
        let mut clouds = [cloud];
        let frame = scheduler.update(&mut clouds, &camera(), Viewport::new(800, 600));

        // the root and one promoted child were shown, the child got evicted
        assert!(frame.exceeded_max_loads_to_gpu);
        assert_eq!(frame.visible_nodes.len(), 1);
        assert_eq!(frame.visible_nodes[0].geometry, root);
        assert_eq!(frame.num_visible_points, 1100);
        assert_eq!(clouds[0].num_visible_points(), 1100);
        assert_eq!(scheduler.lru().len(), 0);

        let root_tree = frame.visible_nodes[0].node;
        assert_eq!(clouds[0].visible_nodes(), &[root_tree]);
        let texture = clouds[0].visibility_texture();
        assert_eq!(texture.len(), 1);
        assert_eq!(texture.row(root_tree).unwrap()[0], 0);
    }
}
