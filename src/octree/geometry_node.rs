use crate::decode::DecodedBuffers;
use crate::octree::aabb::{create_child_aabb, Aabb, BoundingSphere};
use crate::octree::tree_node::TreeNodeId;
use crate::octree::NodeId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(0);

/// Node kind as stored in the binary hierarchy.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum NodeType {
    #[default]
    Normal,
    Leaf,
    /// The node's descendants live in a separate hierarchy chunk that has
    /// not been fetched yet.
    Proxy,
}

impl TryFrom<u8> for NodeType {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NodeType::Normal),
            1 => Ok(NodeType::Leaf),
            2 => Ok(NodeType::Proxy),
            other => Err(other),
        }
    }
}

/// Lifecycle of a node's point data.
///
/// `Failed` is sticky until [`GeometryNode::reset_failed`] is called.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LoadState {
    #[default]
    Unloaded,
    Loading,
    Loaded,
    Failed,
}

/// What [`GeometryNode::dispose`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposal {
    /// Nothing was loaded, or the node is a root.
    Ignored,
    /// Geometry was freed. `realized` is the tree node that has to be unlinked.
    Disposed { realized: Option<TreeNodeId> },
}

/// One octree cell as described by the hierarchy.
///
/// The description (box, level, point count, byte ranges) is known as soon as
/// the parent's hierarchy chunk is parsed; point data is attached lazily.
#[derive(Clone, Debug)]
pub struct GeometryNode {
    id: u64,
    pub(crate) name: String,
    pub(crate) index: u8,
    pub(crate) bounding_box: Aabb,
    pub(crate) spacing: f64,
    pub(crate) level: u32,
    pub(crate) node_type: NodeType,
    pub(crate) num_points: u32,
    pub(crate) byte_offset: u64,
    pub(crate) byte_size: u64,
    pub(crate) hierarchy_byte_offset: u64,
    pub(crate) hierarchy_byte_size: u64,
    pub(crate) parent: Option<NodeId>,
    pub(crate) children: [Option<NodeId>; 8],
    pub(crate) state: LoadState,
    pub(crate) geometry: Option<Arc<DecodedBuffers>>,
    pub(crate) density: f64,
    pub(crate) tree_node: Option<TreeNodeId>,
}

impl GeometryNode {
    fn with_id(name: String, index: u8, bounding_box: Aabb, spacing: f64, level: u32) -> Self {
        Self {
            id: NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed),
            name,
            index,
            bounding_box,
            spacing,
            level,
            node_type: NodeType::Normal,
            num_points: 0,
            byte_offset: 0,
            byte_size: 0,
            hierarchy_byte_offset: 0,
            hierarchy_byte_size: 0,
            parent: None,
            children: [None; 8],
            state: LoadState::Unloaded,
            geometry: None,
            density: 0.0,
            tree_node: None,
        }
    }

    /// Root of a dataset whose first hierarchy chunk spans `first_chunk_size` bytes.
    pub(crate) fn new_root(bounding_box: Aabb, spacing: f64, first_chunk_size: u64) -> Self {
        let mut root = Self::with_id("r".to_string(), 0, bounding_box, spacing, 0);
        root.node_type = NodeType::Proxy;
        root.hierarchy_byte_size = first_chunk_size;
        root
    }

    pub(crate) fn new_child(parent: &GeometryNode, parent_id: NodeId, index: usize) -> Self {
        let mut child = Self::with_id(
            format!("{}{}", parent.name, index),
            index as u8,
            create_child_aabb(&parent.bounding_box, index),
            parent.spacing / 2.0,
            parent.level + 1,
        );
        child.parent = Some(parent_id);
        child
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }

    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn spacing(&self) -> f64 {
        self.spacing
    }

    pub fn num_points(&self) -> u32 {
        self.num_points
    }

    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    pub fn bounding_box(&self) -> &Aabb {
        &self.bounding_box
    }

    pub fn bounding_sphere(&self) -> BoundingSphere {
        self.bounding_box.bounding_sphere()
    }

    pub fn byte_range(&self) -> (u64, u64) {
        (self.byte_offset, self.byte_size)
    }

    pub fn hierarchy_range(&self) -> (u64, u64) {
        (self.hierarchy_byte_offset, self.hierarchy_byte_size)
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[Option<NodeId>; 8] {
        &self.children
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == LoadState::Loaded
    }

    pub fn is_loading(&self) -> bool {
        self.state == LoadState::Loading
    }

    pub fn has_failed(&self) -> bool {
        self.state == LoadState::Failed
    }

    /// Decoded point data, present while loaded.
    pub fn geometry(&self) -> Option<&Arc<DecodedBuffers>> {
        self.geometry.as_ref()
    }

    /// Points per occupied cell of the node's 32³ grid, from the last decode.
    pub fn density(&self) -> f64 {
        self.density
    }

    /// The realized counterpart, if this node is currently promoted.
    pub fn tree_node(&self) -> Option<TreeNodeId> {
        self.tree_node
    }

    /// Unloaded → loading. Refuses loaded, loading and failed nodes.
    pub(crate) fn begin_load(&mut self) -> bool {
        if self.state != LoadState::Unloaded {
            return false;
        }
        self.state = LoadState::Loading;
        true
    }

    pub(crate) fn finish_load(&mut self, buffers: DecodedBuffers) {
        self.num_points = buffers.num_points;
        self.density = buffers.density;
        self.geometry = Some(Arc::new(buffers));
        self.state = LoadState::Loaded;
    }

    pub(crate) fn fail_load(&mut self) {
        self.geometry = None;
        self.state = LoadState::Failed;
    }

    /// Makes a failed node eligible for loading again.
    pub fn reset_failed(&mut self) {
        if self.state == LoadState::Failed {
            self.state = LoadState::Unloaded;
        }
    }

    /// Frees the decoded buffer and hands back the tree node to unlink.
    ///
    /// Roots and nodes that are not loaded are left untouched, so calling this
    /// repeatedly is harmless.
    pub(crate) fn dispose(&mut self) -> Disposal {
        if self.state != LoadState::Loaded || self.parent.is_none() {
            return Disposal::Ignored;
        }

        self.geometry = None;
        self.state = LoadState::Unloaded;
        Disposal::Disposed {
            realized: self.tree_node.take(),
        }
    }
}
