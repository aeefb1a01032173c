use crate::decode::DecodedBuffers;
use crate::octree::NodeId;
use std::sync::Arc;

/// Index of a realized node inside its octree's tree-node slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeNodeId(pub(crate) usize);

/// Content of a child position: the plain hierarchy node, or its realized
/// counterpart once promoted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeSlot {
    Geometry(NodeId),
    Tree(TreeNodeId),
}

impl NodeSlot {
    pub fn is_tree(&self) -> bool {
        matches!(self, NodeSlot::Tree(_))
    }
}

/// The renderable side of a realized node: decoded buffers plus the flags a
/// renderer reads every frame.
#[derive(Clone, Debug)]
pub struct PointSet {
    pub buffers: Arc<DecodedBuffers>,
    pub visible: bool,
    pub bounding_box_visible: bool,
}

/// A loaded geometry node promoted for rendering.
///
/// `children` mirrors the geometry node's children, each slot holding
/// whichever representation is current at that position.
#[derive(Clone, Debug)]
pub struct TreeNode {
    pub(crate) geometry_node: NodeId,
    pub(crate) parent: Option<TreeNodeId>,
    pub(crate) children: [Option<NodeSlot>; 8],
    pub(crate) point_set: PointSet,
}

impl TreeNode {
    pub fn geometry_node(&self) -> NodeId {
        self.geometry_node
    }

    pub fn parent(&self) -> Option<TreeNodeId> {
        self.parent
    }

    pub fn children(&self) -> &[Option<NodeSlot>; 8] {
        &self.children
    }

    pub fn point_set(&self) -> &PointSet {
        &self.point_set
    }

    pub fn is_visible(&self) -> bool {
        self.point_set.visible
    }
}
