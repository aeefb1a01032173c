use crate::clip::{ClipBox, ClipMode};
use crate::decode::pool::DecoderPool;
use crate::decode::DecoderKind;
use crate::hierarchy::{apply_hierarchy_chunk, read_hierarchy_entries, HierarchyError};
use crate::loader::{LoadCompletion, LoadRequest, NodeLoader};
use crate::metadata::{Metadata, MetadataError};
use crate::octree::geometry_node::{Disposal, GeometryNode, NodeType};
use crate::octree::point_attributes::PointAttributes;
use crate::octree::tree_node::{NodeSlot, PointSet, TreeNode, TreeNodeId};
use crate::octree::{FlatOctree, NodeId};
use crate::resource::{ResourceError, ResourceLoader};
use crate::runtime::TaskSpawner;
use crate::visibility::{compute_visibility_texture, VisibilityTexture};
use futures::channel::mpsc::{self, UnboundedReceiver};
use glam::DMat4;
use serde::Deserialize;
use slab::Slab;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

static NEXT_CLOUD_ID: AtomicU64 = AtomicU64::new(0);

/// Process-unique identity of an opened octree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CloudId(pub(crate) u64);

/// A node across all opened octrees.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeKey {
    pub cloud: CloudId,
    pub node: NodeId,
}

#[derive(Error, Debug)]
pub enum OpenError {
    #[error("Error loading resource: {0}")]
    Resource(#[from] ResourceError),

    #[error("Invalid metadata: {0}")]
    Metadata(#[from] MetadataError),

    #[error("Error loading hierarchy: {0}")]
    Hierarchy(#[from] HierarchyError),
}

/// Per-octree traversal settings.
#[derive(Deserialize, Clone, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct OctreeSettings {
    pub visible: bool,
    /// Children whose projected bounding sphere radius is smaller are not
    /// refined.
    pub min_node_pixel_size: f64,
    pub max_level: Option<u32>,
    /// Cap on this octree's share of the global point budget.
    pub point_budget: Option<u64>,
    /// Loads in flight for this octree.
    pub max_num_nodes_loading: usize,
    pub show_bounding_box: bool,
    pub clip_mode: ClipMode,
    #[serde(skip)]
    pub clip_boxes: Vec<ClipBox>,
}

impl Default for OctreeSettings {
    fn default() -> Self {
        Self {
            visible: true,
            min_node_pixel_size: 150.0,
            max_level: None,
            point_budget: None,
            max_num_nodes_loading: 3,
            show_bounding_box: false,
            clip_mode: ClipMode::Disabled,
            clip_boxes: Vec::new(),
        }
    }
}

/// Outcome of draining finished loads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AppliedLoads {
    pub loaded: usize,
    pub failed: usize,
}

/// One Potree 2.0 dataset: its hierarchy, the realized part of it and the
/// per-frame selection the scheduler made.
///
/// Geometry nodes live in a [`FlatOctree`], realized nodes in their own slab.
/// A child position holds whichever of the two is current, see [`NodeSlot`].
#[derive(Debug)]
pub struct PointCloudOctree {
    id: CloudId,
    url: String,
    metadata: Metadata,
    attributes: Arc<PointAttributes>,
    octree: FlatOctree<GeometryNode>,
    tree_nodes: Slab<TreeNode>,
    root: NodeSlot,
    world: DMat4,
    pub settings: OctreeSettings,

    loader: NodeLoader,
    completions: UnboundedReceiver<LoadCompletion>,
    num_nodes_loading: usize,

    pub(crate) visible_nodes: Vec<TreeNodeId>,
    pub(crate) visible_geometry: Vec<NodeId>,
    pub(crate) num_visible_points: u64,
    visibility_texture: VisibilityTexture,
}

impl PointCloudOctree {
    /// Opens a dataset laid out as
    ///  - `<url>/metadata.json`
    ///  - `<url>/hierarchy.bin`
    ///  - `<url>/octree.bin`
    ///
    /// The first hierarchy chunk is read right away so the root's point range
    /// is known. Any failure here fails the whole open.
    pub async fn open(
        url: &str,
        resources: ResourceLoader,
        decoders: Arc<DecoderPool>,
        spawner: Arc<dyn TaskSpawner>,
        settings: OctreeSettings,
    ) -> Result<Self, OpenError> {
        let url = url.trim_end_matches('/').to_string();
        let metadata_url = resources.resolve_url(&format!("{url}/metadata.json"));
        let hierarchy_url = resources.resolve_url(&format!("{url}/hierarchy.bin"));
        let octree_url = resources.resolve_url(&format!("{url}/octree.bin"));

        let metadata: Metadata = resources.get_json(&metadata_url, None).await?;
        metadata.validate()?;
        let kind = DecoderKind::for_encoding(&metadata.encoding)
            .ok_or_else(|| MetadataError::UnsupportedEncoding(format!("{:?}", metadata.encoding)))?;

        let first_chunk_size = metadata.hierarchy.first_chunk_size;
        let root = GeometryNode::new_root(metadata.bounding_box.into(), metadata.spacing, first_chunk_size);
        let mut octree = FlatOctree::with_root(root);
        let root_id = octree.root_id();

        let chunk = resources
            .get_range(&hierarchy_url, 0, first_chunk_size as usize, None)
            .await?;
        let entries = read_hierarchy_entries(&chunk)?;
        apply_hierarchy_chunk(&mut octree, root_id, &entries)?;

        let attributes = Arc::new(PointAttributes::from_metadata(&metadata.attributes));
        let (sender, completions) = mpsc::unbounded();
        let loader = NodeLoader {
            resources,
            hierarchy_url,
            octree_url,
            attributes: attributes.clone(),
            scale: metadata.scale(),
            offset: metadata.offset(),
            kind,
            decoders,
            spawner,
            completions: sender,
        };

        info!(
            %url,
            points = metadata.points,
            nodes = octree.len(),
            encoding = %kind,
            "opened point cloud"
        );

        Ok(Self {
            id: CloudId(NEXT_CLOUD_ID.fetch_add(1, Ordering::Relaxed)),
            url,
            metadata,
            attributes,
            octree,
            tree_nodes: Slab::new(),
            root: NodeSlot::Geometry(root_id),
            world: DMat4::IDENTITY,
            settings,
            loader,
            completions,
            num_nodes_loading: 0,
            visible_nodes: Vec::new(),
            visible_geometry: Vec::new(),
            num_visible_points: 0,
            visibility_texture: VisibilityTexture::default(),
        })
    }

    pub fn id(&self) -> CloudId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn attributes(&self) -> &PointAttributes {
        &self.attributes
    }

    pub fn octree(&self) -> &FlatOctree<GeometryNode> {
        &self.octree
    }

    /// Mutable access to a geometry node, e.g. to [`GeometryNode::reset_failed`] it.
    pub fn node_mut(&mut self, node: NodeId) -> Option<&mut GeometryNode> {
        self.octree.node_mut(node)
    }

    pub fn node_by_name(&self, name: &str) -> Option<NodeId> {
        self.octree
            .iter()
            .find(|(_, node)| node.name() == name)
            .map(|(id, _)| id)
    }

    pub fn key(&self, node: NodeId) -> NodeKey {
        NodeKey {
            cloud: self.id,
            node,
        }
    }

    pub fn root(&self) -> NodeSlot {
        self.root
    }

    pub fn tree_node(&self, id: TreeNodeId) -> Option<&TreeNode> {
        self.tree_nodes.get(id.0)
    }

    pub fn tree_nodes(&self) -> impl Iterator<Item = (TreeNodeId, &TreeNode)> {
        self.tree_nodes.iter().map(|(key, node)| (TreeNodeId(key), node))
    }

    /// Object to world transform.
    pub fn world_matrix(&self) -> DMat4 {
        self.world
    }

    pub fn set_world_matrix(&mut self, world: DMat4) {
        self.world = world;
    }

    pub fn num_nodes_loading(&self) -> usize {
        self.num_nodes_loading
    }

    /// Realized nodes selected by the last frame.
    pub fn visible_nodes(&self) -> &[TreeNodeId] {
        &self.visible_nodes
    }

    /// Selected nodes that are not realized yet.
    pub fn visible_geometry(&self) -> &[NodeId] {
        &self.visible_geometry
    }

    pub fn num_visible_points(&self) -> u64 {
        self.num_visible_points
    }

    pub fn visibility_texture(&self) -> &VisibilityTexture {
        &self.visibility_texture
    }

    /// Geometry node behind a slot.
    pub fn geometry_id(&self, slot: NodeSlot) -> NodeId {
        match slot {
            NodeSlot::Geometry(id) => id,
            NodeSlot::Tree(id) => self.tree_nodes[id.0].geometry_node,
        }
    }

    /// Current representation of a geometry node.
    pub fn slot_of(&self, node: NodeId) -> NodeSlot {
        match self.octree[node].tree_node {
            Some(tree_node) => NodeSlot::Tree(tree_node),
            None => NodeSlot::Geometry(node),
        }
    }

    pub fn child_slots(&self, slot: NodeSlot) -> [Option<NodeSlot>; 8] {
        match slot {
            NodeSlot::Tree(id) => self.tree_nodes[id.0].children,
            NodeSlot::Geometry(id) => self.octree[id].children.map(|child| child.map(|child| self.slot_of(child))),
        }
    }

    /// Starts loading `node` unless it is not loadable or this octree already
    /// has its maximum of loads in flight.
    pub fn load_node(&mut self, node_id: NodeId) -> bool {
        if self.num_nodes_loading >= self.settings.max_num_nodes_loading {
            return false;
        }
        let Some(node) = self.octree.node_mut(node_id) else {
            return false;
        };
        if !node.begin_load() {
            return false;
        }

        let request = LoadRequest {
            node: node_id,
            name: node.name.clone(),
            hierarchy_range: (node.node_type == NodeType::Proxy)
                .then_some((node.hierarchy_byte_offset, node.hierarchy_byte_size)),
            byte_range: (node.byte_offset, node.byte_size),
            num_points: node.num_points,
            bounding_box: node.bounding_box,
        };
        debug!(cloud = self.id.0, node = %request.name, "loading node");

        self.num_nodes_loading += 1;
        self.loader.load(request);
        true
    }

    /// Applies every load that finished since the last call.
    pub fn apply_completed_loads(&mut self) -> AppliedLoads {
        let mut applied = AppliedLoads::default();

        while let Ok(completion) = self.completions.try_recv() {
            self.num_nodes_loading = self.num_nodes_loading.saturating_sub(1);
            let node_id = completion.node;
            if self.octree.node(node_id).is_none() {
                continue;
            }

            let result = completion.result.map_err(|error| error.to_string()).and_then(|loaded| {
                if let Some(entries) = &loaded.hierarchy {
                    apply_hierarchy_chunk(&mut self.octree, node_id, entries).map_err(|error| error.to_string())?;
                }
                Ok(loaded.buffers)
            });

            let node = &mut self.octree[node_id];
            match result {
                Ok(buffers) => {
                    node.finish_load(buffers);
                    applied.loaded += 1;
                }
                Err(error) => {
                    warn!(cloud = self.id.0, node = %node.name, %error, "node load failed");
                    node.fail_load();
                    applied.failed += 1;
                }
            }
        }

        applied
    }

    /// Realizes a loaded geometry node below `parent` (or as the root).
    pub fn promote(&mut self, node_id: NodeId, parent: Option<TreeNodeId>) -> Option<TreeNodeId> {
        let node = self.octree.node(node_id)?;
        if let Some(existing) = node.tree_node {
            return Some(existing);
        }
        let buffers = node.geometry.clone()?;
        let index = node.index();
        let children = self.octree[node_id].children.map(|child| child.map(|child| self.slot_of(child)));

        let tree_node = TreeNodeId(self.tree_nodes.insert(TreeNode {
            geometry_node: node_id,
            parent,
            children,
            point_set: PointSet {
                buffers,
                visible: false,
                bounding_box_visible: false,
            },
        }));
        self.octree[node_id].tree_node = Some(tree_node);

        for child in children.into_iter().flatten() {
            if let NodeSlot::Tree(child) = child {
                self.tree_nodes[child.0].parent = Some(tree_node);
            }
        }
        match parent.and_then(|parent| self.tree_nodes.get_mut(parent.0)) {
            Some(parent) => parent.children[index] = Some(NodeSlot::Tree(tree_node)),
            None => self.root = NodeSlot::Tree(tree_node),
        }

        Some(tree_node)
    }

    /// Frees a node's geometry and turns its slot back into the plain geometry
    /// node. Returns false when there was nothing to dispose.
    pub fn dispose_node(&mut self, node_id: NodeId) -> bool {
        let Some(node) = self.octree.node_mut(node_id) else {
            return false;
        };

        match node.dispose() {
            Disposal::Ignored => false,
            Disposal::Disposed { realized } => {
                if let Some(tree_node) = realized {
                    self.unlink(tree_node);
                }
                true
            }
        }
    }

    fn unlink(&mut self, id: TreeNodeId) {
        if !self.tree_nodes.contains(id.0) {
            return;
        }
        let tree_node = self.tree_nodes.remove(id.0);
        let node = &self.octree[tree_node.geometry_node];
        let index = node.index();

        match tree_node.parent.and_then(|parent| self.tree_nodes.get_mut(parent.0)) {
            Some(parent) => parent.children[index] = Some(NodeSlot::Geometry(tree_node.geometry_node)),
            None if self.root == NodeSlot::Tree(id) => self.root = NodeSlot::Geometry(tree_node.geometry_node),
            None => {}
        }

        // slab ids are reused, so no child may keep pointing here
        for child in tree_node.children.into_iter().flatten() {
            if let NodeSlot::Tree(child) = child {
                if let Some(child) = self.tree_nodes.get_mut(child.0) {
                    child.parent = None;
                }
            }
        }
        if let Some(position) = self.visible_nodes.iter().position(|visible| *visible == id) {
            self.visible_nodes.remove(position);
        }
    }

    /// Disposes the loaded subtree rooted at `node_id`, walking the current
    /// child slots. Descendants go first. Returns every node visited, including
    /// a root that refused to be disposed.
    pub fn dispose_subtree(&mut self, node_id: NodeId) -> Vec<NodeKey> {
        let mut stack = vec![node_id];
        let mut collected = Vec::new();

        while let Some(current) = stack.pop() {
            let Some(node) = self.octree.node(current) else {
                continue;
            };
            if !node.is_loaded() {
                continue;
            }
            collected.push(current);

            for child in self.child_slots(self.slot_of(current)).into_iter().flatten() {
                let child = self.geometry_id(child);
                if self.octree[child].is_loaded() {
                    stack.push(child);
                }
            }
        }

        for node in collected.iter().rev() {
            self.dispose_node(*node);
        }
        debug!(cloud = self.id.0, disposed = collected.len(), "disposed subtree");

        collected.into_iter().map(|node| self.key(node)).collect()
    }

    /// Hides everything the previous frame showed and clears the selection.
    pub(crate) fn begin_frame(&mut self) {
        for id in self.visible_nodes.drain(..) {
            if let Some(tree_node) = self.tree_nodes.get_mut(id.0) {
                tree_node.point_set.visible = false;
                tree_node.point_set.bounding_box_visible = false;
            }
        }
        self.visible_geometry.clear();
        self.num_visible_points = 0;
    }

    pub(crate) fn show(&mut self, id: TreeNodeId) {
        let show_bounding_box = self.settings.show_bounding_box;
        if let Some(tree_node) = self.tree_nodes.get_mut(id.0) {
            tree_node.point_set.visible = true;
            tree_node.point_set.bounding_box_visible = show_bounding_box;
            self.visible_nodes.push(id);
        }
    }

    /// Refreshes the material's view of the visible subtree.
    pub fn update_visibility_texture(&mut self) {
        let nodes = self.visible_nodes.iter().map(|id| {
            let geometry = self.tree_nodes[id.0].geometry_node;
            (*id, self.octree[geometry].name())
        });
        self.visibility_texture = compute_visibility_texture(nodes);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::decode::DecodedBuffers;
    use crate::hierarchy::tests::encode;
    use crate::hierarchy::HierarchyNodeEntry;
    use crate::metadata::tests::METADATA_JSON;
    use crate::resource::memory::MemoryClient;
    use crate::runtime::BlockingSpawner;
    use futures::executor::block_on;
    use glam::DVec3;

    /// Root with eight leaf children, no point payloads needed.
    pub(crate) fn open_synthetic() -> PointCloudOctree {
        open_with_metadata(METADATA_JSON)
    }

    fn open_with_metadata(metadata: &str) -> PointCloudOctree {
        let client = MemoryClient::new();
        client.insert("mem://cloud/metadata.json", metadata.as_bytes().to_vec());

        let mut entries = vec![HierarchyNodeEntry {
            r#type: 0,
            child_mask: 0xFF,
            num_points: 1000,
            byte_offset: 0,
            byte_size: 18_000,
        }];
        for i in 0..8u64 {
            entries.push(HierarchyNodeEntry {
                r#type: 1,
                child_mask: 0,
                num_points: 100,
                byte_offset: 18_000 + i * 1800,
                byte_size: 1800,
            });
        }
        client.insert("mem://cloud/hierarchy.bin", encode(&entries));

        block_on(PointCloudOctree::open(
            "mem://cloud",
            ResourceLoader::new(client),
            Arc::new(DecoderPool::default()),
            Arc::new(BlockingSpawner),
            OctreeSettings::default(),
        ))
        .unwrap()
    }

    pub(crate) fn mark_loaded(cloud: &mut PointCloudOctree, node: NodeId) {
        let node = cloud.node_mut(node).unwrap();
        assert!(node.begin_load());
        let num_points = node.num_points();
        node.finish_load(DecodedBuffers {
            num_points,
            ..DecodedBuffers::empty()
        });
    }

    #[test]
    fn test_open_reads_first_chunk() {
        let cloud = open_synthetic();

        assert_eq!(cloud.octree().len(), 9);
        let root = cloud.octree().root();
        assert_eq!(root.num_points(), 1000);
        assert_eq!(root.node_type(), NodeType::Normal);
        assert!(root.children().iter().all(Option::is_some));
        assert_eq!(cloud.root(), NodeSlot::Geometry(cloud.octree().root_id()));
    }

    #[test]
    fn test_open_fails_on_missing_hierarchy() {
        let client = MemoryClient::new();
        client.insert("mem://cloud/metadata.json", METADATA_JSON.as_bytes().to_vec());

        let result = block_on(PointCloudOctree::open(
            "mem://cloud",
            ResourceLoader::new(client),
            Arc::new(DecoderPool::default()),
            Arc::new(BlockingSpawner),
            OctreeSettings::default(),
        ));

        assert!(matches!(result, Err(OpenError::Resource(ResourceError::NotFound(_)))));
    }

    #[test]
    fn test_octree_space_is_the_metadata_box() {
        let json = METADATA_JSON.replace(
            r#""boundingBox": { "min": [0, 0, 0], "max": [8, 8, 8] }"#,
            r#""boundingBox": { "min": [-8, -4, 4], "max": [8, 4, 12] }"#,
        );
        assert_ne!(json, METADATA_JSON);
        let cloud = open_with_metadata(&json);

        assert_eq!(cloud.world_matrix(), DMat4::IDENTITY);
        assert_eq!(cloud.octree().root().bounding_box().center(), DVec3::new(0.0, 0.0, 8.0));
        let r7 = cloud.node_by_name("r7").unwrap();
        assert_eq!(cloud.octree()[r7].bounding_box().min, DVec3::new(0.0, 0.0, 8.0));
    }

    #[test]
    fn test_promotion_is_reversible() {
        let mut cloud = open_synthetic();
        let root_id = cloud.octree().root_id();
        let r5 = cloud.node_by_name("r5").unwrap();
        mark_loaded(&mut cloud, root_id);
        mark_loaded(&mut cloud, r5);

        let before = cloud.octree()[r5].clone();
        let root_tree = cloud.promote(root_id, None).unwrap();
        let r5_tree = cloud.promote(r5, Some(root_tree)).unwrap();

        assert_eq!(cloud.root(), NodeSlot::Tree(root_tree));
        assert_eq!(cloud.tree_node(root_tree).unwrap().children()[5], Some(NodeSlot::Tree(r5_tree)));
        assert_eq!(cloud.slot_of(r5), NodeSlot::Tree(r5_tree));

        assert!(cloud.dispose_node(r5));
        // the slot holds the plain node again
        assert_eq!(cloud.tree_node(root_tree).unwrap().children()[5], Some(NodeSlot::Geometry(r5)));
        assert!(cloud.tree_node(r5_tree).is_none());

        let after = &cloud.octree()[r5];
        assert!(!after.is_loaded());
        assert_eq!(after.id(), before.id());
        assert_eq!(after.bounding_box(), before.bounding_box());
        assert_eq!(after.level(), before.level());

        // second dispose does nothing
        assert!(!cloud.dispose_node(r5));
    }

    #[test]
    fn test_root_is_never_disposed() {
        let mut cloud = open_synthetic();
        let root_id = cloud.octree().root_id();
        mark_loaded(&mut cloud, root_id);
        let root_tree = cloud.promote(root_id, None).unwrap();

        assert!(!cloud.dispose_node(root_id));
        assert_eq!(cloud.root(), NodeSlot::Tree(root_tree));
    }

    #[test]
    fn test_dispose_subtree_only_visits_loaded_nodes() {
        let mut cloud = open_synthetic();
        let root_id = cloud.octree().root_id();
        let r1 = cloud.node_by_name("r1").unwrap();
        let r2 = cloud.node_by_name("r2").unwrap();
        mark_loaded(&mut cloud, root_id);
        mark_loaded(&mut cloud, r1);
        let root_tree = cloud.promote(root_id, None).unwrap();
        cloud.promote(r1, Some(root_tree)).unwrap();

        let disposed = cloud.dispose_subtree(root_id);

        assert_eq!(disposed.len(), 2);
        assert!(disposed.contains(&cloud.key(r1)));
        assert!(!disposed.contains(&cloud.key(r2)));
        assert!(!cloud.octree()[r1].is_loaded());
        // the root keeps its data
        assert!(cloud.octree().root().is_loaded());
    }

    #[test]
    fn test_completed_loads_are_drained_once() {
        // no octree.bin, so every point range read fails
        let mut cloud = open_synthetic();
        let r0 = cloud.node_by_name("r0").unwrap();
        let r1 = cloud.node_by_name("r1").unwrap();
        assert!(cloud.load_node(r0));
        assert!(cloud.load_node(r1));
        assert_eq!(cloud.num_nodes_loading(), 2);

        assert_eq!(cloud.apply_completed_loads(), AppliedLoads { loaded: 0, failed: 2 });
        assert_eq!(cloud.num_nodes_loading(), 0);
        assert!(cloud.octree()[r0].has_failed());
        assert_eq!(cloud.apply_completed_loads(), AppliedLoads::default());
    }

    #[test]
    fn test_load_respects_per_octree_cap() {
        let mut cloud = open_synthetic();
        cloud.settings.max_num_nodes_loading = 0;
        let r0 = cloud.node_by_name("r0").unwrap();

        assert!(!cloud.load_node(r0));
        assert_eq!(cloud.octree()[r0].state(), crate::octree::geometry_node::LoadState::Unloaded);
    }
}
