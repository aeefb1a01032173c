pub mod aabb;
pub mod geometry_node;
pub mod point_attributes;
pub mod tree_node;

use slab::Slab;

/// Index of a geometry node inside its octree's [`FlatOctree`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

/// Slab-backed node storage with a fixed root.
///
/// Nodes reference each other by [`NodeId`]; the hierarchy only ever grows
/// (hierarchy chunks add nodes, unloading frees geometry but keeps the node).
#[derive(Clone, Debug)]
pub struct FlatOctree<T> {
    storage: Slab<T>,
    root_id: NodeId,
}

impl<T> FlatOctree<T> {
    pub fn with_root(root: T) -> Self {
        let mut storage = Slab::new();
        let root_id = NodeId(storage.insert(root));

        Self { storage, root_id }
    }

    pub fn root_id(&self) -> NodeId {
        self.root_id
    }

    pub fn root(&self) -> &T {
        self.storage
            .get(self.root_id.0)
            .expect("root node not found - invariant broken")
    }

    pub fn node(&self, node_id: NodeId) -> Option<&T> {
        self.storage.get(node_id.0)
    }

    pub fn node_mut(&mut self, node_id: NodeId) -> Option<&mut T> {
        self.storage.get_mut(node_id.0)
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &T)> {
        self.storage.iter().map(|(key, node)| (NodeId(key), node))
    }

    pub(crate) fn reserve(&mut self, additional: usize) {
        self.storage.reserve(additional);
    }

    pub(crate) fn insert(&mut self, node: T) -> NodeId {
        NodeId(self.storage.insert(node))
    }
}

impl<T> std::ops::Index<NodeId> for FlatOctree<T> {
    type Output = T;

    fn index(&self, node_id: NodeId) -> &T {
        &self.storage[node_id.0]
    }
}

impl<T> std::ops::IndexMut<NodeId> for FlatOctree<T> {
    fn index_mut(&mut self, node_id: NodeId) -> &mut T {
        &mut self.storage[node_id.0]
    }
}
