use crate::octree::geometry_node::GeometryNode;
use crate::point_cloud::NodeKey;
use slab::Slab;
use std::collections::HashMap;
use tracing::debug;

#[derive(Clone, Debug)]
struct LruItem {
    key: NodeKey,
    num_points: u64,
    previous: Option<usize>,
    next: Option<usize>,
}

/// Loaded nodes ordered by last use, oldest first.
///
/// The list lives in a slab; `index` maps a node to its list item so touch
/// and remove stay O(1).
#[derive(Clone, Debug)]
pub struct Lru {
    items: Slab<LruItem>,
    index: HashMap<NodeKey, usize>,
    first: Option<usize>,
    last: Option<usize>,
    num_points: u64,
    /// Eviction starts once the tracked points exceed this.
    pub point_load_limit: u64,
}

impl Default for Lru {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl Lru {
    pub fn new(point_load_limit: u64) -> Self {
        Self {
            items: Slab::new(),
            index: HashMap::new(),
            first: None,
            last: None,
            num_points: 0,
            point_load_limit,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn num_points(&self) -> u64 {
        self.num_points
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.index.contains_key(&key)
    }

    /// Least recently touched node.
    pub fn oldest(&self) -> Option<NodeKey> {
        self.first.map(|item| self.items[item].key)
    }

    /// Keys from least to most recently touched.
    pub fn keys(&self) -> impl Iterator<Item = NodeKey> + '_ {
        std::iter::successors(self.first, move |item| self.items[*item].next)
            .map(move |item| self.items[item].key)
    }

    /// Marks `node` as most recently used. Unloaded nodes are ignored.
    pub fn touch(&mut self, key: NodeKey, node: &GeometryNode) {
        if !node.is_loaded() {
            return;
        }

        match self.index.get(&key) {
            Some(&item) => {
                self.unlink(item);
                self.push_back(item);
            }
            None => {
                let num_points = node.num_points() as u64;
                let item = self.items.insert(LruItem {
                    key,
                    num_points,
                    previous: None,
                    next: None,
                });
                self.push_back(item);
                self.index.insert(key, item);
                self.num_points += num_points;
            }
        }
    }

    pub fn remove(&mut self, key: NodeKey) {
        let Some(item) = self.index.remove(&key) else {
            return;
        };

        self.unlink(item);
        let removed = self.items.remove(item);
        self.num_points -= removed.num_points;
    }

    /// Evicts least recently used subtrees until the tracked points fit the
    /// limit. A single resident is never evicted.
    ///
    /// `dispose_subtree` disposes the loaded subtree rooted at the given node
    /// and returns every node it disposed.
    pub fn free_memory<F>(&mut self, mut dispose_subtree: F)
    where
        F: FnMut(NodeKey) -> Vec<NodeKey>,
    {
        if self.len() <= 1 {
            return;
        }

        while self.num_points > self.point_load_limit {
            let Some(oldest) = self.oldest() else {
                break;
            };

            let disposed = dispose_subtree(oldest);
            debug!(node = ?oldest, disposed = disposed.len(), "evicting subtree");

            self.remove(oldest);
            for key in disposed {
                self.remove(key);
            }
        }
    }

    fn unlink(&mut self, item: usize) {
        let LruItem { previous, next, .. } = self.items[item];

        match previous {
            Some(previous) => self.items[previous].next = next,
            None => self.first = next,
        }
        match next {
            Some(next) => self.items[next].previous = previous,
            None => self.last = previous,
        }

        let item = &mut self.items[item];
        item.previous = None;
        item.next = None;
    }

    fn push_back(&mut self, item: usize) {
        self.items[item].previous = self.last;
        match self.last {
            Some(last) => self.items[last].next = Some(item),
            None => self.first = Some(item),
        }
        self.last = Some(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedBuffers;
    use crate::octree::aabb::Aabb;
    use crate::octree::NodeId;
    use crate::point_cloud::CloudId;

    fn key(node: usize) -> NodeKey {
        NodeKey {
            cloud: CloudId(0),
            node: NodeId(node),
        }
    }

    fn loaded(num_points: u32) -> GeometryNode {
        let root = GeometryNode::new_root(Aabb::default(), 1.0, 22);
        let mut node = GeometryNode::new_child(&root, NodeId(0), 0);
        node.begin_load();
        node.finish_load(DecodedBuffers {
            num_points,
            ..DecodedBuffers::empty()
        });
        node
    }

    #[test]
    fn test_touch_order() {
        let mut lru = Lru::default();
        let node = loaded(10);

        for k in [1, 2, 3, 1] {
            lru.touch(key(k), &node);
        }

        assert_eq!(lru.keys().collect::<Vec<_>>(), vec![key(2), key(3), key(1)]);
        assert_eq!(lru.num_points(), 30);
    }

    #[test]
    fn test_eviction_order_follows_recency() {
        let mut lru = Lru::new(0);
        let node = loaded(10);
        for k in [1, 2, 3, 1] {
            lru.touch(key(k), &node);
        }

        let mut evicted = Vec::new();
        lru.free_memory(|key| {
            evicted.push(key);
            vec![key]
        });

        // the last resident is evicted too once more than one was present
        assert_eq!(evicted, vec![key(2), key(3), key(1)]);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_touch_ignores_unloaded_nodes() {
        let mut lru = Lru::default();
        let root = GeometryNode::new_root(Aabb::default(), 1.0, 22);

        lru.touch(key(0), &root);
        assert!(lru.is_empty());
    }

    #[test]
    fn test_remove_and_missing_remove() {
        let mut lru = Lru::default();
        lru.touch(key(1), &loaded(5));
        lru.touch(key(2), &loaded(7));

        lru.remove(key(1));
        lru.remove(key(1));
        assert_eq!(lru.len(), 1);
        assert_eq!(lru.num_points(), 7);
        assert_eq!(lru.oldest(), Some(key(2)));
    }

    #[test]
    fn test_free_memory_converges_and_is_idempotent() {
        let budget = 100;
        let mut lru = Lru::new(budget * 2);
        for k in 0..10 {
            lru.touch(key(k), &loaded(50));
        }
        assert_eq!(lru.num_points(), 500);

        let mut calls = 0;
        lru.free_memory(|key| {
            calls += 1;
            vec![key]
        });
        assert!(lru.num_points() <= budget * 2);
        assert_eq!(lru.num_points(), 200);
        assert_eq!(lru.oldest(), Some(key(6)));
        assert_eq!(calls, 6);

        lru.free_memory(|_| panic!("nothing should be evicted"));
        assert_eq!(lru.len(), 4);
    }

    #[test]
    fn test_single_resident_is_kept() {
        let mut lru = Lru::new(1);
        lru.touch(key(1), &loaded(1000));

        lru.free_memory(|_| panic!("sole resident evicted"));
        assert_eq!(lru.len(), 1);
    }

    #[test]
    fn test_subtree_eviction_removes_descendants() {
        let mut lru = Lru::new(25);
        let node = loaded(10);
        for k in [1, 2, 3] {
            lru.touch(key(k), &node);
        }

        // 1 is the parent of 3
        lru.free_memory(|k| if k == key(1) { vec![key(3), key(1)] } else { vec![k] });

        assert_eq!(lru.keys().collect::<Vec<_>>(), vec![key(2)]);
        assert_eq!(lru.num_points(), 10);
    }
}
