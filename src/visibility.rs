use crate::octree::tree_node::TreeNodeId;
use std::collections::HashMap;

/// Visible subtree packed for shaders that pick a point size per node.
///
/// Nodes are sorted by level, then name. Each node takes 4 bytes: a mask of
/// its visible children, the distance (in nodes, big endian over two bytes)
/// to its first visible child, and its level.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VisibilityTexture {
    pub data: Vec<u8>,
    /// Row of each node in `data`.
    pub offsets: HashMap<TreeNodeId, usize>,
}

impl VisibilityTexture {
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn row(&self, node: TreeNodeId) -> Option<&[u8]> {
        let offset = *self.offsets.get(&node)?;
        self.data.get(offset * 4..offset * 4 + 4)
    }
}

/// Builds the texture from visible nodes and their names (`r`, `r0`, `r07`...).
pub fn compute_visibility_texture<'a>(
    nodes: impl IntoIterator<Item = (TreeNodeId, &'a str)>,
) -> VisibilityTexture {
    let mut nodes: Vec<(TreeNodeId, &str)> = nodes.into_iter().collect();
    nodes.sort_by(|(_, a), (_, b)| a.len().cmp(&b.len()).then_with(|| a.cmp(b)));

    let mut data = vec![0u8; nodes.len() * 4];
    let mut offsets = HashMap::with_capacity(nodes.len());
    let mut by_name: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
    let mut offset_to_child = vec![usize::MAX; nodes.len()];

    for (i, (id, name)) in nodes.iter().enumerate() {
        offsets.insert(*id, i);
        by_name.insert(*name, i);

        if name.len() > 1 {
            let (parent_name, index) = name.split_at(name.len() - 1);
            let index = index.parse::<u8>().unwrap_or(0);

            if let Some(&parent) = by_name.get(parent_name) {
                let offset = offset_to_child[parent].min(i - parent);
                offset_to_child[parent] = offset;

                data[parent * 4] |= 1 << index;
                data[parent * 4 + 1] = (offset >> 8) as u8;
                data[parent * 4 + 2] = (offset % 256) as u8;
            }
        }

        data[i * 4 + 3] = name.len().saturating_sub(1) as u8;
    }

    VisibilityTexture { data, offsets }
}
