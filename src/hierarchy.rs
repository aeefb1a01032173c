use crate::octree::geometry_node::{GeometryNode, NodeType};
use crate::octree::{FlatOctree, NodeId};
use binrw::{binrw, BinReaderExt};
use std::io::Cursor;
use thiserror::Error;

pub const BYTES_PER_NODE: usize = 22;

/// One record of `hierarchy.bin`.
#[binrw]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[brw(little)]
pub struct HierarchyNodeEntry {
    pub r#type: u8,
    pub child_mask: u8,
    pub num_points: u32,
    pub byte_offset: u64,
    pub byte_size: u64,
}

#[derive(Error, Debug)]
pub enum HierarchyError {
    #[error("Hierarchy chunk is empty")]
    Empty,

    #[error("Hierarchy chunk of {0} bytes is not a whole number of records")]
    Misaligned(usize),

    #[error("Invalid binary data: {0}")]
    InvalidBinaryData(#[from] binrw::Error),

    #[error("Unknown node type {value} in record {record}")]
    UnknownNodeType { record: usize, value: u8 },

    #[error("Hierarchy chunk announces {announced} nodes but holds {available} records")]
    CountMismatch { announced: usize, available: usize },

    #[error("Node {0} does not reference an unexpanded hierarchy chunk")]
    NotAProxy(String),
}

pub fn read_hierarchy_entries(buf: &[u8]) -> Result<Vec<HierarchyNodeEntry>, HierarchyError> {
    if buf.is_empty() {
        return Err(HierarchyError::Empty);
    }
    if buf.len() % BYTES_PER_NODE != 0 {
        return Err(HierarchyError::Misaligned(buf.len()));
    }

    let num_nodes = buf.len() / BYTES_PER_NODE;
    let mut cursor = Cursor::new(buf);
    let mut entries = Vec::with_capacity(num_nodes);
    for _ in 0..num_nodes {
        entries.push(cursor.read_le()?);
    }

    Ok(entries)
}

/// Checks that the records describe exactly one breadth-first subtree.
fn check_layout(entries: &[HierarchyNodeEntry]) -> Result<(), HierarchyError> {
    let mut announced = 1;

    for (record, entry) in entries.iter().enumerate() {
        if record >= announced {
            break;
        }
        let node_type = NodeType::try_from(entry.r#type)
            .map_err(|value| HierarchyError::UnknownNodeType { record, value })?;
        if node_type != NodeType::Proxy {
            announced += entry.child_mask.count_ones() as usize;
        }
    }

    if announced != entries.len() {
        return Err(HierarchyError::CountMismatch {
            announced,
            available: entries.len(),
        });
    }

    Ok(())
}

/// Expands the proxy `node_id` with a parsed hierarchy chunk.
///
/// Record 0 describes `node_id` itself; the remaining records are its
/// descendants in breadth-first order. Returns the ids of the created nodes.
/// The arena is left untouched when the chunk is inconsistent.
pub fn apply_hierarchy_chunk(
    octree: &mut FlatOctree<GeometryNode>,
    node_id: NodeId,
    entries: &[HierarchyNodeEntry],
) -> Result<Vec<NodeId>, HierarchyError> {
    let node = &octree[node_id];
    if node.node_type != NodeType::Proxy {
        return Err(HierarchyError::NotAProxy(node.name.clone()));
    }
    if entries.is_empty() {
        return Err(HierarchyError::Empty);
    }
    check_layout(entries)?;

    octree.reserve(entries.len() - 1);
    let mut nodes = Vec::with_capacity(entries.len());
    nodes.push(node_id);

    for (i, entry) in entries.iter().enumerate() {
        let current_id = nodes[i];
        let current = &mut octree[current_id];
        let node_type = NodeType::try_from(entry.r#type)
            .map_err(|value| HierarchyError::UnknownNodeType { record: i, value })?;

        // the chunk root's record carries its point range even if it says proxy
        let is_point_range = current.node_type == NodeType::Proxy || node_type != NodeType::Proxy;
        if is_point_range {
            current.byte_offset = entry.byte_offset;
            current.byte_size = entry.byte_size;
        } else {
            current.hierarchy_byte_offset = entry.byte_offset;
            current.hierarchy_byte_size = entry.byte_size;
        }
        current.num_points = entry.num_points;

        // some converters report points for inner nodes that store none
        if is_point_range && entry.byte_size == 0 {
            current.num_points = 0;
        }

        current.node_type = node_type;
        if node_type == NodeType::Proxy {
            continue;
        }

        for child_index in 0..8 {
            if entry.child_mask & (1 << child_index) == 0 {
                continue;
            }
            let child = GeometryNode::new_child(&octree[current_id], current_id, child_index);
            let child_id = octree.insert(child);
            octree[current_id].children[child_index] = Some(child_id);
            nodes.push(child_id);
        }
    }

    nodes.remove(0);
    Ok(nodes)
}
