pub use crate::camera::{Camera, Projection, Viewport};
pub use crate::clip::{ClipBox, ClipMode};
pub use crate::decode::pool::{DecoderPool, DecoderPoolConfig};
pub use crate::decode::{AttributeData, DecodedBuffers};
pub use crate::metadata::Metadata;
pub use crate::octree::geometry_node::{GeometryNode, LoadState};
pub use crate::octree::tree_node::{NodeSlot, TreeNodeId};
pub use crate::octree::NodeId;
pub use crate::point_cloud::{CloudId, NodeKey, OctreeSettings, PointCloudOctree};
pub use crate::resource::memory::MemoryClient;
pub use crate::resource::{ResourceClient, ResourceLoader};
pub use crate::runtime::{BlockingSpawner, TaskSpawner, ThreadPoolSpawner};
pub use crate::scheduler::{FrameResult, Scheduler, SchedulerConfig, VisibleNode};

#[cfg(feature = "tokio")]
pub use crate::runtime::TokioSpawner;

// Error types
pub use crate::decode::DecodeError;
pub use crate::hierarchy::HierarchyError;
pub use crate::loader::LoadError;
pub use crate::metadata::MetadataError;
pub use crate::point_cloud::OpenError;
pub use crate::resource::ResourceError;
