//! Out-of-core streaming of Potree 2.0 point cloud octrees.
//!
//! A [`point_cloud::PointCloudOctree`] reads a dataset's metadata and first
//! hierarchy chunk, then nodes are fetched and decoded on demand. Every frame
//! the [`scheduler::Scheduler`] picks the nodes to show under a point budget,
//! starts a bounded number of loads and evicts least recently used geometry.

pub mod camera;
pub mod clip;
pub mod decode;
pub mod frustum;
pub mod hierarchy;
pub mod loader;
pub mod lru;
pub mod metadata;
pub mod octree;
pub mod point_cloud;
pub mod prelude;
pub mod resource;
pub mod runtime;
pub mod scheduler;
pub mod visibility;
