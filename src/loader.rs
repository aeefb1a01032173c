use crate::decode::pool::DecoderPool;
use crate::decode::{DecodeError, DecodeRequest, DecodedBuffers, DecoderKind};
use crate::hierarchy::{read_hierarchy_entries, HierarchyError, HierarchyNodeEntry};
use crate::octree::aabb::Aabb;
use crate::octree::point_attributes::PointAttributes;
use crate::octree::NodeId;
use crate::resource::{ResourceError, ResourceLoader};
use crate::runtime::TaskSpawner;
use futures::channel::mpsc::UnboundedSender;
use futures::FutureExt;
use glam::DVec3;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Hierarchy error: {0}")]
    Hierarchy(#[from] HierarchyError),

    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

/// Snapshot of what a load needs to know about a node, taken on the main
/// thread when the load is dispatched.
#[derive(Clone, Debug)]
pub struct LoadRequest {
    pub node: NodeId,
    pub name: String,
    /// Set when the node's descendants (and its own point range) live in an
    /// unfetched hierarchy chunk.
    pub hierarchy_range: Option<(u64, u64)>,
    pub byte_range: (u64, u64),
    pub num_points: u32,
    pub bounding_box: Aabb,
}

#[derive(Debug)]
pub struct LoadedNode {
    /// Parsed records of the node's hierarchy chunk, when one was fetched.
    pub hierarchy: Option<Vec<HierarchyNodeEntry>>,
    pub buffers: DecodedBuffers,
}

#[derive(Debug)]
pub struct LoadCompletion {
    pub node: NodeId,
    pub result: Result<LoadedNode, LoadError>,
}

/// Fetches and decodes nodes of one dataset in the background.
///
/// Results are posted to the owning octree's completion channel and applied
/// there on the main thread.
#[derive(Clone)]
pub struct NodeLoader {
    pub(crate) resources: ResourceLoader,
    pub(crate) hierarchy_url: String,
    pub(crate) octree_url: String,
    pub(crate) attributes: Arc<PointAttributes>,
    pub(crate) scale: DVec3,
    pub(crate) offset: DVec3,
    pub(crate) kind: DecoderKind,
    pub(crate) decoders: Arc<DecoderPool>,
    pub(crate) spawner: Arc<dyn TaskSpawner>,
    pub(crate) completions: UnboundedSender<LoadCompletion>,
}

impl fmt::Debug for NodeLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeLoader")
            .field("hierarchy_url", &self.hierarchy_url)
            .field("octree_url", &self.octree_url)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl NodeLoader {
    /// Starts loading in the background. Never blocks on I/O itself, though a
    /// blocking spawner may.
    pub fn load(&self, request: LoadRequest) {
        let loader = self.clone();

        self.spawner.spawn(
            async move {
                let node = request.node;
                let name = request.name.clone();
                let result = loader.fetch(request).await;
                debug!(node = %name, ok = result.is_ok(), "node load finished");

                // the octree may have been dropped in the meantime
                let _ = loader
                    .completions
                    .unbounded_send(LoadCompletion { node, result });
            }
            .boxed(),
        );
    }

    async fn fetch(&self, request: LoadRequest) -> Result<LoadedNode, LoadError> {
        let mut byte_range = request.byte_range;
        let mut num_points = request.num_points;
        let mut hierarchy = None;

        if let Some((offset, size)) = request.hierarchy_range {
            let chunk = self
                .resources
                .get_range(&self.hierarchy_url, offset, size as usize, None)
                .await?;
            let entries = read_hierarchy_entries(&chunk)?;

            // record 0 describes the node itself
            let own = entries[0];
            byte_range = (own.byte_offset, own.byte_size);
            num_points = own.num_points;
            hierarchy = Some(entries);
        }

        let (offset, size) = byte_range;
        if size == 0 {
            return Ok(LoadedNode {
                hierarchy,
                buffers: DecodedBuffers::empty(),
            });
        }

        let buffer = self
            .resources
            .get_range(&self.octree_url, offset, size as usize, None)
            .await?;

        let buffers = self
            .decoders
            .decode(
                self.kind,
                DecodeRequest {
                    buffer,
                    attributes: self.attributes.clone(),
                    scale: self.scale,
                    offset: self.offset,
                    bounding_box: request.bounding_box,
                    num_points,
                },
            )
            .await?;

        Ok(LoadedNode { hierarchy, buffers })
    }
}
