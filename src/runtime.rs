//! Where node loads run.
//!
//! The scheduler never awaits a load: it hands a boxed future to a
//! [`TaskSpawner`] and picks the outcome up from a channel on a later frame.

use futures::executor::ThreadPool;
use futures::future::BoxFuture;
use std::fmt;

/// Runs fire-and-forget background tasks.
pub trait TaskSpawner: Send + Sync {
    fn spawn(&self, task: BoxFuture<'static, ()>);
}

impl<S: TaskSpawner + ?Sized> TaskSpawner for std::sync::Arc<S> {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        (**self).spawn(task)
    }
}

/// Spawns onto a tokio runtime.
#[cfg(feature = "tokio")]
#[derive(Clone, Debug)]
pub struct TokioSpawner {
    handle: tokio::runtime::Handle,
}

#[cfg(feature = "tokio")]
impl TokioSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// The runtime the caller is running in, if any.
    pub fn try_current() -> Option<Self> {
        tokio::runtime::Handle::try_current().ok().map(Self::new)
    }
}

#[cfg(feature = "tokio")]
impl TaskSpawner for TokioSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.handle.spawn(task);
    }
}

/// Spawns onto a `futures` thread pool, for hosts without an async runtime.
#[derive(Clone)]
pub struct ThreadPoolSpawner {
    pool: ThreadPool,
}

impl fmt::Debug for ThreadPoolSpawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPoolSpawner").finish_non_exhaustive()
    }
}

impl ThreadPoolSpawner {
    pub fn new() -> std::io::Result<Self> {
        Ok(Self {
            pool: ThreadPool::new()?,
        })
    }

    pub fn from_pool(pool: ThreadPool) -> Self {
        Self { pool }
    }
}

impl TaskSpawner for ThreadPoolSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        self.pool.spawn_ok(task);
    }
}

/// Runs each task to completion inside `spawn`.
///
/// Loads finish before the frame that started them returns, which makes
/// frame sequences deterministic. Meant for tools and tests, not render loops.
#[derive(Clone, Copy, Debug, Default)]
pub struct BlockingSpawner;

impl TaskSpawner for BlockingSpawner {
    fn spawn(&self, task: BoxFuture<'static, ()>) {
        futures::executor::block_on(task);
    }
}
