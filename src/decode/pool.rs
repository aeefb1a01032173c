use super::{DecodeError, DecodeRequest, DecodedBuffers, DecoderKind};
use futures::channel::oneshot;
use serde::Deserialize;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;
use tracing::{debug, warn};

type DecodeFn = fn(DecoderKind, &DecodeRequest) -> Result<DecodedBuffers, DecodeError>;
type Reply = oneshot::Sender<Result<DecodedBuffers, DecodeError>>;

#[derive(Deserialize, Clone, Debug)]
#[serde(default, rename_all = "camelCase")]
pub struct DecoderPoolConfig {
    /// Upper bound on persistent worker threads per decoder kind.
    pub max_workers_per_kind: usize,
}

impl Default for DecoderPoolConfig {
    fn default() -> Self {
        Self {
            max_workers_per_kind: 4,
        }
    }
}

struct Job {
    request: DecodeRequest,
    reply: Reply,
}

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    workers: usize,
    idle: usize,
    shutdown: bool,
}

struct Lane {
    kind: DecoderKind,
    shared: Arc<(Mutex<State>, Condvar)>,
}

fn lock(shared: &(Mutex<State>, Condvar)) -> MutexGuard<'_, State> {
    shared.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Background decoding for node payloads.
///
/// Each decoder kind owns a FIFO queue served by persistent threads. Threads
/// are started lazily, only when a job arrives and every existing worker is
/// busy, and never beyond `max_workers_per_kind`. Extra jobs wait in the queue.
pub struct DecoderPool {
    lanes: Vec<Lane>,
    max_workers: usize,
    decode: DecodeFn,
}

impl std::fmt::Debug for DecoderPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecoderPool")
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl Default for DecoderPool {
    fn default() -> Self {
        Self::new(DecoderPoolConfig::default())
    }
}

impl DecoderPool {
    pub fn new(config: DecoderPoolConfig) -> Self {
        Self::with_decoder(config, super::decode)
    }

    fn with_decoder(config: DecoderPoolConfig, decode: DecodeFn) -> Self {
        let lanes = [DecoderKind::Default, DecoderKind::Brotli]
            .into_iter()
            .map(|kind| Lane {
                kind,
                shared: Arc::new((Mutex::new(State::default()), Condvar::new())),
            })
            .collect();

        Self {
            lanes,
            max_workers: config.max_workers_per_kind.max(1),
            decode,
        }
    }

    fn lane(&self, kind: DecoderKind) -> &Lane {
        match kind {
            DecoderKind::Default => &self.lanes[0],
            DecoderKind::Brotli => &self.lanes[1],
        }
    }

    /// Number of worker threads currently alive for `kind`.
    pub fn workers(&self, kind: DecoderKind) -> usize {
        lock(&self.lane(kind).shared).workers
    }

    /// Queues `request` and resolves once a worker has decoded it.
    pub async fn decode(
        &self,
        kind: DecoderKind,
        request: DecodeRequest,
    ) -> Result<DecodedBuffers, DecodeError> {
        let (reply, response) = oneshot::channel();
        self.submit(kind, Job { request, reply });

        response.await.unwrap_or(Err(DecodeError::PoolShutDown))
    }

    fn submit(&self, kind: DecoderKind, job: Job) {
        let lane = self.lane(kind);
        let spawn_worker = {
            let mut state = lock(&lane.shared);
            if state.shutdown {
                let _ = job.reply.send(Err(DecodeError::PoolShutDown));
                return;
            }
            state.queue.push_back(job);

            let waiting = state.queue.len();
            let spawn = state.idle < waiting && state.workers < self.max_workers;
            if spawn {
                state.workers += 1;
            }
            spawn
        };

        if spawn_worker {
            self.spawn_worker(lane);
        }
        lane.shared.1.notify_one();
    }

    fn spawn_worker(&self, lane: &Lane) {
        let shared = lane.shared.clone();
        let kind = lane.kind;
        let decode = self.decode;

        let spawned = thread::Builder::new()
            .name(format!("potree-decode-{kind}"))
            .spawn(move || worker_loop(kind, shared, decode));

        match spawned {
            Ok(_) => debug!(%kind, "started decoder worker"),
            Err(error) => {
                warn!(%kind, %error, "could not start decoder worker");
                let mut state = lock(&lane.shared);
                state.workers -= 1;
                if state.workers == 0 {
                    // nobody is left to serve the queue
                    for job in state.queue.drain(..) {
                        let _ = job.reply.send(Err(DecodeError::WorkerSpawn(error.to_string())));
                    }
                }
            }
        }
    }
}

impl Drop for DecoderPool {
    fn drop(&mut self) {
        for lane in &self.lanes {
            lock(&lane.shared).shutdown = true;
            lane.shared.1.notify_all();
        }
    }
}

fn worker_loop(kind: DecoderKind, shared: Arc<(Mutex<State>, Condvar)>, decode: DecodeFn) {
    loop {
        let job = {
            let mut state = lock(&shared);
            loop {
                if state.shutdown {
                    state.workers -= 1;
                    // dropping the pending replies reports PoolShutDown
                    state.queue.clear();
                    return;
                }
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                state.idle += 1;
                state = shared.1.wait(state).unwrap_or_else(|poisoned| poisoned.into_inner());
                state.idle -= 1;
            }
        };

        let result = catch_unwind(AssertUnwindSafe(|| decode(kind, &job.request)))
            .unwrap_or_else(|_| {
                warn!(%kind, "decoder panicked");
                Err(DecodeError::WorkerPanicked)
            });
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::tests::synthetic_attributes;
    use crate::octree::aabb::Aabb;
    use futures::executor::block_on;
    use futures::future::join_all;
    use glam::DVec3;

    fn request(num_points: u32) -> DecodeRequest {
        DecodeRequest {
            buffer: vec![0; num_points as usize * 18],
            attributes: synthetic_attributes(),
            scale: DVec3::splat(0.001),
            offset: DVec3::ZERO,
            bounding_box: Aabb::new(DVec3::ZERO, DVec3::ONE),
            num_points,
        }
    }

    fn panics_on_seven(kind: DecoderKind, request: &DecodeRequest) -> Result<DecodedBuffers, DecodeError> {
        if request.num_points == 7 {
            panic!("corrupt payload");
        }
        crate::decode::decode(kind, request)
    }

    #[test]
    fn test_decode_through_pool() {
        let pool = DecoderPool::default();
        let decoded = block_on(pool.decode(DecoderKind::Default, request(3))).unwrap();

        assert_eq!(decoded.num_points, 3);
        assert_eq!(pool.workers(DecoderKind::Default), 1);
        assert_eq!(pool.workers(DecoderKind::Brotli), 0);
    }

    #[test]
    fn test_worker_count_is_bounded() {
        let pool = DecoderPool::new(DecoderPoolConfig {
            max_workers_per_kind: 2,
        });

        let results = block_on(join_all(
            (1..=16).map(|n| pool.decode(DecoderKind::Default, request(n))),
        ));

        for (n, result) in (1..=16).zip(results) {
            assert_eq!(result.unwrap().num_points, n);
        }
        assert!(pool.workers(DecoderKind::Default) <= 2);
    }

    #[test]
    fn test_panicking_decode_is_reported() {
        let pool = DecoderPool::with_decoder(
            DecoderPoolConfig {
                max_workers_per_kind: 1,
            },
            panics_on_seven,
        );

        let failed = block_on(pool.decode(DecoderKind::Default, request(7)));
        assert!(matches!(failed, Err(DecodeError::WorkerPanicked)));

        // the same worker keeps serving
        let decoded = block_on(pool.decode(DecoderKind::Default, request(2))).unwrap();
        assert_eq!(decoded.num_points, 2);
        assert_eq!(pool.workers(DecoderKind::Default), 1);
    }
}
