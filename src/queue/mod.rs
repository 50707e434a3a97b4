//! Persistent queue adapter. Four operations on a pluggable
//! backend: `add`/`flush` guard foreground submission durability, `done`
//! retires a persisted job, `replay` re-populates the in-memory index on
//! startup. Concrete SQL-backed drivers are out of scope; only the trait
//! boundary, a no-op default, and an in-memory reference implementation
//! (used by tests and by the restart-replay scenario) live here.

use std::sync::Mutex;

use bytes::Bytes;
use futures::future::BoxFuture;

use crate::wire::protocol::Priority;

/// One persisted-job tuple, exactly the fields `replay` is required to
/// deliver.
#[derive(Clone, Debug)]
pub struct PersistedJob {
    pub unique: Bytes,
    pub function: Bytes,
    pub data: Bytes,
    pub priority: Priority,
}

#[derive(thiserror::Error, Debug)]
pub enum QueueError {
    #[error("queue backend error: {0}")]
    Backend(String),
}

/// Must be internally thread-safe; it is the one piece of shared state a
/// shard touches outside its own exclusive `Server`.
pub trait QueueBackend: Send + Sync {
    fn add(&self, job: PersistedJob) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Durability barrier, called after every foreground `add` by default.
    fn flush(&self) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Logged, not surfaced, on failure.
    fn done(&self, unique: Bytes, function: Bytes) -> BoxFuture<'_, Result<(), QueueError>>;

    /// Invoke `add_cb` once per persisted job, in original priority/insertion
    /// order, then return. Callers set `QUEUE_REPLAY` around this call so
    /// each re-added job is marked `queued` without being re-persisted.
    fn replay(
        &self,
        add_cb: &mut (dyn FnMut(PersistedJob) + Send + '_),
    ) -> BoxFuture<'_, Result<(), QueueError>>;
}

/// No-op backend: nothing is durable, `replay` yields nothing. The default
/// when no queue driver is configured.
#[derive(Debug, Default)]
pub struct NullQueue;

impl QueueBackend for NullQueue {
    fn add(&self, _job: PersistedJob) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async { Ok(()) })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async { Ok(()) })
    }

    fn done(&self, _unique: Bytes, _function: Bytes) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async { Ok(()) })
    }

    fn replay(
        &self,
        _add_cb: &mut (dyn FnMut(PersistedJob) + Send + '_),
    ) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async { Ok(()) })
    }
}

/// In-memory reference backend. Keyed by `(function, unique)` since that is
/// the pair `done` is given; insertion order is preserved so `replay`
/// reproduces the original priority/insertion order.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    entries: Mutex<Vec<PersistedJob>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        MemoryQueue { entries: Mutex::new(Vec::new()) }
    }
}

impl QueueBackend for MemoryQueue {
    fn add(&self, job: PersistedJob) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            self.entries.lock().unwrap().push(job);
            Ok(())
        })
    }

    fn flush(&self) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async { Ok(()) })
    }

    fn done(&self, unique: Bytes, function: Bytes) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let mut entries = self.entries.lock().unwrap();
            if let Some(pos) =
                entries.iter().position(|e| e.unique == unique && e.function == function)
            {
                entries.remove(pos);
            }
            Ok(())
        })
    }

    fn replay(
        &self,
        add_cb: &mut (dyn FnMut(PersistedJob) + Send + '_),
    ) -> BoxFuture<'_, Result<(), QueueError>> {
        Box::pin(async move {
            let entries = self.entries.lock().unwrap().clone();
            for job in entries {
                add_cb(job);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_queue_replays_in_insertion_order() {
        let q = MemoryQueue::new();
        q.add(PersistedJob {
            unique: Bytes::from_static(b"u1"),
            function: Bytes::from_static(b"reverse"),
            data: Bytes::from_static(b"x"),
            priority: Priority::Normal,
        })
        .await
        .unwrap();
        q.add(PersistedJob {
            unique: Bytes::from_static(b"u2"),
            function: Bytes::from_static(b"reverse"),
            data: Bytes::from_static(b"y"),
            priority: Priority::High,
        })
        .await
        .unwrap();

        let mut replayed = Vec::new();
        q.replay(&mut |job| replayed.push(job.unique.clone())).await.unwrap();

        assert_eq!(replayed, vec![Bytes::from_static(b"u1"), Bytes::from_static(b"u2")]);
    }

    #[tokio::test]
    async fn done_removes_matching_entry() {
        let q = MemoryQueue::new();
        q.add(PersistedJob {
            unique: Bytes::from_static(b"u1"),
            function: Bytes::from_static(b"reverse"),
            data: Bytes::from_static(b"x"),
            priority: Priority::Normal,
        })
        .await
        .unwrap();
        q.done(Bytes::from_static(b"u1"), Bytes::from_static(b"reverse")).await.unwrap();

        let mut replayed = Vec::new();
        q.replay(&mut |job| replayed.push(job.unique.clone())).await.unwrap();
        assert!(replayed.is_empty());
    }
}
