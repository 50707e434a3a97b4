//! The dispatch engine's root object: a single [`Server`] is owned
//! exclusively by one shard task; nothing here touches a socket
//! or a channel -- see [`crate::shard`] and the `Effect` list returned by
//! [`dispatch`] for how responses actually reach a connection.

pub mod dispatch;
pub mod index;

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use slab::Slab;

use crate::queue::QueueBackend;
use crate::types::connection::Connection;
use crate::types::function::Function;
use crate::types::hash::HASH_BUCKETS;
use crate::types::ids::{ConnectionId, FunctionId, JobId};
use crate::types::job::Job;
use crate::wire::Outbound;

pub use dispatch::dispatch;

/// The outcome of dispatching one packet: a response to deliver, or an
/// instruction to close a connection. The dispatcher never touches a socket directly;
/// the shard's writer task applies these against the real outbox channel.
#[derive(Debug, Clone)]
pub enum Effect {
    Send { to: ConnectionId, out: Outbound },
    /// `after_flush` mirrors `CLOSE_AFTER_FLUSH`: the connection is closed
    /// once every effect queued before it has drained.
    Close { to: ConnectionId, after_flush: bool },
}

impl Effect {
    pub fn send(to: ConnectionId, out: impl Into<Outbound>) -> Self {
        Effect::Send { to, out: out.into() }
    }
}

pub struct Server {
    pub connections: Slab<Connection>,
    pub jobs: Slab<Job>,
    pub functions: Slab<Function>,
    function_by_name: HashMap<Bytes, FunctionId>,
    /// `by_handle[bucket(hash)]` holds every live job whose handle hashes to
    /// that bucket.
    by_handle: Vec<Vec<JobId>>,
    /// Same shape, keyed on the dedup hash; only jobs with a non-empty
    /// unique key appear here.
    by_unique: Vec<Vec<JobId>>,
    job_counter: u64,
    handle_prefix: String,
    pub queue: Arc<dyn QueueBackend>,
    /// Set for the duration of startup replay: `add_job` marks each
    /// replayed job `queued` without re-persisting it.
    pub queue_replay: bool,
}

impl Server {
    pub fn new(handle_prefix: String, queue: Arc<dyn QueueBackend>) -> Self {
        Server {
            connections: Slab::new(),
            jobs: Slab::new(),
            functions: Slab::new(),
            function_by_name: HashMap::new(),
            by_handle: vec![Vec::new(); HASH_BUCKETS],
            by_unique: vec![Vec::new(); HASH_BUCKETS],
            job_counter: 0,
            handle_prefix,
            queue,
            queue_replay: false,
        }
    }

    pub fn add_connection(&mut self, peer: String) -> ConnectionId {
        ConnectionId(self.connections.insert(Connection::new(peer)))
    }

    /// Looks up a function by name without creating one.
    pub fn find_function(&self, name: &[u8]) -> Option<FunctionId> {
        self.function_by_name.get(name).copied()
    }

    /// Looks up a function by name, creating it (functions are created
    /// lazily on first `CAN_DO` or `SUBMIT_JOB`). The double role
    /// (find-or-create) is deliberate, matching `server_function_get`'s
    /// behavior in reference Gearman servers; callers that must not create
    /// use [`Server::find_function`].
    pub fn get_or_create_function(&mut self, name: Bytes) -> FunctionId {
        if let Some(&id) = self.function_by_name.get(&name) {
            return id;
        }
        let id = FunctionId(self.functions.insert(Function::new(name.clone())));
        self.function_by_name.insert(name, id);
        id
    }

    fn next_handle(&mut self) -> Bytes {
        self.job_counter += 1;
        let handle = Bytes::from(format!("{}:{}", self.handle_prefix, self.job_counter));
        crate::types::hash::truncate(handle, crate::types::hash::MAX_ID_LEN)
    }

    fn index_insert(index: &mut [Vec<JobId>], hash: u32, id: JobId) {
        index[crate::types::hash::bucket(hash)].push(id);
    }

    fn index_remove(index: &mut [Vec<JobId>], hash: u32, id: JobId) {
        let bucket = &mut index[crate::types::hash::bucket(hash)];
        if let Some(pos) = bucket.iter().position(|&j| j == id) {
            bucket.swap_remove(pos);
        }
    }

    pub fn find_by_handle(&self, handle: &[u8]) -> Option<JobId> {
        let hash = crate::types::hash::jenkins_one_at_a_time(handle);
        self.by_handle[crate::types::hash::bucket(hash)]
            .iter()
            .copied()
            .find(|&id| self.jobs[id.0].handle == handle)
    }

    /// Finds a live job matching the submission dedup rule: same function,
    /// same dedup hash bucket, and
    /// an exact match on whichever byte string the key was derived from.
    fn find_by_unique(&self, function: FunctionId, key_hash: u32, key_bytes: &[u8]) -> Option<JobId> {
        self.by_unique[crate::types::hash::bucket(key_hash)].iter().copied().find(|&id| {
            let job = &self.jobs[id.0];
            job.function == function
                && match job.unique.as_ref() {
                    b"-" => job.data.as_ref() == key_bytes,
                    unique => unique == key_bytes,
                }
        })
    }

    /// Removes a job from both hash indices and the arena, calling
    /// `queue.done` on a best-effort basis if it was ever persisted.
    /// `done` failures are logged, not surfaced.
    pub async fn free_job(&mut self, id: JobId) {
        let job = self.jobs.remove(id.0);
        Self::index_remove(&mut self.by_handle, job.handle_hash, id);
        if let Some(hash) = job.unique_hash {
            Self::index_remove(&mut self.by_unique, hash, id);
        }
        if job.queued {
            let function_name = self.functions[job.function.0].name.clone();
            if let Err(error) = self.queue.done(job.unique.clone(), function_name).await {
                tracing::warn!(%error, handle = %String::from_utf8_lossy(&job.handle), "queue.done failed");
            }
        }
    }
}
