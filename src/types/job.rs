use bytes::Bytes;

use super::ids::{ConnectionId, FunctionId};
use crate::wire::protocol::Priority;

/// Progress reported by the most recent `WORK_STATUS`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Progress {
    pub numerator: u32,
    pub denominator: u32,
}

/// A job, server-assigned a unique handle on creation.
///
/// A job is in exactly one of two states at any time: queued on
/// `function.job_list[priority]` with `worker == None`, or running with
/// `worker == Some(_)` and removed from that list. `queue`/`take`/`peek` in
/// [`crate::server::index`] are the only code that may move a job between
/// them.
#[derive(Debug)]
pub struct Job {
    pub handle: Bytes,
    /// Cached hash of `handle`, so the job can remove itself from
    /// `Server::by_handle` on free without rehashing.
    pub handle_hash: u32,
    /// Client-supplied dedup token, or empty if none was given.
    pub unique: Bytes,
    /// Cached hash of the dedup key (of `unique`, or of `data` when
    /// `unique == "-"`); `None` if this job has no unique index entry.
    pub unique_hash: Option<u32>,
    pub function: FunctionId,
    pub priority: Priority,
    pub data: Bytes,
    /// Set once the job has been durably persisted by the queue backend.
    pub queued: bool,
    /// Set when the last foreground subscriber disconnects before the job
    /// is taken; causes `peek`/`take` to discard it.
    pub ignore: bool,
    pub worker: Option<ConnectionId>,
    pub progress: Progress,
    /// Foreground clients subscribed to this job's `WORK_*` updates.
    pub subscribers: Vec<ConnectionId>,
}

impl Job {
    pub fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}
