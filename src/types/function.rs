use std::collections::VecDeque;

use bytes::Bytes;

use super::ids::{ConnectionId, JobId};
use crate::wire::protocol::Priority;

/// A worker connection's binding to a function, including the advisory
/// per-worker timeout from `CAN_DO_TIMEOUT`.
#[derive(Copy, Clone, Debug)]
pub struct WorkerBinding {
    pub connection: ConnectionId,
    pub timeout: Option<u32>,
}

/// A named worker capability. Created lazily on first
/// `CAN_DO`/`SUBMIT_JOB` referencing the name; never destroyed during a run.
#[derive(Debug, Default)]
pub struct Function {
    pub name: Bytes,
    pub max_queue_size: u32,
    pub job_list: [VecDeque<JobId>; 3],
    pub running: u64,
    /// Workers bound to this function, in registration order -- the order
    /// `queue` wakes sleepers and `take` is offered work.
    pub workers: Vec<WorkerBinding>,
}

impl Function {
    pub fn new(name: Bytes) -> Self {
        Function { name, max_queue_size: 0, ..Default::default() }
    }

    pub fn job_count(&self) -> usize {
        self.job_list.iter().map(VecDeque::len).sum()
    }

    pub fn total(&self) -> u64 {
        self.job_count() as u64 + self.running
    }

    pub fn queue_for(&mut self, priority: Priority) -> &mut VecDeque<JobId> {
        &mut self.job_list[priority as usize]
    }

    pub fn bind_worker(&mut self, connection: ConnectionId, timeout: Option<u32>) {
        if let Some(existing) = self.workers.iter_mut().find(|w| w.connection == connection) {
            existing.timeout = timeout;
        } else {
            self.workers.push(WorkerBinding { connection, timeout });
        }
    }

    pub fn unbind_worker(&mut self, connection: ConnectionId) {
        self.workers.retain(|w| w.connection != connection);
    }
}
