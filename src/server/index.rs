//! Job & function index operations: `add`, `queue`, `peek`, `take`.
//! These are the only code paths allowed to move a job between
//! queued and running.

use bytes::Bytes;

use super::{Effect, Server};
use crate::queue::{PersistedJob, QueueError};
use crate::types::hash::{jenkins_one_at_a_time, truncate, MAX_ID_LEN};
use crate::types::ids::{ConnectionId, FunctionId, JobId};
use crate::types::job::{Job, Progress};
use crate::wire::protocol::Priority;

pub enum AddOutcome {
    /// A new job was created and queued.
    Created { id: JobId, handle: Bytes, effects: Vec<Effect> },
    /// A dedup hit: the caller should be attached as a subscriber (if any)
    /// and told about the existing handle; nothing new was queued.
    Dedup { id: JobId, handle: Bytes },
    QueueFull,
    QueueError(QueueError),
}

impl Server {
    /// Adds a job: dedup check, arena insert, then queue or reject.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_job(
        &mut self,
        function_name: Bytes,
        unique: Bytes,
        data: Bytes,
        priority: Priority,
        foreground: bool,
        subscriber: Option<ConnectionId>,
    ) -> AddOutcome {
        let function = self.get_or_create_function(function_name.clone());
        // The client-supplied unique key is capped the same way the
        // original's `snprintf(..., GEARMAN_UNIQUE_SIZE, ...)` caps it, so
        // two submissions differing only past byte 64 dedup together.
        let unique = truncate(unique, MAX_ID_LEN);

        // Step 1: dedup lookup.
        if !unique.is_empty() {
            let (key_hash, key_bytes): (u32, &[u8]) = if unique.as_ref() == b"-" && !data.is_empty() {
                (jenkins_one_at_a_time(&data), data.as_ref())
            } else {
                (jenkins_one_at_a_time(&unique), unique.as_ref())
            };
            if let Some(existing) = self.find_by_unique(function, key_hash, key_bytes) {
                if let Some(sub) = subscriber {
                    let job = &mut self.jobs[existing.0];
                    if !job.subscribers.contains(&sub) {
                        job.subscribers.push(sub);
                    }
                    self.connections[sub.0].subscribed_jobs.push(existing);
                }
                let handle = self.jobs[existing.0].handle.clone();
                return AddOutcome::Dedup { id: existing, handle };
            }
        }

        // Step 2: queue-full check.
        {
            let f = &self.functions[function.0];
            if f.max_queue_size > 0 && f.total() >= f.max_queue_size as u64 {
                return AddOutcome::QueueFull;
            }
        }

        // Step 3: allocate job, assign handle, insert into both hash tables.
        let handle = self.next_handle();
        let handle_hash = jenkins_one_at_a_time(&handle);
        let unique_hash = if unique.is_empty() {
            None
        } else if unique.as_ref() == b"-" && !data.is_empty() {
            Some(jenkins_one_at_a_time(&data))
        } else {
            Some(jenkins_one_at_a_time(&unique))
        };

        let job = Job {
            handle: handle.clone(),
            handle_hash,
            unique,
            unique_hash,
            function,
            priority,
            data,
            queued: false,
            ignore: false,
            worker: None,
            progress: Progress::default(),
            subscribers: subscriber.into_iter().collect(),
        };
        let id = JobId(self.jobs.insert(job));
        Self::index_insert(&mut self.by_handle, handle_hash, id);
        if let Some(hash) = unique_hash {
            Self::index_insert(&mut self.by_unique, hash, id);
        }
        if let Some(sub) = subscriber {
            self.connections[sub.0].subscribed_jobs.push(id);
        }

        // Step 4/5: persistence.
        if self.queue_replay {
            self.jobs[id.0].queued = true;
        } else if foreground {
            let job = &self.jobs[id.0];
            let persisted = PersistedJob {
                unique: job.unique.clone(),
                function: function_name.clone(),
                data: job.data.clone(),
                priority: job.priority,
            };
            if let Err(error) = self.queue.add(persisted).await {
                self.jobs.remove(id.0);
                Self::index_remove(&mut self.by_handle, handle_hash, id);
                if let Some(hash) = unique_hash {
                    Self::index_remove(&mut self.by_unique, hash, id);
                }
                return AddOutcome::QueueError(error);
            }
            if let Err(error) = self.queue.flush().await {
                self.jobs.remove(id.0);
                Self::index_remove(&mut self.by_handle, handle_hash, id);
                if let Some(hash) = unique_hash {
                    Self::index_remove(&mut self.by_unique, hash, id);
                }
                return AddOutcome::QueueError(error);
            }
            self.jobs[id.0].queued = true;
        }

        // Step 6: queue into the priority FIFO, waking sleepers.
        let effects = self.queue_job(id);

        AddOutcome::Created { id, handle, effects }
    }

    /// `queue(job)`: append to the function's priority FIFO and
    /// wake at most one sleeping worker per binding via NOOP.
    pub fn queue_job(&mut self, id: JobId) -> Vec<Effect> {
        let (function, priority, was_running) = {
            let job = &mut self.jobs[id.0];
            let was_running = job.worker.take().is_some();
            (job.function, job.priority, was_running)
        };

        if was_running {
            let f = &mut self.functions[function.0];
            f.running = f.running.saturating_sub(1);
        }

        let mut effects = Vec::new();
        let worker_ids: Vec<ConnectionId> =
            self.functions[function.0].workers.iter().map(|w| w.connection).collect();
        for worker in worker_ids {
            let conn = &mut self.connections[worker.0];
            if conn.sleeping && !conn.noop_queued {
                conn.noop_queued = true;
                effects.push(Effect::send(worker, crate::wire::protocol::Response::Noop));
            }
        }

        self.functions[function.0].queue_for(priority).push_back(id);

        effects
    }

    /// `peek(connection)`: the next job this worker would receive,
    /// without detaching it. Frees (and skips past) any `ignore`d job heads
    /// encountered along the way.
    pub async fn peek(&mut self, connection: ConnectionId) -> Option<JobId> {
        let bound_functions: Vec<FunctionId> =
            self.connections[connection.0].registered_functions.keys().cloned().filter_map(|name| self.find_function(&name)).collect();

        for function in bound_functions {
            loop {
                let head = Priority::ALL.iter().copied().find_map(|p| {
                    self.functions[function.0].queue_for(p).front().copied().map(|id| (p, id))
                });
                let Some((priority, id)) = head else { break };

                if self.jobs[id.0].ignore {
                    self.functions[function.0].queue_for(priority).pop_front();
                    self.free_job(id).await;
                    continue;
                }

                return Some(id);
            }
        }
        None
    }

    /// `take(connection)`: `peek`, then detach the head job and
    /// assign it to `connection`.
    pub async fn take(&mut self, connection: ConnectionId) -> Option<JobId> {
        let id = self.peek(connection).await?;
        let job = &self.jobs[id.0];
        let (function, priority) = (job.function, job.priority);

        self.functions[function.0].queue_for(priority).pop_front();
        let job = &mut self.jobs[id.0];
        job.worker = Some(connection);
        self.functions[function.0].running += 1;

        Some(id)
    }
}
