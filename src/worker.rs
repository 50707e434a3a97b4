//! Worker-side convenience library: the other end of the
//! `CAN_DO -> GRAB_JOB -> NO_JOB/PRE_SLEEP -> NOOP -> GRAB_JOB` loop the
//! server's [`crate::server::dispatch`] drives, grounded in the worker loop
//! implied by `original_source/examples/reverse_client.c`'s client-side use
//! of the same protocol.

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio_util::codec::Framed;
use tracing::instrument;

use crate::wire::client_codec::ClientCodec;
use crate::wire::protocol::{Command, Response};
use crate::wire::{self, decoder};

#[derive(thiserror::Error, Debug)]
pub enum WorkerError {
    #[error("could not resolve address")]
    GetAddrInfo,
    #[error("could not connect to any resolved address")]
    CouldNotConnect,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Protocol(#[from] decoder::Error),
    #[error("connection lost")]
    LostConnection,
    #[error("unexpected response from server")]
    UnexpectedPacket,
}

/// A job handed out by `GRAB_JOB`/`GRAB_JOB_UNIQ`.
#[derive(Debug, Clone)]
pub struct AssignedJob {
    pub handle: Bytes,
    pub function: Bytes,
    pub unique: Option<Bytes>,
    pub data: Bytes,
}

pub struct Worker {
    framed: Framed<TcpStream, ClientCodec>,
}

impl Worker {
    #[instrument(skip_all)]
    pub async fn connect(addrs: impl ToSocketAddrs) -> Result<Self, WorkerError> {
        let resolved: Vec<_> =
            tokio::net::lookup_host(addrs).await.map_err(|_| WorkerError::GetAddrInfo)?.collect();

        let mut last_error = None;
        for addr in resolved {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    return Ok(Worker { framed: wire::client_framed(stream) });
                },
                Err(error) => last_error = Some(error),
            }
        }
        match last_error {
            Some(error) => Err(WorkerError::Io(error)),
            None => Err(WorkerError::CouldNotConnect),
        }
    }

    async fn send(&mut self, cmd: Command) -> Result<(), WorkerError> {
        self.framed.send(cmd).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Response, WorkerError> {
        match self.framed.next().await {
            None => Err(WorkerError::LostConnection),
            Some(result) => Ok(result?),
        }
    }

    /// Registers `function` as one this worker can perform. No response is
    /// sent by the server for `CAN_DO`, so this simply writes the packet.
    pub async fn can_do(&mut self, function: impl Into<Bytes>) -> Result<(), WorkerError> {
        self.send(Command::CanDo { function: function.into() }).await
    }

    pub async fn can_do_timeout(
        &mut self,
        function: impl Into<Bytes>,
        timeout: u32,
    ) -> Result<(), WorkerError> {
        self.send(Command::CanDoTimeout { function: function.into(), timeout }).await
    }

    pub async fn cant_do(&mut self, function: impl Into<Bytes>) -> Result<(), WorkerError> {
        self.send(Command::CantDo { function: function.into() }).await
    }

    pub async fn reset_abilities(&mut self) -> Result<(), WorkerError> {
        self.send(Command::ResetAbilities).await
    }

    pub async fn set_client_id(&mut self, id: impl Into<Bytes>) -> Result<(), WorkerError> {
        self.send(Command::SetClientId { id: id.into() }).await
    }

    /// Hands the currently assigned jobs of every bound function to this
    /// connection preferentially on future `GRAB_JOB`s (`ALL_YOURS`; see
    /// DESIGN.md for the chosen semantics).
    pub async fn all_yours(&mut self) -> Result<(), WorkerError> {
        self.send(Command::AllYours).await
    }

    /// Asks for a job, returning `None` on `NO_JOB`.
    pub async fn grab_job(&mut self) -> Result<Option<AssignedJob>, WorkerError> {
        self.send(Command::GrabJob).await?;
        match self.recv().await? {
            Response::NoJob => Ok(None),
            Response::JobAssign { handle, function, data } => {
                Ok(Some(AssignedJob { handle, function, unique: None, data }))
            },
            _ => Err(WorkerError::UnexpectedPacket),
        }
    }

    pub async fn grab_job_uniq(&mut self) -> Result<Option<AssignedJob>, WorkerError> {
        self.send(Command::GrabJobUniq).await?;
        match self.recv().await? {
            Response::NoJob => Ok(None),
            Response::JobAssignUniq { handle, function, unique, data } => {
                Ok(Some(AssignedJob { handle, function, unique: Some(unique), data }))
            },
            _ => Err(WorkerError::UnexpectedPacket),
        }
    }

    /// Tells the server this worker has no more jobs to pull right now and
    /// wants a `NOOP` when one becomes available.
    pub async fn pre_sleep(&mut self) -> Result<(), WorkerError> {
        self.send(Command::PreSleep).await
    }

    /// Blocks until the server wakes this connection with a `NOOP`.
    pub async fn wait_for_wakeup(&mut self) -> Result<(), WorkerError> {
        match self.recv().await? {
            Response::Noop => Ok(()),
            _ => Err(WorkerError::UnexpectedPacket),
        }
    }

    pub async fn work_status(
        &mut self,
        handle: impl Into<Bytes>,
        numerator: u32,
        denominator: u32,
    ) -> Result<(), WorkerError> {
        self.send(Command::WorkStatus { handle: handle.into(), numerator, denominator }).await
    }

    pub async fn work_complete(
        &mut self,
        handle: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Result<(), WorkerError> {
        self.send(Command::WorkComplete { handle: handle.into(), data: data.into() }).await
    }

    pub async fn work_fail(&mut self, handle: impl Into<Bytes>) -> Result<(), WorkerError> {
        self.send(Command::WorkFail { handle: handle.into() }).await
    }

    pub async fn work_data(
        &mut self,
        handle: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Result<(), WorkerError> {
        self.send(Command::WorkData { handle: handle.into(), data: data.into() }).await
    }

    pub async fn work_warning(
        &mut self,
        handle: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Result<(), WorkerError> {
        self.send(Command::WorkWarning { handle: handle.into(), data: data.into() }).await
    }

    pub async fn work_exception(
        &mut self,
        handle: impl Into<Bytes>,
        data: impl Into<Bytes>,
    ) -> Result<(), WorkerError> {
        self.send(Command::WorkException { handle: handle.into(), data: data.into() }).await
    }

    /// Runs the standard grab/sleep/wake loop, dispatching each assigned
    /// job to `handler` and reporting its outcome with `WORK_COMPLETE` or
    /// `WORK_FAIL`. Intended for simple one-function workers (the
    /// `reverse` example); a worker juggling several functions or needing
    /// finer control should drive `grab_job`/`pre_sleep` directly instead.
    pub async fn run<F, Fut>(&mut self, mut handler: F) -> Result<(), WorkerError>
    where
        F: FnMut(AssignedJob) -> Fut,
        Fut: std::future::Future<Output = Result<Bytes, Bytes>>,
    {
        loop {
            match self.grab_job().await? {
                Some(job) => {
                    let handle = job.handle.clone();
                    match handler(job).await {
                        Ok(data) => self.work_complete(handle, data).await?,
                        Err(_) => self.work_fail(handle).await?,
                    }
                },
                None => {
                    self.pre_sleep().await?;
                    self.wait_for_wakeup().await?;
                },
            }
        }
    }
}
