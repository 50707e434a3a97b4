use std::collections::HashMap;

use bytes::Bytes;

use super::ids::JobId;

bitflags::bitflags! {
    /// Per-connection option flags, carried even though the
    /// async runtime's `Framed`/`AsyncWrite` already handles non-blocking
    /// partial writes -- these gate dispatcher-level behaviour, not raw
    /// poll-loop plumbing.
    #[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
    pub struct ConnOptions: u8 {
        /// Close the connection once its outbox has fully drained.
        const CLOSE_AFTER_FLUSH = 1 << 0;
        /// Tolerate a mid-stream disconnect as a clean close rather than an
        /// error (client-library side; see `ClientError::LostConnection`).
        const IGNORE_LOST_CONNECTION = 1 << 1;
    }
}

/// Server-side state for one connection. Connection I/O (the read/write buffers
/// themselves) lives in the per-connection actor tasks in
/// [`crate::shard`]; this struct is the dispatcher-owned bookkeeping that
/// drives protocol decisions.
#[derive(Debug, Default)]
pub struct Connection {
    pub peer: String,
    /// Client-assigned label from `SET_CLIENT_ID`.
    pub client_id: Option<Bytes>,
    /// Functions this connection can execute as a worker, each with its
    /// optional `CAN_DO_TIMEOUT` value (duplicated from
    /// `Function::workers` for O(1) lookup on disconnect/`RESET_ABILITIES`).
    pub registered_functions: HashMap<Bytes, Option<u32>>,
    pub sleeping: bool,
    pub noop_queued: bool,
    pub receives_exceptions: bool,
    /// Jobs this connection is subscribed to as a foreground client.
    pub subscribed_jobs: Vec<JobId>,
    pub options: ConnOptions,
}

impl Connection {
    pub fn new(peer: String) -> Self {
        Connection { peer, ..Default::default() }
    }
}
