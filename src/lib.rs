pub mod acceptor;
pub mod admin;
pub mod client;
pub mod queue;
pub mod server;
pub mod shard;
pub mod types;
pub mod wire;
pub mod worker;
