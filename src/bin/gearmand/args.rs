use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use clap::Parser;

#[derive(Parser, Debug)]
#[command(about, long_about = None, version)]
pub struct Args {
    /// Address to listen on.
    #[arg(short, long, default_value_t = IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)))]
    pub listen: IpAddr,
    /// (TCP) port to listen on.
    #[arg(short, long, default_value_t = 4730)]
    pub port: u16,
    /// Number of shard tasks to run the server across. 0 uses a
    /// single-threaded runtime with one shard.
    #[arg(short, long, default_value_t = 0)]
    pub threads: usize,
    /// Listen backlog passed to the underlying socket.
    #[arg(short, long, default_value_t = 1024)]
    pub backlog: i32,
    /// Persistent queue backend: "none" (default, no persistence) or
    /// "memory" (in-process reference implementation, lost on restart).
    #[arg(short = 'q', long, default_value = "none")]
    pub queue_type: String,
    /// Run as a background daemon. Accepted for compatibility; this server
    /// has no process model that benefits from it, so it is a no-op.
    #[arg(short, long, default_value_t)]
    pub daemon: bool,
    /// Write the process id to this file on startup.
    #[arg(long)]
    pub pid_file: Option<PathBuf>,
    /// Drop privileges to this user after binding the listener. Accepted
    /// for compatibility; not implemented.
    #[arg(short, long)]
    pub user: Option<String>,
    /// Verbosity: repeat for more detail.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// Enables human-friendly (non-JSON) logging at TRACE level.
    #[arg(long, default_value_t)]
    pub debug: bool,
}
