//! Text-mode administrative commands: the minimum set
//! `{workers, status, maxqueue, shutdown, version, getpid}`.
//! Each reply is a plain text line (or block terminated by a lone `.`),
//! matching the line-oriented admin protocol real Gearman clients (and
//! `gearadmin`) expect.

use bytes::Bytes;

use crate::server::{Effect, Server};
use crate::types::ids::ConnectionId;
use crate::wire::Outbound;

const VERSION: &str = concat!("gearman-rs ", env!("CARGO_PKG_VERSION"));

pub async fn dispatch(server: &mut Server, from: ConnectionId, tokens: Vec<Vec<u8>>) -> Vec<Effect> {
    let Some(command) = tokens.first() else { return vec![] };

    match command.as_slice() {
        b"workers" => workers(server, from),
        b"status" => status(server, from),
        b"maxqueue" => maxqueue(server, from, &tokens[1..]),
        b"shutdown" => shutdown(from),
        b"version" => text(from, format!("{VERSION}\n")),
        b"getpid" => text(from, format!("OK {}\n", std::process::id())),
        _ => text(from, "ERR unknown_command Unknown+server+command\n".to_string()),
    }
}

fn text(to: ConnectionId, line: String) -> Vec<Effect> {
    vec![Effect::send(to, Outbound::Text(line.into_bytes()))]
}

/// One line per connection bound to at least one function, in the classic
/// `fd ip client_id : fn1 fn2 ...` shape, terminated with a lone `.`.
fn workers(server: &mut Server, from: ConnectionId) -> Vec<Effect> {
    let mut out = String::new();
    for (id, conn) in server.connections.iter() {
        if conn.registered_functions.is_empty() {
            continue;
        }
        let client_id = conn
            .client_id
            .as_ref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!("{} {} {} :", id, conn.peer, client_id));
        for name in conn.registered_functions.keys() {
            out.push(' ');
            out.push_str(&String::from_utf8_lossy(name));
        }
        out.push('\n');
    }
    out.push_str(".\n");
    text(from, out)
}

/// One line per function: `name\ttotal\trunning\tavailable_workers`,
/// terminated with a lone `.`.
fn status(server: &mut Server, from: ConnectionId) -> Vec<Effect> {
    let mut out = String::new();
    for (_, f) in server.functions.iter() {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            String::from_utf8_lossy(&f.name),
            f.total(),
            f.running,
            f.workers.len(),
        ));
    }
    out.push_str(".\n");
    text(from, out)
}

fn maxqueue(server: &mut Server, from: ConnectionId, args: &[Vec<u8>]) -> Vec<Effect> {
    let Some(name) = args.first() else {
        return text(from, "ERR bad_arguments maxqueue+requires+a+function+name\n".to_string());
    };
    let size: u32 = args.get(1).and_then(|s| std::str::from_utf8(s).ok()).and_then(|s| s.parse().ok()).unwrap_or(0);

    let function = server.get_or_create_function(Bytes::copy_from_slice(name));
    server.functions[function.0].max_queue_size = size;
    text(from, "OK\n".to_string())
}

/// Real Gearman closes the admin connection after acknowledging shutdown;
/// graceful draining (waiting for `running == 0`) is the shard's job, not
/// the admin handler's.
fn shutdown(from: ConnectionId) -> Vec<Effect> {
    vec![
        Effect::send(from, Outbound::Text(b"OK\n".to_vec())),
        Effect::Close { to: from, after_flush: true },
    ]
}
