//! Packet dispatch: a single function receives a parsed packet
//! on a connection and performs the listed transitions, returning the
//! effects (responses/closes) the shard should apply. Unlisted
//! request/connection-state combinations are rejected with `ERROR` and the
//! connection is closed.

use bytes::Bytes;

use super::index::AddOutcome;
use super::{Effect, Server};
use crate::types::ids::ConnectionId;
use crate::wire::events::GearmanEvent;
use crate::wire::protocol::{Command, Priority, Response};

/// Dispatches one decoded event from `from`. This is the only entry point
/// the shard calls into the dispatcher with.
pub async fn dispatch(server: &mut Server, from: ConnectionId, event: GearmanEvent) -> Vec<Effect> {
    match event {
        GearmanEvent::Discarded => vec![],
        GearmanEvent::Admin(tokens) => crate::admin::dispatch(server, from, tokens).await,
        GearmanEvent::Command(cmd) => dispatch_command(server, from, cmd).await,
    }
}

async fn dispatch_command(server: &mut Server, from: ConnectionId, cmd: Command) -> Vec<Effect> {
    match cmd {
        Command::CanDo { function } => {
            can_do(server, from, function, None);
            vec![]
        },
        Command::CanDoTimeout { function, timeout } => {
            can_do(server, from, function, Some(timeout));
            vec![]
        },
        Command::CantDo { function } => {
            cant_do(server, from, &function);
            vec![]
        },
        Command::ResetAbilities => {
            reset_abilities(server, from);
            vec![]
        },
        Command::SetClientId { id } => {
            server.connections[from.0].client_id = Some(id);
            vec![]
        },
        Command::PreSleep => pre_sleep(server, from),
        Command::GrabJob => grab_job(server, from, false).await,
        Command::GrabJobUniq => grab_job(server, from, true).await,
        Command::WorkStatus { handle, numerator, denominator } => {
            work_status(server, &handle, numerator, denominator)
        },
        Command::WorkData { handle, data } => forward_work(server, &handle, Response::WorkData { handle: handle.clone(), data }, false),
        Command::WorkWarning { handle, data } => forward_work(server, &handle, Response::WorkWarning { handle: handle.clone(), data }, false),
        Command::WorkException { handle, data } => forward_work(server, &handle, Response::WorkException { handle: handle.clone(), data }, true),
        Command::WorkComplete { handle, data } => work_done(server, &handle, Some(data)).await,
        Command::WorkFail { handle } => work_done(server, &handle, None).await,
        Command::AllYours => {
            all_yours(server, from);
            vec![]
        },
        Command::SubmitJob { priority, background, function, unique, data } => {
            submit_job(server, from, function, unique, data, priority, background).await
        },
        Command::SubmitJobSched { function, unique, data, .. } => {
            // Scheduled submissions are accepted and treated as ordinary
            // LOW-priority jobs rather than held in a delayed-execution
            // structure; see DESIGN.md.
            submit_job(server, from, function, unique, data, Priority::Low, false).await
        },
        Command::SubmitJobEpoch { function, unique, data, .. } => {
            submit_job(server, from, function, unique, data, Priority::Low, false).await
        },
        Command::GetStatus { handle } => get_status(server, from, &handle),
        Command::OptionReq { option } => option_req(server, from, &option),
        Command::EchoReq { data } => vec![Effect::send(from, Response::EchoRes { data })],
    }
}

fn can_do(server: &mut Server, from: ConnectionId, function_name: Bytes, timeout: Option<u32>) {
    let function = server.get_or_create_function(function_name.clone());
    server.functions[function.0].bind_worker(from, timeout);
    server.connections[from.0].registered_functions.insert(function_name, timeout);
}

fn cant_do(server: &mut Server, from: ConnectionId, function_name: &[u8]) {
    server.connections[from.0].registered_functions.remove(function_name);
    if let Some(function) = server.find_function(function_name) {
        server.functions[function.0].unbind_worker(from);
    }
}

fn reset_abilities(server: &mut Server, from: ConnectionId) {
    let names: Vec<Bytes> =
        server.connections[from.0].registered_functions.keys().cloned().collect();
    for name in names {
        cant_do(server, from, &name);
    }
}

/// `ALL_YOURS`, resolved per DESIGN.md: move this connection to
/// the front of the worker-binding list for every function it is bound to,
/// so it is preferred over other workers on the next `take`.
fn all_yours(server: &mut Server, from: ConnectionId) {
    let names: Vec<Bytes> =
        server.connections[from.0].registered_functions.keys().cloned().collect();
    for name in names {
        if let Some(function) = server.find_function(&name) {
            let workers = &mut server.functions[function.0].workers;
            if let Some(pos) = workers.iter().position(|w| w.connection == from) {
                let binding = workers.remove(pos);
                workers.insert(0, binding);
            }
        }
    }
}

/// `PRE_SLEEP`: immediate `NOOP` if work is already available,
/// otherwise mark the connection sleeping.
fn pre_sleep(server: &mut Server, from: ConnectionId) -> Vec<Effect> {
    let has_work = server.connections[from.0]
        .registered_functions
        .keys()
        .filter_map(|name| server.find_function(name))
        .any(|f| server.functions[f.0].job_count() > 0);

    if has_work {
        return vec![Effect::send(from, Response::Noop)];
    }

    let conn = &mut server.connections[from.0];
    conn.sleeping = true;
    conn.noop_queued = false;
    vec![]
}

async fn grab_job(server: &mut Server, from: ConnectionId, uniq: bool) -> Vec<Effect> {
    server.connections[from.0].sleeping = false;
    server.connections[from.0].noop_queued = false;

    match server.take(from).await {
        None => vec![Effect::send(from, Response::NoJob)],
        Some(id) => {
            let job = &server.jobs[id.0];
            let function_name = server.functions[job.function.0].name.clone();
            let resp = if uniq {
                Response::JobAssignUniq {
                    handle: job.handle.clone(),
                    function: function_name,
                    unique: job.unique.clone(),
                    data: job.data.clone(),
                }
            } else {
                Response::JobAssign {
                    handle: job.handle.clone(),
                    function: function_name,
                    data: job.data.clone(),
                }
            };
            vec![Effect::send(from, resp)]
        },
    }
}

fn work_status(server: &mut Server, handle: &[u8], numerator: u32, denominator: u32) -> Vec<Effect> {
    let Some(id) = server.find_by_handle(handle) else { return vec![] };
    let job = &mut server.jobs[id.0];
    job.progress = crate::types::job::Progress { numerator, denominator };
    let subscribers = job.subscribers.clone();
    let handle = job.handle.clone();

    subscribers
        .into_iter()
        .map(|to| Effect::send(to, Response::WorkStatus { handle: handle.clone(), numerator, denominator }))
        .collect()
}

/// Forwards a WORK_DATA/WORK_WARNING/WORK_EXCEPTION update to every
/// subscriber (exceptions only to those with `receives_exceptions` set).
fn forward_work(server: &Server, handle: &[u8], resp: Response, exception_only: bool) -> Vec<Effect> {
    let Some(id) = server.find_by_handle(handle) else { return vec![] };
    let job = &server.jobs[id.0];
    job.subscribers
        .iter()
        .copied()
        .filter(|&to| !exception_only || server.connections[to.0].receives_exceptions)
        .map(|to| Effect::send(to, resp.clone()))
        .collect()
}

/// WORK_COMPLETE/WORK_FAIL: forward to subscribers, detach from the worker,
/// call `queue.done`, and free the job.
async fn work_done(server: &mut Server, handle: &[u8], data: Option<Bytes>) -> Vec<Effect> {
    let Some(id) = server.find_by_handle(handle) else { return vec![] };
    let job = &server.jobs[id.0];
    let subscribers = job.subscribers.clone();
    let function = job.function;
    let handle = job.handle.clone();

    let effects: Vec<Effect> = subscribers
        .into_iter()
        .map(|to| {
            let resp = match &data {
                Some(data) => Response::WorkComplete { handle: handle.clone(), data: data.clone() },
                None => Response::WorkFail { handle: handle.clone() },
            };
            Effect::send(to, resp)
        })
        .collect();

    if server.functions[function.0].running > 0 {
        server.functions[function.0].running -= 1;
    }
    server.free_job(id).await;
    effects
}

async fn submit_job(
    server: &mut Server,
    from: ConnectionId,
    function: Bytes,
    unique: Bytes,
    data: Bytes,
    priority: Priority,
    background: bool,
) -> Vec<Effect> {
    let subscriber = if background { None } else { Some(from) };
    match server.add_job(function, unique, data, priority, !background, subscriber).await {
        AddOutcome::Created { handle, effects, .. } => {
            let mut out = vec![Effect::send(from, Response::JobCreated { handle })];
            out.extend(effects);
            out
        },
        AddOutcome::Dedup { handle, .. } => {
            vec![Effect::send(from, Response::JobCreated { handle })]
        },
        AddOutcome::QueueFull => {
            vec![Effect::send(from, Response::Error { code: "job_queue_full", text: Bytes::from_static(b"JOB_QUEUE_FULL") })]
        },
        AddOutcome::QueueError(error) => {
            tracing::warn!(%error, "queue backend rejected submission");
            vec![Effect::send(from, Response::Error { code: "queue_error", text: Bytes::from_static(b"QUEUE_ERROR") })]
        },
    }
}

fn get_status(server: &Server, from: ConnectionId, handle: &[u8]) -> Vec<Effect> {
    let resp = match server.find_by_handle(handle) {
        None => Response::StatusRes {
            handle: Bytes::copy_from_slice(handle),
            known: false,
            running: false,
            numerator: 0,
            denominator: 0,
        },
        Some(id) => {
            let job = &server.jobs[id.0];
            Response::StatusRes {
                handle: job.handle.clone(),
                known: true,
                running: job.is_running(),
                numerator: job.progress.numerator,
                denominator: job.progress.denominator,
            }
        },
    };
    vec![Effect::send(from, resp)]
}

fn option_req(server: &mut Server, from: ConnectionId, option: &[u8]) -> Vec<Effect> {
    if option == b"exceptions" {
        server.connections[from.0].receives_exceptions = true;
        vec![Effect::send(from, Response::OptionRes { option: Bytes::copy_from_slice(option) })]
    } else {
        vec![Effect::send(from, Response::Error { code: "unknown_option", text: Bytes::from_static(b"UNKNOWN_OPTION") })]
    }
}

/// Disconnection cleanup: release every function binding and job
/// subscription the connection held, then free its arena slot.
pub async fn disconnect(server: &mut Server, id: ConnectionId) {
    let registered: Vec<Bytes> =
        server.connections[id.0].registered_functions.keys().cloned().collect();
    for name in registered {
        cant_do(server, id, &name);
    }

    let subscribed: Vec<_> = server.connections[id.0].subscribed_jobs.clone();
    for job_id in subscribed {
        if !server.jobs.contains(job_id.0) {
            continue;
        }
        let job = &mut server.jobs[job_id.0];
        job.subscribers.retain(|&s| s != id);
        if job.subscribers.is_empty() && job.worker.is_none() {
            job.ignore = true;
        }
    }

    if server.connections.contains(id.0) {
        server.connections.remove(id.0);
    }
}
