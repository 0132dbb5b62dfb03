//! The per-server message pump.
//!
//! Each server runs exactly one pump task. The pump owns the boxed behavior
//! and services the inbox strictly serially; a graceful `Stop` takes effect
//! after the in-flight handler completes, while `Kill` cancels the handler
//! future outright.

// Layer 1: Standard library imports
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

// Layer 2: Third-party crate imports
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

// Layer 3: Internal module imports
use super::behavior::{Behavior, ExitReason};
use super::error::ServerError;
use super::mailbox::{ControlSignal, ServerMessage, ServerShared, ServerStatus};
use crate::events::{EventPublisher, LifecycleEventKind};
use crate::system::runtime::RuntimeInner;

/// How the pump loop ended.
enum Exit {
    /// Deliberate stop (graceful or kill) or inbox closure.
    Stopped {
        reason: ExitReason,
        done: Option<oneshot::Sender<()>>,
    },
    /// A cast handler failed.
    Crashed { cause: String },
}

/// Outcome of processing one queued message.
enum Step {
    Continue,
    Killed {
        reason: ExitReason,
        done: oneshot::Sender<()>,
    },
    Crashed {
        cause: String,
    },
}

pub(crate) async fn run_server(
    mut behavior: Box<dyn Behavior>,
    shared: Arc<ServerShared>,
    mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
    mut control: mpsc::UnboundedReceiver<ControlSignal>,
    events: EventPublisher,
    runtime: Weak<RuntimeInner>,
) {
    let mut pending_stop: Option<(ExitReason, oneshot::Sender<()>)> = None;
    let mut control_open = true;

    let exit = loop {
        // A graceful stop observed mid-handler takes effect here, after the
        // handler completed but before the next message is dequeued.
        if let Some((reason, done)) = pending_stop.take() {
            break Exit::Stopped {
                reason,
                done: Some(done),
            };
        }

        tokio::select! {
            biased;
            sig = control.recv(), if control_open => match sig {
                Some(ControlSignal::Stop { reason, done })
                | Some(ControlSignal::Kill { reason, done }) => {
                    break Exit::Stopped { reason, done: Some(done) };
                }
                None => control_open = false,
            },
            item = inbox.recv() => match item {
                Some(msg) => {
                    shared.queue_len.fetch_sub(1, Ordering::Relaxed);
                    match process(
                        &mut behavior,
                        msg,
                        &shared,
                        &mut control,
                        &mut control_open,
                        &mut pending_stop,
                    )
                    .await
                    {
                        Step::Continue => {
                            shared.processed.fetch_add(1, Ordering::Relaxed);
                            shared
                                .state_size
                                .store(behavior.state_size(), Ordering::Relaxed);
                        }
                        Step::Killed { reason, done } => {
                            break Exit::Stopped { reason, done: Some(done) };
                        }
                        Step::Crashed { cause } => break Exit::Crashed { cause },
                    }
                }
                // All senders gone: the runtime entry was dropped.
                None => break Exit::Stopped { reason: ExitReason::Normal, done: None },
            },
        }
    };

    teardown(behavior, shared, inbox, events, runtime, exit).await;
}

/// Process one message, watching the control channel for `Kill`.
///
/// A `Stop` received while the handler is in flight is stashed in
/// `pending_stop`; the handler is never interrupted by a graceful stop.
async fn process(
    behavior: &mut Box<dyn Behavior>,
    msg: ServerMessage,
    shared: &Arc<ServerShared>,
    control: &mut mpsc::UnboundedReceiver<ControlSignal>,
    control_open: &mut bool,
    pending_stop: &mut Option<(ExitReason, oneshot::Sender<()>)>,
) -> Step {
    match msg {
        ServerMessage::Call { payload, reply } => {
            let fut = behavior.handle_call(payload);
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    biased;
                    sig = control.recv(), if *control_open => match sig {
                        Some(ControlSignal::Kill { reason, done }) => {
                            return Step::Killed { reason, done };
                        }
                        Some(ControlSignal::Stop { reason, done }) => {
                            *pending_stop = Some((reason, done));
                        }
                        None => *control_open = false,
                    },
                    outcome = &mut fut => {
                        match outcome {
                            Ok(value) => {
                                // The caller may have timed out; the dropped
                                // receiver just discards the reply.
                                let _ = reply.send(Ok(value));
                            }
                            Err(source) => {
                                let _ = reply.send(Err(ServerError::Handler {
                                    server_id: shared.id.clone(),
                                    source,
                                }));
                            }
                        }
                        return Step::Continue;
                    }
                }
            }
        }
        ServerMessage::Cast { payload } => {
            let fut = behavior.handle_cast(payload);
            tokio::pin!(fut);
            loop {
                tokio::select! {
                    biased;
                    sig = control.recv(), if *control_open => match sig {
                        Some(ControlSignal::Kill { reason, done }) => {
                            return Step::Killed { reason, done };
                        }
                        Some(ControlSignal::Stop { reason, done }) => {
                            *pending_stop = Some((reason, done));
                        }
                        None => *control_open = false,
                    },
                    outcome = &mut fut => {
                        return match outcome {
                            Ok(()) => Step::Continue,
                            Err(err) => Step::Crashed { cause: err.message },
                        };
                    }
                }
            }
        }
    }
}

/// Drain the queue, run the terminate hook, publish the final event, and
/// scrub the server from the runtime.
async fn teardown(
    mut behavior: Box<dyn Behavior>,
    shared: Arc<ServerShared>,
    mut inbox: mpsc::UnboundedReceiver<ServerMessage>,
    events: EventPublisher,
    runtime: Weak<RuntimeInner>,
    exit: Exit,
) {
    *shared.status.write() = ServerStatus::Stopping;

    inbox.close();
    while let Ok(msg) = inbox.try_recv() {
        shared.queue_len.fetch_sub(1, Ordering::Relaxed);
        if let ServerMessage::Call { reply, .. } = msg {
            let _ = reply.send(Err(ServerError::NotRunning {
                server_id: shared.id.clone(),
            }));
        }
    }

    let (reason, crash_cause, done) = match exit {
        Exit::Stopped { reason, done } => (reason, None, done),
        Exit::Crashed { cause } => (ExitReason::Error(cause.clone()), Some(cause), None),
    };

    if let Err(err) = behavior.terminate(&reason).await {
        warn!(server_id = %shared.id, error = %err, "terminate hook failed");
    }

    *shared.status.write() = ServerStatus::Stopped;

    // Remove the entry (and any registrations) before publishing, so that
    // observers of the event already see the server as gone.
    if let Some(rt) = runtime.upgrade() {
        rt.remove_server(&shared.id);
    }

    match crash_cause {
        Some(cause) => {
            warn!(server_id = %shared.id, reason = %cause, "server crashed");
            events.publish(LifecycleEventKind::Crashed {
                server_id: shared.id.clone(),
                name: shared.name.clone(),
                reason: cause,
            });
        }
        None => {
            debug!(server_id = %shared.id, reason = %reason, "server terminated");
            events.publish(LifecycleEventKind::Terminated {
                server_id: shared.id.clone(),
                name: shared.name.clone(),
                reason,
            });
        }
    }

    if let Some(done) = done {
        let _ = done.send(());
    }
}
