//! Per-session actor
//!
//! Each session runs as its own task that owns its `SessionStateMachine`
//! and drains a bounded command queue one command at a time. The actor
//! publishes a small lifecycle snapshot through a watch channel so the
//! registry can decide on eviction without touching session state.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;

use super::RegistryMetrics;
use crate::error::ProctorResult;
use crate::report::ComplianceReport;
use crate::session::{
    FullscreenStatus, IngestOutcome, SessionState, SessionStateMachine, SessionStatus,
    TerminationReason,
};
use crate::signal::PerceptionSignal;

/// Commands sent to a session actor
pub(crate) enum SessionCommand {
    Ingest {
        signal: PerceptionSignal,
        reply: oneshot::Sender<ProctorResult<IngestOutcome>>,
    },
    Terminate {
        reason: TerminationReason,
        reply: oneshot::Sender<ComplianceReport>,
    },
    Report {
        reply: oneshot::Sender<ComplianceReport>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
    Fullscreen {
        reply: oneshot::Sender<FullscreenStatus>,
    },
}

/// Lifecycle facts the reaper needs
#[derive(Debug, Clone, Copy)]
pub(crate) struct LifecycleSnapshot {
    pub state: SessionState,
    pub terminated_at: Option<Instant>,
    pub report_retrieved: bool,
}

/// Registry-side handle to a running session actor
#[derive(Clone)]
pub(crate) struct SessionHandle {
    tx: mpsc::Sender<SessionCommand>,
    lifecycle: watch::Receiver<LifecycleSnapshot>,
}

impl SessionHandle {
    pub fn lifecycle(&self) -> LifecycleSnapshot {
        *self.lifecycle.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Send a command and wait for the reply. `None` if the actor is gone.
    pub async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(make(reply)).await.ok()?;
        rx.await.ok()
    }
}

pub(crate) fn spawn(
    machine: SessionStateMachine,
    command_buffer: usize,
    idle_timeout: Duration,
    metrics: Arc<RegistryMetrics>,
) -> SessionHandle {
    let (tx, rx) = mpsc::channel(command_buffer);
    let (lifecycle_tx, lifecycle_rx) = watch::channel(LifecycleSnapshot {
        state: machine.state(),
        terminated_at: None,
        report_retrieved: false,
    });

    let actor = SessionActor {
        machine,
        rx,
        lifecycle: lifecycle_tx,
        idle_timeout,
        last_signal_at: Instant::now(),
        metrics,
    };
    tokio::spawn(actor.run());

    SessionHandle {
        tx,
        lifecycle: lifecycle_rx,
    }
}

/// Handle whose queue is never drained, for exercising unresponsive actors.
#[cfg(test)]
pub(crate) fn stalled() -> (SessionHandle, mpsc::Receiver<SessionCommand>) {
    let (tx, rx) = mpsc::channel(1);
    let (_, lifecycle) = watch::channel(LifecycleSnapshot {
        state: SessionState::Active,
        terminated_at: None,
        report_retrieved: false,
    });
    (SessionHandle { tx, lifecycle }, rx)
}

/// Saturates to a far-future deadline instead of overflowing `Instant`.
fn idle_deadline(last_signal_at: Instant, idle_timeout: Duration) -> Instant {
    last_signal_at
        .checked_add(idle_timeout)
        .unwrap_or_else(|| last_signal_at + FAR_FUTURE)
}

// Roughly 30 years
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

struct SessionActor {
    machine: SessionStateMachine,
    rx: mpsc::Receiver<SessionCommand>,
    lifecycle: watch::Sender<LifecycleSnapshot>,
    idle_timeout: Duration,
    last_signal_at: Instant,
    metrics: Arc<RegistryMetrics>,
}

impl SessionActor {
    async fn run(mut self) {
        loop {
            let cmd = if self.machine.state().accepts_signals() {
                let deadline = idle_deadline(self.last_signal_at, self.idle_timeout);
                match tokio::time::timeout_at(deadline, self.rx.recv()).await {
                    Ok(cmd) => cmd,
                    Err(_) => {
                        self.on_idle_timeout();
                        continue;
                    }
                }
            } else {
                self.rx.recv().await
            };

            match cmd {
                Some(cmd) => self.handle(cmd),
                None => break,
            }
        }
        tracing::debug!(session_id = %self.machine.id(), "session actor stopped");
    }

    fn handle(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::Ingest { signal, reply } => {
                let before = self.machine.state();
                let result = self.machine.ingest(signal);
                match &result {
                    Ok(outcome) => {
                        self.last_signal_at = Instant::now();
                        self.metrics.signals_processed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            session_id = %self.machine.id(),
                            action = ?outcome.action,
                            findings = outcome.findings.len(),
                            "tick applied"
                        );
                    }
                    Err(e) => {
                        self.metrics.signals_rejected.fetch_add(1, Ordering::Relaxed);
                        tracing::warn!(
                            session_id = %self.machine.id(),
                            code = e.code(),
                            "signal rejected: {e}"
                        );
                    }
                }
                let after = self.machine.state();
                if after != before {
                    if after == SessionState::Terminated {
                        self.on_terminated();
                    } else {
                        self.lifecycle.send_modify(|snap| snap.state = after);
                    }
                }
                let _ = reply.send(result);
            }
            SessionCommand::Terminate { reason, reply } => {
                let was_open = self.machine.state().accepts_signals();
                let report = self.machine.terminate(reason);
                if was_open {
                    self.on_terminated();
                }
                self.mark_retrieved();
                let _ = reply.send(report);
            }
            SessionCommand::Report { reply } => {
                let report = self.machine.report();
                if report.is_final {
                    self.mark_retrieved();
                }
                let _ = reply.send(report);
            }
            SessionCommand::Status { reply } => {
                let _ = reply.send(self.machine.status());
            }
            SessionCommand::Fullscreen { reply } => {
                let _ = reply.send(self.machine.fullscreen_status());
            }
        }
    }

    fn on_idle_timeout(&mut self) {
        tracing::warn!(
            session_id = %self.machine.id(),
            idle_secs = self.idle_timeout.as_secs(),
            "no signal received, timing out session"
        );
        self.machine.terminate(TerminationReason::SessionTimeout);
        self.metrics.idle_timeouts.fetch_add(1, Ordering::Relaxed);
        self.on_terminated();
    }

    fn on_terminated(&mut self) {
        self.metrics
            .sessions_terminated
            .fetch_add(1, Ordering::Relaxed);
        let state = self.machine.state();
        self.lifecycle.send_modify(|snap| {
            snap.state = state;
            snap.terminated_at = Some(Instant::now());
        });
    }

    fn mark_retrieved(&mut self) {
        self.lifecycle.send_modify(|snap| snap.report_retrieved = true);
    }
}
