//! Session Registry
//!
//! Process-wide map from session id to session actor handle. The registry
//! never holds session state: every read or write goes through the owning
//! actor. The map itself is written only by session start and by the
//! eviction sweep, which drops terminated sessions once their final report
//! was retrieved or the retention window has passed.

mod actor;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;

use crate::config::ProctorConfig;
use crate::error::{ProctorError, ProctorResult};
use crate::report::ComplianceReport;
use crate::session::{
    FullscreenStatus, IngestOutcome, SessionState, SessionStateMachine, SessionStatus,
    TerminationReason,
};
use crate::signal::PerceptionSignal;

use actor::{SessionCommand, SessionHandle};

/// How long `list_sessions` waits on any one session actor
const LIST_STATUS_TIMEOUT: Duration = Duration::from_millis(500);

/// Registry counters tracked atomically
#[derive(Debug, Default)]
pub struct RegistryMetrics {
    pub sessions_started: AtomicU64,
    pub sessions_terminated: AtomicU64,
    pub sessions_evicted: AtomicU64,
    pub signals_processed: AtomicU64,
    pub signals_rejected: AtomicU64,
    pub idle_timeouts: AtomicU64,
}

impl RegistryMetrics {
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_terminated: self.sessions_terminated.load(Ordering::Relaxed),
            sessions_evicted: self.sessions_evicted.load(Ordering::Relaxed),
            signals_processed: self.signals_processed.load(Ordering::Relaxed),
            signals_rejected: self.signals_rejected.load(Ordering::Relaxed),
            idle_timeouts: self.idle_timeouts.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub sessions_started: u64,
    pub sessions_terminated: u64,
    pub sessions_evicted: u64,
    pub signals_processed: u64,
    pub signals_rejected: u64,
    pub idle_timeouts: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListing {
    pub sessions: Vec<SessionStatus>,
    pub active_count: usize,
    pub total: usize,
}

struct RegistryInner {
    config: ProctorConfig,
    sessions: RwLock<HashMap<String, SessionHandle>>,
    metrics: Arc<RegistryMetrics>,
}

impl RegistryInner {
    fn evict_expired(&self) -> usize {
        let retention = self.config.registry.retention();
        let mut sessions = self.sessions.write();
        let before = sessions.len();

        sessions.retain(|id, handle| {
            if handle.is_closed() {
                return false;
            }
            let snap = handle.lifecycle();
            let expired = match snap.terminated_at {
                Some(at) => snap.report_retrieved || at.elapsed() >= retention,
                None => false,
            };
            if expired {
                tracing::debug!(session_id = %id, retrieved = snap.report_retrieved, "evicting session");
            }
            !expired
        });

        let evicted = before - sessions.len();
        self.metrics
            .sessions_evicted
            .fetch_add(evicted as u64, Ordering::Relaxed);
        evicted
    }
}

/// Entry point for the capture client and the transport layer.
///
/// Must be created inside a Tokio runtime: session actors and the eviction
/// sweep run as Tokio tasks.
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionRegistry {
    pub fn new(config: ProctorConfig) -> ProctorResult<Self> {
        config.validate()?;

        let inner = Arc::new(RegistryInner {
            config,
            sessions: RwLock::new(HashMap::new()),
            metrics: Arc::new(RegistryMetrics::default()),
        });
        let reaper = tokio::spawn(reap_forever(Arc::downgrade(&inner)));

        Ok(Self {
            inner,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    pub fn config(&self) -> &ProctorConfig {
        &self.inner.config
    }

    /// Start a session under a freshly generated id.
    pub async fn start_session(&self, user_id: &str) -> ProctorResult<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.start_session_with_id(&session_id, user_id).await?;
        Ok(session_id)
    }

    /// Start a session under a caller-chosen id. A terminated session with
    /// the same id is replaced, discarding its history.
    pub async fn start_session_with_id(&self, session_id: &str, user_id: &str) -> ProctorResult<()> {
        let config = &self.inner.config;
        let mut sessions = self.inner.sessions.write();

        if let Some(existing) = sessions.get(session_id) {
            if !existing.is_closed() && existing.lifecycle().state.accepts_signals() {
                return Err(ProctorError::DuplicateSession {
                    session_id: session_id.to_string(),
                });
            }
        }

        let machine = SessionStateMachine::start(session_id, user_id, config);
        let handle = actor::spawn(
            machine,
            config.session.command_buffer,
            config.session.idle_timeout(),
            Arc::clone(&self.inner.metrics),
        );
        sessions.insert(session_id.to_string(), handle);
        self.inner
            .metrics
            .sessions_started
            .fetch_add(1, Ordering::Relaxed);

        tracing::info!(session_id, user_id, "proctoring session started");
        Ok(())
    }

    /// Apply one tick. The returned status is `TERMINATED` if this tick
    /// ended the session; the client must stop sending after that.
    pub async fn push_signal(
        &self,
        session_id: &str,
        signal: PerceptionSignal,
    ) -> ProctorResult<IngestOutcome> {
        self.request(session_id, |reply| SessionCommand::Ingest { signal, reply })
            .await?
    }

    /// Decode a JSON-encoded tick and apply it.
    pub async fn push_signal_json(&self, session_id: &str, json: &str) -> ProctorResult<IngestOutcome> {
        let signal = PerceptionSignal::from_json(json).map_err(|e| {
            self.inner
                .metrics
                .signals_rejected
                .fetch_add(1, Ordering::Relaxed);
            tracing::warn!(session_id, "undecodable signal: {e}");
            e
        })?;
        self.push_signal(session_id, signal).await
    }

    pub async fn check_fullscreen(&self, session_id: &str) -> ProctorResult<FullscreenStatus> {
        self.request(session_id, |reply| SessionCommand::Fullscreen { reply })
            .await
    }

    /// Terminate a session (`USER_ENDED` when no reason is given) and
    /// return its final report. Terminating twice returns the same report.
    pub async fn terminate_session(
        &self,
        session_id: &str,
        reason: Option<TerminationReason>,
    ) -> ProctorResult<ComplianceReport> {
        let reason = reason.unwrap_or(TerminationReason::UserEnded);
        self.request(session_id, |reply| SessionCommand::Terminate { reason, reply })
            .await
    }

    /// Final report of a terminated session, or a partial report of a
    /// running one.
    pub async fn get_report(&self, session_id: &str) -> ProctorResult<ComplianceReport> {
        self.request(session_id, |reply| SessionCommand::Report { reply })
            .await
    }

    pub async fn get_session_status(&self, session_id: &str) -> ProctorResult<SessionStatus> {
        self.request(session_id, |reply| SessionCommand::Status { reply })
            .await
    }

    /// Status of every registered session, queried concurrently. A session
    /// whose actor does not answer within `LIST_STATUS_TIMEOUT` is omitted.
    pub async fn list_sessions(&self) -> SessionListing {
        let handles: Vec<(String, SessionHandle)> = self
            .inner
            .sessions
            .read()
            .iter()
            .map(|(id, h)| (id.clone(), h.clone()))
            .collect();

        let mut pending = JoinSet::new();
        for (id, handle) in handles {
            pending.spawn(async move {
                let status = tokio::time::timeout(
                    LIST_STATUS_TIMEOUT,
                    handle.request(|reply| SessionCommand::Status { reply }),
                )
                .await;
                (id, status)
            });
        }

        let mut sessions = Vec::with_capacity(pending.len());
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((_, Ok(Some(status)))) => sessions.push(status),
                Ok((_, Ok(None))) => {}
                Ok((id, Err(_))) => {
                    tracing::warn!(session_id = %id, "session busy, omitted from listing");
                }
                Err(e) => tracing::warn!("status request task failed: {e}"),
            }
        }
        sessions.sort_by(|a, b| {
            a.started_at_us
                .cmp(&b.started_at_us)
                .then_with(|| a.id.cmp(&b.id))
        });

        let active_count = sessions
            .iter()
            .filter(|s| s.state != SessionState::Terminated)
            .count();
        let total = sessions.len();
        SessionListing {
            sessions,
            active_count,
            total,
        }
    }

    /// Drop terminated sessions whose report was retrieved or whose
    /// retention window has passed. Runs periodically in the background;
    /// returns the number of evicted sessions.
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }

    pub fn session_count(&self) -> usize {
        self.inner.sessions.read().len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Stop the eviction sweep and terminate every open session with
    /// `SYSTEM_SHUTDOWN`, returning their final reports.
    pub async fn shutdown(&self) -> Vec<ComplianceReport> {
        if let Some(reaper) = self.reaper.lock().take() {
            reaper.abort();
        }

        let open: Vec<SessionHandle> = self
            .inner
            .sessions
            .read()
            .values()
            .filter(|h| h.lifecycle().state.accepts_signals())
            .cloned()
            .collect();

        let mut reports = Vec::with_capacity(open.len());
        for handle in open {
            let reason = TerminationReason::SystemShutdown;
            if let Some(report) = handle
                .request(|reply| SessionCommand::Terminate { reason, reply })
                .await
            {
                reports.push(report);
            }
        }
        tracing::info!(terminated = reports.len(), "session registry shut down");
        reports
    }

    async fn request<T>(
        &self,
        session_id: &str,
        make: impl FnOnce(tokio::sync::oneshot::Sender<T>) -> SessionCommand,
    ) -> ProctorResult<T> {
        let handle = self
            .inner
            .sessions
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| ProctorError::not_found(session_id))?;

        match handle.request(make).await {
            Some(reply) => Ok(reply),
            None => {
                tracing::warn!(session_id, "session actor went away mid-request");
                Err(ProctorError::not_found(session_id))
            }
        }
    }
}

impl Drop for SessionRegistry {
    fn drop(&mut self) {
        if let Some(reaper) = self.reaper.get_mut().take() {
            reaper.abort();
        }
    }
}

async fn reap_forever(inner: Weak<RegistryInner>) {
    let period = match inner.upgrade() {
        Some(inner) => inner.config.registry.reaper_interval(),
        None => return,
    };
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        let Some(registry) = inner.upgrade() else {
            break;
        };
        let evicted = registry.evict_expired();
        if evicted > 0 {
            tracing::debug!(evicted, "eviction sweep");
        }
    }
}
