//! Proctoring Session State Machine
//!
//! `PENDING -> ACTIVE -> TERMINATED`. The state machine is the only writer
//! of a session's state. Each tick is either fully applied (counters,
//! findings and history) or fully rejected.
//!
//! Per tick:
//! 1. Fullscreen exit: count it, terminate on overflow
//! 2. Classify against the rolling window, append findings
//! 3. Any HIGH finding: terminate
//! 4. Otherwise append the signal and stay active

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::classifier::ActivityClassifier;
use crate::config::ProctorConfig;
use crate::error::{ProctorError, ProctorResult};
use crate::finding::{FindingType, Severity, SuspiciousFinding};
use crate::report::{ComplianceReport, ComplianceReportBuilder};
use crate::signal::PerceptionSignal;
use crate::violation::ViolationTracker;

pub(crate) fn now_us() -> i64 {
    chrono::Utc::now().timestamp_micros()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Pending,
    Active,
    Terminated,
}

impl SessionState {
    pub fn accepts_signals(&self) -> bool {
        matches!(self, Self::Pending | Self::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    ExcessiveFullscreenViolations,
    MischievousActivityDetected,
    SessionTimeout,
    /// Candidate ended the assessment
    UserEnded,
    /// A human proctor or external checker ended the session
    ProctorIntervention,
    SystemShutdown,
}

/// What the capture client should do after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProctoringAction {
    Continue,
    Warning,
    Terminate,
}

/// Append-only session history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum HistoryEntry {
    Signal(PerceptionSignal),
    Finding(SuspiciousFinding),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProctoringSession {
    pub id: String,
    pub user_id: String,
    pub state: SessionState,
    #[serde(rename = "startedAt")]
    pub started_at_us: i64,
    #[serde(rename = "endedAt")]
    pub ended_at_us: Option<i64>,
    pub termination_reason: Option<TerminationReason>,
    pub fullscreen_violation_count: u32,
    pub history: Vec<HistoryEntry>,
}

impl ProctoringSession {
    pub fn signals(&self) -> impl Iterator<Item = &PerceptionSignal> {
        self.history.iter().filter_map(|entry| match entry {
            HistoryEntry::Signal(signal) => Some(signal),
            HistoryEntry::Finding(_) => None,
        })
    }

    pub fn findings(&self) -> impl Iterator<Item = &SuspiciousFinding> {
        self.history.iter().filter_map(|entry| match entry {
            HistoryEntry::Finding(finding) => Some(finding),
            HistoryEntry::Signal(_) => None,
        })
    }
}

/// Session snapshot without the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub id: String,
    pub user_id: String,
    pub state: SessionState,
    #[serde(rename = "startedAt")]
    pub started_at_us: i64,
    #[serde(rename = "endedAt")]
    pub ended_at_us: Option<i64>,
    pub termination_reason: Option<TerminationReason>,
    pub fullscreen_violation_count: u32,
    pub history_len: usize,
    pub tick_count: usize,
    pub finding_count: usize,
    pub warning_count: u32,
    #[serde(rename = "lastSignalAt")]
    pub last_signal_at_us: Option<i64>,
    pub last_is_fullscreen: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullscreenStatus {
    pub is_fullscreen: bool,
    pub violations: u32,
    pub max_violations: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationResult {
    pub reason: TerminationReason,
    pub report: ComplianceReport,
}

/// Result of one accepted tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    pub status: SessionState,
    pub action: ProctoringAction,
    pub findings: Vec<SuspiciousFinding>,
    pub termination_result: Option<TerminationResult>,
}

pub struct SessionStateMachine {
    session: ProctoringSession,
    tracker: ViolationTracker,
    classifier: ActivityClassifier,
    report_builder: ComplianceReportBuilder,
    window: VecDeque<PerceptionSignal>,
    max_fullscreen_violations: u32,
    warning_count: u32,
    last_signal_at_us: Option<i64>,
    last_is_fullscreen: bool,
    final_report: Option<ComplianceReport>,
}

impl SessionStateMachine {
    /// Create a fresh session in `PENDING` with an empty history.
    pub fn start(id: impl Into<String>, user_id: impl Into<String>, config: &ProctorConfig) -> Self {
        Self::start_at(id, user_id, config, now_us())
    }

    pub fn start_at(
        id: impl Into<String>,
        user_id: impl Into<String>,
        config: &ProctorConfig,
        started_at_us: i64,
    ) -> Self {
        let classifier = ActivityClassifier::with_config(config.classifier.clone());
        Self {
            session: ProctoringSession {
                id: id.into(),
                user_id: user_id.into(),
                state: SessionState::Pending,
                started_at_us,
                ended_at_us: None,
                termination_reason: None,
                fullscreen_violation_count: 0,
                history: Vec::new(),
            },
            tracker: ViolationTracker::new(),
            window: VecDeque::with_capacity(classifier.history_window() + 1),
            classifier,
            report_builder: ComplianceReportBuilder::with_config(config.report.clone()),
            max_fullscreen_violations: config.violations.max_fullscreen_violations,
            warning_count: 0,
            last_signal_at_us: None,
            last_is_fullscreen: true,
            final_report: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    pub fn session(&self) -> &ProctoringSession {
        &self.session
    }

    /// Apply one tick.
    ///
    /// Rejected with `SessionInactive` once terminated and with
    /// `InvalidSignal` for malformed input; neither touches the session.
    pub fn ingest(&mut self, signal: PerceptionSignal) -> ProctorResult<IngestOutcome> {
        if !self.session.state.accepts_signals() {
            return Err(ProctorError::SessionInactive {
                session_id: self.session.id.clone(),
                state: self.session.state,
            });
        }
        signal.validate()?;

        if self.session.state == SessionState::Pending {
            self.session.state = SessionState::Active;
        }
        self.last_signal_at_us = Some(signal.timestamp_us);
        self.last_is_fullscreen = signal.is_fullscreen;

        if !signal.is_fullscreen {
            let count = self.tracker.record_fullscreen_exit();
            self.session.fullscreen_violation_count = count;
            if self.tracker.exceeds_max(self.max_fullscreen_violations) {
                let finding = SuspiciousFinding::new(
                    FindingType::ExcessiveFullscreenViolations,
                    Severity::High,
                    signal.timestamp_us,
                    format!(
                        "{count} fullscreen exits (max {})",
                        self.max_fullscreen_violations
                    ),
                );
                self.session
                    .history
                    .push(HistoryEntry::Finding(finding.clone()));
                return Ok(self.terminate_with(
                    TerminationReason::ExcessiveFullscreenViolations,
                    vec![finding],
                ));
            }
        }

        let classification = self.classifier.classify(&signal, self.window.iter());
        self.session.history.extend(
            classification
                .findings
                .iter()
                .cloned()
                .map(HistoryEntry::Finding),
        );

        if classification.immediate_termination_required {
            return Ok(self.terminate_with(
                TerminationReason::MischievousActivityDetected,
                classification.findings,
            ));
        }

        self.window.push_back(signal.clone());
        while self.window.len() > self.classifier.history_window() {
            self.window.pop_front();
        }
        self.session.history.push(HistoryEntry::Signal(signal));

        let action = if classification.findings.is_empty() {
            ProctoringAction::Continue
        } else {
            self.warning_count += 1;
            ProctoringAction::Warning
        };

        Ok(IngestOutcome {
            status: self.session.state,
            action,
            findings: classification.findings,
            termination_result: None,
        })
    }

    /// Terminate the session and return its final report.
    ///
    /// Idempotent: on an already terminated session the reason is left
    /// unchanged and the existing final report is returned.
    pub fn terminate(&mut self, reason: TerminationReason) -> ComplianceReport {
        self.terminate_at(reason, now_us())
    }

    pub fn terminate_at(&mut self, reason: TerminationReason, ended_at_us: i64) -> ComplianceReport {
        if let Some(report) = &self.final_report {
            return report.clone();
        }

        self.session.state = SessionState::Terminated;
        self.session.ended_at_us = Some(ended_at_us);
        self.session.termination_reason = Some(reason);
        self.window.clear();

        let report = self.report_builder.build(&self.session, ended_at_us);
        self.final_report = Some(report.clone());

        match reason {
            TerminationReason::ExcessiveFullscreenViolations
            | TerminationReason::MischievousActivityDetected => {
                tracing::warn!(
                    session_id = %self.session.id,
                    user_id = %self.session.user_id,
                    ?reason,
                    "session forcibly terminated"
                );
            }
            _ => {
                tracing::info!(
                    session_id = %self.session.id,
                    ?reason,
                    compliance_score = report.compliance_score,
                    "session terminated"
                );
            }
        }

        report
    }

    fn terminate_with(
        &mut self,
        reason: TerminationReason,
        findings: Vec<SuspiciousFinding>,
    ) -> IngestOutcome {
        let report = self.terminate(reason);
        IngestOutcome {
            status: self.session.state,
            action: ProctoringAction::Terminate,
            findings,
            termination_result: Some(TerminationResult { reason, report }),
        }
    }

    /// Final report once terminated, otherwise a partial report that
    /// leaves the session untouched.
    pub fn report(&self) -> ComplianceReport {
        match &self.final_report {
            Some(report) => report.clone(),
            None => self.report_builder.build(&self.session, now_us()),
        }
    }

    pub fn status(&self) -> SessionStatus {
        let s = &self.session;
        let tick_count = s.signals().count();
        SessionStatus {
            id: s.id.clone(),
            user_id: s.user_id.clone(),
            state: s.state,
            started_at_us: s.started_at_us,
            ended_at_us: s.ended_at_us,
            termination_reason: s.termination_reason,
            fullscreen_violation_count: s.fullscreen_violation_count,
            history_len: s.history.len(),
            tick_count,
            finding_count: s.history.len() - tick_count,
            warning_count: self.warning_count,
            last_signal_at_us: self.last_signal_at_us,
            last_is_fullscreen: self.last_is_fullscreen,
        }
    }

    pub fn fullscreen_status(&self) -> FullscreenStatus {
        FullscreenStatus {
            is_fullscreen: self.last_is_fullscreen,
            violations: self.tracker.fullscreen_violations(),
            max_violations: self.max_fullscreen_violations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> SessionStateMachine {
        SessionStateMachine::start_at("s1", "u1", &ProctorConfig::default(), 0)
    }

    #[test]
    fn test_start_is_pending_then_active() {
        let mut m = machine();
        assert_eq!(m.state(), SessionState::Pending);
        assert!(m.session().history.is_empty());

        let outcome = m.ingest(PerceptionSignal::compliant(1)).unwrap();
        assert_eq!(outcome.status, SessionState::Active);
        assert_eq!(outcome.action, ProctoringAction::Continue);
        assert!(outcome.termination_result.is_none());
        assert_eq!(m.state(), SessionState::Active);
    }

    #[test]
    fn test_benign_signals_extend_history() {
        let mut m = machine();
        for ts in 0..5 {
            m.ingest(PerceptionSignal::compliant(ts)).unwrap();
        }
        let status = m.status();
        assert_eq!(status.state, SessionState::Active);
        assert_eq!(status.history_len, 5);
        assert_eq!(status.tick_count, 5);
        assert_eq!(status.finding_count, 0);
        assert_eq!(status.last_signal_at_us, Some(4));
    }

    #[test]
    fn test_multiple_faces_terminates_same_call() {
        let mut m = machine();
        let outcome = m
            .ingest(PerceptionSignal::compliant(1).with_face_count(2))
            .unwrap();
        assert_eq!(outcome.status, SessionState::Terminated);
        assert_eq!(outcome.action, ProctoringAction::Terminate);
        assert_eq!(outcome.findings[0].finding_type, FindingType::MultipleFaces);
        assert_eq!(outcome.findings[0].severity, Severity::High);

        let result = outcome.termination_result.unwrap();
        assert_eq!(result.reason, TerminationReason::MischievousActivityDetected);
        assert!(result.report.is_final);

        // findings recorded, triggering signal is not
        assert_eq!(m.session().findings().count(), 1);
        assert_eq!(m.session().signals().count(), 0);
    }

    #[test]
    fn test_fullscreen_overflow_on_third_exit() {
        let mut m = machine();
        let away = |ts| PerceptionSignal::compliant(ts).with_fullscreen(false);

        let first = m.ingest(away(1)).unwrap();
        assert_eq!(first.status, SessionState::Active);
        assert_eq!(m.fullscreen_status().violations, 1);

        let second = m.ingest(away(2)).unwrap();
        assert_eq!(second.status, SessionState::Active);
        assert_eq!(second.action, ProctoringAction::Continue);

        let third = m.ingest(away(3)).unwrap();
        assert_eq!(third.status, SessionState::Terminated);
        assert_eq!(
            third.termination_result.unwrap().reason,
            TerminationReason::ExcessiveFullscreenViolations
        );
        assert_eq!(
            third.findings[0].finding_type,
            FindingType::ExcessiveFullscreenViolations
        );
        assert_eq!(m.session().fullscreen_violation_count, 3);
        assert!(!m.fullscreen_status().is_fullscreen);
    }

    #[test]
    fn test_fullscreen_exits_do_not_reset() {
        let mut m = machine();
        m.ingest(PerceptionSignal::compliant(1).with_fullscreen(false))
            .unwrap();
        for ts in 2..10 {
            m.ingest(PerceptionSignal::compliant(ts)).unwrap();
        }
        assert_eq!(m.session().fullscreen_violation_count, 1);
        m.ingest(PerceptionSignal::compliant(10).with_fullscreen(false))
            .unwrap();
        assert_eq!(m.session().fullscreen_violation_count, 2);
        assert_eq!(m.state(), SessionState::Active);
    }

    #[test]
    fn test_medium_finding_is_warning() {
        let mut m = machine();
        let outcome = m
            .ingest(PerceptionSignal::compliant(1).with_face_count(0))
            .unwrap();
        assert_eq!(outcome.status, SessionState::Active);
        assert_eq!(outcome.action, ProctoringAction::Warning);
        assert_eq!(outcome.findings.len(), 1);
        // finding then signal
        assert_eq!(m.session().history.len(), 2);
        assert!(matches!(m.session().history[0], HistoryEntry::Finding(_)));
        assert!(matches!(m.session().history[1], HistoryEntry::Signal(_)));
        assert_eq!(m.status().warning_count, 1);
    }

    #[test]
    fn test_rolling_window_detects_movement() {
        let mut m = machine();
        m.ingest(PerceptionSignal::compliant(1).with_head_position(0.5, 0.5))
            .unwrap();
        let outcome = m
            .ingest(PerceptionSignal::compliant(2).with_head_position(0.65, 0.65))
            .unwrap();
        assert_eq!(
            outcome.findings[0].finding_type,
            FindingType::SuspiciousMovement
        );
        assert_eq!(outcome.action, ProctoringAction::Warning);
    }

    #[test]
    fn test_terminated_rejects_signals_without_mutation() {
        let mut m = machine();
        m.ingest(PerceptionSignal::compliant(1)).unwrap();
        m.terminate_at(TerminationReason::UserEnded, 100);
        let history_len = m.session().history.len();

        let err = m.ingest(PerceptionSignal::compliant(2)).unwrap_err();
        assert!(matches!(err, ProctorError::SessionInactive { .. }));
        assert_eq!(m.session().history.len(), history_len);
        assert_eq!(
            m.session().termination_reason,
            Some(TerminationReason::UserEnded)
        );
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let mut m = machine();
        m.ingest(PerceptionSignal::compliant(1)).unwrap();
        let first = m.terminate_at(TerminationReason::UserEnded, 100);
        let second = m.terminate_at(TerminationReason::SessionTimeout, 200);
        assert_eq!(first, second);
        assert_eq!(m.session().ended_at_us, Some(100));
        assert_eq!(
            m.session().termination_reason,
            Some(TerminationReason::UserEnded)
        );
    }

    #[test]
    fn test_invalid_signal_leaves_session_untouched() {
        let mut m = machine();
        let err = m
            .ingest(
                PerceptionSignal::compliant(1)
                    .with_posture(2.0)
                    .with_fullscreen(false),
            )
            .unwrap_err();
        assert!(matches!(err, ProctorError::InvalidSignal(_)));
        assert_eq!(m.state(), SessionState::Pending);
        assert_eq!(m.fullscreen_status().violations, 0);
        assert!(m.session().history.is_empty());
        assert_eq!(m.status().last_signal_at_us, None);
    }

    #[test]
    fn test_partial_report_does_not_mutate() {
        let mut m = machine();
        m.ingest(PerceptionSignal::compliant(1)).unwrap();
        let report = m.report();
        assert!(!report.is_final);
        assert_eq!(report.total_ticks, 1);
        assert_eq!(m.state(), SessionState::Active);
    }

    #[test]
    fn test_history_entry_wire_form() {
        let entry = HistoryEntry::Signal(PerceptionSignal::compliant(3));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "signal");
        assert_eq!(json["value"]["timestamp"], 3);
    }
}
