//! Proctoring session integrity orchestration
//!
//! Consumes already-extracted perception signals for live assessment
//! sessions, decides per tick whether a session stays compliant, warrants
//! a warning or must be terminated, and produces compliance reports.
//!
//! # Modules
//! - `signal`: per-tick perception input
//! - `classifier`: signal + rolling window into severity-tagged findings
//! - `violation`: cumulative fullscreen-exit accounting
//! - `session`: per-session state machine
//! - `report`: compliance report aggregation
//! - `registry`: one actor per session behind a process-wide registry

pub mod classifier;
pub mod config;
pub mod error;
pub mod finding;
pub mod registry;
pub mod report;
pub mod session;
pub mod signal;
pub mod violation;

#[cfg(test)]
mod tests_proptest;

pub use classifier::{ActivityClassifier, Classification};
pub use config::{
    ClassifierConfig, ConfigError, ProctorConfig, RegistryConfig, ReportConfig, SessionConfig,
    ViolationConfig,
};
pub use error::{ProctorError, ProctorResult};
pub use finding::{FindingType, Severity, SuspiciousFinding};
pub use registry::{MetricsSnapshot, RegistryMetrics, SessionListing, SessionRegistry};
pub use report::{ComplianceReport, ComplianceReportBuilder};
pub use session::{
    FullscreenStatus, HistoryEntry, IngestOutcome, ProctoringAction, ProctoringSession,
    SessionState, SessionStateMachine, SessionStatus, TerminationReason, TerminationResult,
};
pub use signal::{GazeDirection, PerceptionSignal};
pub use violation::ViolationTracker;
