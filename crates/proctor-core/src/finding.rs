//! Severity-tagged findings derived from perception signals.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FindingType {
    MultipleFaces,
    NoFace,
    SuspiciousMovement,
    UnauthorizedMaterials,
    ScreenAnomaly,
    ExcessiveFullscreenViolations,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// A derived observation about one tick. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuspiciousFinding {
    #[serde(rename = "type")]
    pub finding_type: FindingType,
    pub severity: Severity,
    #[serde(rename = "timestamp")]
    pub timestamp_us: i64,
    pub detail: String,
}

impl SuspiciousFinding {
    pub fn new<S: Into<String>>(
        finding_type: FindingType,
        severity: Severity,
        timestamp_us: i64,
        detail: S,
    ) -> Self {
        Self {
            finding_type,
            severity,
            timestamp_us,
            detail: detail.into(),
        }
    }

    pub fn is_high(&self) -> bool {
        self.severity == Severity::High
    }

    /// HIGH and MEDIUM findings are carried into the compliance report.
    pub fn is_reportable(&self) -> bool {
        self.severity >= Severity::Medium
    }
}
