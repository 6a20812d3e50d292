//! Compliance reporting
//!
//! Pure aggregation over a session's history. Percentages are 0-100, the
//! posture average and compliance score are 0-1.

use serde::{Deserialize, Serialize};

use crate::config::ReportConfig;
use crate::finding::{Severity, SuspiciousFinding};
use crate::session::{ProctoringSession, SessionState, TerminationReason};

const FOCUS_WEIGHT: f32 = 0.6;
const POSTURE_WEIGHT: f32 = 0.4;

pub const RECOMMEND_FOCUS: &str = "Maintain screen focus throughout the assessment";
pub const RECOMMEND_POSTURE: &str = "Improve posture: sit upright facing the camera";
pub const RECOMMEND_FACE_VISIBLE: &str = "Keep your face visible to the camera at all times";
pub const RECOMMEND_REVIEW: &str = "Review high-severity findings before accepting this session";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub session_id: String,
    pub face_detected_percentage: f32,
    pub looking_at_screen_percentage: f32,
    pub average_posture_score: f32,
    /// All HIGH and MEDIUM findings, in history order
    pub findings: Vec<SuspiciousFinding>,
    pub compliance_score: f32,
    pub termination_reason: Option<TerminationReason>,
    pub recommendations: Vec<String>,
    /// False for a partial report of a still-running session
    pub is_final: bool,
    pub total_ticks: usize,
    pub fullscreen_violations: u32,
    #[serde(rename = "generatedAt")]
    pub generated_at_us: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ComplianceReportBuilder {
    config: ReportConfig,
}

impl ComplianceReportBuilder {
    pub fn new() -> Self {
        Self::with_config(ReportConfig::default())
    }

    pub fn with_config(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, session: &ProctoringSession, generated_at_us: i64) -> ComplianceReport {
        let mut total_ticks = 0usize;
        let mut face_ticks = 0usize;
        let mut looking_ticks = 0usize;
        let mut posture_sum = 0.0f64;

        for signal in session.signals() {
            total_ticks += 1;
            if signal.face_count >= 1 {
                face_ticks += 1;
            }
            if signal.looking_at_screen {
                looking_ticks += 1;
            }
            posture_sum += signal.posture_score as f64;
        }

        let face_detected_percentage = percentage(face_ticks, total_ticks);
        let looking_at_screen_percentage = percentage(looking_ticks, total_ticks);
        let average_posture_score = if total_ticks > 0 {
            (posture_sum / total_ticks as f64) as f32
        } else {
            0.0
        };

        let compliance_score = (FOCUS_WEIGHT * looking_at_screen_percentage / 100.0
            + POSTURE_WEIGHT * average_posture_score)
            .clamp(0.0, 1.0);

        let findings: Vec<SuspiciousFinding> = session
            .findings()
            .filter(|f| f.is_reportable())
            .cloned()
            .collect();

        let recommendations = self.recommendations(
            total_ticks,
            face_detected_percentage,
            looking_at_screen_percentage,
            average_posture_score,
            &findings,
        );

        ComplianceReport {
            session_id: session.id.clone(),
            face_detected_percentage,
            looking_at_screen_percentage,
            average_posture_score,
            findings,
            compliance_score,
            termination_reason: session.termination_reason,
            recommendations,
            is_final: session.state == SessionState::Terminated,
            total_ticks,
            fullscreen_violations: session.fullscreen_violation_count,
            generated_at_us,
        }
    }

    /// Ordered: focus, posture, face visibility, review.
    fn recommendations(
        &self,
        total_ticks: usize,
        face_pct: f32,
        looking_pct: f32,
        posture: f32,
        findings: &[SuspiciousFinding],
    ) -> Vec<String> {
        let mut out = Vec::new();

        // Attention thresholds are meaningless without observed ticks.
        if total_ticks > 0 {
            if looking_pct < self.config.focus_threshold_pct {
                out.push(RECOMMEND_FOCUS.to_string());
            }
            if posture < self.config.posture_threshold {
                out.push(RECOMMEND_POSTURE.to_string());
            }
            if face_pct < self.config.face_visibility_threshold_pct {
                out.push(RECOMMEND_FACE_VISIBLE.to_string());
            }
        }
        if findings.iter().any(|f| f.severity == Severity::High) {
            out.push(RECOMMEND_REVIEW.to_string());
        }

        out
    }
}

fn percentage(count: usize, total: usize) -> f32 {
    if total == 0 {
        0.0
    } else {
        (count as f64 / total as f64 * 100.0) as f32
    }
}
