//! Activity Classification
//!
//! Fuses the current tick with a short rolling window of previous ticks
//! into severity-tagged findings. Every applicable rule fires; there is no
//! first-match short circuit. Rules, in evaluation order:
//! - Multiple faces (HIGH)
//! - No face (MEDIUM)
//! - Head movement across the window (MEDIUM, or HIGH above the high threshold)
//! - Objects outside the allow-list (HIGH)
//! - Screen anomalies (MEDIUM)
//!
//! Any HIGH finding requires immediate termination of the session.

use crate::config::ClassifierConfig;
use crate::finding::{FindingType, Severity, SuspiciousFinding};
use crate::signal::PerceptionSignal;

/// Classifier output for one tick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    pub findings: Vec<SuspiciousFinding>,
    pub immediate_termination_required: bool,
}

impl Classification {
    fn from_findings(findings: Vec<SuspiciousFinding>) -> Self {
        let immediate_termination_required = findings.iter().any(SuspiciousFinding::is_high);
        Self {
            findings,
            immediate_termination_required,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ActivityClassifier {
    config: ClassifierConfig,
}

impl ActivityClassifier {
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self { config }
    }

    /// Number of previous ticks the classifier looks at
    pub fn history_window(&self) -> usize {
        self.config.history_window
    }

    /// Classify one tick. `recent` is ordered oldest first; only its last
    /// `history_window` entries are considered.
    pub fn classify<'a, I>(&self, signal: &PerceptionSignal, recent: I) -> Classification
    where
        I: IntoIterator<Item = &'a PerceptionSignal>,
    {
        let ts = signal.timestamp_us;
        let mut findings = Vec::new();

        if signal.face_count > 1 {
            findings.push(SuspiciousFinding::new(
                FindingType::MultipleFaces,
                Severity::High,
                ts,
                format!("{} faces detected", signal.face_count),
            ));
        } else if signal.face_count == 0 {
            findings.push(SuspiciousFinding::new(
                FindingType::NoFace,
                Severity::Medium,
                ts,
                "no face detected",
            ));
        }

        let recent: Vec<&PerceptionSignal> = recent.into_iter().collect();
        let skip = recent.len().saturating_sub(self.config.history_window);
        if let Some(magnitude) = movement_magnitude(&recent[skip..], signal) {
            if magnitude > self.config.movement_threshold {
                let severity = if magnitude > self.config.high_movement_threshold {
                    Severity::High
                } else {
                    Severity::Medium
                };
                findings.push(SuspiciousFinding::new(
                    FindingType::SuspiciousMovement,
                    severity,
                    ts,
                    format!("movement magnitude {magnitude:.3}"),
                ));
            }
        }

        let unauthorized: Vec<&str> = signal
            .detected_objects
            .iter()
            .filter(|tag| !self.config.allowed_objects.contains(*tag))
            .map(String::as_str)
            .collect();
        if !unauthorized.is_empty() {
            findings.push(SuspiciousFinding::new(
                FindingType::UnauthorizedMaterials,
                Severity::High,
                ts,
                format!("unauthorized materials: {}", unauthorized.join(", ")),
            ));
        }

        if !signal.screen_anomalies.is_empty() {
            let tags: Vec<&str> = signal.screen_anomalies.iter().map(String::as_str).collect();
            findings.push(SuspiciousFinding::new(
                FindingType::ScreenAnomaly,
                Severity::Medium,
                ts,
                format!("screen anomalies: {}", tags.join(", ")),
            ));
        }

        Classification::from_findings(findings)
    }
}

/// Mean per-step head displacement over `window ++ [current]`.
///
/// Each step contributes the mean absolute coordinate delta between two
/// consecutive positions. Steps where either tick lacks a position are
/// skipped; `None` when no step has both.
fn movement_magnitude(window: &[&PerceptionSignal], current: &PerceptionSignal) -> Option<f32> {
    let positions: Vec<Option<[f32; 2]>> = window
        .iter()
        .map(|s| s.head_position)
        .chain(std::iter::once(current.head_position))
        .collect();

    let steps: Vec<f32> = positions
        .windows(2)
        .filter_map(|pair| match (pair[0], pair[1]) {
            (Some([x0, y0]), Some([x1, y1])) => Some(((x1 - x0).abs() + (y1 - y0).abs()) / 2.0),
            _ => None,
        })
        .collect();

    if steps.is_empty() {
        None
    } else {
        Some(steps.iter().sum::<f32>() / steps.len() as f32)
    }
}
