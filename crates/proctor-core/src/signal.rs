//! Perception signals
//!
//! One `PerceptionSignal` arrives per sampling tick per session, already
//! extracted by the perception pipeline (faces, gaze, posture, objects).
//! This module only defines the value and its validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{ProctorError, ProctorResult};

/// Coarse gaze direction reported by the perception pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GazeDirection {
    Center,
    Left,
    Right,
    Up,
    Down,
    #[default]
    Unknown,
}

/// Perception features for one tick
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerceptionSignal {
    /// Faces detected in frame
    pub face_count: u32,
    pub gaze_direction: GazeDirection,
    pub looking_at_screen: bool,
    /// Posture quality (0-1)
    pub posture_score: f32,
    pub is_fullscreen: bool,
    /// Foreign object tags, e.g. `book`, `electronic_device`
    #[serde(default)]
    pub detected_objects: BTreeSet<String>,
    #[serde(default)]
    pub screen_anomalies: BTreeSet<String>,
    /// Normalized head position in frame, used for movement detection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head_position: Option<[f32; 2]>,
    /// Capture time in microseconds since the Unix epoch
    #[serde(rename = "timestamp")]
    pub timestamp_us: i64,
}

impl PerceptionSignal {
    /// A fully compliant tick: one face, centered gaze, upright, fullscreen.
    pub fn compliant(timestamp_us: i64) -> Self {
        Self {
            face_count: 1,
            gaze_direction: GazeDirection::Center,
            looking_at_screen: true,
            posture_score: 1.0,
            is_fullscreen: true,
            detected_objects: BTreeSet::new(),
            screen_anomalies: BTreeSet::new(),
            head_position: None,
            timestamp_us,
        }
    }

    pub fn with_face_count(mut self, face_count: u32) -> Self {
        self.face_count = face_count;
        self
    }

    pub fn with_gaze(mut self, direction: GazeDirection, looking_at_screen: bool) -> Self {
        self.gaze_direction = direction;
        self.looking_at_screen = looking_at_screen;
        self
    }

    pub fn with_posture(mut self, posture_score: f32) -> Self {
        self.posture_score = posture_score;
        self
    }

    pub fn with_fullscreen(mut self, is_fullscreen: bool) -> Self {
        self.is_fullscreen = is_fullscreen;
        self
    }

    pub fn with_object<S: Into<String>>(mut self, tag: S) -> Self {
        self.detected_objects.insert(tag.into());
        self
    }

    pub fn with_screen_anomaly<S: Into<String>>(mut self, tag: S) -> Self {
        self.screen_anomalies.insert(tag.into());
        self
    }

    pub fn with_head_position(mut self, x: f32, y: f32) -> Self {
        self.head_position = Some([x, y]);
        self
    }

    /// Decode a signal from its JSON wire form and validate it.
    ///
    /// Any decode failure (negative face count, unknown gaze value,
    /// missing field) is reported as `InvalidSignal`.
    pub fn from_json(json: &str) -> ProctorResult<Self> {
        let signal: PerceptionSignal =
            serde_json::from_str(json).map_err(|e| ProctorError::invalid_signal(e.to_string()))?;
        signal.validate()?;
        Ok(signal)
    }

    pub fn validate(&self) -> ProctorResult<()> {
        if !self.posture_score.is_finite() || !(0.0..=1.0).contains(&self.posture_score) {
            return Err(ProctorError::invalid_signal(format!(
                "postureScore must be in [0, 1], got {}",
                self.posture_score
            )));
        }
        if self.timestamp_us < 0 {
            return Err(ProctorError::invalid_signal(format!(
                "timestamp must be non-negative, got {}",
                self.timestamp_us
            )));
        }
        if let Some([x, y]) = self.head_position {
            if !x.is_finite() || !y.is_finite() {
                return Err(ProctorError::invalid_signal(
                    "headPosition must be finite",
                ));
            }
        }
        if self
            .detected_objects
            .iter()
            .chain(self.screen_anomalies.iter())
            .any(|tag| tag.trim().is_empty())
        {
            return Err(ProctorError::invalid_signal("empty tag"));
        }
        Ok(())
    }
}
