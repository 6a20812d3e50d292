//! Cumulative violation accounting
//!
//! Fullscreen exits are a strict count: no decay, no reset. Once incurred
//! a violation stays on the session for its whole lifetime.

#[derive(Debug, Clone, Default)]
pub struct ViolationTracker {
    fullscreen_violations: u32,
}

impl ViolationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one observed exit-from-fullscreen tick and return the new count.
    pub fn record_fullscreen_exit(&mut self) -> u32 {
        self.fullscreen_violations = self.fullscreen_violations.saturating_add(1);
        self.fullscreen_violations
    }

    pub fn exceeds_max(&self, max: u32) -> bool {
        self.fullscreen_violations >= max
    }

    pub fn fullscreen_violations(&self) -> u32 {
        self.fullscreen_violations
    }
}
