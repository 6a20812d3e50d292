use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Upper bound for every duration setting (one year)
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProctorConfig {
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub violations: ViolationConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Number of previous signals handed to the classifier
    pub history_window: usize,
    /// Movement magnitude above which a tick is suspicious
    pub movement_threshold: f32,
    /// Movement magnitude above which the finding is HIGH
    pub high_movement_threshold: f32,
    /// Object tags that never count as unauthorized materials
    pub allowed_objects: BTreeSet<String>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            history_window: 2,
            movement_threshold: 0.1,
            high_movement_threshold: 0.2,
            allowed_objects: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViolationConfig {
    /// Fullscreen exits tolerated before forced termination
    pub max_fullscreen_violations: u32,
}

impl Default for ViolationConfig {
    fn default() -> Self {
        Self {
            max_fullscreen_violations: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Terminate with SESSION_TIMEOUT after this long without a signal
    pub idle_timeout_secs: u64,
    /// Capacity of each session actor's command queue
    pub command_buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 3_600,
            command_buffer: 64,
        }
    }
}

impl SessionConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// How long a terminated session stays queryable if its report is never retrieved
    pub retention_secs: u64,
    /// Interval between eviction sweeps
    pub reaper_interval_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            retention_secs: 900,
            reaper_interval_secs: 30,
        }
    }
}

impl RegistryConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ReportConfig {
    /// Below this looking-at-screen percentage, recommend screen focus
    pub focus_threshold_pct: f32,
    /// Below this average posture score, recommend better posture
    pub posture_threshold: f32,
    /// Below this face-detected percentage, recommend staying in frame
    pub face_visibility_threshold_pct: f32,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            focus_threshold_pct: 80.0,
            posture_threshold: 0.7,
            face_visibility_threshold_pct: 90.0,
        }
    }
}

impl ProctorConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ProctorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from, in increasing priority: built-in defaults, an optional
    /// TOML file, then `PROCTOR_*` environment variables.
    pub fn load_layered(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = ProctorConfig::default();

        if let Some(path) = path {
            if path.exists() {
                config = Self::from_file(path)?;
            }
        }

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(val) = env_override("PROCTOR_MAX_FULLSCREEN_VIOLATIONS")? {
            self.violations.max_fullscreen_violations = val;
        }
        if let Some(val) = env_override("PROCTOR_IDLE_TIMEOUT_SECS")? {
            self.session.idle_timeout_secs = val;
        }
        if let Some(val) = env_override("PROCTOR_MOVEMENT_THRESHOLD")? {
            self.classifier.movement_threshold = val;
        }
        if let Some(val) = env_override("PROCTOR_HISTORY_WINDOW")? {
            self.classifier.history_window = val;
        }
        if let Some(val) = env_override("PROCTOR_RETENTION_SECS")? {
            self.registry.retention_secs = val;
        }
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.classifier;
        if c.history_window == 0 {
            return Err(ConfigError::Validation(
                "classifier.history_window must be >= 1".to_string(),
            ));
        }
        if !(c.movement_threshold > 0.0) {
            return Err(ConfigError::Validation(
                "classifier.movement_threshold must be positive".to_string(),
            ));
        }
        if !(c.high_movement_threshold >= c.movement_threshold) {
            return Err(ConfigError::Validation(
                "classifier.high_movement_threshold must be >= movement_threshold".to_string(),
            ));
        }

        if self.violations.max_fullscreen_violations == 0 {
            return Err(ConfigError::Validation(
                "violations.max_fullscreen_violations must be >= 1".to_string(),
            ));
        }

        if self.session.idle_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "session.idle_timeout_secs must be > 0".to_string(),
            ));
        }
        if self.session.command_buffer == 0 {
            return Err(ConfigError::Validation(
                "session.command_buffer must be > 0".to_string(),
            ));
        }

        if self.registry.reaper_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "registry.reaper_interval_secs must be > 0".to_string(),
            ));
        }
        if self.registry.retention_secs < self.registry.reaper_interval_secs {
            return Err(ConfigError::Validation(
                "registry.retention_secs must be >= reaper_interval_secs".to_string(),
            ));
        }

        for (name, secs) in [
            ("session.idle_timeout_secs", self.session.idle_timeout_secs),
            ("registry.retention_secs", self.registry.retention_secs),
            ("registry.reaper_interval_secs", self.registry.reaper_interval_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Validation(format!(
                    "{name} must be <= {MAX_DURATION_SECS}"
                )));
            }
        }

        let r = &self.report;
        for (name, pct) in [
            ("report.focus_threshold_pct", r.focus_threshold_pct),
            (
                "report.face_visibility_threshold_pct",
                r.face_visibility_threshold_pct,
            ),
        ] {
            if !(0.0..=100.0).contains(&pct) {
                return Err(ConfigError::Validation(format!("{name} must be in [0, 100]")));
            }
        }
        if !(0.0..=1.0).contains(&r.posture_threshold) {
            return Err(ConfigError::Validation(
                "report.posture_threshold must be in [0, 1]".to_string(),
            ));
        }

        Ok(())
    }

    /// Export configuration to TOML string
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

fn env_override<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(val) => val
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Validation(format!("Invalid {key}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // Process environment is global; tests touching PROCTOR_* take this lock.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_config_valid() {
        let config = ProctorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.violations.max_fullscreen_violations, 3);
        assert_eq!(config.classifier.history_window, 2);
        assert!((config.classifier.movement_threshold - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_config_validation_classifier() {
        let mut config = ProctorConfig::default();
        config.classifier.history_window = 0;
        assert!(config.validate().is_err());

        config.classifier.history_window = 2;
        config.classifier.movement_threshold = 0.3;
        config.classifier.high_movement_threshold = 0.2;
        assert!(config.validate().is_err());

        config.classifier.movement_threshold = f32::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_registry() {
        let mut config = ProctorConfig::default();
        config.registry.reaper_interval_secs = 60;
        config.registry.retention_secs = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_report() {
        let mut config = ProctorConfig::default();
        config.report.focus_threshold_pct = 120.0;
        assert!(config.validate().is_err());

        config.report.focus_threshold_pct = 80.0;
        config.report.posture_threshold = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ProctorConfig::from_toml_str(
            r#"
            [violations]
            max_fullscreen_violations = 5

            [classifier]
            allowed_objects = ["cup"]
            "#,
        )
        .unwrap();
        assert_eq!(config.violations.max_fullscreen_violations, 5);
        assert!(config.classifier.allowed_objects.contains("cup"));
        assert_eq!(config.classifier.history_window, 2);
        assert_eq!(config.session.idle_timeout_secs, 3_600);
    }

    #[test]
    fn test_invalid_toml_rejected() {
        let err = ProctorConfig::from_toml_str("[violations]\nmax_fullscreen_violations = 0\n")
            .unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let err = ProctorConfig::from_toml_str("[violations\n").unwrap_err();
        assert!(matches!(err, ConfigError::TomlParse(_)));
    }

    #[test]
    fn test_config_file_roundtrip() {
        let mut config = ProctorConfig::default();
        config.session.idle_timeout_secs = 120;
        config.classifier.allowed_objects.insert("water_bottle".into());

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(config.to_toml_string().unwrap().as_bytes())
            .unwrap();

        let loaded = ProctorConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_config_validation_duration_bounds() {
        let mut config = ProctorConfig::default();
        config.session.idle_timeout_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        config.session.idle_timeout_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());

        config.registry.reaper_interval_secs = u64::MAX;
        config.registry.retention_secs = u64::MAX;
        assert!(config.validate().is_err());

        config.registry.reaper_interval_secs = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let _guard = ENV_LOCK.lock();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[violations]\nmax_fullscreen_violations = 5\n[session]\nidle_timeout_secs = 600\n")
            .unwrap();

        env::set_var("PROCTOR_MAX_FULLSCREEN_VIOLATIONS", "7");
        env::set_var("PROCTOR_MOVEMENT_THRESHOLD", " 0.15 ");
        let result = ProctorConfig::load_layered(Some(file.path()));
        env::remove_var("PROCTOR_MAX_FULLSCREEN_VIOLATIONS");
        env::remove_var("PROCTOR_MOVEMENT_THRESHOLD");

        let config = result.unwrap();
        assert_eq!(config.violations.max_fullscreen_violations, 7);
        assert!((config.classifier.movement_threshold - 0.15).abs() < 1e-6);
        // file value kept where no override is set
        assert_eq!(config.session.idle_timeout_secs, 600);
    }

    #[test]
    fn test_invalid_env_var_rejected() {
        let _guard = ENV_LOCK.lock();
        env::set_var("PROCTOR_IDLE_TIMEOUT_SECS", "soon");
        let mut config = ProctorConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var("PROCTOR_IDLE_TIMEOUT_SECS");

        assert!(matches!(result, Err(ConfigError::Validation(_))));
        assert_eq!(config.session.idle_timeout_secs, 3_600);
    }

    #[test]
    fn test_env_override_breaking_invariant_rejected() {
        let _guard = ENV_LOCK.lock();
        env::set_var("PROCTOR_HISTORY_WINDOW", "0");
        let result = ProctorConfig::load_layered(None);
        env::remove_var("PROCTOR_HISTORY_WINDOW");
        assert!(matches!(result, Err(ConfigError::Validation(_))));

        env::set_var("PROCTOR_IDLE_TIMEOUT_SECS", &u64::MAX.to_string());
        let result = ProctorConfig::load_layered(None);
        env::remove_var("PROCTOR_IDLE_TIMEOUT_SECS");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_load_layered_missing_file_falls_back_to_defaults() {
        let _guard = ENV_LOCK.lock();
        let config =
            ProctorConfig::load_layered(Some(Path::new("/nonexistent/proctor.toml"))).unwrap();
        assert_eq!(config.registry, RegistryConfig::default());
    }
}
