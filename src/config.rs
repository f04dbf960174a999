use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub watch_root: PathBuf,
    pub backup_root: PathBuf,
    pub jobs_dir: PathBuf,
    pub job_prefix: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_template: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_template: Option<PathBuf>,
    pub ignore_patterns: Vec<String>,
    pub polling: bool,
    pub poll_interval_secs: u64,
    pub intake_threads: usize,
    pub settle_interval_ms: u64,
    pub appear_timeout_secs: u64,
    pub stabilize_timeout_secs: u64,
    pub dispatch_interval_ms: u64,
    /// Half-open range of path components copied under `backup_root`.
    /// Component 0 is the filesystem root.
    pub backup_segments: [usize; 2],
    pub max_attempts: u32,
    pub retry_base_secs: u64,
    pub retry_max_secs: u64,
    pub stats_csv: PathBuf,
    pub runner: RunnerConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub execution_providers: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            watch_root: PathBuf::from("."),
            backup_root: PathBuf::from("./backup"),
            jobs_dir: PathBuf::from("./.jobs"),
            job_prefix: "ESTHERA".to_string(),
            image_template: None,
            video_template: None,
            ignore_patterns: Vec::new(),
            polling: false,
            poll_interval_secs: 1,
            intake_threads: 4,
            settle_interval_ms: 1000,
            appear_timeout_secs: 300,
            stabilize_timeout_secs: 3600,
            dispatch_interval_ms: 1000,
            backup_segments: [6, 8],
            max_attempts: 5,
            retry_base_secs: 2,
            retry_max_secs: 300,
            stats_csv: PathBuf::from("ff-automate-stats.csv"),
            runner: RunnerConfig::default(),
        }
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            args: vec!["facefusion.py".to_string(), "job-run-all".to_string()],
            working_dir: PathBuf::from("."),
            execution_providers: vec!["cuda".to_string(), "cpu".to_string()],
        }
    }
}

impl AppConfig {
    /// Load `Config.toml` (or `path` when given), then `FF_AUTOMATE_*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
        let file_source = match path {
            Some(path) => ConfigFile::from(path).required(true),
            None => ConfigFile::with_name("Config").required(false),
        };

        let builder = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix("FF_AUTOMATE")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config = builder.try_deserialize::<AppConfig>()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let [start, end] = self.backup_segments;
        if start > end {
            return Err(ConfigError::Message(format!(
                "backup_segments start ({}) must not exceed end ({})",
                start, end
            )));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::Message(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.runner.execution_providers.is_empty() {
            return Err(ConfigError::Message(
                "runner.execution_providers must name at least one provider".to_string(),
            ));
        }
        for pattern in &self.ignore_patterns {
            glob::Pattern::new(pattern).map_err(|e| {
                ConfigError::Message(format!("invalid ignore pattern '{}': {}", pattern, e))
            })?;
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_millis(self.settle_interval_ms)
    }

    pub fn appear_timeout(&self) -> Duration {
        Duration::from_secs(self.appear_timeout_secs)
    }

    pub fn stabilize_timeout(&self) -> Duration {
        Duration::from_secs(self.stabilize_timeout_secs)
    }

    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base: Duration::from_secs(self.retry_base_secs),
            max: Duration::from_secs(self.retry_max_secs),
        }
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Exponential backoff with a ceiling and a quarantine threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` consecutive failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max)
    }

    pub fn exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        AppConfig::default().retry_policy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_until_ceiling() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base: Duration::from_secs(2),
            max: Duration::from_secs(10),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
        assert_eq!(policy.backoff(4), Duration::from_secs(10));
        assert_eq!(policy.backoff(40), Duration::from_secs(10));
    }

    #[test]
    fn test_exhausted_at_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            ..RetryPolicy::default()
        };
        assert!(!policy.exhausted(2));
        assert!(policy.exhausted(3));
    }

    #[test]
    fn test_validate_rejects_inverted_segments() {
        let config = AppConfig {
            backup_segments: [8, 6],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_execution_providers() {
        let mut config = AppConfig::default();
        config.runner.execution_providers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_glob() {
        let config = AppConfig {
            ignore_patterns: vec!["[".to_string()],
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_keeps_defaults_for_missing_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ff.toml");
        std::fs::write(
            &path,
            "watch_root = \"/srv/drop\"\npolling = true\n\n[runner]\nprogram = \"python3\"\n",
        )
        .unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.watch_root, PathBuf::from("/srv/drop"));
        assert!(config.polling);
        assert_eq!(config.runner.program, "python3");
        assert_eq!(config.runner.args, vec!["facefusion.py", "job-run-all"]);
        assert_eq!(config.backup_segments, [6, 8]);
        assert_eq!(config.intake_threads, 4);
    }

    #[test]
    fn test_load_missing_named_file_fails() {
        assert!(AppConfig::load(Some(Path::new("/no/such/ff.toml"))).is_err());
    }

    #[test]
    fn test_default_config_renders_as_toml() {
        let rendered = AppConfig::default().to_toml().unwrap();
        assert!(rendered.contains("job_prefix = \"ESTHERA\""));
        assert!(rendered.contains("[runner]"));
    }
}
