//! Agent configuration
//!
//! Layered with the `config` crate: serde defaults, then an optional file
//! named by `DPA_CONFIG`, then `DPA_*` environment variables.

use agent_lib::eviction::EvictionConfig;
use agent_lib::gc::{ContainerGcPolicy, ImageGcPolicy};
use agent_lib::models::{ThresholdError, Thresholds};
use agent_lib::pressure::PressureConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an optional configuration file
pub const CONFIG_FILE_ENV: &str = "DPA_CONFIG";

const ENV_PREFIX: &str = "DPA";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid thresholds: {0}")]
    Thresholds(#[from] ThresholdError),
    #[error("interval_secs must be greater than zero")]
    ZeroInterval,
    #[error("disk_source = \"simulated\" requires scenario_path")]
    MissingScenario,
}

/// Where disk usage readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiskSource {
    /// Usage accounted by the simulated node loaded from `scenario_path`
    Simulated,
    /// Usage of the real filesystem holding `disk_path`
    Filesystem,
}

impl DiskSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiskSource::Simulated => "simulated",
            DiskSource::Filesystem => "filesystem",
        }
    }
}

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Seconds between pressure ticks
    #[serde(default = "default_interval")]
    pub interval_secs: u64,

    #[serde(default = "default_high_threshold")]
    pub high_threshold_percent: f64,

    #[serde(default = "default_low_threshold")]
    pub low_threshold_percent: f64,

    #[serde(default)]
    pub min_evictable_age_secs: u64,

    #[serde(default)]
    pub container_min_age_secs: u64,

    #[serde(default = "default_max_per_pod_container")]
    pub max_per_pod_container: Option<usize>,

    #[serde(default)]
    pub max_containers: Option<usize>,

    #[serde(default = "default_termination_grace")]
    pub termination_grace_secs: u64,

    #[serde(default = "default_cycle_window")]
    pub cycle_window_secs: u64,

    #[serde(default = "default_cycle_warning_threshold")]
    pub cycle_warning_threshold: u32,

    #[serde(default)]
    pub evict_tolerating_pods: bool,

    #[serde(default = "default_disk_source")]
    pub disk_source: DiskSource,

    /// Path on the filesystem to watch when `disk_source` is `filesystem`
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,

    /// JSON scenario describing the node's images, pods and dead containers
    #[serde(default)]
    pub scenario_path: Option<PathBuf>,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_interval() -> u64 {
    10
}

fn default_high_threshold() -> f64 {
    agent_lib::models::DEFAULT_HIGH_THRESHOLD_PERCENT
}

fn default_low_threshold() -> f64 {
    agent_lib::models::DEFAULT_LOW_THRESHOLD_PERCENT
}

fn default_max_per_pod_container() -> Option<usize> {
    Some(1)
}

fn default_termination_grace() -> u64 {
    30
}

fn default_cycle_window() -> u64 {
    600
}

fn default_cycle_warning_threshold() -> u32 {
    2
}

fn default_disk_source() -> DiskSource {
    DiskSource::Filesystem
}

fn default_disk_path() -> PathBuf {
    PathBuf::from("/var/lib/containerd")
}

impl AgentConfig {
    /// Load configuration from `DPA_CONFIG` (if set) and the environment
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os(CONFIG_FILE_ENV).map(PathBuf::from);
        Self::load_from(file.as_deref(), ENV_PREFIX)
    }

    /// Load from an optional file and environment variables with `env_prefix`
    pub fn load_from(file: Option<&Path>, env_prefix: &str) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config = builder
            .add_source(
                config::Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let agent: AgentConfig = config.try_deserialize()?;
        agent.validate()?;
        Ok(agent)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds().validate()?;
        if self.interval_secs == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        if self.disk_source == DiskSource::Simulated && self.scenario_path.is_none() {
            return Err(ConfigError::MissingScenario);
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            high_percent: self.high_threshold_percent,
            low_percent: self.low_threshold_percent,
        }
    }

    pub fn pressure_config(&self) -> PressureConfig {
        PressureConfig {
            interval: Duration::from_secs(self.interval_secs),
            thresholds: self.thresholds(),
            image_gc: ImageGcPolicy {
                min_evictable_age: Duration::from_secs(self.min_evictable_age_secs),
            },
            container_gc: ContainerGcPolicy {
                min_age: Duration::from_secs(self.container_min_age_secs),
                max_per_pod_container: self.max_per_pod_container,
                max_containers: self.max_containers,
            },
            eviction: EvictionConfig {
                termination_grace: Duration::from_secs(self.termination_grace_secs),
                evict_tolerating_pods: self.evict_tolerating_pods,
            },
            cycle_window: Duration::from_secs(self.cycle_window_secs),
            cycle_warning_threshold: self.cycle_warning_threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    // env prefix nothing in the test environment uses
    const NO_ENV: &str = "DPA_CONFIG_TEST_UNSET";

    fn toml_file(content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::load_from(None, NO_ENV).unwrap();

        assert_eq!(config.api_port, 8080);
        assert_eq!(config.interval_secs, 10);
        assert_eq!(config.disk_source, DiskSource::Filesystem);

        let pressure = config.pressure_config();
        assert_eq!(pressure.thresholds, Thresholds::default());
        assert_eq!(pressure.image_gc.min_evictable_age, Duration::ZERO);
        assert_eq!(pressure.container_gc.max_per_pod_container, Some(1));
        assert_eq!(pressure.eviction.termination_grace, Duration::from_secs(30));
        assert_eq!(pressure.cycle_window, Duration::from_secs(600));
        assert_eq!(pressure.cycle_warning_threshold, 2);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = toml_file(
            r#"
node_name = "worker-7"
high_threshold_percent = 90.0
low_threshold_percent = 75.0
disk_source = "simulated"
scenario_path = "/etc/dpa/scenario.json"
evict_tolerating_pods = true
"#,
        );

        let config = AgentConfig::load_from(Some(file.path()), NO_ENV).unwrap();

        assert_eq!(config.node_name, "worker-7");
        assert_eq!(config.thresholds().high_percent, 90.0);
        assert_eq!(config.disk_source, DiskSource::Simulated);
        assert!(config.pressure_config().eviction.evict_tolerating_pods);
    }

    #[test]
    fn test_inverted_thresholds_are_rejected() {
        let file = toml_file("high_threshold_percent = 70.0\nlow_threshold_percent = 80.0\n");

        let err = AgentConfig::load_from(Some(file.path()), NO_ENV).unwrap_err();

        assert!(matches!(err, ConfigError::Thresholds(_)));
    }

    #[test]
    fn test_simulated_source_requires_scenario() {
        let file = toml_file("disk_source = \"simulated\"\n");

        let err = AgentConfig::load_from(Some(file.path()), NO_ENV).unwrap_err();

        assert!(matches!(err, ConfigError::MissingScenario));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result = AgentConfig::load_from(Some(Path::new("/nonexistent/dpa.toml")), NO_ENV);

        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
