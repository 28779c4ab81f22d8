use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::quality::QualityProfile;
use crate::scheduler::TaskSchedule;
use crate::searcher::{RateBudget, RoutingMode, SourceKind};
use crate::slots::Slot;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub searcher: SearcherConfig,
    #[serde(default)]
    pub download_clients: Vec<DownloadClientConfig>,
    #[serde(default)]
    pub quality_profiles: Vec<QualityProfile>,
    #[serde(default)]
    pub slots: Vec<Slot>,
    #[serde(default)]
    pub grab: GrabConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub import: ImportConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    pub fn profile(&self, id: &str) -> Option<&QualityProfile> {
        self.quality_profiles.iter().find(|p| p.id == id)
    }
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("harvester.db")
}

/// Search routing configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SearcherConfig {
    /// Mode used by scheduled searches.
    #[serde(default)]
    pub routing_mode: RoutingMode,
    /// Per-source timeout unless the source overrides it.
    #[serde(default = "default_search_timeout_ms")]
    pub default_timeout_ms: u64,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Default for SearcherConfig {
    fn default() -> Self {
        Self {
            routing_mode: RoutingMode::default(),
            default_timeout_ms: default_search_timeout_ms(),
            sources: Vec::new(),
        }
    }
}

impl SearcherConfig {
    pub fn source(&self, name: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Sources without a configuration entry are treated as enabled.
    pub fn is_enabled(&self, name: &str) -> bool {
        self.source(name).map(|s| s.enabled).unwrap_or(true)
    }

    pub fn rate_budget(&self, name: &str) -> RateBudget {
        self.source(name)
            .map(|s| s.rate_limit.budget())
            .unwrap_or_else(|| RateLimitConfig::default().budget())
    }

    pub fn timeout_for(&self, name: &str) -> Duration {
        let ms = self
            .source(name)
            .and_then(|s| s.timeout_ms)
            .unwrap_or(self.default_timeout_ms);
        Duration::from_millis(ms)
    }
}

fn default_search_timeout_ms() -> u64 {
    30_000
}

/// One release source
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub name: String,
    pub kind: SourceKind,
    #[serde(default)]
    pub backend: SourceBackend,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Jackett-specific configuration (required when backend = "jackett")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jackett: Option<JackettConfig>,
}

/// Available source backends
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceBackend {
    #[default]
    Jackett,
}

/// Jackett (or Jackett-compatible) endpoint
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JackettConfig {
    /// Jackett server URL (e.g., "http://localhost:9117")
    pub url: String,
    /// Jackett API key
    pub api_key: String,
    /// Indexer id; "all" searches every indexer Jackett knows about.
    #[serde(default = "default_indexer")]
    pub indexer: String,
}

fn default_indexer() -> String {
    "all".to_string()
}

/// Requests allowed per fixed window
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn budget(&self) -> RateBudget {
        RateBudget::new(self.max_requests, Duration::from_secs(self.window_secs))
    }
}

fn default_max_requests() -> u32 {
    10
}

fn default_window_secs() -> u64 {
    60
}

/// One download client
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DownloadClientConfig {
    pub name: String,
    #[serde(default)]
    pub backend: DownloadClientBackend,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// qBittorrent-specific configuration (required when backend = "qbittorrent")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qbittorrent: Option<QBittorrentConfig>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DownloadClientBackend {
    #[default]
    Qbittorrent,
}

/// qBittorrent Web API settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QBittorrentConfig {
    /// WebUI URL (e.g., "http://localhost:8080")
    pub url: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default = "default_client_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_client_timeout_secs() -> u64 {
    30
}

/// Grab behaviour
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GrabConfig {
    /// Failed submissions after which autosearch stops trying a slot.
    /// Manual searches ignore this limit; a successful grab resets it.
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: u32,
    /// Client used for grabs. Defaults to the first enabled client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_client: Option<String>,
}

impl Default for GrabConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            download_client: None,
        }
    }
}

fn default_max_failed_attempts() -> u32 {
    3
}

/// Queue tracker polling
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Minimum spacing between two polls, even when triggered.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_client_timeout_ms")]
    pub client_timeout_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            client_timeout_ms: default_client_timeout_ms(),
        }
    }
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_client_timeout_ms() -> u64 {
    10_000
}

/// How completed downloads reach the library
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Copy and leave the download in place for seeding.
    #[default]
    Copy,
    /// Rename into place, falling back to copy + delete across filesystems.
    Move,
}

/// What happens to the file an upgrade replaces
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReplacedFilePolicy {
    #[default]
    Delete,
    Keep,
}

/// Import pipeline
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImportConfig {
    /// Root directory the organizer places files under.
    #[serde(default = "default_library_root")]
    pub library_root: PathBuf,
    #[serde(default)]
    pub transfer_mode: TransferMode,
    #[serde(default)]
    pub replaced_file_policy: ReplacedFilePolicy,
    /// Verify copies with a SHA-256 checksum.
    #[serde(default = "default_true")]
    pub verify_checksum: bool,
    /// Buffer size for copy operations (bytes)
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Extensions considered video files, lowercase without the dot.
    #[serde(default = "default_video_extensions")]
    pub video_extensions: Vec<String>,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            library_root: default_library_root(),
            transfer_mode: TransferMode::default(),
            replaced_file_policy: ReplacedFilePolicy::default(),
            verify_checksum: true,
            buffer_size: default_buffer_size(),
            video_extensions: default_video_extensions(),
        }
    }
}

fn default_library_root() -> PathBuf {
    PathBuf::from("library")
}

fn default_buffer_size() -> usize {
    1024 * 1024
}

fn default_video_extensions() -> Vec<String> {
    ["mkv", "mp4", "avi", "m4v", "ts", "mov", "wmv"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Scheduled tasks
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_autosearch")]
    pub autosearch: TaskSchedule,
    #[serde(default = "default_availability_refresh")]
    pub availability_refresh: TaskSchedule,
    #[serde(default = "default_import_scan")]
    pub import_scan: TaskSchedule,
    #[serde(default = "default_health_check")]
    pub health_check: TaskSchedule,
    /// How long shutdown waits for running tasks before aborting them.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            autosearch: default_autosearch(),
            availability_refresh: default_availability_refresh(),
            import_scan: default_import_scan(),
            health_check: default_health_check(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl SchedulerConfig {
    /// Schedules keyed by task name.
    pub fn tasks(&self) -> [(&'static str, &TaskSchedule); 4] {
        [
            ("autosearch", &self.autosearch),
            ("availability_refresh", &self.availability_refresh),
            ("import_scan", &self.import_scan),
            ("health_check", &self.health_check),
        ]
    }
}

fn default_autosearch() -> TaskSchedule {
    TaskSchedule::every_secs(3600)
}

fn default_availability_refresh() -> TaskSchedule {
    TaskSchedule::every_secs(900)
}

fn default_import_scan() -> TaskSchedule {
    TaskSchedule::every_secs(60)
}

fn default_health_check() -> TaskSchedule {
    TaskSchedule::every_secs(300)
}

fn default_shutdown_grace_ms() -> u64 {
    5_000
}

/// Metrics export
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// Write the Prometheus text exposition here on each health check.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub textfile_path: Option<PathBuf>,
}

/// Logging
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
    /// Default filter directive, overridden by RUST_LOG.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            json: false,
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

/// Sanitized config for logging (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub database: DatabaseConfig,
    pub routing_mode: RoutingMode,
    pub sources: Vec<SanitizedSourceConfig>,
    pub download_clients: Vec<SanitizedDownloadClientConfig>,
    pub quality_profiles: Vec<String>,
    pub slots: Vec<Slot>,
    pub grab: GrabConfig,
    pub queue: QueueConfig,
    pub import: ImportConfig,
    pub scheduler: SchedulerConfig,
}

/// Sanitized source config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedSourceConfig {
    pub name: String,
    pub kind: SourceKind,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub api_key_configured: bool,
    pub max_requests: u32,
    pub window_secs: u64,
}

/// Sanitized download client config (password hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedDownloadClientConfig {
    pub name: String,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub credentials_configured: bool,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            database: config.database.clone(),
            routing_mode: config.searcher.routing_mode,
            sources: config
                .searcher
                .sources
                .iter()
                .map(|s| SanitizedSourceConfig {
                    name: s.name.clone(),
                    kind: s.kind,
                    enabled: s.enabled,
                    url: s.jackett.as_ref().map(|j| j.url.clone()),
                    api_key_configured: s
                        .jackett
                        .as_ref()
                        .map(|j| !j.api_key.is_empty())
                        .unwrap_or(false),
                    max_requests: s.rate_limit.max_requests,
                    window_secs: s.rate_limit.window_secs,
                })
                .collect(),
            download_clients: config
                .download_clients
                .iter()
                .map(|c| SanitizedDownloadClientConfig {
                    name: c.name.clone(),
                    enabled: c.enabled,
                    url: c.qbittorrent.as_ref().map(|q| q.url.clone()),
                    credentials_configured: c
                        .qbittorrent
                        .as_ref()
                        .map(|q| !q.password.is_empty())
                        .unwrap_or(false),
                })
                .collect(),
            quality_profiles: config
                .quality_profiles
                .iter()
                .map(|p| p.id.clone())
                .collect(),
            slots: config.slots.clone(),
            grab: config.grab.clone(),
            queue: config.queue.clone(),
            import: config.import.clone(),
            scheduler: config.scheduler.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.database.path.to_str().unwrap(), "harvester.db");
        assert_eq!(config.searcher.routing_mode, RoutingMode::Direct);
        assert_eq!(config.searcher.default_timeout_ms, 30_000);
        assert_eq!(config.grab.max_failed_attempts, 3);
        assert_eq!(config.queue.poll_interval_ms, 5_000);
        assert_eq!(config.import.transfer_mode, TransferMode::Copy);
        assert_eq!(config.import.replaced_file_policy, ReplacedFilePolicy::Delete);
        assert_eq!(config.scheduler.autosearch.interval_secs, 3600);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_deserialize_sources_and_clients() {
        let toml = r#"
[searcher]
routing_mode = "aggregator"
default_timeout_ms = 5000

[[searcher.sources]]
name = "jackett-all"
kind = "aggregator"
timeout_ms = 12000

[searcher.sources.jackett]
url = "http://localhost:9117"
api_key = "secret"

[searcher.sources.rate_limit]
max_requests = 5
window_secs = 30

[[download_clients]]
name = "qbit"

[download_clients.qbittorrent]
url = "http://localhost:8080"
username = "admin"
password = "adminadmin"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let source = config.searcher.source("jackett-all").unwrap();
        assert_eq!(source.kind, SourceKind::Aggregator);
        assert_eq!(source.backend, SourceBackend::Jackett);
        assert_eq!(source.jackett.as_ref().unwrap().indexer, "all");
        assert_eq!(
            config.searcher.rate_budget("jackett-all"),
            RateBudget::new(5, Duration::from_secs(30))
        );
        assert_eq!(
            config.searcher.timeout_for("jackett-all"),
            Duration::from_millis(12_000)
        );
        assert_eq!(
            config.searcher.timeout_for("unknown"),
            Duration::from_millis(5_000)
        );
        assert!(config.searcher.is_enabled("unknown"));

        let client = &config.download_clients[0];
        assert!(client.enabled);
        assert_eq!(client.backend, DownloadClientBackend::Qbittorrent);
        assert_eq!(client.qbittorrent.as_ref().unwrap().timeout_secs, 30);
    }

    #[test]
    fn test_sanitized_config_hides_secrets() {
        let toml = r#"
[[searcher.sources]]
name = "s"
kind = "direct"

[searcher.sources.jackett]
url = "http://localhost:9117"
api_key = "super-secret"

[[download_clients]]
name = "qbit"

[download_clients.qbittorrent]
url = "http://localhost:8080"
password = "hunter2"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();

        assert!(!json.contains("super-secret"));
        assert!(!json.contains("hunter2"));
        assert!(sanitized.sources[0].api_key_configured);
        assert!(sanitized.download_clients[0].credentials_configured);
    }
}
