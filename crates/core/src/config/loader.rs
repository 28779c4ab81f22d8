use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use std::path::Path;

use super::{types::Config, ConfigError};

/// Load configuration from file with environment variable overrides.
///
/// Nested keys are separated by a double underscore, so
/// `HARVESTER_QUEUE__POLL_INTERVAL_MS` overrides `queue.poll_interval_ms`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    let config: Config = Figment::new()
        .merge(Toml::file(path))
        .merge(Env::prefixed("HARVESTER_").split("__"))
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))?;

    Ok(config)
}

/// Load configuration from TOML string (useful for testing)
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    toml::from_str(toml_str).map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[queue]
poll_interval_ms = 2000

[grab]
max_failed_attempts = 5
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.queue.poll_interval_ms, 2000);
        assert_eq!(config.queue.min_interval_ms, 1000);
        assert_eq!(config.grab.max_failed_attempts, 5);
    }

    #[test]
    fn test_load_config_from_str_bad_enum() {
        let toml = r#"
[import]
transfer_mode = "teleport"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[database]
path = "/var/lib/harvester/harvester.db"

[[quality_profiles]]
id = "hd"
name = "HD"
cutoff = "web-1080p"

[[quality_profiles.tiers]]
name = "web-1080p"
resolution = "1080p"
sources = ["webdl", "webrip"]

[[slots]]
id = "main"
name = "Main"
profile_id = "hd"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(
            config.database.path.to_str().unwrap(),
            "/var/lib/harvester/harvester.db"
        );
        assert_eq!(config.quality_profiles.len(), 1);
        assert!(config.profile("hd").is_some());
        assert!(config.slots[0].enabled);
    }
}
