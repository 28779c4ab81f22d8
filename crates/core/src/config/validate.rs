use std::collections::HashSet;

use super::{types::Config, ConfigError};

/// Validate configuration
///
/// Checks that names are unique, rate budgets and intervals are non-zero,
/// every profile's cutoff names one of its tiers and every slot points at a
/// configured profile.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    unique("searcher.sources", config.searcher.sources.iter().map(|s| s.name.as_str()))?;
    unique("download_clients", config.download_clients.iter().map(|c| c.name.as_str()))?;
    unique("quality_profiles", config.quality_profiles.iter().map(|p| p.id.as_str()))?;
    unique("slots", config.slots.iter().map(|s| s.id.as_str()))?;

    if config.searcher.default_timeout_ms == 0 {
        return Err(invalid("searcher.default_timeout_ms cannot be 0"));
    }

    for source in &config.searcher.sources {
        if source.rate_limit.max_requests == 0 || source.rate_limit.window_secs == 0 {
            return Err(invalid(format!(
                "source '{}' has an empty rate limit budget",
                source.name
            )));
        }
        if source.timeout_ms == Some(0) {
            return Err(invalid(format!("source '{}' timeout_ms cannot be 0", source.name)));
        }
        if source.enabled && source.jackett.is_none() {
            return Err(invalid(format!(
                "source '{}' uses the jackett backend but has no [jackett] section",
                source.name
            )));
        }
    }

    for client in &config.download_clients {
        if client.enabled && client.qbittorrent.is_none() {
            return Err(invalid(format!(
                "download client '{}' uses the qbittorrent backend but has no [qbittorrent] section",
                client.name
            )));
        }
    }

    if let Some(name) = &config.grab.download_client {
        if !config.download_clients.iter().any(|c| &c.name == name) {
            return Err(invalid(format!(
                "grab.download_client '{}' is not a configured download client",
                name
            )));
        }
    }

    for profile in &config.quality_profiles {
        if profile.tiers.is_empty() {
            return Err(invalid(format!("quality profile '{}' has no tiers", profile.id)));
        }
        if profile.cutoff_rank().is_none() {
            return Err(invalid(format!(
                "quality profile '{}' cutoff '{}' is not one of its tiers",
                profile.id, profile.cutoff
            )));
        }
    }

    for slot in &config.slots {
        if config.profile(&slot.profile_id).is_none() {
            return Err(invalid(format!(
                "slot '{}' references unknown quality profile '{}'",
                slot.id, slot.profile_id
            )));
        }
    }

    if config.queue.poll_interval_ms == 0 || config.queue.client_timeout_ms == 0 {
        return Err(invalid("queue intervals cannot be 0"));
    }

    for (name, schedule) in config.scheduler.tasks() {
        if schedule.interval_secs == 0 {
            return Err(invalid(format!("scheduler.{}.interval_secs cannot be 0", name)));
        }
    }

    if config.import.buffer_size == 0 {
        return Err(invalid("import.buffer_size cannot be 0"));
    }

    Ok(())
}

fn unique<'a>(section: &str, names: impl Iterator<Item = &'a str>) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(invalid(format!("duplicate name '{}' in {}", name, section)));
        }
    }
    Ok(())
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::searcher::SourceKind;
    use crate::testing::fixtures;

    fn valid_config() -> Config {
        let mut config = Config::default();
        config.quality_profiles = fixtures::profiles();
        config.slots = fixtures::slots();
        config
            .searcher
            .sources
            .push(fixtures::source_config("jackett", SourceKind::Aggregator));
        config
    }

    #[test]
    fn test_validate_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_duplicate_source_names_fail() {
        let mut config = valid_config();
        config
            .searcher
            .sources
            .push(fixtures::source_config("jackett", SourceKind::Direct));
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate name 'jackett'"));
    }

    #[test]
    fn test_zero_rate_budget_fails() {
        let mut config = valid_config();
        config.searcher.sources[0].rate_limit.max_requests = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_cutoff_must_name_a_tier() {
        let mut config = valid_config();
        config.quality_profiles[0].cutoff = "nope".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("cutoff 'nope'"));
    }

    #[test]
    fn test_slot_must_reference_profile() {
        let mut config = valid_config();
        config.slots[0].profile_id = "missing".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown quality profile 'missing'"));
    }

    #[test]
    fn test_zero_task_interval_fails() {
        let mut config = valid_config();
        config.scheduler.import_scan.interval_secs = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("import_scan"));
    }
}
