//! Calendar export configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{EventCalError, EventCalResult};
use crate::timezone::{Normalizer, TransitionPolicy};

const DEFAULT_HARD_CAP: usize = 500;
const DEFAULT_PRODUCT_ID: &str = "-//eventcal//Calendar Export//EN";
const DEFAULT_UID_DOMAIN: &str = "eventcal";
const DEFAULT_PUBLISHED_TTL: &str = "1h";

/// Configuration at ~/.config/eventcal/config.toml
///
/// Every key is optional; a missing file or key falls back to the defaults below.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    /// IANA zone that templates are written in and documents are published in.
    pub zone: Tz,

    /// Maximum occurrences generated per template.
    pub hard_cap: usize,

    pub product_id: String,

    /// Right-hand side of generated `UID`s.
    pub uid_domain: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub calendar_name: Option<String>,

    /// Refresh interval advertised to subscribers, as a humantime duration (`1h`, `30m`).
    /// Empty to omit.
    pub published_ttl: String,

    pub transition_policy: TransitionPolicy,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        CalendarConfig {
            zone: chrono_tz::Europe::Berlin,
            hard_cap: DEFAULT_HARD_CAP,
            product_id: DEFAULT_PRODUCT_ID.to_string(),
            uid_domain: DEFAULT_UID_DOMAIN.to_string(),
            calendar_name: None,
            published_ttl: DEFAULT_PUBLISHED_TTL.to_string(),
            transition_policy: TransitionPolicy::default(),
        }
    }
}

impl CalendarConfig {
    pub fn config_path() -> EventCalResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| EventCalError::Config("Could not determine config directory".into()))?
            .join("eventcal");

        Ok(config_dir.join("config.toml"))
    }

    /// Load config from `path`, or the defaults if the file does not exist.
    pub fn load(path: &Path) -> EventCalResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
            .map_err(|e| EventCalError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_toml_str(contents: &str) -> EventCalResult<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| EventCalError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save the config to `path`, creating parent directories as needed.
    pub fn save(&self, path: &Path) -> EventCalResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EventCalError::Serialization(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EventCalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, content)
            .map_err(|e| EventCalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    /// Create a default config file with all options commented out.
    pub fn create_default_config(path: &Path) -> EventCalResult<()> {
        let contents = format!(
            "\
# eventcal configuration

# Zone event times are written in:
# zone = \"Europe/Berlin\"

# Maximum occurrences per recurring event:
# hard_cap = {DEFAULT_HARD_CAP}

# Calendar metadata:
# product_id = \"{DEFAULT_PRODUCT_ID}\"
# uid_domain = \"{DEFAULT_UID_DOMAIN}\"
# calendar_name = \"Events\"
# published_ttl = \"{DEFAULT_PUBLISHED_TTL}\"

# Daylight-saving resolution (resolve-forward | shift-forward | reject,
# earlier | later | reject):
# [transition_policy]
# gap = \"resolve-forward\"
# overlap = \"earlier\"
"
        );

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                EventCalError::Config(format!("Could not create config directory: {e}"))
            })?;
        }

        std::fs::write(path, contents)
            .map_err(|e| EventCalError::Config(format!("Could not write config file: {e}")))?;

        Ok(())
    }

    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.zone).with_policy(self.transition_policy)
    }

    /// The publish TTL, or `None` when it is configured empty.
    pub fn ttl(&self) -> EventCalResult<Option<Duration>> {
        let ttl = self.published_ttl.trim();
        if ttl.is_empty() {
            return Ok(None);
        }

        humantime::parse_duration(ttl)
            .map(Some)
            .map_err(|e| EventCalError::Config(format!("published_ttl {:?}: {}", ttl, e)))
    }

    fn validate(&self) -> EventCalResult<()> {
        if self.uid_domain.trim().is_empty() {
            return Err(EventCalError::Config("uid_domain must not be empty".into()));
        }
        self.ttl()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timezone::{GapPolicy, OverlapPolicy};

    #[test]
    fn test_defaults() {
        let config = CalendarConfig::default();
        assert_eq!(config.zone, chrono_tz::Europe::Berlin);
        assert_eq!(config.hard_cap, 500);
        assert_eq!(config.product_id, "-//eventcal//Calendar Export//EN");
        assert_eq!(config.ttl().unwrap(), Some(Duration::from_secs(3600)));
        assert_eq!(config.transition_policy.gap, GapPolicy::ResolveForward);
        assert_eq!(config.transition_policy.overlap, OverlapPolicy::Earlier);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CalendarConfig::from_toml_str(
            r#"
zone = "America/New_York"
calendar_name = "Talks"

[transition_policy]
overlap = "later"
"#,
        )
        .unwrap();

        assert_eq!(config.zone, chrono_tz::America::New_York);
        assert_eq!(config.calendar_name.as_deref(), Some("Talks"));
        assert_eq!(config.hard_cap, 500, "Unset keys should keep their defaults");
        assert_eq!(config.transition_policy.overlap, OverlapPolicy::Later);
        assert_eq!(config.transition_policy.gap, GapPolicy::ResolveForward);
        assert_eq!(config.normalizer().zone(), chrono_tz::America::New_York);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        for toml in [
            "zone = \"Mars/Olympus\"",
            "published_ttl = \"soon\"",
            "uid_domain = \"\"",
            "[transition_policy]\ngap = \"sideways\"",
        ] {
            let result = CalendarConfig::from_toml_str(toml);
            assert!(
                matches!(result, Err(EventCalError::Config(_))),
                "Expected Config error for {:?}, got {:?}",
                toml,
                result
            );
        }
    }

    #[test]
    fn test_empty_ttl_is_omitted() {
        let config = CalendarConfig::from_toml_str("published_ttl = \"\"").unwrap();
        assert_eq!(config.ttl().unwrap(), None);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = CalendarConfig::load(&dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, CalendarConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = CalendarConfig {
            zone: chrono_tz::Asia::Tokyo,
            hard_cap: 50,
            calendar_name: Some("Seminars".to_string()),
            ..CalendarConfig::default()
        };
        config.save(&path).unwrap();

        let loaded = CalendarConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_default_config_file_parses_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        CalendarConfig::create_default_config(&path).unwrap();
        let loaded = CalendarConfig::load(&path).unwrap();
        assert_eq!(loaded, CalendarConfig::default());
    }
}
