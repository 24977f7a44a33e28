//! Configuration management for Skycast
//!
//! Settings come from a TOML file and are then overridden by `SKYCAST_*`
//! environment variables. The result is validated once at startup and passed
//! explicitly to every component that needs it.

use secrecy::SecretString;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, Result};
use crate::filter::OrderStrategy;
use crate::gate::RetryPolicy;
use crate::types::DEFAULT_DATE_FORMAT;

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "SKYCAST_";

pub const DEFAULT_LAST_POSTED_FILE: &str = "last_posted.txt";
pub const DEFAULT_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_SERVICE: &str = "https://bsky.social";
pub const DEFAULT_IMAGE_ALT_TEXT: &str = "Image coming from the Fediverse";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Validated runtime configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub feed_url: String,
    pub handle: String,
    pub password: SecretString,
    pub last_posted_file: PathBuf,
    pub date_format: String,
    /// Delay between runs in watch mode
    pub interval: Duration,
    pub start_post_date: Option<String>,
    pub skip_tag: Option<String>,
    pub splitter: Option<String>,
    pub service: String,
    pub order: OrderStrategy,
    pub image_alt_text: String,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
}

/// Settings as they appear on disk, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub feed_url: Option<String>,
    pub handle: Option<String>,
    pub password: Option<String>,
    pub last_posted_file: Option<String>,
    pub date_format: Option<String>,
    pub interval: Option<u64>,
    pub start_post_date: Option<String>,
    pub skip_tag: Option<String>,
    pub splitter: Option<String>,
    pub service: Option<String>,
    pub order: Option<String>,
    pub image_alt_text: Option<String>,
    pub request_timeout: Option<String>,
    pub retry: Option<RawRetry>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRetry {
    pub rate_limit_cooldown: Option<String>,
    pub retry_delay: Option<String>,
    pub max_attempts: Option<u32>,
    pub max_elapsed: Option<String>,
}

impl RawConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).map_err(ConfigError::ParseError)?;
        Ok(raw)
    }

    /// Apply `SKYCAST_*` overrides from the given variables
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(name) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            match name.to_ascii_uppercase().as_str() {
                "FEED_URL" => self.feed_url = Some(value),
                "HANDLE" => self.handle = Some(value),
                "PASSWORD" => self.password = Some(value),
                "LAST_POSTED_FILE" => self.last_posted_file = Some(value),
                "DATE_FORMAT" => self.date_format = Some(value),
                "INTERVAL" => self.interval = Some(parse_number("interval", &value)?),
                "START_POST_DATE" => self.start_post_date = Some(value),
                "SKIP_TAG" => self.skip_tag = Some(value),
                "SPLITTER" => self.splitter = Some(value),
                "SERVICE" => self.service = Some(value),
                "ORDER" => self.order = Some(value),
                "IMAGE_ALT_TEXT" => self.image_alt_text = Some(value),
                "REQUEST_TIMEOUT" => self.request_timeout = Some(value),
                "RETRY_RATE_LIMIT_COOLDOWN" => {
                    self.retry.get_or_insert_with(Default::default).rate_limit_cooldown =
                        Some(value)
                }
                "RETRY_DELAY" => {
                    self.retry.get_or_insert_with(Default::default).retry_delay = Some(value)
                }
                "RETRY_MAX_ATTEMPTS" => {
                    self.retry.get_or_insert_with(Default::default).max_attempts =
                        Some(parse_number("retry.max_attempts", &value)?)
                }
                "RETRY_MAX_ELAPSED" => {
                    self.retry.get_or_insert_with(Default::default).max_elapsed = Some(value)
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate and fill defaults
    pub fn validate(self) -> Result<Config> {
        let feed_url = required("feed_url", self.feed_url)?;
        let handle = required("handle", self.handle)?;
        let password = required("password", self.password)?;

        let last_posted_file = non_empty(self.last_posted_file)
            .unwrap_or_else(|| DEFAULT_LAST_POSTED_FILE.to_string());
        let date_format =
            non_empty(self.date_format).unwrap_or_else(|| DEFAULT_DATE_FORMAT.to_string());

        let order = match non_empty(self.order) {
            Some(value) => {
                value
                    .parse::<OrderStrategy>()
                    .map_err(|reason| ConfigError::InvalidValue {
                        field: "order".to_string(),
                        reason,
                    })?
            }
            None => OrderStrategy::default(),
        };

        let request_timeout = match non_empty(self.request_timeout) {
            Some(value) => parse_duration("request_timeout", &value)?,
            None => DEFAULT_REQUEST_TIMEOUT,
        };

        let mut retry = RetryPolicy::default();
        if let Some(raw) = self.retry {
            if let Some(value) = non_empty(raw.rate_limit_cooldown) {
                retry.rate_limit_cooldown = parse_duration("retry.rate_limit_cooldown", &value)?;
            }
            if let Some(value) = non_empty(raw.retry_delay) {
                retry.retry_delay = parse_duration("retry.retry_delay", &value)?;
            }
            if let Some(value) = non_empty(raw.max_elapsed) {
                retry.max_elapsed = Some(parse_duration("retry.max_elapsed", &value)?);
            }
            retry.max_attempts = raw.max_attempts;
        }

        Ok(Config {
            feed_url,
            handle,
            password: SecretString::from(password),
            last_posted_file: PathBuf::from(shellexpand::tilde(&last_posted_file).to_string()),
            date_format,
            interval: Duration::from_secs(self.interval.unwrap_or(DEFAULT_INTERVAL_SECS)),
            start_post_date: non_empty(self.start_post_date),
            skip_tag: non_empty(self.skip_tag),
            splitter: non_empty(self.splitter),
            service: non_empty(self.service).unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
            order,
            image_alt_text: non_empty(self.image_alt_text)
                .unwrap_or_else(|| DEFAULT_IMAGE_ALT_TEXT.to_string()),
            request_timeout,
            retry,
        })
    }
}

impl Config {
    /// Load configuration from the resolved settings file and the environment
    ///
    /// A missing settings file is fine as long as the environment supplies
    /// every required field, unless the path was given explicitly.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = resolve_config_path(explicit)?;

        let mut raw = if path.exists() || explicit.is_some() {
            tracing::debug!("Reading settings from {}", path.display());
            let content = std::fs::read_to_string(&path).map_err(ConfigError::ReadError)?;
            RawConfig::from_toml_str(&content)?
        } else {
            tracing::debug!(
                "No settings file at {}, using environment only",
                path.display()
            );
            RawConfig::default()
        };

        raw.apply_env(std::env::vars())?;
        raw.validate()
    }

    /// Load configuration from a specific file, without environment overrides
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::ReadError)?;
        RawConfig::from_toml_str(&content)?.validate()
    }
}

/// Resolve the settings file path
///
/// Order: explicit path, `SKYCAST_CONFIG`, `./settings.toml` when present,
/// then `<config dir>/skycast/settings.toml`.
pub fn resolve_config_path(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(expand(&path.to_string_lossy()));
    }

    if let Ok(path) = std::env::var("SKYCAST_CONFIG") {
        return Ok(expand(&path));
    }

    let local = PathBuf::from("settings.toml");
    if local.exists() {
        return Ok(local);
    }

    let config_dir = dirs::config_dir()
        .ok_or_else(|| ConfigError::MissingField("config directory".to_string()))?;

    Ok(config_dir.join("skycast").join("settings.toml"))
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).to_string())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn required(field: &str, value: Option<String>) -> Result<String> {
    non_empty(value).ok_or_else(|| ConfigError::MissingField(field.to_string()).into())
}

fn parse_number<T: std::str::FromStr>(field: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

fn parse_duration(field: &str, value: &str) -> Result<Duration> {
    humantime::parse_duration(value.trim()).map_err(|e| {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SkycastError;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use tempfile::TempDir;

    const MINIMAL: &str = r#"
feed_url = "https://example.social/@me.rss"
handle = "me.bsky.social"
password = "app-password"
"#;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_minimal_config_fills_defaults() {
        let config = RawConfig::from_toml_str(MINIMAL).unwrap().validate().unwrap();

        assert_eq!(config.feed_url, "https://example.social/@me.rss");
        assert_eq!(config.handle, "me.bsky.social");
        assert_eq!(config.password.expose_secret(), "app-password");
        assert_eq!(config.last_posted_file, PathBuf::from("last_posted.txt"));
        assert_eq!(config.date_format, DEFAULT_DATE_FORMAT);
        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.service, DEFAULT_SERVICE);
        assert_eq!(config.order, OrderStrategy::SortByPublished);
        assert_eq!(config.image_alt_text, DEFAULT_IMAGE_ALT_TEXT);
        assert!(config.start_post_date.is_none());
        assert!(config.skip_tag.is_none());
        assert!(config.splitter.is_none());
        assert_eq!(config.retry.rate_limit_cooldown, Duration::from_secs(86_400));
        assert!(config.retry.max_attempts.is_none());
    }

    #[test]
    fn test_missing_required_field() {
        let raw = RawConfig::from_toml_str(r#"feed_url = "https://x/feed""#).unwrap();
        match raw.validate() {
            Err(SkycastError::Config(ConfigError::MissingField(field))) => {
                assert_eq!(field, "handle")
            }
            other => panic!("Expected MissingField, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_required_field_counts_as_missing() {
        let raw = RawConfig::from_toml_str(
            r#"
feed_url = "https://x/feed"
handle = "me"
password = ""
"#,
        )
        .unwrap();
        assert!(matches!(
            raw.validate(),
            Err(SkycastError::Config(ConfigError::MissingField(_)))
        ));
    }

    #[test]
    fn test_empty_optional_fields_are_none() {
        let content = format!("{}\nstart_post_date = \"\"\nskip_tag = \"\"\n", MINIMAL);
        let config = RawConfig::from_toml_str(&content)
            .unwrap()
            .validate()
            .unwrap();
        assert!(config.start_post_date.is_none());
        assert!(config.skip_tag.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let content = format!("{}\nfeed_urls = \"typo\"\n", MINIMAL);
        assert!(matches!(
            RawConfig::from_toml_str(&content),
            Err(SkycastError::Config(ConfigError::ParseError(_)))
        ));
    }

    #[test]
    fn test_retry_table() {
        let content = format!(
            "{}\n[retry]\nrate_limit_cooldown = \"1h\"\nretry_delay = \"5s\"\nmax_attempts = 7\nmax_elapsed = \"2days\"\n",
            MINIMAL
        );
        let config = RawConfig::from_toml_str(&content)
            .unwrap()
            .validate()
            .unwrap();
        assert_eq!(config.retry.rate_limit_cooldown, Duration::from_secs(3600));
        assert_eq!(config.retry.retry_delay, Duration::from_secs(5));
        assert_eq!(config.retry.max_attempts, Some(7));
        assert_eq!(config.retry.max_elapsed, Some(Duration::from_secs(172_800)));
    }

    #[test]
    fn test_invalid_duration() {
        let content = format!("{}\nrequest_timeout = \"soon\"\n", MINIMAL);
        let result = RawConfig::from_toml_str(&content).unwrap().validate();
        match result {
            Err(SkycastError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "request_timeout")
            }
            other => panic!("Expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_order() {
        let content = format!("{}\norder = \"random\"\n", MINIMAL);
        assert!(RawConfig::from_toml_str(&content)
            .unwrap()
            .validate()
            .is_err());
    }

    #[test]
    fn test_env_overrides_file() {
        let mut raw = RawConfig::from_toml_str(MINIMAL).unwrap();
        raw.apply_env(vars(&[
            ("SKYCAST_HANDLE", "other.bsky.social"),
            ("SKYCAST_SKIP_TAG", "#nobot"),
            ("SKYCAST_INTERVAL", "120"),
            ("SKYCAST_RETRY_MAX_ATTEMPTS", "3"),
            ("PATH", "/usr/bin"),
        ]))
        .unwrap();
        let config = raw.validate().unwrap();

        assert_eq!(config.handle, "other.bsky.social");
        assert_eq!(config.skip_tag.as_deref(), Some("#nobot"));
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.retry.max_attempts, Some(3));
    }

    #[test]
    fn test_env_invalid_number() {
        let mut raw = RawConfig::default();
        let result = raw.apply_env(vars(&[("SKYCAST_INTERVAL", "often")]));
        assert!(matches!(
            result,
            Err(SkycastError::Config(ConfigError::InvalidValue { .. }))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config.handle, "me.bsky.social");
    }

    #[test]
    fn test_load_from_missing_path() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("absent.toml");
        assert!(matches!(
            Config::load_from_path(&path),
            Err(SkycastError::Config(ConfigError::ReadError(_)))
        ));
    }

    #[test]
    #[serial]
    fn test_load_uses_skycast_config_and_env() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("settings.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        std::env::set_var("SKYCAST_CONFIG", &path);
        std::env::set_var("SKYCAST_SPLITTER", "---");
        let result = Config::load(None);
        std::env::remove_var("SKYCAST_CONFIG");
        std::env::remove_var("SKYCAST_SPLITTER");

        let config = result.unwrap();
        assert_eq!(config.feed_url, "https://example.social/@me.rss");
        assert_eq!(config.splitter.as_deref(), Some("---"));
    }

    #[test]
    #[serial]
    fn test_load_explicit_missing_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nope.toml");
        assert!(matches!(
            Config::load(Some(&path)),
            Err(SkycastError::Config(ConfigError::ReadError(_)))
        ));
    }
}
