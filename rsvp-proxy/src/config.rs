use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

pub const DEFAULT_ALLOWED_ORIGIN: &str = "https://rsvp-next.vercel.app";

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("rate_limit.max_requests must be at least 1")]
    InvalidRateLimit,

    #[error("rate_limit.window_ms must be at least 1")]
    InvalidRateLimitWindow,

    #[error("timeouts.upstream_secs must be at least 1")]
    InvalidTimeout,
}

/// Proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Public listener serving `/api/*`
    pub listener: Listener,
    /// Admin listener for `/health` and `/ready`
    pub admin_listener: Listener,
    /// The spreadsheet web app every endpoint talks to. Endpoints answer 500
    /// while it is missing; the process still starts.
    #[serde(default)]
    pub upstream_url: Option<Url>,
    /// Origin allowed to fetch the calendar file cross-origin
    #[serde(default = "default_allowed_origin")]
    pub allowed_origin: String,
    #[serde(default = "default_calendar_path")]
    pub calendar_path: PathBuf,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_allowed_origin() -> String {
    DEFAULT_ALLOWED_ORIGIN.to_string()
}

fn default_calendar_path() -> PathBuf {
    PathBuf::from("public/wedding.ics")
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.rate_limit.validate()?;
        if self.timeouts.upstream_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }

    /// Applies the deployment environment on top of the file.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // The public variable takes precedence, as it does in the deployed site.
        if let Some(raw) =
            non_empty("NEXT_PUBLIC_GAS_ENDPOINT").or_else(|| non_empty("GOOGLE_SCRIPT_URL"))
        {
            match Url::parse(&raw) {
                Ok(url) => self.upstream_url = Some(url),
                Err(e) => tracing::warn!("ignoring invalid upstream URL from environment: {e}"),
            }
        }

        if let Some(origin) = non_empty("ALLOWED_ORIGIN") {
            self.allowed_origin = origin;
        }

        if let Some(raw) = non_empty("RATE_LIMIT_MAX_REQUESTS") {
            match raw.parse() {
                Ok(max) => self.rate_limit.max_requests = max,
                Err(e) => tracing::warn!(value = %raw, "ignoring RATE_LIMIT_MAX_REQUESTS: {e}"),
            }
        }

        if let Some(raw) = non_empty("RATE_LIMIT_WINDOW_MS") {
            match raw.parse() {
                Ok(window) => self.rate_limit.window_ms = window,
                Err(e) => tracing::warn!(value = %raw, "ignoring RATE_LIMIT_WINDOW_MS: {e}"),
            }
        }
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Sliding window applied per client IP to the write endpoints
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateLimitConfig {
    pub max_requests: usize,
    pub window_ms: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            max_requests: 5,
            window_ms: 60_000,
        }
    }
}

impl RateLimitConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_requests == 0 {
            return Err(ValidationError::InvalidRateLimit);
        }
        if self.window_ms == 0 {
            return Err(ValidationError::InvalidRateLimitWindow);
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Timeouts {
    /// Per-attempt timeout for every upstream call
    pub upstream_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts { upstream_secs: 10 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const MINIMAL: &str = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
"#;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
upstream_url: "https://script.google.com/macros/s/abc/exec"
allowed_origin: "https://wedding.example"
calendar_path: "/srv/wedding.ics"
rate_limit:
    max_requests: 10
    window_ms: 30000
timeouts:
    upstream_secs: 5
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.listener.port, 3000);
        assert_eq!(
            config.upstream_url.unwrap().as_str(),
            "https://script.google.com/macros/s/abc/exec"
        );
        assert_eq!(config.allowed_origin, "https://wedding.example");
        assert_eq!(config.calendar_path, PathBuf::from("/srv/wedding.ics"));
        assert_eq!(
            config.rate_limit,
            RateLimitConfig {
                max_requests: 10,
                window_ms: 30_000
            }
        );
        assert_eq!(config.timeouts.upstream_secs, 5);
    }

    #[test]
    fn test_defaults() {
        let config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.upstream_url, None);
        assert_eq!(config.allowed_origin, DEFAULT_ALLOWED_ORIGIN);
        assert_eq!(config.calendar_path, PathBuf::from("public/wedding.ics"));
        assert_eq!(config.rate_limit, RateLimitConfig::default());
        assert_eq!(config.timeouts.upstream_secs, 10);
    }

    #[test]
    fn test_validation_errors() {
        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.admin_listener.port = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidPort));

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.rate_limit.max_requests = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRateLimit));

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.rate_limit.window_ms = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidRateLimitWindow));

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.timeouts.upstream_secs = 0;
        assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));
    }

    #[test]
    fn test_invalid_upstream_url_is_rejected_at_parse() {
        let yaml = format!("{MINIMAL}upstream_url: \"not a url\"\n");
        assert!(serde_yaml::from_str::<Config>(&yaml).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let env = HashMap::from([
            ("GOOGLE_SCRIPT_URL", "https://script.google.com/macros/s/private/exec"),
            ("NEXT_PUBLIC_GAS_ENDPOINT", "https://script.google.com/macros/s/public/exec"),
            ("ALLOWED_ORIGIN", "https://wedding.example"),
            ("RATE_LIMIT_MAX_REQUESTS", "20"),
            ("RATE_LIMIT_WINDOW_MS", "soon"),
        ]);

        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(
            config.upstream_url.unwrap().as_str(),
            "https://script.google.com/macros/s/public/exec"
        );
        assert_eq!(config.allowed_origin, "https://wedding.example");
        assert_eq!(config.rate_limit.max_requests, 20);
        // Unparseable values are ignored.
        assert_eq!(config.rate_limit.window_ms, 60_000);
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config: Config = serde_yaml::from_str(MINIMAL).unwrap();
        config.apply_overrides(|key| match key {
            "NEXT_PUBLIC_GAS_ENDPOINT" => Some("  ".to_string()),
            "GOOGLE_SCRIPT_URL" => {
                Some("https://script.google.com/macros/s/private/exec".to_string())
            }
            _ => None,
        });

        assert_eq!(
            config.upstream_url.unwrap().as_str(),
            "https://script.google.com/macros/s/private/exec"
        );
        assert_eq!(config.allowed_origin, DEFAULT_ALLOWED_ORIGIN);
    }
}
