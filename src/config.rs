//! Configuration parsing and validation for promptrelay.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable consulted when `upstream.api_key` is absent.
pub const CONVENTION_KEY_VAR: &str = "PERPLEXITY_API_KEY";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub interceptor: InterceptorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "127.0.0.1:8080")
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Upstream chat-completion provider.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Bare host (`api.perplexity.ai`) or full base URL (`http://127.0.0.1:9000/v1`).
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Deadline for the upstream response headers, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Default comma-separated credential string used when a request carries no key.
    pub api_key: Option<Secret>,
}

fn default_base_url() -> String {
    "api.perplexity.ai".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
        }
    }
}

impl UpstreamConfig {
    /// Full URL of the chat completions endpoint.
    ///
    /// A bare host is assumed to speak HTTPS.
    pub fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.contains("://") {
            format!("{}/chat/completions", base)
        } else {
            format!("https://{}/chat/completions", base)
        }
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Shared-password gate.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// When set and non-empty, every request must carry this password.
    pub password: Option<Secret>,
}

impl AuthConfig {
    /// The password requests must present, if the gate is enabled.
    pub fn required_password(&self) -> Option<&str> {
        self.password
            .as_ref()
            .map(|p| p.expose_secret())
            .filter(|p| !p.is_empty())
    }
}

/// Interception rule sources.
#[derive(Debug, Clone, Deserialize)]
pub struct InterceptorConfig {
    /// Append the built-in demo prompt fixture after configured rules.
    #[serde(default = "default_true")]
    pub builtin_rules: bool,
    /// Optional TOML fixture file containing `[[rules]]` tables.
    pub rules_file: Option<PathBuf>,
    /// Inline rules, evaluated before file and built-in rules.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,
}

impl Default for InterceptorConfig {
    fn default() -> Self {
        Self {
            builtin_rules: true,
            rules_file: None,
            rules: Vec::new(),
        }
    }
}

/// A single `(needle, response)` interception rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleConfig {
    pub needle: String,
    pub response: String,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Secret wrapper that redacts in Debug/Display/Serialize and zeroizes on drop.
///
/// Only accessible via `.expose_secret()`, so every read site is grep-auditable.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("[REDACTED]")
    }
}

impl<'de> serde::Deserialize<'de> for Secret {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Secret(SecretString::from(s)))
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Secret(SecretString::from(s))
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Secret(SecretString::from(s))
    }
}

/// How the default credential string was resolved.
#[derive(Debug, Clone, PartialEq)]
pub enum KeySource {
    /// Literal string in config (no ${} references)
    Literal,
    /// Contained ${VAR} references expanded from environment
    EnvExpanded,
    /// Picked up from the convention env var (holds var name)
    Convention(String),
    /// No default credential; every request must bring its own key
    None,
}

impl std::fmt::Display for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Literal => write!(f, "config-literal"),
            KeySource::EnvExpanded => write!(f, "env-expanded"),
            KeySource::Convention(var) => write!(f, "convention ({})", var),
            KeySource::None => write!(f, "none"),
        }
    }
}

impl Config {
    /// Parse configuration from a TOML string, without env expansion.
    pub fn parse_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(
                "upstream.base_url must not be empty".to_string(),
            ));
        }

        if self.upstream.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "upstream.timeout_ms must be greater than zero".to_string(),
            ));
        }

        if let Some(index) = self.interceptor.rules.iter().position(|r| r.needle.is_empty()) {
            return Err(ConfigError::Validation(format!(
                "interceptor.rules[{}] has an empty needle",
                index
            )));
        }

        Ok(())
    }

    /// Non-fatal problems worth reporting at startup.
    ///
    /// Loading never logs; callers report these once tracing is up.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.upstream.api_key.is_none() {
            warnings.push(
                "No default credential configured - requests must supply a key".to_string(),
            );
        }
        warnings
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Configuration validation error: {0}")]
    Validation(String),

    #[error("Environment variable '{var}' not set for '{field}': {message}")]
    EnvVar {
        var: String,
        field: String,
        message: String,
    },
}

/// Raw configuration deserialized directly from TOML.
/// Secret values may still contain `${VAR}` references.
#[derive(Deserialize)]
pub struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    upstream: RawUpstreamConfig,
    #[serde(default)]
    auth: RawAuthConfig,
    #[serde(default)]
    interceptor: InterceptorConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Deserialize)]
struct RawUpstreamConfig {
    #[serde(default = "default_base_url")]
    base_url: String,
    #[serde(default = "default_timeout_ms")]
    timeout_ms: u64,
    api_key: Option<String>,
}

impl Default for RawUpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            api_key: None,
        }
    }
}

#[derive(Deserialize, Default)]
struct RawAuthConfig {
    password: Option<String>,
}

/// Expand all `${VAR}` references in a string using a custom lookup function.
///
/// Supports several references in one value. Fails on the first missing
/// variable, an unclosed `${`, or an empty variable name.
fn expand_env_vars_with<F>(input: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !input.contains("${") {
        return Ok(input.to_string());
    }

    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}').ok_or_else(|| ConfigError::EnvVar {
            var: "<unclosed>".to_string(),
            field: field.to_string(),
            message: format!("Unclosed '${{' in config value for '{}'", field),
        })?;

        let var_name = &after[..end];
        if var_name.is_empty() {
            return Err(ConfigError::EnvVar {
                var: "".to_string(),
                field: field.to_string(),
                message: "Empty variable name in '${}' reference".to_string(),
            });
        }

        let value = lookup(var_name).ok_or_else(|| ConfigError::EnvVar {
            var: var_name.to_string(),
            field: field.to_string(),
            message: format!(
                "Environment variable '{}' is not set (referenced in '{}')",
                var_name, field
            ),
        })?;

        result.push_str(&value);
        rest = &after[end + 1..];
    }

    result.push_str(rest);
    Ok(result)
}

impl Config {
    /// Convert raw config to final config using `lookup` for env resolution.
    ///
    /// - `upstream.api_key` with `${VAR}`: expanded, source = `EnvExpanded`
    /// - literal `upstream.api_key`: wrapped as-is, source = `Literal`
    /// - absent: `PERPLEXITY_API_KEY` is consulted, source = `Convention` or `None`
    /// - `auth.password` gets the same `${VAR}` expansion
    pub fn from_raw_with<F>(raw: RawConfig, lookup: F) -> Result<(Self, KeySource), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let (api_key, source) = match raw.upstream.api_key {
            Some(ref raw_key) if raw_key.contains("${") => {
                let expanded = expand_env_vars_with(raw_key, "upstream.api_key", &lookup)?;
                (Some(Secret::from(expanded)), KeySource::EnvExpanded)
            }
            Some(ref raw_key) => (Some(Secret::from(raw_key.as_str())), KeySource::Literal),
            None => match lookup(CONVENTION_KEY_VAR) {
                Some(value) => (
                    Some(Secret::from(value)),
                    KeySource::Convention(CONVENTION_KEY_VAR.to_string()),
                ),
                None => (None, KeySource::None),
            },
        };

        let password = raw
            .auth
            .password
            .map(|p| expand_env_vars_with(&p, "auth.password", &lookup))
            .transpose()?
            .map(Secret::from);

        let config = Config {
            server: raw.server,
            upstream: UpstreamConfig {
                base_url: raw.upstream.base_url,
                timeout_ms: raw.upstream.timeout_ms,
                api_key,
            },
            auth: AuthConfig { password },
            interceptor: raw.interceptor,
            logging: raw.logging,
        };

        Ok((config, source))
    }

    /// Convert raw config to final config using the process environment.
    pub fn from_raw(raw: RawConfig) -> Result<(Self, KeySource), ConfigError> {
        Self::from_raw_with(raw, |name| std::env::var(name).ok())
    }

    /// Load configuration from a TOML file with environment variable expansion.
    ///
    /// Returns the config and where the default credential came from.
    pub fn from_file_with_env(path: impl AsRef<Path>) -> Result<(Self, KeySource), ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;

        let raw: RawConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;
        let (config, source) = Self::from_raw(raw)?;
        config.validate()?;

        Ok((config, source))
    }
}
