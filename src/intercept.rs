//! Canned-response interception.
//!
//! An ordered table of `(needle, response)` rules checked against the last
//! message of a request before any upstream call is made. A rule matches when
//! the message contains its needle as a literal, case-sensitive substring.
//! The first matching rule in table order answers the request.

use serde::Deserialize;
use std::path::Path;

use crate::config::{ConfigError, InterceptorConfig, RuleConfig};

/// Rule fixture shipped with the crate.
const BUILTIN_RULES: &str = include_str!("../fixtures/intercept_rules.toml");

/// On-disk fixture format: a list of `[[rules]]` tables.
#[derive(Debug, Deserialize)]
struct RuleFile {
    #[serde(default)]
    rules: Vec<RuleConfig>,
}

/// Read-only rule table, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct Interceptor {
    rules: Vec<RuleConfig>,
}

impl Interceptor {
    pub fn new(rules: Vec<RuleConfig>) -> Self {
        Self { rules }
    }

    /// Build the effective table: inline rules, then the rules file, then
    /// the built-in fixture when enabled.
    pub fn from_config(config: &InterceptorConfig) -> Result<Self, ConfigError> {
        let mut rules = config.rules.clone();

        if let Some(path) = &config.rules_file {
            rules.extend(load_rule_file(path)?);
        }

        if config.builtin_rules {
            rules.extend(parse_rules(BUILTIN_RULES, "<builtin>")?);
        }

        Ok(Self::new(rules))
    }

    /// The built-in demo prompt table on its own.
    pub fn builtin() -> Result<Self, ConfigError> {
        parse_rules(BUILTIN_RULES, "<builtin>").map(Self::new)
    }

    /// Response of the first rule whose needle occurs in `last_message`.
    pub fn find(&self, last_message: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| last_message.contains(rule.needle.as_str()))
            .map(|rule| rule.response.as_str())
    }

    pub fn rules(&self) -> &[RuleConfig] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn load_rule_file(path: &Path) -> Result<Vec<RuleConfig>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    parse_rules(&content, &path.display().to_string())
}

fn parse_rules(content: &str, origin: &str) -> Result<Vec<RuleConfig>, ConfigError> {
    let file: RuleFile = toml::from_str(content)?;

    if let Some(index) = file.rules.iter().position(|r| r.needle.is_empty()) {
        return Err(ConfigError::Validation(format!(
            "rule {} in {} has an empty needle",
            index, origin
        )));
    }

    Ok(file.rules)
}
