//! Credential pool parsing and per-request key selection.

use rand::Rng;

use crate::config::Secret;
use crate::error::{RelayError, Result};

/// Separator between keys in a credential string.
pub const KEY_SEPARATOR: char = ',';

/// A non-empty set of interchangeable upstream API keys.
///
/// Selection is uniform and stateless: there is no rotation memory, so two
/// consecutive draws may return the same key.
#[derive(Debug, Clone)]
pub struct CredentialPool {
    keys: Vec<Secret>,
}

impl CredentialPool {
    /// Split `raw` on [`KEY_SEPARATOR`], trimming entries and discarding empty ones.
    pub fn parse(raw: &str) -> Result<Self> {
        let keys: Vec<Secret> = raw
            .split(KEY_SEPARATOR)
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(Secret::from)
            .collect();

        if keys.is_empty() {
            return Err(RelayError::NoCredential);
        }

        Ok(Self { keys })
    }

    /// Draw one key uniformly at random.
    pub fn choose(&self) -> &str {
        let index = rand::rng().random_range(0..self.keys.len());
        self.keys[index].expose_secret()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Parse `raw` and draw one key from it.
pub fn select(raw: &str) -> Result<String> {
    CredentialPool::parse(raw).map(|pool| pool.choose().to_string())
}
