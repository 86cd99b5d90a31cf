//! Cache key generation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Unit separator between hashed fields, so `("ab", "c")` and `("a", "bc")`
/// never share a digest.
const FIELD_SEPARATOR: &[u8] = b"\x1f";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub hash: String,
    pub provider: String,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.hash
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// Derives fixed-length keys from `(provider, query)`.
///
/// Inputs are trimmed and otherwise taken verbatim: casing and inner
/// whitespace are significant, so callers that want "same question, different
/// spelling" to share an entry must normalize upstream.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyGenerator {
    salt: Option<String>,
}

impl CacheKeyGenerator {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespace every key, e.g. per deployment sharing one network store.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Returns `None` when either input is empty after trimming.
    pub fn generate(&self, provider: &str, query: &str) -> Option<CacheKey> {
        let provider = provider.trim();
        let query = query.trim();
        if provider.is_empty() || query.is_empty() {
            return None;
        }

        let mut hasher = Sha256::new();
        if let Some(ref s) = self.salt {
            hasher.update(s.as_bytes());
            hasher.update(FIELD_SEPARATOR);
        }
        hasher.update(provider.as_bytes());
        hasher.update(FIELD_SEPARATOR);
        hasher.update(query.as_bytes());
        let hash: String = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();

        Some(CacheKey {
            hash,
            provider: provider.to_string(),
        })
    }
}
