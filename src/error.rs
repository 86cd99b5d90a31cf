use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "apiCallLimit.perMinute", "providers.openai.minTTL")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "settings", "redis_cache", "get_or_compute")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Unified error type for the cache runtime.
///
/// Infrastructure failures ([`Error::Backend`]) stay inside the store layer and
/// are recovered by falling back to the in-process store. The variants callers
/// actually see are the business-meaningful ones: rate-limit denials, compute
/// failures and invalid keys.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Rate limit exceeded for provider '{provider}': {reason}")]
    RateLimited { provider: String, reason: String },

    #[error("Computation failed: {message}{}", format_context(.context))]
    Compute {
        message: String,
        context: ErrorContext,
    },

    #[error("Computation exceeded its deadline after {after_ms} ms")]
    ComputeTimeout { after_ms: u64 },

    #[error("Invalid cache key: {message}")]
    InvalidKey { message: String },

    #[error("Cache backend '{backend}' unavailable: {message}")]
    Backend {
        backend: &'static str,
        message: String,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    /// Create a compute failure with structured context
    pub fn compute_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Compute {
            message: msg.into(),
            context,
        }
    }

    /// Create a configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn backend(backend: &'static str, msg: impl Into<String>) -> Self {
        Error::Backend {
            backend,
            message: msg.into(),
        }
    }

    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Error::InvalidKey {
            message: msg.into(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Compute { context, .. } | Error::Configuration { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Whether this error is a rate-limit denial (callers may serve stale data instead).
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Error::RateLimited { .. })
    }
}
