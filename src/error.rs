//! Error types for request construction, transport, retry configuration and
//! pipeline stages.
//!
//! Every variant carries the context needed to attribute the failure (URL,
//! header name, stage index) so callers never have to dig through logs.

use thiserror::Error;

/// Boxed error produced by caller-supplied pipeline stages.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while building, sending or reading a request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The URL could not be parsed.
    #[error("invalid URL: {url}")]
    InvalidUrl {
        /// The rejected URL text.
        url: String,
    },

    /// The method is not one of GET, POST, PUT, PATCH, DELETE.
    #[error("{method} method does not match [GET,POST,PUT,PATCH,DELETE]")]
    InvalidMethod {
        /// The rejected method text.
        method: String,
    },

    /// A header name or value is not valid HTTP.
    #[error("invalid header {name}")]
    InvalidHeader {
        /// The offending header name.
        name: String,
    },

    /// A structured body could not be serialized.
    #[error("failed to serialize request body: {source}")]
    Serialize {
        /// The underlying serialization error.
        #[source]
        source: serde_json::Error,
    },

    /// A multipart file part has no file name entry among the form fields.
    #[error("{field} is not found in the fields")]
    MissingFileName {
        /// The file's form field.
        field: String,
    },

    /// The underlying transport could not be constructed.
    #[error("failed to build HTTP client: {source}")]
    ClientBuild {
        /// The underlying builder error.
        #[source]
        source: reqwest::Error,
    },

    /// Network-level failure (DNS, connect, TLS, redirect policy).
    #[error("transport error requesting {url}: {source}")]
    Transport {
        /// The URL being requested.
        url: String,
        /// The underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The call did not complete within the configured timeout.
    #[error("timeout requesting {url}")]
    Timeout {
        /// The URL that timed out.
        url: String,
    },

    /// The response arrived but its body could not be read.
    #[error("failed to read response body from {url}: {source}")]
    ReadBody {
        /// The URL whose body failed.
        url: String,
        /// The underlying read error.
        #[source]
        source: reqwest::Error,
    },

    /// The request's cancellation token fired before the call completed.
    #[error("request to {url} cancelled")]
    Cancelled {
        /// The URL being requested.
        url: String,
    },

    /// The response body could not be decoded into the requested type.
    #[error("failed to decode response body: {source}")]
    Decode {
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    /// A pipeline stage failed; `index` is the zero-based producer index.
    #[error("ins[{index}]:[{source}]")]
    Stage {
        /// Zero-based index of the failing producer.
        index: usize,
        /// The stage's own error.
        #[source]
        source: BoxError,
    },
}

impl RequestError {
    /// Creates an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Creates an invalid method error.
    pub fn invalid_method(method: impl Into<String>) -> Self {
        Self::InvalidMethod {
            method: method.into(),
        }
    }

    /// Creates an invalid header error.
    pub fn invalid_header(name: impl Into<String>) -> Self {
        Self::InvalidHeader { name: name.into() }
    }

    /// Creates a missing multipart file name error.
    pub fn missing_file_name(field: impl Into<String>) -> Self {
        Self::MissingFileName {
            field: field.into(),
        }
    }

    /// Classifies a reqwest send error, promoting timeouts.
    pub fn transport(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::Transport { url, source }
        }
    }

    /// Classifies a reqwest body error, promoting timeouts.
    pub fn read_body(url: impl Into<String>, source: reqwest::Error) -> Self {
        let url = url.into();
        if source.is_timeout() {
            Self::Timeout { url }
        } else {
            Self::ReadBody { url, source }
        }
    }

    /// Creates a cancellation error.
    pub fn cancelled(url: impl Into<String>) -> Self {
        Self::Cancelled { url: url.into() }
    }

    /// Wraps a stage failure with its producer index.
    pub fn stage(index: usize, source: impl Into<BoxError>) -> Self {
        Self::Stage {
            index,
            source: source.into(),
        }
    }

    /// Returns true for failures a later attempt might not hit again.
    ///
    /// Construction and configuration problems are deterministic, so only
    /// transport, timeout and body-read failures qualify.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::ReadBody { .. }
        )
    }

    /// Returns the producer index for stage failures.
    #[must_use]
    pub fn stage_index(&self) -> Option<usize> {
        match self {
            Self::Stage { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Retry-loop configuration problems, reported before any request is sent.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// None of status code, header set or JSON-path set was given.
    #[error("one of expect status code, expect header or expect json must be set")]
    MissingExpectation,

    /// More than one expectation kind was given.
    #[error("only one of expect status code, expect header or expect json may be set, got: {kinds}")]
    ConflictingExpectations {
        /// The kinds that were set, comma separated.
        kinds: String,
    },

    /// A header or JSON-path expectation with no entries.
    #[error("{kind} expectation has no entries")]
    EmptyExpectation {
        /// `header` or `json`.
        kind: &'static str,
    },

    /// The retry loop only sends GET requests.
    #[error("{method} method is not supported for retry, only GET is")]
    UnsupportedMethod {
        /// The rejected method.
        method: String,
    },

    /// The request itself could not be built.
    #[error("invalid request: {source}")]
    Request {
        /// The construction error.
        #[from]
        source: RequestError,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display_contains_url() {
        let error = RequestError::Timeout {
            url: "https://example.com/slow".to_string(),
        };
        let msg = error.to_string();
        assert!(msg.contains("timeout"), "Expected 'timeout' in: {msg}");
        assert!(msg.contains("https://example.com/slow"));
    }

    #[test]
    fn test_invalid_method_display_lists_supported_methods() {
        let msg = RequestError::invalid_method("TRACE").to_string();
        assert!(msg.starts_with("TRACE method"));
        assert!(msg.contains("GET,POST,PUT,PATCH,DELETE"));
    }

    #[test]
    fn test_stage_error_mentions_index_and_cause() {
        let error = RequestError::stage(3, "upstream returned garbage");
        assert_eq!(error.stage_index(), Some(3));
        assert_eq!(error.to_string(), "ins[3]:[upstream returned garbage]");
    }

    #[test]
    fn test_stage_error_keeps_source_chain() {
        let inner = RequestError::invalid_url("::nope");
        let error = RequestError::stage(0, inner);
        let source = std::error::Error::source(&error).unwrap();
        assert!(source.to_string().contains("::nope"));
    }

    #[test]
    fn test_retryable_classification() {
        assert!(RequestError::Timeout { url: "u".into() }.is_retryable());
        assert!(!RequestError::cancelled("u").is_retryable());
        assert!(!RequestError::invalid_url("u").is_retryable());
        assert!(!RequestError::invalid_header("X-Bad").is_retryable());
        assert!(!RequestError::stage(1, "boom").is_retryable());
    }

    #[test]
    fn test_config_error_wraps_request_error() {
        let error: ConfigError = RequestError::invalid_url("ftp://x").into();
        assert!(matches!(error, ConfigError::Request { .. }));
        assert!(error.to_string().contains("ftp://x"));
    }

    #[test]
    fn test_conflicting_expectations_lists_kinds() {
        let error = ConfigError::ConflictingExpectations {
            kinds: "status code, header".into(),
        };
        assert!(error.to_string().ends_with("got: status code, header"));
    }
}
