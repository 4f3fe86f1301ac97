//! Success conditions for retried requests.
//!
//! [`evaluate`] is pure: it inspects a [`Response`] against an [`Expectation`]
//! and reports every key it checked. Header and JSON-path expectations are
//! conjunctions; one mismatch anywhere fails the whole expectation.

use crate::error::ConfigError;
use crate::request::Params;
use crate::response::Response;

/// What a response must look like to count as a success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Exact status code.
    StatusCode(u16),
    /// Every header present with exactly this value.
    Headers(Params),
    /// Every JSON path stringifies to exactly this value.
    JsonPaths(Params),
}

impl Expectation {
    /// Picks the single expectation among optional parts.
    ///
    /// Empty maps count as "not given".
    ///
    /// # Errors
    ///
    /// [`ConfigError::MissingExpectation`] when nothing is given and
    /// [`ConfigError::ConflictingExpectations`] when more than one kind is.
    pub fn from_parts(
        status_code: Option<u16>,
        headers: Params,
        json_paths: Params,
    ) -> Result<Self, ConfigError> {
        let mut candidates = Vec::with_capacity(3);
        if let Some(code) = status_code {
            candidates.push(Self::StatusCode(code));
        }
        if !headers.is_empty() {
            candidates.push(Self::Headers(headers));
        }
        if !json_paths.is_empty() {
            candidates.push(Self::JsonPaths(json_paths));
        }

        match candidates.len() {
            0 => Err(ConfigError::MissingExpectation),
            1 => Ok(candidates.remove(0)),
            _ => Err(ConfigError::ConflictingExpectations {
                kinds: candidates
                    .iter()
                    .map(Self::kind)
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::StatusCode(_) => "status code",
            Self::Headers(_) => "header",
            Self::JsonPaths(_) => "json",
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Headers(map) | Self::JsonPaths(map) if map.is_empty() => {
                Err(ConfigError::EmptyExpectation { kind: self.kind() })
            }
            _ => Ok(()),
        }
    }
}

/// One compared key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Header name, JSON path, or `status code`.
    pub key: String,
    /// Value the caller asked for.
    pub expected: String,
    /// Value the response had; empty when absent.
    pub actual: String,
    /// Whether `actual == expected`.
    pub matched: bool,
}

impl Check {
    fn new(key: impl Into<String>, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        let expected = expected.into();
        let actual = actual.into();
        Self {
            key: key.into(),
            matched: expected == actual,
            expected,
            actual,
        }
    }
}

/// Outcome of evaluating one response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchReport {
    /// The response carried an error, so nothing was compared.
    Failed {
        /// Display form of the response error.
        error: String,
    },
    /// The keys that were compared.
    Checked(Vec<Check>),
}

impl MatchReport {
    /// True when at least one key was compared and all of them matched.
    #[must_use]
    pub fn matched(&self) -> bool {
        match self {
            Self::Failed { .. } => false,
            Self::Checked(checks) => !checks.is_empty() && checks.iter().all(|check| check.matched),
        }
    }

    /// The individual comparisons; empty for failed responses.
    #[must_use]
    pub fn checks(&self) -> &[Check] {
        match self {
            Self::Failed { .. } => &[],
            Self::Checked(checks) => checks,
        }
    }
}

/// Compares `response` against `expectation`.
#[must_use]
pub fn evaluate(response: &Response, expectation: &Expectation) -> MatchReport {
    if let Some(error) = response.error() {
        return MatchReport::Failed {
            error: error.to_string(),
        };
    }

    let checks = match expectation {
        Expectation::StatusCode(code) => {
            let actual = response
                .status()
                .map(|status| status.as_u16().to_string())
                .unwrap_or_default();
            vec![Check::new("status code", code.to_string(), actual)]
        }
        Expectation::Headers(headers) => headers
            .iter()
            .map(|(name, expected)| {
                Check::new(name, expected, response.header(name).unwrap_or_default())
            })
            .collect(),
        Expectation::JsonPaths(paths) => paths
            .iter()
            .map(|(path, expected)| Check::new(path, expected, response.get_string(path)))
            .collect(),
    };
    MatchReport::Checked(checks)
}

/// Shorthand for `evaluate(response, expectation).matched()`.
#[must_use]
pub fn matches(response: &Response, expectation: &Expectation) -> bool {
    evaluate(response, expectation).matched()
}
