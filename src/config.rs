//! Process-wide defaults and environment-derived debug configuration.
//!
//! Debug flags are read once when a client is constructed; nothing in the
//! request path consults the environment afterwards.

use std::time::Duration;

/// Default per-call timeout applied by [`ClientOptions`](crate::ClientOptions) (60 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of redirect hops followed before giving up.
pub const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Timeout used by the `zurl` binary, which is expected to poll slow endpoints.
pub const CLI_DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Content type sent with JSON and raw byte bodies unless overridden.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type sent with form bodies unless overridden.
pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Content type used by binary uploads.
pub const BINARY_CONTENT_TYPE: &str = "binary/octet-stream";

/// Master switch for debug instrumentation.
pub const ENV_DEBUG: &str = "REQUEST_DEBUG";

/// Dump full connection details instead of the reuse summary.
pub const ENV_CONN_DEBUG: &str = "REQUEST_CONN_DEBUG";

/// Dump a parsed view of each buffered response body.
pub const ENV_RESPONSE_DEBUG: &str = "REQUEST_RESPONSE_DEBUG";

/// Dump the resolved client options on every call.
pub const ENV_CLIENT_DEBUG: &str = "REQUEST_CLIENT_DEBUG";

/// Debug instrumentation switches.
///
/// `enabled` gates everything else: granular flags have no effect while the
/// master switch is off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugFlags {
    /// Master switch (`REQUEST_DEBUG`).
    pub enabled: bool,
    /// Full connection detail (`REQUEST_CONN_DEBUG`).
    pub connection: bool,
    /// Parsed response body dump (`REQUEST_RESPONSE_DEBUG`).
    pub response_body: bool,
    /// Client option dump (`REQUEST_CLIENT_DEBUG`).
    pub client_options: bool,
}

impl DebugFlags {
    /// Reads the flags from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Reads the flags through an arbitrary lookup function.
    ///
    /// The master switch accepts `1`, `true`, `True` (on) and `0`, `false`,
    /// `False` (off); any other value, or no value, leaves it off. Granular
    /// flags are on whenever their variable is set to a non-empty value.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup(ENV_DEBUG).as_deref().and_then(parse_bool_flag).unwrap_or(false);
        let is_set = |name: &str| lookup(name).is_some_and(|value| !value.is_empty());

        Self {
            enabled,
            connection: is_set(ENV_CONN_DEBUG),
            response_body: is_set(ENV_RESPONSE_DEBUG),
            client_options: is_set(ENV_CLIENT_DEBUG),
        }
    }

    /// Flags with only the master switch turned on.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    pub(crate) fn dump_connection(self) -> bool {
        self.enabled && self.connection
    }

    pub(crate) fn dump_response_body(self) -> bool {
        self.enabled && self.response_body
    }

    pub(crate) fn dump_client_options(self) -> bool {
        self.enabled && self.client_options
    }
}

fn parse_bool_flag(value: &str) -> Option<bool> {
    match value {
        "1" | "true" | "True" => Some(true),
        "0" | "false" | "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_debug_flags_default_off_without_env() {
        let flags = DebugFlags::from_lookup(lookup_from(&[]));
        assert_eq!(flags, DebugFlags::default());
    }

    #[test]
    fn test_debug_flags_accepts_known_true_spellings() {
        for value in ["1", "true", "True"] {
            let flags = DebugFlags::from_lookup(lookup_from(&[(ENV_DEBUG, value)]));
            assert!(flags.enabled, "{value} should enable debug");
        }
    }

    #[test]
    fn test_debug_flags_rejects_unknown_spellings() {
        for value in ["0", "false", "False", "TRUE", "yes", ""] {
            let flags = DebugFlags::from_lookup(lookup_from(&[(ENV_DEBUG, value)]));
            assert!(!flags.enabled, "{value:?} should not enable debug");
        }
    }

    #[test]
    fn test_granular_flags_need_master_switch() {
        let flags = DebugFlags::from_lookup(lookup_from(&[
            (ENV_CONN_DEBUG, "1"),
            (ENV_RESPONSE_DEBUG, "yes"),
            (ENV_CLIENT_DEBUG, "x"),
        ]));
        assert!(flags.connection && flags.response_body && flags.client_options);
        assert!(!flags.dump_connection());
        assert!(!flags.dump_response_body());
        assert!(!flags.dump_client_options());

        let flags = DebugFlags {
            enabled: true,
            ..flags
        };
        assert!(flags.dump_connection());
        assert!(flags.dump_response_body());
        assert!(flags.dump_client_options());
    }

    #[test]
    fn test_granular_flag_empty_value_is_off() {
        let flags = DebugFlags::from_lookup(lookup_from(&[(ENV_DEBUG, "1"), (ENV_CONN_DEBUG, "")]));
        assert!(flags.enabled);
        assert!(!flags.connection);
    }
}
