//! User-Agent sent by clients built from [`ClientOptions`](crate::ClientOptions).

/// Default User-Agent (`zurl/<version>`).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    format!("zurl/{}", env!("CARGO_PKG_VERSION"))
}
