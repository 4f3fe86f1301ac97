use std::net::TcpListener;
use std::panic::Location;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::MockServer;

const REQUIRE_SOCKET_TESTS_ENV: &str = "ZURL_REQUIRE_SOCKET_TESTS";

fn socket_tests_required() -> bool {
    std::env::var(REQUIRE_SOCKET_TESTS_ENV)
        .ok()
        .is_some_and(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
}

/// Returns true (after explaining why) when loopback sockets cannot be bound.
///
/// Panics instead when `ZURL_REQUIRE_SOCKET_TESTS` is set.
#[track_caller]
fn should_skip_socket_bound_test() -> bool {
    if TcpListener::bind("127.0.0.1:0").is_ok() {
        return false;
    }

    let location = Location::caller();
    let message = format!(
        "[socket-bound-test] cannot bind localhost socket at {}:{}; mock server unavailable",
        location.file(),
        location.line()
    );
    assert!(
        !socket_tests_required(),
        "{message}. Unset {REQUIRE_SOCKET_TESTS_ENV} to allow skipping."
    );
    eprintln!("{message}. Skipping test. Set {REQUIRE_SOCKET_TESTS_ENV}=1 to fail instead.");
    true
}

/// Starts a wiremock server, or returns `None` where sockets are unavailable.
pub(crate) async fn start_mock_server_or_skip() -> Option<MockServer> {
    if should_skip_socket_bound_test() {
        None
    } else {
        Some(MockServer::start().await)
    }
}

/// Serves `reply` verbatim on every connection and then closes it, for
/// responses wiremock cannot produce (lying `Content-Length`, truncated
/// bodies). Returns the base URL, or `None` where sockets are unavailable.
#[allow(clippy::unwrap_used)]
pub(crate) async fn serve_raw_or_skip(reply: &'static [u8]) -> Option<String> {
    if should_skip_socket_bound_test() {
        return None;
    }
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 4096];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    Some(format!("http://{addr}"))
}
