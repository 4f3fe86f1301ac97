//! Debug instrumentation for client calls.
//!
//! Everything here only observes: events go to the `zurl::debug` tracing
//! target and no function can fail or change the request it describes.

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use tracing::debug;

use super::ClientOptions;
use crate::config::DebugFlags;
use crate::request::Request;
use crate::response::{Response, ResponseMeta};

/// System resolver that reports lookups as `dns start` / `dns done` events.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TracingResolver;

impl Resolve for TracingResolver {
    fn resolve(&self, name: Name) -> Resolving {
        Box::pin(async move {
            let host = name.as_str().to_string();
            debug!(target: "zurl::debug", host = %host, "dns start");
            let resolved = tokio::net::lookup_host((host.as_str(), 0)).await;
            match resolved {
                Ok(addrs) => {
                    let addrs: Vec<SocketAddr> = addrs.collect();
                    debug!(target: "zurl::debug", host = %host, addrs = ?addrs, "dns done");
                    let addrs: Addrs = Box::new(addrs.into_iter());
                    Ok(addrs)
                }
                Err(error) => {
                    debug!(target: "zurl::debug", host = %host, error = %error, "dns done");
                    Err(Box::new(error) as Box<dyn std::error::Error + Send + Sync>)
                }
            }
        })
    }
}

pub(crate) fn log_request(request: &Request) {
    debug!(
        target: "zurl::debug",
        method = %request.method(),
        url = %request.full_url(),
        headers = ?request.headers(),
        content_type = request.content_type().unwrap_or(""),
        has_body = !request.body().is_empty(),
        timeout = ?request.timeout(),
        "request options"
    );
}

pub(crate) fn log_client_options(options: &ClientOptions) {
    debug!(target: "zurl::debug", options = ?options, "client options");
}

pub(crate) fn log_connection(meta: &ResponseMeta, flags: DebugFlags) {
    if flags.dump_connection() {
        debug!(
            target: "zurl::debug",
            remote_addr = ?meta.remote_addr(),
            url = %meta.url(),
            status = meta.status().as_u16(),
            content_length = ?meta.content_length(),
            headers = ?meta.headers(),
            "connection acquired"
        );
    } else {
        debug!(target: "zurl::debug", remote_addr = ?meta.remote_addr(), "connection acquired");
    }
}

pub(crate) fn log_outcome(response: &Response, elapsed: Duration, flags: DebugFlags) {
    #[allow(clippy::cast_possible_truncation)]
    let elapsed_ms = elapsed.as_millis() as u64;
    match response {
        Response::Failed { error, .. } => {
            debug!(target: "zurl::debug", elapsed_ms, error = %error, "request failed");
        }
        Response::Streaming { meta, .. } => {
            debug!(
                target: "zurl::debug",
                elapsed_ms,
                status = meta.status().as_u16(),
                "response headers received; body left open"
            );
        }
        Response::Buffered { meta, body } => {
            debug!(
                target: "zurl::debug",
                elapsed_ms,
                status = meta.status().as_u16(),
                bytes = body.len(),
                "response received"
            );
            if flags.dump_response_body() {
                log_body(body);
            }
        }
    }
}

fn log_body(body: &[u8]) {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(parsed) => {
            let pretty = serde_json::to_string_pretty(&parsed).unwrap_or_default();
            debug!(target: "zurl::debug", body = %pretty, "response body");
        }
        Err(_) => {
            debug!(target: "zurl::debug", body = %String::from_utf8_lossy(body), "response body");
        }
    }
}
