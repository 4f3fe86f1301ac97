//! Reusable HTTP client.
//!
//! [`HttpClient`] owns one pooled transport and is meant to be created once
//! and shared (it is cheap to clone and safe to use from many tasks). Every
//! call returns a [`Response`] envelope instead of a `Result`: transport,
//! construction and body-read failures all land in [`Response::Failed`].
//!
//! # Example
//!
//! ```no_run
//! use zurl_core::{ClientOptions, HttpClient, Params};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::with_options(
//!     ClientOptions::default().with_timeout(Duration::from_secs(10)),
//! )?;
//! let response = client
//!     .get("https://httpbin.org/get", &Params::new(), &Params::new())
//!     .await;
//! println!("origin: {}", response.get_string("origin"));
//! # Ok(())
//! # }
//! ```

pub(crate) mod body;
mod trace;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, instrument};
use url::Url;

use self::body::{BufferPlan, read_body};
use crate::config::{DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DebugFlags};
use crate::error::RequestError;
use crate::request::{Body, Method, Params, Request};
use crate::response::{Response, ResponseMeta};
use crate::user_agent;

/// Decides whether to follow a redirect given the URLs visited so far
/// (oldest first, the proposed next hop last).
pub type RedirectFn = dyn Fn(&[Url]) -> bool + Send + Sync;

/// What the client does when a server answers with a redirect.
#[derive(Clone)]
pub enum RedirectPolicy {
    /// Follow up to `n` hops, then fail with a transport error.
    Limited(usize),
    /// Never follow; the redirect response itself is returned.
    None,
    /// Follow while the function returns true; otherwise return the redirect response.
    Custom(Arc<RedirectFn>),
}

impl RedirectPolicy {
    /// Wraps a redirect predicate.
    pub fn custom<F>(decide: F) -> Self
    where
        F: Fn(&[Url]) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(decide))
    }

    fn to_reqwest(&self) -> reqwest::redirect::Policy {
        match self {
            Self::Limited(max) => reqwest::redirect::Policy::limited(*max),
            Self::None => reqwest::redirect::Policy::none(),
            Self::Custom(decide) => {
                let decide = Arc::clone(decide);
                reqwest::redirect::Policy::custom(move |attempt| {
                    let mut history = attempt.previous().to_vec();
                    history.push(attempt.url().clone());
                    if decide(&history) {
                        attempt.follow()
                    } else {
                        attempt.stop()
                    }
                })
            }
        }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::Limited(DEFAULT_MAX_REDIRECTS)
    }
}

impl fmt::Debug for RedirectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(max) => f.debug_tuple("Limited").field(max).finish(),
            Self::None => f.write_str("None"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Client configuration, resolved once when the client is built.
///
/// Either fill the fields directly (`..ClientOptions::default()`) or chain the
/// `with_*` methods.
///
/// # Default Values
///
/// - `debug`: read from `REQUEST_DEBUG` and friends
/// - `timeout`: 60 seconds
/// - `redirect`: stop after 10 hops
/// - TLS verification on, no pre-size hint, reqwest pool defaults
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Debug instrumentation switches.
    pub debug: DebugFlags,
    /// Whole-call timeout (connect, send and body read).
    pub timeout: Duration,
    /// Connection establishment timeout.
    pub connect_timeout: Option<Duration>,
    /// Redirect handling.
    pub redirect: RedirectPolicy,
    /// Accept invalid TLS certificates.
    pub insecure_skip_verify: bool,
    /// Expected response size in bytes, used to pre-size body buffers.
    pub presize_hint: Option<usize>,
    /// Maximum idle connections kept per host.
    pub pool_max_idle_per_host: Option<usize>,
    /// Existing transport to reuse. When set, only `debug` and `presize_hint`
    /// apply; everything else is whatever the transport was built with.
    pub transport: Option<reqwest::Client>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            debug: DebugFlags::from_env(),
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: None,
            redirect: RedirectPolicy::default(),
            insecure_skip_verify: false,
            presize_hint: None,
            pool_max_idle_per_host: None,
            transport: None,
        }
    }
}

impl ClientOptions {
    /// Sets the debug switches.
    #[must_use]
    pub fn with_debug(mut self, debug: DebugFlags) -> Self {
        self.debug = debug;
        self
    }

    /// Sets the whole-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets the redirect policy.
    #[must_use]
    pub fn with_redirect(mut self, redirect: RedirectPolicy) -> Self {
        self.redirect = redirect;
        self
    }

    /// Disables TLS certificate verification.
    #[must_use]
    pub fn with_insecure_skip_verify(mut self) -> Self {
        self.insecure_skip_verify = true;
        self
    }

    /// Sets the response pre-size hint in bytes.
    #[must_use]
    pub fn with_presize_hint(mut self, bytes: usize) -> Self {
        self.presize_hint = Some(bytes);
        self
    }

    /// Caps idle pooled connections per host.
    #[must_use]
    pub fn with_pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// Reuses an existing transport.
    #[must_use]
    pub fn with_transport(mut self, transport: reqwest::Client) -> Self {
        self.transport = Some(transport);
        self
    }
}

/// Shared HTTP client.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    options: Arc<ClientOptions>,
}

impl HttpClient {
    /// Creates a client with [`ClientOptions::default`].
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] if the transport cannot be initialized.
    pub fn new() -> Result<Self, RequestError> {
        Self::with_options(ClientOptions::default())
    }

    /// Creates a client from explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::ClientBuild`] if the transport cannot be initialized.
    #[instrument(level = "debug", skip(options), fields(timeout = ?options.timeout, debug = options.debug.enabled))]
    pub fn with_options(options: ClientOptions) -> Result<Self, RequestError> {
        let client = build_transport(&options)?;
        debug!("HTTP client ready");
        Ok(Self {
            client,
            options: Arc::new(options),
        })
    }

    /// The resolved options.
    #[must_use]
    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// The underlying reqwest client.
    #[must_use]
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }

    /// Sends `request` and reads the whole body.
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.url()))]
    pub async fn execute(&self, request: Request) -> Response {
        self.dispatch(request, true).await
    }

    /// Sends `request` and returns with the body stream still open.
    ///
    /// The caller owns the body: read it with [`Response::into_buffered`] or
    /// drop the response to release the connection.
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.url()))]
    pub async fn execute_raw(&self, request: Request) -> Response {
        self.dispatch(request, false).await
    }

    /// Builds and executes a request from loose parts.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        match shape(method, url, body.into(), query, headers) {
            Ok(request) => self.execute(request).await,
            Err(error) => Response::failed(error),
        }
    }

    /// Like [`send`](Self::send) but leaves the body stream open.
    pub async fn send_raw(
        &self,
        method: Method,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        match shape(method, url, body.into(), query, headers) {
            Ok(request) => self.execute_raw(request).await,
            Err(error) => Response::failed(error),
        }
    }

    /// `GET url` with query parameters and headers.
    pub async fn get(&self, url: &str, query: &Params, headers: &Params) -> Response {
        self.send(Method::Get, url, Body::Empty, query, headers).await
    }

    /// `POST url` with a body.
    pub async fn post(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send(Method::Post, url, body, query, headers).await
    }

    /// `PUT url` with a body.
    pub async fn put(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send(Method::Put, url, body, query, headers).await
    }

    /// `PATCH url` with a body.
    pub async fn patch(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send(Method::Patch, url, body, query, headers).await
    }

    /// `DELETE url` with an optional body.
    pub async fn delete(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send(Method::Delete, url, body, query, headers).await
    }

    /// Raw `GET`; see [`execute_raw`](Self::execute_raw).
    pub async fn get_raw(&self, url: &str, query: &Params, headers: &Params) -> Response {
        self.send_raw(Method::Get, url, Body::Empty, query, headers).await
    }

    /// Raw `POST`; see [`execute_raw`](Self::execute_raw).
    pub async fn post_raw(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send_raw(Method::Post, url, body, query, headers).await
    }

    /// Raw `PUT`; see [`execute_raw`](Self::execute_raw).
    pub async fn put_raw(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send_raw(Method::Put, url, body, query, headers).await
    }

    /// Raw `PATCH`; see [`execute_raw`](Self::execute_raw).
    pub async fn patch_raw(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send_raw(Method::Patch, url, body, query, headers).await
    }

    /// Raw `DELETE`; see [`execute_raw`](Self::execute_raw).
    pub async fn delete_raw(
        &self,
        url: &str,
        body: impl Into<Body>,
        query: &Params,
        headers: &Params,
    ) -> Response {
        self.send_raw(Method::Delete, url, body, query, headers).await
    }

    async fn dispatch(&self, request: Request, materialize: bool) -> Response {
        let flags = self.options.debug;
        let started = Instant::now();
        if flags.enabled {
            trace::log_request(&request);
        }
        if flags.dump_client_options() {
            trace::log_client_options(&self.options);
        }

        let url = request.full_url().to_string();
        let cancel = request.cancel_token().cloned();
        let call = self.perform(request, &url, materialize);
        let response = match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Response::failed(RequestError::cancelled(&url)),
                    response = call => response,
                }
            }
            None => call.await,
        };

        if flags.enabled {
            trace::log_outcome(&response, started.elapsed(), flags);
        }
        response
    }

    async fn perform(&self, request: Request, url: &str, materialize: bool) -> Response {
        let builder = match request.into_reqwest(&self.client) {
            Ok(builder) => builder,
            Err(error) => return Response::failed(error),
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(source) => {
                debug!(error = %source, "request failed before a response arrived");
                return Response::failed(RequestError::transport(url, source));
            }
        };

        let meta = ResponseMeta::from_reqwest(&response);
        if self.options.debug.enabled {
            trace::log_connection(&meta, self.options.debug);
        }
        if !materialize {
            return Response::Streaming { meta, response };
        }

        let plan = BufferPlan::choose(meta.content_length(), self.options.presize_hint);
        debug!(?plan, status = meta.status().as_u16(), "reading response body");
        match read_body(response.bytes_stream(), plan).await {
            Ok(body) => Response::Buffered { meta, body },
            Err(source) => Response::Failed {
                meta: Some(meta),
                error: RequestError::read_body(url, source),
            },
        }
    }
}

fn shape(
    method: Method,
    url: &str,
    body: Body,
    query: &Params,
    headers: &Params,
) -> Result<Request, RequestError> {
    Request::builder(method, url)
        .queries(query)
        .headers(headers)
        .body(body)
        .build()
}

fn build_transport(options: &ClientOptions) -> Result<reqwest::Client, RequestError> {
    if let Some(transport) = &options.transport {
        return Ok(transport.clone());
    }

    let mut builder = reqwest::Client::builder()
        .timeout(options.timeout)
        .redirect(options.redirect.to_reqwest())
        .gzip(true)
        .cookie_store(true)
        .user_agent(user_agent::default_user_agent());
    if let Some(connect_timeout) = options.connect_timeout {
        builder = builder.connect_timeout(connect_timeout);
    }
    if let Some(max_idle) = options.pool_max_idle_per_host {
        builder = builder.pool_max_idle_per_host(max_idle);
    }
    if options.insecure_skip_verify {
        builder = builder.danger_accept_invalid_certs(true);
    }
    if options.debug.enabled {
        builder = builder.dns_resolver(Arc::new(trace::TracingResolver));
    }
    if options.debug.dump_connection() {
        // Logs every connection read/write with its id, which shows pool reuse.
        builder = builder.connection_verbose(true);
    }
    builder
        .build()
        .map_err(|source| RequestError::ClientBuild { source })
}
