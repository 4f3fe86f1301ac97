//! Immutable request descriptors.
//!
//! A [`Request`] describes one HTTP call. Sending consumes it, so reusing a
//! descriptor (for a retry, or from several tasks) always goes through an
//! explicit `clone()`.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};
use crate::error::RequestError;

/// Query parameter or header mapping. Keys are unique; order is irrelevant.
pub type Params = BTreeMap<String, String>;

/// Builds a [`Params`] map from key/value pairs.
pub fn params<K, V, I>(pairs: I) -> Params
where
    K: Into<String>,
    V: Into<String>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.into()))
        .collect()
}

/// Supported HTTP methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl Method {
    /// Upper-case wire name of the method.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    pub(crate) fn to_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = RequestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(RequestError::invalid_method(s)),
        }
    }
}

/// Request body. Structured values are serialized when the request is sent.
#[derive(Debug, Clone, Default)]
pub enum Body {
    /// No body.
    #[default]
    Empty,
    /// Opaque bytes sent as-is.
    Bytes(Bytes),
    /// JSON document.
    Json(serde_json::Value),
    /// URL-encoded form fields.
    Form(Params),
    /// `multipart/form-data` with file parts and text fields.
    Multipart(Multipart),
}

impl Body {
    /// Captures any serializable value as a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Serialize`] if the value cannot be represented as JSON.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, RequestError> {
        serde_json::to_value(value)
            .map(Self::Json)
            .map_err(|source| RequestError::Serialize { source })
    }

    /// Returns true when no body will be sent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    fn default_content_type(&self) -> Option<&'static str> {
        match self {
            Self::Empty => None,
            Self::Bytes(_) | Self::Json(_) => Some(JSON_CONTENT_TYPE),
            Self::Form(_) => Some(FORM_CONTENT_TYPE),
            // The transport sets the boundary-bearing content type.
            Self::Multipart(_) => None,
        }
    }

    fn encode(&self) -> Result<Option<Bytes>, RequestError> {
        match self {
            Self::Empty | Self::Multipart(_) => Ok(None),
            Self::Bytes(bytes) => Ok(Some(bytes.clone())),
            Self::Json(value) => serde_json::to_vec(value)
                .map(|encoded| Some(Bytes::from(encoded)))
                .map_err(|source| RequestError::Serialize { source }),
            Self::Form(fields) => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(fields)
                    .finish();
                Ok(Some(Bytes::from(encoded)))
            }
        }
    }
}

impl From<Multipart> for Body {
    fn from(form: Multipart) -> Self {
        Self::Multipart(form)
    }
}

/// A `multipart/form-data` body.
///
/// Parts are kept as bytes so the body can be cloned and re-sent; the
/// reqwest form is assembled when the request is sent.
#[derive(Debug, Clone, Default)]
pub struct Multipart {
    files: Vec<FilePart>,
    fields: Params,
}

#[derive(Debug, Clone)]
struct FilePart {
    field: String,
    file_name: String,
    data: Bytes,
}

impl Multipart {
    /// Creates an empty form.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file part under `field`.
    #[must_use]
    pub fn file(
        mut self,
        field: impl Into<String>,
        file_name: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        self.files.push(FilePart {
            field: field.into(),
            file_name: file_name.into(),
            data: data.into(),
        });
        self
    }

    /// Adds a plain text field.
    #[must_use]
    pub fn text(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Number of file parts.
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// The plain text fields.
    #[must_use]
    pub fn fields(&self) -> &Params {
        &self.fields
    }

    fn to_form(&self) -> reqwest::multipart::Form {
        let mut form = reqwest::multipart::Form::new();
        for part in &self.files {
            let file = reqwest::multipart::Part::bytes(part.data.to_vec())
                .file_name(part.file_name.clone());
            form = form.part(part.field.clone(), file);
        }
        for (key, value) in &self.fields {
            form = form.text(key.clone(), value.clone());
        }
        form
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self {
        Self::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Body {
    fn from(text: String) -> Self {
        Self::Bytes(Bytes::from(text))
    }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self {
        Self::Json(value)
    }
}

/// Description of one HTTP call.
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    query: Params,
    headers: Params,
    body: Body,
    content_type: Option<String>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl Request {
    /// Starts building a request.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(method, url.into())
    }

    /// Starts building a `GET` request.
    pub fn get(url: impl Into<String>) -> RequestBuilder {
        Self::builder(Method::Get, url)
    }

    /// The request method.
    #[must_use]
    pub fn method(&self) -> Method {
        self.method
    }

    /// The target URL without the extra query parameters.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Extra query parameters appended at send time.
    #[must_use]
    pub fn query(&self) -> &Params {
        &self.query
    }

    /// Request headers.
    #[must_use]
    pub fn headers(&self) -> &Params {
        &self.headers
    }

    /// Request body.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Content type sent with the body, after defaults and overrides.
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.content_type
            .as_deref()
            .or_else(|| self.body.default_content_type())
    }

    /// Per-request timeout override.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Cancellation token observed while the request is in flight.
    #[must_use]
    pub fn cancel_token(&self) -> Option<&CancellationToken> {
        self.cancel.as_ref()
    }

    /// The URL actually requested: target URL plus query parameters.
    #[must_use]
    pub fn full_url(&self) -> Url {
        let mut url = self.url.clone();
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        url
    }

    pub(crate) fn header_map(&self) -> Result<HeaderMap, RequestError> {
        let mut map = HeaderMap::with_capacity(self.headers.len() + 1);
        if let Some(content_type) = self.body.default_content_type() {
            map.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        for (name, value) in &self.headers {
            let (name, value) = parse_header(name, value)?;
            map.insert(name, value);
        }
        if let Some(content_type) = &self.content_type {
            let value = HeaderValue::from_str(content_type)
                .map_err(|_| RequestError::invalid_header(CONTENT_TYPE.as_str()))?;
            map.insert(CONTENT_TYPE, value);
        }
        Ok(map)
    }

    /// Converts the descriptor into a ready-to-send reqwest builder.
    pub(crate) fn into_reqwest(
        self,
        client: &reqwest::Client,
    ) -> Result<reqwest::RequestBuilder, RequestError> {
        let headers = self.header_map()?;
        let mut builder = client
            .request(self.method.to_reqwest(), self.full_url())
            .headers(headers);
        if let Body::Multipart(form) = &self.body {
            builder = builder.multipart(form.to_form());
        } else if let Some(body) = self.body.encode()? {
            builder = builder.body(body);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(timeout);
        }
        Ok(builder)
    }
}

fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), RequestError> {
    let header_name =
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| RequestError::invalid_header(name))?;
    let header_value =
        HeaderValue::from_str(value).map_err(|_| RequestError::invalid_header(name))?;
    Ok((header_name, header_value))
}

/// Builder for [`Request`]. Validation is deferred to [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    method: Method,
    url: String,
    query: Params,
    headers: Params,
    body: Result<Body, String>,
    content_type: Option<String>,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl RequestBuilder {
    fn new(method: Method, url: String) -> Self {
        Self {
            method,
            url,
            query: Params::new(),
            headers: Params::new(),
            body: Ok(Body::Empty),
            content_type: None,
            timeout: None,
            cancel: None,
        }
    }

    /// Adds one query parameter, replacing an earlier value for the same key.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Adds every pair from `query`.
    #[must_use]
    pub fn queries(mut self, query: &Params) -> Self {
        self.query
            .extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Adds one header, replacing an earlier value for the same key.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds every pair from `headers`.
    #[must_use]
    pub fn headers(mut self, headers: &Params) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn body(mut self, body: impl Into<Body>) -> Self {
        self.body = Ok(body.into());
        self
    }

    /// Sets a JSON body from any serializable value.
    #[must_use]
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        self.body = Body::json(value).map_err(|error| error.to_string());
        self
    }

    /// Sets a URL-encoded form body.
    #[must_use]
    pub fn form(mut self, fields: Params) -> Self {
        self.body = Ok(Body::Form(fields));
        self
    }

    /// Overrides the content type derived from the body.
    #[must_use]
    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Overrides the client timeout for this request only.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Aborts the request when `token` is cancelled.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validates and freezes the request.
    ///
    /// # Errors
    ///
    /// Returns a construction error for a malformed URL, header, or body.
    pub fn build(self) -> Result<Request, RequestError> {
        let url = Url::parse(&self.url).map_err(|_| RequestError::invalid_url(&self.url))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(RequestError::invalid_url(&self.url));
        }
        for (name, value) in &self.headers {
            parse_header(name, value)?;
        }
        let body = self.body.map_err(|message| RequestError::Serialize {
            source: <serde_json::Error as serde::ser::Error>::custom(message),
        })?;

        let request = Request {
            method: self.method,
            url,
            query: self.query,
            headers: self.headers,
            body,
            content_type: self.content_type,
            timeout: self.timeout,
            cancel: self.cancel,
        };
        // Surface a bad content-type override before any I/O.
        request.header_map()?;
        Ok(request)
    }
}
