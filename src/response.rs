//! Response envelope returned by every client call.
//!
//! A [`Response`] is exactly one of: an open body stream, a materialized
//! buffer, or an error. Status and headers travel alongside in
//! [`ResponseMeta`] whenever the server answered, including when the body
//! failed to read afterwards.

use std::net::SocketAddr;

use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use url::Url;

use crate::client::body::{BufferPlan, read_body};
use crate::error::RequestError;
use crate::jsonpath::{self, PathValue};

/// Status line and headers of a response.
#[derive(Debug, Clone)]
pub struct ResponseMeta {
    status: StatusCode,
    headers: HeaderMap,
    content_length: Option<u64>,
    url: Url,
    remote_addr: Option<SocketAddr>,
}

impl ResponseMeta {
    /// Creates metadata for a synthesized response.
    #[must_use]
    pub fn new(status: StatusCode, headers: HeaderMap, url: Url) -> Self {
        Self {
            status,
            headers,
            content_length: None,
            url,
            remote_addr: None,
        }
    }

    pub(crate) fn from_reqwest(response: &reqwest::Response) -> Self {
        Self {
            status: response.status(),
            headers: response.headers().clone(),
            content_length: response.content_length(),
            url: response.url().clone(),
            remote_addr: response.remote_addr(),
        }
    }

    /// Response status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Advertised body length, when the server sent one.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Final URL after redirects.
    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Address of the peer that served the response.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

/// Result of one request attempt.
#[derive(Debug)]
pub enum Response {
    /// The body stream is still open; the caller owns reading or dropping it.
    Streaming {
        /// Status and headers.
        meta: ResponseMeta,
        /// The open transport response.
        response: reqwest::Response,
    },
    /// The body has been fully read and the stream closed.
    Buffered {
        /// Status and headers.
        meta: ResponseMeta,
        /// The materialized body.
        body: Bytes,
    },
    /// The call failed. `meta` is present when the server answered before the failure.
    Failed {
        /// Status and headers, if a response arrived.
        meta: Option<ResponseMeta>,
        /// What went wrong.
        error: RequestError,
    },
}

impl Response {
    /// Wraps an error that happened before any response arrived.
    #[must_use]
    pub fn failed(error: RequestError) -> Self {
        Self::Failed { meta: None, error }
    }

    /// Creates a buffered response.
    #[must_use]
    pub fn buffered(meta: ResponseMeta, body: impl Into<Bytes>) -> Self {
        Self::Buffered {
            meta,
            body: body.into(),
        }
    }

    /// Status and headers, when the server answered.
    #[must_use]
    pub fn meta(&self) -> Option<&ResponseMeta> {
        match self {
            Self::Streaming { meta, .. } | Self::Buffered { meta, .. } => Some(meta),
            Self::Failed { meta, .. } => meta.as_ref(),
        }
    }

    /// Response status, when the server answered.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        self.meta().map(ResponseMeta::status)
    }

    /// Response headers, when the server answered.
    #[must_use]
    pub fn headers(&self) -> Option<&HeaderMap> {
        self.meta().map(ResponseMeta::headers)
    }

    /// First value of header `name` (case-insensitive), if it is valid text.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers()?.get(name)?.to_str().ok()
    }

    /// The error, for failed responses.
    #[must_use]
    pub fn error(&self) -> Option<&RequestError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns true for failed responses.
    #[must_use]
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Consumes the response, returning its error if it failed.
    #[must_use]
    pub fn into_error(self) -> Option<RequestError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    /// The materialized body. `None` while the stream is open or after a failure.
    #[must_use]
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Buffered { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The materialized body as text, replacing invalid UTF-8.
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.body()
            .map(|body| String::from_utf8_lossy(body).into_owned())
    }

    /// Returns true for a successful call with status 200.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        !self.is_error() && self.status() == Some(StatusCode::OK)
    }

    /// Returns true when the call succeeded and `path` stringifies to `expected`.
    #[must_use]
    pub fn ok_by_json_key(&self, path: &str, expected: &str) -> bool {
        !self.is_error() && self.get(path).is_some_and(|value| value.as_string() == expected)
    }

    /// Value at `path` in the materialized body.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<PathValue> {
        jsonpath::query(self.body()?, path)
    }

    /// Stringified value at `path`, or the empty string.
    #[must_use]
    pub fn get_string(&self, path: &str) -> String {
        self.get(path)
            .map(|value| value.as_string())
            .unwrap_or_default()
    }

    /// Integer value at `path`.
    #[must_use]
    pub fn get_i64(&self, path: &str) -> Option<i64> {
        self.get(path)?.as_i64()
    }

    /// Float value at `path`.
    #[must_use]
    pub fn get_f64(&self, path: &str) -> Option<f64> {
        self.get(path)?.as_f64()
    }

    /// Boolean value at `path`.
    #[must_use]
    pub fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path)?.as_bool()
    }

    /// Consumes the open transport response, if the body has not been read.
    #[must_use]
    pub fn into_raw(self) -> Option<reqwest::Response> {
        match self {
            Self::Streaming { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Reads an open stream to completion. Other states are returned unchanged.
    pub async fn into_buffered(self) -> Self {
        match self {
            Self::Streaming { meta, response } => match drain(&meta, response).await {
                Ok(body) => Self::Buffered { meta, body },
                Err(error) => Self::Failed {
                    meta: Some(meta),
                    error,
                },
            },
            other => other,
        }
    }

    /// Consumes the response, yielding the body bytes.
    ///
    /// # Errors
    ///
    /// Returns the response's own error, or a read error for an open stream.
    pub async fn into_bytes(self) -> Result<Bytes, RequestError> {
        match self {
            Self::Streaming { meta, response } => drain(&meta, response).await,
            Self::Buffered { body, .. } => Ok(body),
            Self::Failed { error, .. } => Err(error),
        }
    }

    /// Consumes the response, decoding the whole body as `T`.
    ///
    /// # Errors
    ///
    /// Returns the response's own error, or [`RequestError::Decode`].
    pub async fn into_json<T: DeserializeOwned>(self) -> Result<T, RequestError> {
        let body = self.into_bytes().await?;
        serde_json::from_slice(&body).map_err(|source| RequestError::Decode { source })
    }

    /// Consumes the response, decoding the value at `path` as `T`.
    ///
    /// # Errors
    ///
    /// Returns the response's own error, or [`RequestError::Decode`] when the
    /// path is missing or does not decode.
    pub async fn into_json_at<T: DeserializeOwned>(self, path: &str) -> Result<T, RequestError> {
        let body = self.into_bytes().await?;
        let value = jsonpath::query(&body, path).ok_or_else(|| RequestError::Decode {
            source: <serde_json::Error as serde::de::Error>::custom(format!(
                "path {path} not found in response body"
            )),
        })?;
        serde_json::from_value(value.into_value()).map_err(|source| RequestError::Decode { source })
    }
}

async fn drain(meta: &ResponseMeta, response: reqwest::Response) -> Result<Bytes, RequestError> {
    let plan = BufferPlan::choose(meta.content_length(), None);
    read_body(response.bytes_stream(), plan)
        .await
        .map_err(|source| RequestError::read_body(meta.url().as_str(), source))
}
