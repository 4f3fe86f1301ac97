//! One-off requests without a long-lived client.
//!
//! Each function builds a fresh [`HttpClient`] with [`ClientOptions::default`],
//! so nothing is pooled between calls. Prefer a shared client for anything
//! called in a loop.

use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::client::{ClientOptions, HttpClient};
use crate::config::BINARY_CONTENT_TYPE;
use crate::error::RequestError;
use crate::request::{Body, Method, Multipart, Params, Request};
use crate::response::Response;

fn client() -> Result<HttpClient, RequestError> {
    HttpClient::with_options(ClientOptions::default())
}

async fn send(
    method: Method,
    url: &str,
    body: Body,
    query: &Params,
    headers: &Params,
    raw: bool,
) -> Response {
    let client = match client() {
        Ok(client) => client,
        Err(error) => return Response::failed(error),
    };
    if raw {
        client.send_raw(method, url, body, query, headers).await
    } else {
        client.send(method, url, body, query, headers).await
    }
}

async fn execute(request: Result<Request, RequestError>) -> Response {
    match (request, client()) {
        (Ok(request), Ok(client)) => client.execute(request).await,
        (Err(error), _) | (_, Err(error)) => Response::failed(error),
    }
}

/// `GET url`.
pub async fn get(url: &str, query: &Params, headers: &Params) -> Response {
    send(Method::Get, url, Body::Empty, query, headers, false).await
}

/// `POST url`.
pub async fn post(url: &str, body: impl Into<Body>, query: &Params, headers: &Params) -> Response {
    send(Method::Post, url, body.into(), query, headers, false).await
}

/// `PUT url`.
pub async fn put(url: &str, body: impl Into<Body>, query: &Params, headers: &Params) -> Response {
    send(Method::Put, url, body.into(), query, headers, false).await
}

/// `PATCH url`.
pub async fn patch(url: &str, body: impl Into<Body>, query: &Params, headers: &Params) -> Response {
    send(Method::Patch, url, body.into(), query, headers, false).await
}

/// `DELETE url`.
pub async fn delete(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Response {
    send(Method::Delete, url, body.into(), query, headers, false).await
}

/// `GET url`, body stream left open.
pub async fn get_raw(url: &str, query: &Params, headers: &Params) -> Response {
    send(Method::Get, url, Body::Empty, query, headers, true).await
}

/// `POST url`, body stream left open.
pub async fn post_raw(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Response {
    send(Method::Post, url, body.into(), query, headers, true).await
}

/// `PUT url`, body stream left open.
pub async fn put_raw(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Response {
    send(Method::Put, url, body.into(), query, headers, true).await
}

/// `PATCH url`, body stream left open.
pub async fn patch_raw(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Response {
    send(Method::Patch, url, body.into(), query, headers, true).await
}

/// `DELETE url`, body stream left open.
pub async fn delete_raw(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Response {
    send(Method::Delete, url, body.into(), query, headers, true).await
}

/// `POST url` with a URL-encoded form body.
pub async fn post_form(url: &str, form: Params, query: &Params, headers: &Params) -> Response {
    send(Method::Post, url, Body::Form(form), query, headers, false).await
}

/// `POST url` with raw bytes sent as `binary/octet-stream`, bounded by `timeout`.
pub async fn post_binary(
    url: &str,
    data: impl Into<Bytes>,
    timeout: Duration,
    query: &Params,
    headers: &Params,
) -> Response {
    let request = Request::builder(Method::Post, url)
        .queries(query)
        .headers(headers)
        .body(Body::Bytes(data.into()))
        .content_type(BINARY_CONTENT_TYPE)
        .timeout(timeout)
        .build();
    execute(request).await
}

/// `POST url` as `multipart/form-data`, bounded by `timeout`.
///
/// `files` maps a form field to the file's contents. Each of those fields
/// must also appear in `fields`, where its value is the file name; that
/// entry is consumed and the remaining `fields` are sent as text parts.
pub async fn post_multipart<K, V>(
    url: &str,
    files: impl IntoIterator<Item = (K, V)>,
    mut fields: Params,
    timeout: Duration,
    query: &Params,
    headers: &Params,
) -> Response
where
    K: Into<String>,
    V: Into<Bytes>,
{
    let mut form = Multipart::new();
    for (field, data) in files {
        let field = field.into();
        let Some(file_name) = fields.remove(&field) else {
            return Response::failed(RequestError::missing_file_name(field));
        };
        form = form.file(field, file_name, data);
    }
    for (key, value) in fields {
        form = form.text(key, value);
    }

    let request = Request::builder(Method::Post, url)
        .queries(query)
        .headers(headers)
        .body(form)
        .timeout(timeout)
        .build();
    execute(request).await
}

/// `GET url`, decoding the JSON body into `T`.
///
/// # Errors
///
/// The request's own error, or [`RequestError::Decode`].
pub async fn get_json<T: DeserializeOwned>(
    url: &str,
    query: &Params,
    headers: &Params,
) -> Result<T, RequestError> {
    get(url, query, headers).await.into_json().await
}

/// `POST url`, decoding the JSON body into `T`.
///
/// # Errors
///
/// The request's own error, or [`RequestError::Decode`].
pub async fn post_json<T: DeserializeOwned>(
    url: &str,
    body: impl Into<Body>,
    query: &Params,
    headers: &Params,
) -> Result<T, RequestError> {
    post(url, body, query, headers).await.into_json().await
}

/// `POST url` with a URL-encoded form, decoding the JSON reply into `T`.
///
/// # Errors
///
/// The request's own error, or [`RequestError::Decode`].
pub async fn post_form_json<T: DeserializeOwned>(
    url: &str,
    form: Params,
    query: &Params,
    headers: &Params,
) -> Result<T, RequestError> {
    post_form(url, form, query, headers).await.into_json().await
}
