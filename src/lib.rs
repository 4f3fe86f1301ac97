//! zurl core library
//!
//! HTTP request toolkit: a shared client with an explicit response-body
//! strategy, a condition matcher with a polling retry loop, and a pipeline
//! that fans requests out and combines their outputs.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`request`] - Immutable request descriptors
//! - [`client`] - Pooled HTTP client, options and redirect policy
//! - [`response`] - Tri-state response envelope
//! - [`jsonpath`] - Dotted path queries over JSON bodies
//! - [`matcher`] - Expectations and the condition matcher
//! - [`retry`] - Retry loop until an expectation is met
//! - [`pipeline`] - Producer/combiner orchestration
//! - [`oneshot`] - Shortcuts that build a client per call
//! - [`config`] - Defaults and environment-derived debug flags

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod error;
pub mod jsonpath;
pub mod matcher;
pub mod oneshot;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod retry;
#[cfg(test)]
pub(crate) mod test_support;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use client::{ClientOptions, HttpClient, RedirectFn, RedirectPolicy};
pub use config::DebugFlags;
pub use error::{BoxError, ConfigError, RequestError};
pub use jsonpath::PathValue;
pub use matcher::{Check, Expectation, MatchReport, evaluate, matches};
pub use pipeline::{
    Combiner, Pipeline, PipelineProgress, Producer, ProgressSnapshot, StageContext, StageResult,
};
pub use request::{Body, Method, Multipart, Params, Request, RequestBuilder, params};
pub use response::{Response, ResponseMeta};
pub use retry::{RetryBudget, RetryError, RetryLoop, RetryLoopBuilder, RetryOutcome};
