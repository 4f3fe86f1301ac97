//! Fan-out/fan-in request orchestration.
//!
//! A [`Pipeline`] runs a list of [`Producer`] stages, each yielding raw bytes,
//! then hands every output (in declaration order) to one [`Combiner`] stage
//! whose [`Response`] is the pipeline's result.
//!
//! # Modes
//!
//! - **Sequential**: producer `i + 1` starts only after producer `i` returned.
//!   The first failure stops the pipeline.
//! - **Parallel**: producers run as concurrent Tokio tasks sharing one
//!   cancellation token. The first failure cancels the token, the orchestrator
//!   waits for every task to return, then reports that first failure.
//!
//! Either way a producer failure is reported as
//! [`RequestError::Stage`] carrying the producer's zero-based index, and the
//! combiner never sees partial results.
//!
//! # Cancellation
//!
//! Cancellation is cooperative. Producers get the token through
//! [`StageContext::cancel`] and are expected to pass it to their requests
//! (see [`RequestBuilder::cancel_token`](crate::RequestBuilder::cancel_token));
//! tasks that ignore it are waited for, never aborted.
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use zurl_core::{BoxError, HttpClient, Params, Pipeline, Response, StageContext};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new()?;
//! let fetch = |url: &'static str| {
//!     move |ctx: StageContext, client: HttpClient| async move {
//!         let request = zurl_core::Request::get(url).cancel_token(ctx.cancel.clone()).build()?;
//!         Ok::<Bytes, BoxError>(client.execute(request).await.into_bytes().await?)
//!     }
//! };
//! let combine = |_ctx: StageContext, inputs: Vec<Bytes>, client: HttpClient| async move {
//!     client
//!         .post("https://example.com/merge", inputs.concat(), &Params::new(), &Params::new())
//!         .await
//! };
//! let pipeline = Pipeline::new(client, combine)
//!     .producer(fetch("https://example.com/a"))
//!     .producer(fetch("https://example.com/b"))
//!     .parallel(true);
//!
//! let response: Response = pipeline.result().await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::client::HttpClient;
use crate::error::{BoxError, RequestError};
use crate::response::Response;

/// Result of one producer stage.
pub type StageResult = Result<Bytes, BoxError>;

/// A stage that performs one request and yields raw bytes.
///
/// # Object Safety
///
/// The trait is object-safe thanks to `async_trait`, and the pipeline stores
/// producers as `Arc<dyn Producer>`. Closures
/// `Fn(StageContext, HttpClient) -> impl Future<Output = StageResult>`
/// implement it directly.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Runs the stage.
    async fn produce(&self, ctx: StageContext, client: HttpClient) -> StageResult;
}

#[async_trait]
impl<F, Fut> Producer for F
where
    F: Fn(StageContext, HttpClient) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    async fn produce(&self, ctx: StageContext, client: HttpClient) -> StageResult {
        (self)(ctx, client).await
    }
}

/// The final stage, fed every producer output in declaration order.
///
/// Its [`StageContext`] has `index` equal to the number of producers and
/// carries the pipeline's cancellation token.
#[async_trait]
pub trait Combiner: Send + Sync {
    /// Combines producer outputs into the pipeline result.
    async fn combine(&self, ctx: StageContext, inputs: Vec<Bytes>, client: HttpClient) -> Response;
}

#[async_trait]
impl<F, Fut> Combiner for F
where
    F: Fn(StageContext, Vec<Bytes>, HttpClient) -> Fut + Send + Sync,
    Fut: Future<Output = Response> + Send + 'static,
{
    async fn combine(&self, ctx: StageContext, inputs: Vec<Bytes>, client: HttpClient) -> Response {
        (self)(ctx, inputs, client).await
    }
}

/// Progress as seen at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressSnapshot {
    /// Index of the most recently started producer.
    pub current_index: usize,
    /// Whether every producer has succeeded.
    pub finished: bool,
}

/// Shared, read-only view of pipeline progress.
///
/// Only the orchestrator writes it; clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct PipelineProgress {
    inner: Arc<ProgressState>,
}

#[derive(Debug, Default)]
struct ProgressState {
    current_index: AtomicUsize,
    finished: AtomicBool,
}

impl PipelineProgress {
    /// Index of the most recently started producer.
    #[must_use]
    pub fn current_index(&self) -> usize {
        self.inner.current_index.load(Ordering::SeqCst)
    }

    /// Whether every producer has succeeded.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::SeqCst)
    }

    /// Copies the current state.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current_index: self.current_index(),
            finished: self.is_finished(),
        }
    }

    fn start(&self, index: usize) {
        self.inner.current_index.store(index, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.inner.current_index.store(0, Ordering::SeqCst);
        self.inner.finished.store(false, Ordering::SeqCst);
    }

    fn finish(&self) {
        self.inner.finished.store(true, Ordering::SeqCst);
    }
}

/// Per-stage view handed to each producer and to the combiner.
///
/// Built before the stage is scheduled and moved into it, so a stage never
/// observes another stage's index.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Zero-based producer index; the combiner sees the producer count.
    pub index: usize,
    /// Progress at the moment this stage was scheduled.
    pub progress: ProgressSnapshot,
    /// Shared pipeline cancellation token.
    pub cancel: CancellationToken,
}

/// A configured orchestration.
pub struct Pipeline {
    client: HttpClient,
    producers: Vec<Arc<dyn Producer>>,
    combiner: Arc<dyn Combiner>,
    parallel: bool,
    max_concurrency: Option<usize>,
    cancel: CancellationToken,
    progress: PipelineProgress,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("producers", &self.producers.len())
            .field("parallel", &self.parallel)
            .field("max_concurrency", &self.max_concurrency)
            .field("progress", &self.progress.snapshot())
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Creates a sequential pipeline with no producers.
    pub fn new(client: HttpClient, combiner: impl Combiner + 'static) -> Self {
        Self {
            client,
            producers: Vec::new(),
            combiner: Arc::new(combiner),
            parallel: false,
            max_concurrency: None,
            cancel: CancellationToken::new(),
            progress: PipelineProgress::default(),
        }
    }

    /// Appends a producer.
    #[must_use]
    pub fn producer(mut self, producer: impl Producer + 'static) -> Self {
        self.producers.push(Arc::new(producer));
        self
    }

    /// Appends already-shared producers.
    #[must_use]
    pub fn producers(mut self, producers: impl IntoIterator<Item = Arc<dyn Producer>>) -> Self {
        self.producers.extend(producers);
        self
    }

    /// Runs producers concurrently when true.
    #[must_use]
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Caps concurrently running producers in parallel mode.
    #[must_use]
    pub fn max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = Some(max.max(1));
        self
    }

    /// Uses `token` as the parent of the pipeline's cancellation.
    ///
    /// Cancelling it stops the pipeline; producer failures only cancel a
    /// child token and leave `token` untouched.
    #[must_use]
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Progress handle, valid before, during and after [`result`](Self::result).
    #[must_use]
    pub fn progress(&self) -> PipelineProgress {
        self.progress.clone()
    }

    /// Number of producers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.producers.len()
    }

    /// Returns true when there are no producers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.producers.is_empty()
    }

    /// Runs every producer, then the combiner.
    ///
    /// Returns the combiner's response, or a failed response carrying
    /// [`RequestError::Stage`] for the first failing producer. A panicking
    /// combiner is reported with index `len()`.
    #[instrument(skip(self), fields(producers = self.producers.len(), parallel = self.parallel))]
    pub async fn result(&self) -> Response {
        self.progress.reset();
        let cancel = self.cancel.child_token();

        let outputs = if self.parallel {
            self.run_parallel(&cancel).await
        } else {
            self.run_sequential(&cancel).await
        };
        let outputs = match outputs {
            Ok(outputs) => outputs,
            Err(error) => {
                warn!(index = ?error.stage_index(), error = %error, "pipeline aborted");
                return Response::failed(error);
            }
        };

        self.progress.finish();
        debug!(inputs = outputs.len(), "running combiner");
        let index = self.producers.len();
        let ctx = StageContext {
            index,
            progress: self.progress.snapshot(),
            cancel,
        };
        let combiner = Arc::clone(&self.combiner);
        let client = self.client.clone();
        match tokio::spawn(async move { combiner.combine(ctx, outputs, client).await }).await {
            Ok(response) => response,
            Err(join_error) => Response::failed(stage_join_error(index, join_error)),
        }
    }

    async fn run_sequential(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>, RequestError> {
        let mut outputs = Vec::with_capacity(self.producers.len());
        for (index, producer) in self.producers.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(RequestError::stage(index, "pipeline cancelled"));
            }
            let ctx = self.schedule(index, cancel);
            let producer = Arc::clone(producer);
            let client = self.client.clone();
            let joined = tokio::spawn(async move { producer.produce(ctx, client).await }).await;
            outputs.push(stage_outcome(index, joined)?);
            debug!(index, "producer finished");
        }
        Ok(outputs)
    }

    async fn run_parallel(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<Bytes>, RequestError> {
        let limit = self
            .max_concurrency
            .unwrap_or(self.producers.len())
            .max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = FuturesUnordered::new();

        for (index, producer) in self.producers.iter().enumerate() {
            let ctx = self.schedule(index, cancel);
            let producer = Arc::clone(producer);
            let client = self.client.clone();
            let semaphore = Arc::clone(&semaphore);
            let handle = tokio::spawn(async move {
                // Released when the stage returns.
                let _permit = semaphore.acquire_owned().await.ok();
                if ctx.cancel.is_cancelled() {
                    return Err::<Bytes, BoxError>("pipeline cancelled".into());
                }
                producer.produce(ctx, client).await
            });
            tasks.push(handle.map(move |joined| (index, joined)));
        }

        let mut outputs: Vec<Option<Bytes>> = vec![None; self.producers.len()];
        let mut first_error = None;
        while let Some((index, joined)) = tasks.next().await {
            match stage_outcome(index, joined) {
                Ok(bytes) => {
                    debug!(index, "producer finished");
                    outputs[index] = Some(bytes);
                }
                Err(error) if first_error.is_none() => {
                    info!(index, error = %error, "producer failed; cancelling the rest");
                    cancel.cancel();
                    first_error = Some(error);
                }
                Err(error) => {
                    debug!(index, error = %error, "producer failed after cancellation");
                }
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }
        outputs
            .into_iter()
            .enumerate()
            .map(|(index, output)| {
                output.ok_or_else(|| RequestError::stage(index, "producer returned no output"))
            })
            .collect()
    }

    fn schedule(&self, index: usize, cancel: &CancellationToken) -> StageContext {
        self.progress.start(index);
        StageContext {
            index,
            progress: self.progress.snapshot(),
            cancel: cancel.clone(),
        }
    }
}

fn stage_outcome(
    index: usize,
    joined: Result<StageResult, JoinError>,
) -> Result<Bytes, RequestError> {
    match joined {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(source)) => Err(RequestError::stage(index, source)),
        Err(join_error) => Err(stage_join_error(index, join_error)),
    }
}

fn stage_join_error(index: usize, join_error: JoinError) -> RequestError {
    if join_error.is_panic() {
        RequestError::stage(index, "stage panicked")
    } else {
        RequestError::stage(index, join_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::client::ClientOptions;
    use crate::config::DebugFlags;
    use crate::response::ResponseMeta;
    use reqwest::StatusCode;
    use reqwest::header::HeaderMap;
    use std::sync::Mutex;
    use std::time::Duration;
    use url::Url;

    fn client() -> HttpClient {
        HttpClient::with_options(ClientOptions::default().with_debug(DebugFlags::default()))
            .unwrap()
    }

    fn echo_combiner(
        _ctx: StageContext,
        inputs: Vec<Bytes>,
        _client: HttpClient,
    ) -> impl Future<Output = Response> + Send {
        async move {
            let body = serde_json::to_vec(
                &inputs
                    .iter()
                    .map(|input| String::from_utf8_lossy(input).into_owned())
                    .collect::<Vec<_>>(),
            )
            .unwrap();
            let meta = ResponseMeta::new(
                StatusCode::OK,
                HeaderMap::new(),
                Url::parse("http://combiner.local/").unwrap(),
            );
            Response::buffered(meta, body)
        }
    }

    fn constant(output: &'static str) -> impl Producer {
        move |_ctx: StageContext, _client: HttpClient| async move {
            Ok::<Bytes, BoxError>(Bytes::from_static(output.as_bytes()))
        }
    }

    #[tokio::test]
    async fn test_sequential_outputs_in_order() {
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(constant("X"))
            .producer(constant("Y"));
        let response = pipeline.result().await;
        assert_eq!(response.text().as_deref(), Some(r#"["X","Y"]"#));
        assert!(pipeline.progress().is_finished());
        assert_eq!(pipeline.progress().current_index(), 1);
    }

    #[tokio::test]
    async fn test_sequential_starts_next_only_after_previous_returned() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stage = |id: usize, delay_ms: u64, log: Arc<Mutex<Vec<String>>>| {
            move |_ctx: StageContext, _client: HttpClient| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push(format!("start {id}"));
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    log.lock().unwrap().push(format!("end {id}"));
                    Ok::<Bytes, BoxError>(Bytes::from(id.to_string()))
                }
            }
        };
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(stage(0, 30, Arc::clone(&log)))
            .producer(stage(1, 0, Arc::clone(&log)));
        pipeline.result().await;
        assert_eq!(*log.lock().unwrap(), ["start 0", "end 0", "start 1", "end 1"]);
    }

    #[tokio::test]
    async fn test_sequential_failure_skips_later_producers_and_combiner() {
        let later_ran = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&later_ran);
        let combined = Arc::new(AtomicBool::new(false));
        let combined_flag = Arc::clone(&combined);

        let combine = move |_ctx: StageContext, _inputs: Vec<Bytes>, _client: HttpClient| {
            combined_flag.store(true, Ordering::SeqCst);
            async { Response::failed(RequestError::invalid_url("unused")) }
        };
        let pipeline = Pipeline::new(client(), combine)
            .producer(constant("X"))
            .producer(|_ctx: StageContext, _client: HttpClient| async {
                Err::<Bytes, BoxError>("boom".into())
            })
            .producer(move |_ctx: StageContext, _client: HttpClient| {
                flag.store(true, Ordering::SeqCst);
                async { Ok::<Bytes, BoxError>(Bytes::new()) }
            });

        let response = pipeline.result().await;
        let error = response.error().unwrap();
        assert_eq!(error.stage_index(), Some(1));
        assert_eq!(error.to_string(), "ins[1]:[boom]");
        assert!(!later_ran.load(Ordering::SeqCst));
        assert!(!combined.load(Ordering::SeqCst));
        assert!(!pipeline.progress().is_finished());
    }

    #[tokio::test]
    async fn test_parallel_assembles_in_declaration_order() {
        let delayed = |output: &'static str, delay_ms: u64| {
            move |_ctx: StageContext, _client: HttpClient| async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                Ok::<Bytes, BoxError>(Bytes::from_static(output.as_bytes()))
            }
        };
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(delayed("slow", 50))
            .producer(delayed("fast", 0))
            .producer(delayed("mid", 20))
            .parallel(true);
        let response = pipeline.result().await;
        assert_eq!(response.text().as_deref(), Some(r#"["slow","fast","mid"]"#));
    }

    #[tokio::test]
    async fn test_parallel_contexts_carry_their_own_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut pipeline = Pipeline::new(client(), echo_combiner).parallel(true);
        for _ in 0..8 {
            let seen = Arc::clone(&seen);
            pipeline = pipeline.producer(move |ctx: StageContext, _client: HttpClient| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push((ctx.index, ctx.progress.current_index));
                    Ok::<Bytes, BoxError>(Bytes::from(ctx.index.to_string()))
                }
            });
        }
        let response = pipeline.result().await;
        assert_eq!(
            response.text().as_deref(),
            Some(r#"["0","1","2","3","4","5","6","7"]"#)
        );
        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).map(|i| (i, i)).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_parallel_failure_cancels_siblings() {
        let observed_cancel = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&observed_cancel);
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(move |ctx: StageContext, _client: HttpClient| {
                let observed = Arc::clone(&observed);
                async move {
                    tokio::select! {
                        () = ctx.cancel.cancelled() => {
                            observed.store(true, Ordering::SeqCst);
                            Err::<Bytes, BoxError>("cancelled".into())
                        }
                        () = tokio::time::sleep(Duration::from_secs(10)) => Ok(Bytes::new()),
                    }
                }
            })
            .producer(|_ctx: StageContext, _client: HttpClient| async {
                Err::<Bytes, BoxError>("upstream 500".into())
            })
            .parallel(true);

        let started = std::time::Instant::now();
        let response = pipeline.result().await;
        assert_eq!(response.error().unwrap().to_string(), "ins[1]:[upstream 500]");
        assert!(observed_cancel.load(Ordering::SeqCst));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_panicking_producer_is_a_stage_error() {
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(constant("ok"))
            .producer(|ctx: StageContext, _client: HttpClient| async move {
                assert_ne!(ctx.index, 1, "producer bug");
                Ok::<Bytes, BoxError>(Bytes::new())
            })
            .parallel(true);
        let response = pipeline.result().await;
        let error = response.error().unwrap();
        assert_eq!(error.stage_index(), Some(1));
        assert!(error.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn test_max_concurrency_bounds_running_producers() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut pipeline = Pipeline::new(client(), echo_combiner)
            .parallel(true)
            .max_concurrency(2);
        for _ in 0..6 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pipeline = pipeline.producer(move |_ctx: StageContext, _client: HttpClient| {
                let running = Arc::clone(&running);
                let peak = Arc::clone(&peak);
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok::<Bytes, BoxError>(Bytes::new())
                }
            });
        }
        assert!(!pipeline.result().await.is_error());
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_empty_pipeline_calls_combiner_with_no_inputs() {
        let pipeline = Pipeline::new(client(), echo_combiner);
        assert!(pipeline.is_empty());
        let response = pipeline.result().await;
        assert_eq!(response.text().as_deref(), Some("[]"));
        assert!(pipeline.progress().is_finished());
    }

    #[tokio::test]
    async fn test_combiner_context_carries_index_and_pipeline_token() {
        let seen = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&seen);
        let combine = move |ctx: StageContext, inputs: Vec<Bytes>, client: HttpClient| {
            *slot.lock().unwrap() = Some(ctx.clone());
            echo_combiner(ctx, inputs, client)
        };
        let token = CancellationToken::new();
        let pipeline = Pipeline::new(client(), combine)
            .producer(constant("X"))
            .producer(constant("Y"))
            .cancel_token(token.clone());

        assert!(pipeline.result().await.is_ok());
        let ctx = seen.lock().unwrap().take().unwrap();
        assert_eq!(ctx.index, 2);
        assert!(ctx.progress.finished);
        assert!(!ctx.cancel.is_cancelled());
        token.cancel();
        assert!(ctx.cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_external_cancel_stops_sequential_pipeline() {
        let token = CancellationToken::new();
        token.cancel();
        let pipeline = Pipeline::new(client(), echo_combiner)
            .producer(constant("X"))
            .cancel_token(token);
        let response = pipeline.result().await;
        assert_eq!(response.error().unwrap().stage_index(), Some(0));
    }
}
