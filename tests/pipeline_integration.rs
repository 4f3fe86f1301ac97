//! Integration tests for pipelines issuing real requests to mock servers.

mod support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use support::socket_guard::start_mock_server_or_skip;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zurl_core::{
    BoxError, ClientOptions, Combiner, DebugFlags, HttpClient, Params, Pipeline, Producer,
    Request, StageContext,
};

fn client() -> HttpClient {
    HttpClient::with_options(
        ClientOptions::default()
            .with_debug(DebugFlags::default())
            .with_timeout(Duration::from_secs(5)),
    )
    .unwrap()
}

/// Producer that GETs `url` and fails on anything but 200.
fn fetch(url: String) -> impl Producer {
    move |ctx: StageContext, client: HttpClient| {
        let url = url.clone();
        async move {
            let request = Request::get(url).cancel_token(ctx.cancel.clone()).build()?;
            let response = client.execute(request).await;
            if !response.is_error() && !response.is_ok() {
                return Err::<Bytes, BoxError>(
                    format!("unexpected status {:?}", response.status()).into(),
                );
            }
            Ok(response.into_bytes().await?)
        }
    }
}

/// Combiner that POSTs producer outputs (as strings) to `{uri}/combine`.
fn post_combined(uri: String, called: Arc<AtomicBool>) -> impl Combiner {
    move |_ctx: StageContext, inputs: Vec<Bytes>, client: HttpClient| {
        called.store(true, Ordering::SeqCst);
        let url = format!("{uri}/combine");
        async move {
            let strings: Vec<String> = inputs
                .iter()
                .map(|input| String::from_utf8_lossy(input).into_owned())
                .collect();
            client
                .post(&url, json!(strings), &Params::new(), &Params::new())
                .await
        }
    }
}

async fn mount_text(server: &MockServer, route: &str, status: u16, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(status).set_body_string(body))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_sequential_producers_feed_combiner_in_order() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    mount_text(&mock_server, "/x", 200, "X").await;
    mount_text(&mock_server, "/y", 200, "Y").await;
    Mock::given(method("POST"))
        .and(path("/combine"))
        .and(body_json(json!(["X", "Y"])))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"combined": "XY"})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let called = Arc::new(AtomicBool::new(false));
    let pipeline = Pipeline::new(client(), post_combined(uri.clone(), Arc::clone(&called)))
        .producer(fetch(format!("{uri}/x")))
        .producer(fetch(format!("{uri}/y")));

    let response = pipeline.result().await;
    assert!(response.is_ok(), "got {response:?}");
    assert_eq!(response.get_string("combined"), "XY");
    assert!(called.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_parallel_failure_skips_combiner_and_names_index() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"a": "1"})))
        .mount(&mock_server)
        .await;
    mount_text(&mock_server, "/broken", 500, "boom").await;

    let uri = mock_server.uri();
    let called = Arc::new(AtomicBool::new(false));
    let pipeline = Pipeline::new(client(), post_combined(uri.clone(), Arc::clone(&called)))
        .producer(fetch(format!("{uri}/a")))
        .producer(fetch(format!("{uri}/broken")))
        .parallel(true);

    let response = pipeline.result().await;
    let error = response.error().unwrap();
    assert_eq!(error.stage_index(), Some(1));
    assert!(error.to_string().starts_with("ins[1]:"), "got {error}");
    assert!(!called.load(Ordering::SeqCst));
    assert!(!pipeline.progress().is_finished());
}

#[tokio::test]
async fn test_parallel_order_independent_of_completion() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string("slow")
                .set_delay(Duration::from_millis(150)),
        )
        .mount(&mock_server)
        .await;
    mount_text(&mock_server, "/fast", 200, "fast").await;
    Mock::given(method("POST"))
        .and(path("/combine"))
        .and(body_json(json!(["slow", "fast"])))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let pipeline = Pipeline::new(client(), post_combined(uri.clone(), Arc::default()))
        .producer(fetch(format!("{uri}/slow")))
        .producer(fetch(format!("{uri}/fast")))
        .parallel(true);

    assert!(pipeline.result().await.is_ok());
}

#[tokio::test]
async fn test_parallel_failure_cancels_in_flight_requests() {
    let Some(mock_server) = start_mock_server_or_skip().await else {
        return;
    };
    Mock::given(method("GET"))
        .and(path("/hang"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
        .mount(&mock_server)
        .await;
    mount_text(&mock_server, "/broken", 500, "boom").await;

    let uri = mock_server.uri();
    let pipeline = Pipeline::new(client(), post_combined(uri.clone(), Arc::default()))
        .producer(fetch(format!("{uri}/hang")))
        .producer(fetch(format!("{uri}/broken")))
        .parallel(true);

    let started = std::time::Instant::now();
    let response = pipeline.result().await;
    assert_eq!(response.error().unwrap().stage_index(), Some(1));
    // The hanging request observed cancellation instead of the 5s client timeout.
    assert!(started.elapsed() < Duration::from_secs(4));
}
