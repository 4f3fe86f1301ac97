//! CLI entry point for zurl.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use clap::error::ErrorKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use zurl_core::config::DebugFlags;
use zurl_core::{ClientOptions, Expectation, HttpClient, Method, Params, RetryError, RetryLoop};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            return if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    let mut debug_flags = DebugFlags::from_env();
    debug_flags.enabled |= args.debug;
    init_tracing(&args, debug_flags);
    debug!(?args, "CLI arguments parsed");

    match run(args, debug_flags).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

/// Priority: RUST_LOG env var > quiet flag > verbose flag > default (info).
/// Debug tracing raises the zurl targets to at least debug; connection
/// debugging also lets reqwest's per-connection log through.
fn init_tracing(args: &Args, debug: DebugFlags) {
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let mut directives = default_level.to_string();
    if debug.enabled && args.verbose < 2 {
        directives.push_str(",zurl=debug,zurl_core=debug");
    }
    if debug.enabled && debug.connection {
        directives.push_str(",reqwest::connect::verbose=trace");
    }

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(directives));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Returns whether the expectation was met.
async fn run(args: Args, debug_flags: DebugFlags) -> Result<bool> {
    let method: Method = args.method.parse()?;
    let expectation = Expectation::from_parts(
        args.expect_statuscode,
        args.expect_header.into_iter().collect(),
        args.expect_json.into_iter().collect(),
    )?;
    let query: Params = args.add_query.into_iter().collect();
    let headers: Params = args.add_header.into_iter().collect();

    let client = HttpClient::with_options(
        ClientOptions::default()
            .with_debug(debug_flags)
            .with_timeout(Duration::from_secs(args.timeout)),
    )
    .context("failed to initialize HTTP client")?;

    let cancel = CancellationToken::new();
    let retry = RetryLoop::builder(args.url)
        .method(method)
        .queries(&query)
        .headers(&headers)
        .expectation(expectation)
        .retries(args.retry)
        .interval(Duration::from_secs(args.interval))
        .cancel_token(cancel.clone())
        .build()?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted");
            cancel.cancel();
        }
    });

    match retry.run(&client).await {
        Ok(outcome) => {
            info!(attempts = outcome.attempts(), "success");
            Ok(true)
        }
        Err(RetryError::Exhausted { attempts }) => {
            warn!(attempts, "retries exhausted");
            Ok(false)
        }
        Err(RetryError::Hard(err)) => Err(err.into()),
    }
}
