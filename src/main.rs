//! CLI entry point for anetd.

use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use anetd_core::{Completion, Credentials, Engine, EngineConfig, ResponseSink, SinkKind};
use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

mod cli;

use cli::Args;

/// Interval at which the progress bar samples the sink.
const PROGRESS_TICK: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let config = EngineConfig::from_env()
        .with_connect_timeout(seconds(args.connect_timeout))
        .with_read_timeout(seconds(args.read_timeout))
        .with_max_redirects(args.max_redirects);

    let mut engine = Engine::with_config(tokio::runtime::Handle::current(), config);
    engine.set_method(args.method.as_str());
    for (name, value) in &args.headers {
        engine.set_header(name.as_str(), value.as_str());
    }
    for (name, value) in &args.arguments {
        engine.set_argument(name.as_str(), value.as_str());
    }
    if let Some(data) = &args.data {
        engine.set_body(data.as_bytes().to_vec());
    }
    if let Some(user) = &args.user {
        let credentials = Credentials::parse(user);
        engine.set_http_auth(credentials.username(), credentials.password());
    }
    if let Some(user) = &args.proxy_user {
        let credentials = Credentials::parse(user);
        engine.set_proxy_auth(credentials.username(), credentials.password());
    }

    let sink = match &args.output {
        Some(dir) => ResponseSink::to_file(args.url.as_str(), dir),
        None => ResponseSink::in_memory(args.url.as_str()),
    };

    let progress = if args.quiet || args.json {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template(
            "{spinner} {bytes}/{total_bytes} ({bytes_per_sec}) {msg}",
        )?);
        bar
    };

    // The callback runs on the runtime; it owns all response output.
    let (printed_tx, printed_rx) = oneshot::channel();
    let json_output = args.json;
    let bar = progress.clone();
    engine.set_callback(move |completion| {
        bar.finish_and_clear();
        if let Err(error) = report(&completion, json_output) {
            warn!(%error, "failed to write response");
        }
        let _ = printed_tx.send(());
    });

    let mut handle = engine.start(sink)?;
    let live = handle.sink().clone();
    let token = handle.cancellation_token();
    let mut ticker = tokio::time::interval(PROGRESS_TICK);

    let completion = loop {
        tokio::select! {
            completion = &mut handle => break completion,
            _ = ticker.tick() => {
                if let Some(total) = live.body_size() {
                    progress.set_length(total);
                }
                progress.set_position(live.progress());
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, cancelling transfer");
                token.cancel();
            }
        }
    };
    let _ = printed_rx.await;

    Ok(if completion.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn seconds(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Writes the response: JSON summary, or status line plus body.
fn report(completion: &Completion, json_output: bool) -> Result<()> {
    let sink = completion.sink();
    let snapshot = sink.snapshot();
    let mut stdout = io::stdout().lock();

    if json_output {
        let summary = json!({
            "response": snapshot,
            "redirects": completion.redirects(),
            "error": completion.error().map(ToString::to_string),
        });
        writeln!(stdout, "{}", serde_json::to_string_pretty(&summary)?)?;
        return Ok(());
    }

    if let Some(error) = completion.error() {
        eprintln!("anetd: {error}");
    }
    if snapshot.status != 0 {
        eprintln!("{} {} {}", snapshot.version, snapshot.status, snapshot.description);
    }
    match snapshot.kind {
        SinkKind::InMemory => stdout.write_all(&sink.body())?,
        SinkKind::FileBacked => {
            if let Some(path) = &snapshot.file_path {
                eprintln!("saved {} bytes to {}", snapshot.progress, path.display());
            }
        }
    }
    stdout.flush()?;
    Ok(())
}
