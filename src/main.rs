// src/main.rs

//! Usage gate driver.
//!
//! Reads one request per line from stdin and writes one JSON decision per
//! line to stdout. Logs go to stderr.
//!
//! Input lines are `client_id<TAB>user_id<TAB>message`, or one of the operator
//! commands `!admin`, `!unblock <client_id>`, `!complete` and `!flush`.
//!
//! # Environment variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `RUST_LOG` | `usage_gate=info` | Log filter. |
//! | `USAGE_GATE_LOG_FORMAT` | `text` | `json` for JSON logs. |
//! | `USAGE_GATE_SUBSCRIBERS` | *(none)* | Comma-separated user ids with an active subscription. |
//! | `USAGE_GATE_*` | see `GateConfig::from_env` | Limits and timings. |

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use usage_gate::{
    Clock, Collaborators, GateConfig, GatingFacade, InMemoryUsageStore, StaticSubscriptions,
    SubscriptionStatus, SystemClock,
};

const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    init_tracing();

    let config = GateConfig::from_env();
    let subscriptions: StaticSubscriptions = std::env::var("USAGE_GATE_SUBSCRIBERS")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| (id, SubscriptionStatus::Active))
        .collect();
    let store = InMemoryUsageStore::new(SystemClock);

    info!(abuse = ?config.abuse, usage = ?config.usage, "usage gate configuration loaded");

    let collaborators = Collaborators::new(Arc::new(subscriptions), Arc::new(store));
    let gate = match GatingFacade::new(config, collaborators, SystemClock) {
        Ok(gate) => gate,
        Err(e) => {
            eprintln!("Usage gate error: {e}");
            std::process::exit(1);
        }
    };
    let tasks = gate.start();

    serve(&gate, BufReader::new(tokio::io::stdin()), async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for interrupts");
            std::future::pending::<()>().await;
        }
        info!("interrupt received, shutting down");
    })
    .await;

    let outcome = tasks.shutdown(SHUTDOWN_FLUSH_TIMEOUT).await;
    info!(?outcome, "usage gate stopped");
}

/// Answer input lines until EOF, a read error, or `shutdown` resolves.
async fn serve<R, S>(gate: &GatingFacade<impl Clock + Clone>, input: R, shutdown: S)
where
    R: AsyncBufRead + Unpin,
    S: Future<Output = ()>,
{
    let mut lines = input.lines();
    // created once so a signal between lines is not lost
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => handle_line(gate, line.trim_end()).await,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "failed to read input");
                    break;
                }
            },
            _ = &mut shutdown => break,
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("usage_gate=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("USAGE_GATE_LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn handle_line(gate: &GatingFacade<impl Clock + Clone>, line: &str) {
    if line.is_empty() {
        return;
    }

    if let Some(command) = line.strip_prefix('!') {
        let (name, arg) = command.split_once(' ').unwrap_or((command, ""));
        match name {
            "admin" => match gate.admin().suspicious_activity() {
                Ok(report) => emit(&report),
                Err(err) => warn!(error = %err, "admin report failed"),
            },
            "unblock" => {
                let unblocked = gate.admin().unblock_client(arg.trim());
                emit(&serde_json::json!({ "client_id": arg.trim(), "unblocked": unblocked }));
            }
            "complete" => gate.on_completion(),
            "flush" => emit(&gate.flush(true).await),
            other => warn!(command = other, "unknown command"),
        }
        return;
    }

    let mut fields = line.splitn(3, '\t');
    match (fields.next(), fields.next(), fields.next()) {
        (Some(client_id), Some(user_id), Some(message)) => {
            emit(&gate.evaluate(client_id, user_id, message).await);
        }
        _ => warn!("expected client_id<TAB>user_id<TAB>message"),
    }
}

fn emit<T: Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(err) => warn!(error = %err, "failed to encode output"),
    }
}
