mod auth;
mod backup;
mod db;
mod eligibility;
mod events;
mod export;
mod ipc;
mod notify;
mod status;
mod terms;

use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Enrollment records daemon speaking line-delimited JSON over stdin/stdout.
#[derive(Parser, Debug)]
#[command(name = "enrolld", version, about)]
struct Args {
    /// Workspace directory to open at startup.
    #[arg(long, env = "ENROLLD_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log level when RUST_LOG is not set.
    #[arg(long, env = "ENROLLD_LOG", default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("enrolld={}", level)));
    // stdout carries the protocol.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn write_line(stdout: &mut impl Write, value: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let mut state = ipc::AppState::default();
    if let Some(path) = args.workspace.as_deref() {
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(workspace = %path.display(), "failed to open workspace: {e:#}");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "enrolld ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("unparseable request line: {e}");
                write_line(
                    &mut stdout,
                    &serde_json::json!({
                        "ok": false,
                        "error": { "code": "bad_json", "message": e.to_string(), "status": 400 }
                    }),
                );
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        // Failed requests roll back, so whatever they queued never happened.
        if resp.get("ok").and_then(|v| v.as_bool()) == Some(true) {
            for event in state.events.drain() {
                if let Ok(v) = serde_json::to_value(&event) {
                    write_line(&mut stdout, &v);
                }
            }
        } else {
            state.events.clear();
        }
        write_line(&mut stdout, &resp);
        let _ = stdout.flush();
    }
}
