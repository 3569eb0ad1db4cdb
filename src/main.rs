mod backend;
mod cache;
mod conflicts;
mod db;
mod error;
mod export;
mod generation;
mod ipc;
mod jobs;
mod model;
mod shape;
mod workflow;

use jobs::{Inbound, Jobs};
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// stdout carries the protocol, so logs go to stderr.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();
}

fn write_line(stdout: &mut io::Stdout, v: &serde_json::Value) {
    let _ = writeln!(
        stdout,
        "{}",
        serde_json::to_string(v).unwrap_or_else(|_| "{\"ok\":false}".to_string())
    );
    let _ = stdout.flush();
}

fn main() {
    init_tracing();
    let (tx, rx) = mpsc::channel::<Inbound>();

    let reader_tx = tx.clone();
    let reader = std::thread::Builder::new()
        .name("stdin".into())
        .spawn(move || {
            let stdin = io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if reader_tx.send(Inbound::Line(line)).is_err() {
                    return;
                }
            }
            let _ = reader_tx.send(Inbound::Closed);
        });
    if let Err(e) = reader {
        tracing::error!(error = %e, "could not start stdin reader");
        return;
    }

    let mut state = ipc::AppState::new(Jobs::new(tx));
    let mut stdout = io::stdout();
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "timetabled started");

    while let Ok(msg) = rx.recv() {
        match msg {
            Inbound::Line(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let req: ipc::Request = match serde_json::from_str(&line) {
                    Ok(v) => v,
                    Err(e) => {
                        // Can't reply without id.
                        write_line(
                            &mut stdout,
                            &serde_json::json!({
                                "ok": false,
                                "error": { "code": "bad_json", "message": e.to_string() }
                            }),
                        );
                        continue;
                    }
                };
                tracing::debug!(method = %req.method, "request");
                let resp = ipc::handle_request(&mut state, req);
                write_line(&mut stdout, &resp);
            }
            Inbound::Progress {
                job_id,
                kind,
                percent,
            } => {
                let ev = jobs::event(
                    "job.progress",
                    &job_id,
                    kind,
                    serde_json::json!({ "percent": percent }),
                );
                write_line(&mut stdout, &ev);
            }
            Inbound::Done(done) => {
                let ev = ipc::apply_job(&mut state, done);
                write_line(&mut stdout, &ev);
            }
            Inbound::Closed => break,
        }
        for ev in std::mem::take(&mut state.outbox) {
            write_line(&mut stdout, &ev);
        }
    }
    tracing::info!("stdin closed; exiting");
}
