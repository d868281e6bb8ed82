// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;

// Single custom registry (we register everything here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Polling loop --------
pub static CYCLES: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("poll_cycles_total", "completed polling cycles").unwrap());

pub static CYCLE_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("poll_cycle_errors_total", "polling cycles that ended in error").unwrap()
});

pub static FETCH_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("position_fetch_errors_total", "failed position fetches").unwrap()
});

pub static CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new("poll_cycle_duration_ms", "Duration of one polling cycle (ms)")
            .buckets(vec![50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0, 30000.0]),
    )
    .unwrap()
});

pub static TRACKED_IDENTIFIERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("tracked_identifiers", "number of tracked leaderboard identifiers").unwrap()
});

// -------- Notifications & commands --------
pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("notifications_total", "notifications dispatched (labels: kind, outcome)"),
        &["kind", "outcome"],
    )
    .unwrap()
});

pub static COMMANDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("commands_total", "inbound commands (labels: command, outcome)"),
        &["command", "outcome"],
    )
    .unwrap()
});

pub static UPDATE_POLL_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("update_poll_failures_total", "failed long-poll attempts").unwrap()
});

pub fn init() {
    // Register all metrics to the custom registry
    for m in [
        REGISTRY.register(Box::new(CYCLES.clone())),
        REGISTRY.register(Box::new(CYCLE_ERRORS.clone())),
        REGISTRY.register(Box::new(FETCH_ERRORS.clone())),
        REGISTRY.register(Box::new(CYCLE_DURATION.clone())),
        REGISTRY.register(Box::new(TRACKED_IDENTIFIERS.clone())),
        REGISTRY.register(Box::new(NOTIFICATIONS.clone())),
        REGISTRY.register(Box::new(COMMANDS.clone())),
        REGISTRY.register(Box::new(UPDATE_POLL_FAILURES.clone())),
    ] {
        let _ = m;
    }
}

// Encode all metrics in Prometheus text format
fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

// Serve one HTTP request (GET / or /metrics) — tiny HTTP 1.1 responder
fn handle_client(mut stream: TcpStream) {
    // Read a bit to consume headers (no full parse)
    let mut _req_buf = [0u8; 1024];
    let _ = stream.read(&mut _req_buf);

    let body = encode_metrics();
    let header = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );

    let _ = stream.write_all(header.as_bytes());
    let _ = stream.write_all(&body);
    let _ = stream.flush();
}

// Run the metrics server in a dedicated OS thread (keeps Tokio runtime clean)
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(%addr, error = %e, "metrics bind failed, metrics disabled");
                return;
            }
        };
        tracing::info!(%addr, "metrics listening on /metrics");

        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => tracing::warn!(error = %e, "metrics accept error"),
            }
        }
    });
}
