use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Monotonic counter rendered in Prometheus text format.
pub struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    const fn new(name: &'static str, help: &'static str) -> Self {
        Self {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n",
            name = self.name,
            help = self.help,
            value = self.value()
        ));
    }
}

/// Fixed-bucket histogram with cumulative bucket counts.
pub struct Histogram {
    name: &'static str,
    help: &'static str,
    bounds: &'static [f64],
    counts: Vec<AtomicU64>,
    sum: Mutex<f64>,
    total: AtomicU64,
}

impl Histogram {
    fn new(name: &'static str, help: &'static str, bounds: &'static [f64]) -> Self {
        Self {
            name,
            help,
            bounds,
            counts: bounds.iter().map(|_| AtomicU64::new(0)).collect(),
            sum: Mutex::new(0.0),
            total: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            if value <= *bound {
                count.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.total.fetch_add(1, Ordering::Relaxed);
        *self.sum.lock().unwrap() += value;
    }

    pub fn count(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    fn render(&self, out: &mut String) {
        out.push_str(&format!(
            "# HELP {name} {help}\n# TYPE {name} histogram\n",
            name = self.name,
            help = self.help
        ));
        for (bound, count) in self.bounds.iter().zip(&self.counts) {
            out.push_str(&format!(
                "{name}_bucket{{le=\"{bound}\"}} {count}\n",
                name = self.name,
                count = count.load(Ordering::Relaxed)
            ));
        }
        out.push_str(&format!(
            "{name}_bucket{{le=\"+Inf\"}} {count}\n{name}_sum {sum}\n{name}_count {count}\n",
            name = self.name,
            count = self.count(),
            sum = *self.sum.lock().unwrap()
        ));
    }
}

pub struct Metrics {
    pub workflow_success: Counter,
    pub workflow_failure: Counter,
    pub states_per_workflow: Histogram,
    pub llm_tokens: Histogram,
    pub trace_size_bytes: Histogram,
}

static STATE_BOUNDS: &[f64] = &[1.0, 3.0, 5.0, 10.0, 20.0, 50.0];
static TOKEN_BOUNDS: &[f64] = &[100.0, 300.0, 600.0, 1200.0, 2400.0, 5000.0];
static TRACE_BOUNDS: &[f64] = &[100_000.0, 1_000_000.0, 10_000_000.0, 100_000_000.0];

/// Process-wide metrics registry; initialization is idempotent.
pub fn registry() -> &'static Metrics {
    static REGISTRY: OnceLock<Metrics> = OnceLock::new();
    REGISTRY.get_or_init(|| Metrics {
        workflow_success: Counter::new("parallax_workflow_success_total", "Successful workflows"),
        workflow_failure: Counter::new("parallax_workflow_failure_total", "Failed workflows"),
        states_per_workflow: Histogram::new(
            "parallax_states_per_workflow",
            "Number of states captured per workflow",
            STATE_BOUNDS,
        ),
        llm_tokens: Histogram::new(
            "parallax_llm_tokens",
            "LLM tokens used per plan",
            TOKEN_BOUNDS,
        ),
        trace_size_bytes: Histogram::new(
            "parallax_trace_size_bytes",
            "Browser trace size in bytes",
            TRACE_BOUNDS,
        ),
    })
}

pub fn render() -> String {
    let metrics = registry();
    let mut out = String::new();
    metrics.workflow_success.render(&mut out);
    metrics.workflow_failure.render(&mut out);
    metrics.states_per_workflow.render(&mut out);
    metrics.llm_tokens.render(&mut out);
    metrics.trace_size_bytes.render(&mut out);
    out
}

/// Start the Prometheus text exporter on localhost. Starts at most once per
/// process; later calls are no-ops.
pub fn ensure_exporter(port: u16) {
    static STARTED: AtomicBool = AtomicBool::new(false);
    if STARTED.swap(true, Ordering::SeqCst) {
        return;
    }
    tokio::spawn(async move {
        let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
            Ok(listener) => listener,
            Err(err) => {
                tracing::warn!(port, error = %err, "metrics exporter failed to bind");
                return;
            }
        };
        tracing::info!(port, "metrics exporter listening");
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let body = render();
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
            });
        }
    });
}
