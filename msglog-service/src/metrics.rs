//! Process-wide request counters and their plaintext exposition.
//!
//! A single `Metrics` value is created at startup and shared through
//! `AppState`. Counters only ever grow.

use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

/// Content type for the exposition endpoint.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Classification of a webhook attempt that got past payload validation or
/// failed signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookResult {
    Created,
    Duplicate,
    InvalidSignature,
    Error,
}

impl WebhookResult {
    pub const ALL: [WebhookResult; 4] = [
        WebhookResult::Created,
        WebhookResult::Duplicate,
        WebhookResult::InvalidSignature,
        WebhookResult::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookResult::Created => "created",
            WebhookResult::Duplicate => "duplicate",
            WebhookResult::InvalidSignature => "invalid_signature",
            WebhookResult::Error => "error",
        }
    }

    fn index(&self) -> usize {
        match self {
            WebhookResult::Created => 0,
            WebhookResult::Duplicate => 1,
            WebhookResult::InvalidSignature => 2,
            WebhookResult::Error => 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct Metrics {
    webhook_results: [AtomicU64; 4],
    http_requests: Mutex<BTreeMap<(String, u16), u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_webhook(&self, result: WebhookResult) {
        self.webhook_results[result.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_http(&self, path: &str, status: u16) {
        let mut requests = self
            .http_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *requests.entry((path.to_string(), status)).or_insert(0) += 1;
    }

    pub fn webhook_count(&self, result: WebhookResult) -> u64 {
        self.webhook_results[result.index()].load(Ordering::Relaxed)
    }

    pub fn http_count(&self, path: &str, status: u16) -> u64 {
        let requests = self
            .http_requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        requests
            .get(&(path.to_string(), status))
            .copied()
            .unwrap_or(0)
    }

    /// Render every counter, one per line:
    ///
    /// ```text
    /// http_requests_total{path="/webhook",status="200"} 3
    /// webhook_requests_total{result="created"} 2
    /// ```
    pub fn render(&self) -> String {
        let mut out = String::new();

        {
            let requests = self
                .http_requests
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            for ((path, status), count) in requests.iter() {
                let _ = writeln!(
                    out,
                    "http_requests_total{{path=\"{}\",status=\"{}\"}} {}",
                    escape_label(path),
                    status,
                    count
                );
            }
        }

        for result in WebhookResult::ALL {
            let _ = writeln!(
                out,
                "webhook_requests_total{{result=\"{}\"}} {}",
                result.as_str(),
                self.webhook_count(result)
            );
        }

        out
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_fresh_metrics_render_zeroed_results() {
        let metrics = Metrics::new();
        let rendered = metrics.render();

        assert!(rendered.contains("webhook_requests_total{result=\"created\"} 0"));
        assert!(rendered.contains("webhook_requests_total{result=\"duplicate\"} 0"));
        assert!(rendered.contains("webhook_requests_total{result=\"invalid_signature\"} 0"));
        assert!(!rendered.contains("http_requests_total"));
    }

    #[test]
    fn test_render_counts() {
        let metrics = Metrics::new();
        metrics.record_webhook(WebhookResult::Created);
        metrics.record_webhook(WebhookResult::Created);
        metrics.record_webhook(WebhookResult::Duplicate);
        metrics.record_http("/webhook", 200);
        metrics.record_http("/webhook", 200);
        metrics.record_http("/webhook", 401);

        let rendered = metrics.render();
        assert!(rendered.contains("http_requests_total{path=\"/webhook\",status=\"200\"} 2"));
        assert!(rendered.contains("http_requests_total{path=\"/webhook\",status=\"401\"} 1"));
        assert!(rendered.contains("webhook_requests_total{result=\"created\"} 2"));
        assert!(rendered.contains("webhook_requests_total{result=\"duplicate\"} 1"));

        assert_eq!(metrics.http_count("/webhook", 200), 2);
        assert_eq!(metrics.http_count("/stats", 200), 0);
    }

    #[test]
    fn test_every_line_has_name_labels_and_count() {
        let metrics = Metrics::new();
        metrics.record_http("/messages", 400);

        for line in metrics.render().lines() {
            let (series, count) = line.rsplit_once(' ').unwrap();
            assert!(series.ends_with('}'), "bad series: {}", series);
            assert!(count.parse::<u64>().is_ok(), "bad count: {}", count);
        }
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label(r#"/a"b\c"#), r#"/a\"b\\c"#);
    }

    #[test]
    fn test_concurrent_increments() {
        let metrics = Arc::new(Metrics::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_webhook(WebhookResult::Duplicate);
                        metrics.record_http("/webhook", 200);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.webhook_count(WebhookResult::Duplicate), 8000);
        assert_eq!(metrics.http_count("/webhook", 200), 8000);
    }
}
