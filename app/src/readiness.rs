// WinRegi Readiness Prober
// Answers "is the worker usable yet?" for the startup gate.
use crate::error::{HostError, Result};
use reqwest::Client;
use std::time::{Duration, Instant};
use winregi_observability::{emit_event, ObservabilityEvent, ProcessKind};

pub struct ReadinessProber {
    client: Client,
    health_url: String,
    interval: Duration,
}

impl ReadinessProber {
    pub fn new(base_url: &str, probe_timeout: Duration, interval: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(probe_timeout)
            .build()
            .map_err(|e| HostError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            health_url: format!("{}/health", base_url.trim_end_matches('/')),
            interval,
        })
    }

    /// One liveness request. Anything but a 200 means "not ready"; transport
    /// errors are folded into that answer rather than returned.
    pub async fn probe(&self) -> bool {
        match self.client.get(&self.health_url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                tracing::trace!("Health check returned status: {}", response.status());
                false
            }
            Err(e) => {
                tracing::trace!("Health check request failed: {}", e);
                false
            }
        }
    }

    /// Probes up to `max_attempts` times with a fixed pause between attempts.
    pub async fn wait_until_ready(&self, max_attempts: u32) -> bool {
        let start = Instant::now();
        emit_event(
            tracing::Level::INFO,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "readiness.wait.start",
                component: "readiness",
                status: Some("start"),
                detail: Some(&format!(
                    "url={} max_attempts={}",
                    self.health_url, max_attempts
                )),
                ..Default::default()
            },
        );

        for attempt in 1..=max_attempts {
            if self.probe().await {
                tracing::info!(
                    "Worker is ready after {:?} ({} probe(s))",
                    start.elapsed(),
                    attempt
                );
                emit_event(
                    tracing::Level::INFO,
                    ProcessKind::Host,
                    ObservabilityEvent {
                        event: "readiness.wait.ready",
                        component: "readiness",
                        status: Some("ok"),
                        detail: Some(&format!(
                            "attempts={} elapsed_ms={}",
                            attempt,
                            start.elapsed().as_millis()
                        )),
                        ..Default::default()
                    },
                );
                return true;
            }
            if attempt < max_attempts {
                tokio::time::sleep(self.interval).await;
            }
        }

        emit_event(
            tracing::Level::WARN,
            ProcessKind::Host,
            ObservabilityEvent {
                event: "readiness.wait.exhausted",
                component: "readiness",
                status: Some("timeout"),
                error_code: Some("WORKER_NOT_READY"),
                detail: Some(&format!(
                    "attempts={} elapsed_ms={}",
                    max_attempts,
                    start.elapsed().as_millis()
                )),
                ..Default::default()
            },
        );
        tracing::error!("Worker did not become ready after {} probes", max_attempts);
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{refused_base_url, spawn_fake_worker};

    fn prober(base_url: &str) -> ReadinessProber {
        ReadinessProber::new(base_url, Duration::from_secs(2), Duration::from_millis(10)).unwrap()
    }

    #[tokio::test]
    async fn probe_is_false_when_nothing_listens() {
        assert!(!prober(&refused_base_url()).probe().await);
    }

    #[tokio::test]
    async fn probe_is_true_on_200() {
        let worker = spawn_fake_worker(vec![("200 OK", r#"{"status":"ok"}"#.to_string())]).await;
        assert!(prober(&worker.base_url).probe().await);
        assert!(worker.request(0).starts_with("GET /health "));
    }

    #[tokio::test]
    async fn ready_on_fourth_probe() {
        let not_ready = ("503 Service Unavailable", "{}".to_string());
        let worker = spawn_fake_worker(vec![
            not_ready.clone(),
            not_ready.clone(),
            not_ready,
            ("200 OK", r#"{"status":"ok"}"#.to_string()),
        ])
        .await;

        assert!(prober(&worker.base_url).wait_until_ready(30).await);
        assert_eq!(worker.hits(), 4);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let worker =
            spawn_fake_worker(vec![("500 Internal Server Error", "{}".to_string())]).await;
        assert!(!prober(&worker.base_url).wait_until_ready(3).await);
        assert_eq!(worker.hits(), 3);
    }
}
