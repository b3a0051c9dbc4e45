// WinRegi Worker Client
// HTTP boundary to the reasoning worker. Every request goes through the
// shared retry policy; only connection failures are retried.
use crate::error::{HostError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use std::time::Duration;
use winregi_types::{
    CommandProposal, IntentRequest, SummaryRequest, SummaryResponse, UserSettings,
};

/// Resolves a natural-language intent into a command proposal.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve_intent(&self, request: &IntentRequest) -> Result<CommandProposal>;
}

/// Reads and persists user settings. Reads are never cached by callers.
#[async_trait]
pub trait SettingsSource: Send + Sync {
    async fn get_settings(&self) -> UserSettings;
    async fn update_settings(&self, settings: &UserSettings) -> Result<()>;
}

/// Produces a plain-language explanation of a command's output.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String>;
}

#[derive(Clone)]
pub struct WorkerClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl WorkerClient {
    pub fn new(base_url: &str, request_timeout: Duration, retry: RetryPolicy) -> Result<Self> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| HostError::InvalidConfig(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<Response> {
        let url = self.url(path);
        self.retry
            .run(path, || self.http.get(&url).send(), reqwest::Error::is_connect)
            .await
            .map_err(|e| classify_transport_error(path, e))
    }

    async fn post<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.url(path);
        self.retry
            .run(
                path,
                || self.http.post(&url).json(body).send(),
                reqwest::Error::is_connect,
            )
            .await
            .map_err(|e| classify_transport_error(path, e))
    }
}

// Connect failures arrive here only once the retry budget is spent; timeouts
// and broken responses are not retried at all.
fn classify_transport_error(path: &str, err: reqwest::Error) -> HostError {
    HostError::Connectivity(format!("{path}: {err}"))
}

async fn error_body(response: Response) -> String {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<serde_json::Value>(&text)
        .ok()
        .and_then(|v| v.get("detail").and_then(|d| d.as_str()).map(str::to_string))
        .unwrap_or(text);
    if detail.trim().is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {}", detail.trim())
    }
}

#[async_trait]
impl IntentResolver for WorkerClient {
    async fn resolve_intent(&self, request: &IntentRequest) -> Result<CommandProposal> {
        let response = self.post("/process-intent", request).await?;
        if !response.status().is_success() {
            return Err(HostError::Resolution(error_body(response).await));
        }
        response
            .json::<CommandProposal>()
            .await
            .map_err(|e| HostError::Resolution(format!("malformed proposal: {e}")))
    }
}

#[async_trait]
impl SettingsSource for WorkerClient {
    async fn get_settings(&self) -> UserSettings {
        let response = match self.get("/settings").await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!("Settings unavailable, using defaults: {}", e);
                return UserSettings::default();
            }
        };
        if !response.status().is_success() {
            tracing::warn!(
                "Settings request returned {}, using defaults",
                response.status()
            );
            return UserSettings::default();
        }
        match response.json::<UserSettings>().await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!("Settings payload unreadable, using defaults: {}", e);
                UserSettings::default()
            }
        }
    }

    async fn update_settings(&self, settings: &UserSettings) -> Result<()> {
        let response = self.post("/settings", settings).await?;
        if !response.status().is_success() {
            return Err(HostError::Resolution(format!(
                "saving settings failed: {}",
                error_body(response).await
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Summarizer for WorkerClient {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        let response = self.post("/summarize", request).await?;
        if !response.status().is_success() {
            return Err(HostError::Summarization(error_body(response).await));
        }
        let body = response
            .json::<SummaryResponse>()
            .await
            .map_err(|e| HostError::Summarization(format!("malformed summary: {e}")))?;
        Ok(body.summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{refused_base_url, spawn_fake_worker};
    use winregi_types::{AiProvider, SafetyTier};

    fn client(base_url: &str, retry: RetryPolicy) -> WorkerClient {
        WorkerClient::new(base_url, Duration::from_secs(5), retry).unwrap()
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            initial_delay: Duration::from_millis(5),
            multiplier: 1.5,
        }
    }

    #[tokio::test]
    async fn resolves_intent_into_proposal() {
        let body = r#"{
            "intent": "show ip",
            "description": "Shows network configuration",
            "command": "ipconfig /all",
            "requires_admin": false,
            "safety_tier": 1,
            "source": "curated"
        }"#;
        let worker = spawn_fake_worker(vec![("200 OK", body.to_string())]).await;
        let proposal = client(&worker.base_url, quick_retry())
            .resolve_intent(&IntentRequest::new("show ip", &UserSettings::default()))
            .await
            .unwrap();

        assert_eq!(proposal.command, "ipconfig /all");
        assert_eq!(proposal.safety_tier, SafetyTier::ReadOnly);
        assert!(worker.request(0).starts_with("POST /process-intent "));
    }

    #[tokio::test]
    async fn http_error_is_not_retried() {
        let worker = spawn_fake_worker(vec![(
            "500 Internal Server Error",
            r#"{"detail":"model offline"}"#.to_string(),
        )])
        .await;
        let err = client(&worker.base_url, RetryPolicy::default())
            .resolve_intent(&IntentRequest::new("reboot", &UserSettings::default()))
            .await
            .unwrap_err();

        assert!(matches!(err, HostError::Resolution(_)));
        assert!(err.to_string().starts_with("Processing failed"));
        assert!(err.to_string().contains("model offline"));
        assert_eq!(worker.hits(), 1);
    }

    #[tokio::test]
    async fn unreachable_worker_is_connectivity_error() {
        let err = client(&refused_base_url(), quick_retry())
            .resolve_intent(&IntentRequest::new("x", &UserSettings::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Connectivity(_)));
        assert!(err.is_system_unusable());
    }

    #[tokio::test]
    async fn unreachable_settings_fall_back_to_defaults() {
        let settings = client(&refused_base_url(), quick_retry()).get_settings().await;
        assert_eq!(settings.theme, "dark");
        assert_eq!(settings.ai_provider, AiProvider::Local);
        assert!(settings.favorites.is_empty());
    }

    #[tokio::test]
    async fn settings_non_2xx_falls_back_to_defaults() {
        let worker = spawn_fake_worker(vec![("404 Not Found", "{}".to_string())]).await;
        let settings = client(&worker.base_url, quick_retry()).get_settings().await;
        assert_eq!(settings, UserSettings::default());
    }

    #[tokio::test]
    async fn reads_stored_settings() {
        let body = r#"{"theme":"light","ai_provider":"gemini","gemini_api_key":"k-1","favorites":["show ip"]}"#;
        let worker = spawn_fake_worker(vec![("200 OK", body.to_string())]).await;
        let settings = client(&worker.base_url, quick_retry()).get_settings().await;
        assert_eq!(settings.theme, "light");
        assert_eq!(settings.ai_provider, AiProvider::Cloud);
        assert_eq!(settings.provider_key(), Some("k-1"));
    }

    #[tokio::test]
    async fn summary_request_carries_key_only_for_cloud() {
        let worker =
            spawn_fake_worker(vec![("200 OK", r#"{"summary":"All good."}"#.to_string())]).await;
        let summarizer = client(&worker.base_url, quick_retry());

        let local = UserSettings {
            api_key: Some("secret-key".into()),
            ..UserSettings::default()
        };
        let summary = summarizer
            .summarize(&SummaryRequest::new("check disk", "ok", &local))
            .await
            .unwrap();
        assert_eq!(summary, "All good.");
        assert!(!worker.request(0).contains("secret-key"));

        let cloud = UserSettings {
            ai_provider: AiProvider::Cloud,
            ..local
        };
        summarizer
            .summarize(&SummaryRequest::new("check disk", "ok", &cloud))
            .await
            .unwrap();
        let sent = worker.request(1);
        assert!(sent.starts_with("POST /summarize "));
        assert!(sent.contains("secret-key"));
        assert!(sent.contains(r#""provider":"gemini""#));
    }

    #[tokio::test]
    async fn summary_failure_is_summarization_error() {
        let worker =
            spawn_fake_worker(vec![("503 Service Unavailable", "{}".to_string())]).await;
        let err = client(&worker.base_url, quick_retry())
            .summarize(&SummaryRequest::new("i", "o", &UserSettings::default()))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::Summarization(_)));
        assert!(!err.is_system_unusable());
    }
}
