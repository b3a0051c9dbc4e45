use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::settings::{AiProvider, UserSettings};

/// Lifecycle of the supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendProcessState {
    NotStarted,
    Starting,
    Running,
    Failed,
    Stopped,
}

impl BackendProcessState {
    pub fn as_str(self) -> &'static str {
        match self {
            BackendProcessState::NotStarted => "not_started",
            BackendProcessState::Starting => "starting",
            BackendProcessState::Running => "running",
            BackendProcessState::Failed => "failed",
            BackendProcessState::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for BackendProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one shell execution attempt. Built once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub stdout_combined: String,
    pub succeeded: bool,
    pub raw_error: Option<String>,
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn success(output: String, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            stdout_combined: output,
            succeeded: true,
            raw_error: None,
            exit_code,
            duration_ms,
            finished_at: Utc::now(),
        }
    }

    /// The raw error text doubles as the displayed output.
    pub fn failure(raw_error: String, exit_code: Option<i32>, duration_ms: u64) -> Self {
        Self {
            stdout_combined: raw_error.clone(),
            succeeded: false,
            raw_error: Some(raw_error),
            exit_code,
            duration_ms,
            finished_at: Utc::now(),
        }
    }
}

/// Body of `POST /summarize`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryRequest {
    pub intent: String,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub provider: AiProvider,
}

impl SummaryRequest {
    pub fn new(intent: impl Into<String>, output: impl Into<String>, settings: &UserSettings) -> Self {
        Self {
            intent: intent.into(),
            output: output.into(),
            api_key: settings.provider_key().map(str::to_string),
            provider: settings.ai_provider,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SummaryResponse {
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_substitutes_error_for_output() {
        let result = ExecutionResult::failure("access denied".to_string(), Some(1), 12);
        assert!(!result.succeeded);
        assert_eq!(result.stdout_combined, "access denied");
        assert_eq!(result.raw_error.as_deref(), Some("access denied"));
    }

    #[test]
    fn state_serializes_snake_case() {
        let value = serde_json::to_value(BackendProcessState::NotStarted).unwrap();
        assert_eq!(value, serde_json::json!("not_started"));
        assert_eq!(BackendProcessState::Running.to_string(), "running");
    }
}
