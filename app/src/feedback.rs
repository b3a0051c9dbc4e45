// WinRegi Summarization Feedback
// Explains a finished command's output in the background. The execution
// result is already final by the time this runs; a summary can only add to it.
use crate::execution::ExecutedCommand;
use crate::worker_client::{SettingsSource, Summarizer};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use winregi_observability::{emit_event, ObservabilityEvent, ProcessKind};
use winregi_types::SummaryRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryEvent {
    Ready { request_id: String, summary: String },
    /// Soft failure; the execution result stands on its own.
    Unavailable { request_id: String, reason: String },
}

impl SummaryEvent {
    pub fn request_id(&self) -> &str {
        match self {
            SummaryEvent::Ready { request_id, .. } | SummaryEvent::Unavailable { request_id, .. } => {
                request_id
            }
        }
    }
}

pub struct FeedbackPipeline {
    summarizer: Arc<dyn Summarizer>,
    settings: Arc<dyn SettingsSource>,
    events: mpsc::UnboundedSender<SummaryEvent>,
}

impl FeedbackPipeline {
    pub fn new(
        summarizer: Arc<dyn Summarizer>,
        settings: Arc<dyn SettingsSource>,
    ) -> (Self, mpsc::UnboundedReceiver<SummaryEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                summarizer,
                settings,
                events,
            },
            rx,
        )
    }

    /// Detached: the caller never waits on the returned handle to show results.
    pub fn spawn_summary(&self, executed: &ExecutedCommand) -> JoinHandle<()> {
        let summarizer = self.summarizer.clone();
        let settings = self.settings.clone();
        let events = self.events.clone();
        let request_id = executed.request_id.clone();
        let intent = executed.intent.clone();
        let output = executed.result.stdout_combined.clone();

        tokio::spawn(async move {
            let settings = settings.get_settings().await;
            let request = SummaryRequest::new(intent, output, &settings);
            let event = match summarizer.summarize(&request).await {
                Ok(summary) => {
                    emit_event(
                        tracing::Level::INFO,
                        ProcessKind::Host,
                        ObservabilityEvent {
                            event: "summary.ready",
                            component: "feedback",
                            request_id: Some(&request_id),
                            provider: Some(settings.ai_provider.as_str()),
                            status: Some("ok"),
                            ..Default::default()
                        },
                    );
                    SummaryEvent::Ready {
                        request_id,
                        summary,
                    }
                }
                Err(e) => {
                    emit_event(
                        tracing::Level::WARN,
                        ProcessKind::Host,
                        ObservabilityEvent {
                            event: "summary.unavailable",
                            component: "feedback",
                            request_id: Some(&request_id),
                            provider: Some(settings.ai_provider.as_str()),
                            status: Some("failed"),
                            error_code: Some("SUMMARY_UNAVAILABLE"),
                            detail: Some(&e.to_string()),
                        },
                    );
                    SummaryEvent::Unavailable {
                        request_id,
                        reason: e.to_string(),
                    }
                }
            };
            if events.send(event).is_err() {
                tracing::debug!("Summary listener gone; dropping summary event");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{HostError, Result};
    use crate::execution::ExecutionStage;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use winregi_types::{AiProvider, ExecutionResult, UserSettings};

    #[derive(Default)]
    struct RecordingSummarizer {
        fail: bool,
        seen: Mutex<Vec<SummaryRequest>>,
    }

    #[async_trait]
    impl Summarizer for RecordingSummarizer {
        async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            if self.fail {
                Err(HostError::Summarization("HTTP 500".into()))
            } else {
                Ok(format!("Summary of {}", request.intent))
            }
        }
    }

    struct StaticSettings(UserSettings);

    #[async_trait]
    impl SettingsSource for StaticSettings {
        async fn get_settings(&self) -> UserSettings {
            self.0.clone()
        }
        async fn update_settings(&self, _settings: &UserSettings) -> Result<()> {
            Ok(())
        }
    }

    fn executed(output: &str, succeeded: bool) -> ExecutedCommand {
        ExecutedCommand {
            request_id: "req-1".into(),
            intent: "check disk".into(),
            command: "Get-Volume".into(),
            stage: if succeeded {
                ExecutionStage::Succeeded
            } else {
                ExecutionStage::Failed
            },
            result: if succeeded {
                ExecutionResult::success(output.into(), Some(0), 3)
            } else {
                ExecutionResult::failure(output.into(), Some(1), 3)
            },
        }
    }

    #[tokio::test]
    async fn summary_carries_intent_output_and_provider() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let settings = UserSettings {
            ai_provider: AiProvider::Cloud,
            api_key: Some("k".into()),
            ..UserSettings::default()
        };
        let (pipeline, mut rx) =
            FeedbackPipeline::new(summarizer.clone(), Arc::new(StaticSettings(settings)));

        pipeline.spawn_summary(&executed("C: 40GB free", true));
        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            SummaryEvent::Ready {
                request_id: "req-1".into(),
                summary: "Summary of check disk".into()
            }
        );

        let seen = summarizer.seen.lock().unwrap();
        assert_eq!(seen[0].output, "C: 40GB free");
        assert_eq!(seen[0].provider, AiProvider::Cloud);
        assert_eq!(seen[0].api_key.as_deref(), Some("k"));
    }

    #[tokio::test]
    async fn failed_execution_is_still_summarized() {
        let summarizer = Arc::new(RecordingSummarizer::default());
        let (pipeline, mut rx) = FeedbackPipeline::new(
            summarizer.clone(),
            Arc::new(StaticSettings(UserSettings::default())),
        );
        pipeline.spawn_summary(&executed("access denied", false));
        assert!(matches!(rx.recv().await.unwrap(), SummaryEvent::Ready { .. }));
        assert_eq!(summarizer.seen.lock().unwrap()[0].output, "access denied");
    }

    #[tokio::test]
    async fn summarizer_failure_is_soft() {
        let summarizer = Arc::new(RecordingSummarizer {
            fail: true,
            ..Default::default()
        });
        let (pipeline, mut rx) = FeedbackPipeline::new(
            summarizer.clone(),
            Arc::new(StaticSettings(UserSettings::default())),
        );
        let handle = pipeline.spawn_summary(&executed("ok", true));
        handle.await.unwrap();

        match rx.recv().await.unwrap() {
            SummaryEvent::Unavailable { request_id, reason } => {
                assert_eq!(request_id, "req-1");
                assert!(reason.contains("HTTP 500"));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(summarizer.seen.lock().unwrap().len(), 1);
    }
}
