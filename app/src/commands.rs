// WinRegi Host Operations
// The request/response surface a presentation layer drives. Each call is a
// single exchange; nothing here streams.
use crate::backend::{BackendRuntimeSnapshot, StartOutcome};
use crate::elevation::RelaunchInitiated;
use crate::error::{HostError, Result};
use crate::execution::{Confirmed, ExecutedCommand, Proposed};
use crate::links;
use crate::logs::{self, LogFileInfo};
use crate::state::AppState;
use serde::Serialize;
use winregi_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use winregi_types::{BackendProcessState, CommandProposal, IntentRequest, UserSettings};

#[derive(Debug, Clone, Serialize)]
pub struct StartupReport {
    pub launch: StartOutcome,
    pub ready: bool,
    pub state: BackendProcessState,
}

/// Starts the worker and runs the readiness gate once.
///
/// A missing worker executable still runs the gate: a worker started by other
/// means can satisfy it. Only a spawn failure is returned as an error.
pub async fn startup(state: &AppState) -> Result<StartupReport> {
    let launch = state.supervisor.start().await?;
    let ready = state
        .prober
        .wait_until_ready(state.config.readiness_attempts)
        .await;
    if ready {
        state.supervisor.mark_running().await;
    }
    Ok(StartupReport {
        launch,
        ready,
        state: state.supervisor.state().await,
    })
}

/// Stops the worker. Called on every exit path.
pub async fn shutdown(state: &AppState) {
    if let Err(e) = state.supervisor.stop().await {
        tracing::warn!("Failed to stop worker during shutdown: {}", e);
    }
}

pub async fn worker_status(state: &AppState) -> BackendRuntimeSnapshot {
    state.supervisor.snapshot().await
}

pub fn currently_elevated(state: &AppState) -> bool {
    state.elevation.currently_elevated()
}

/// Prepares an elevated instance with this process's arguments and resolved
/// worker configuration, then stops the worker so nothing is left holding the
/// worker port. The caller ends the process with the returned value.
pub async fn relaunch_elevated(state: &AppState) -> Result<RelaunchInitiated> {
    let exe = std::env::current_exe()
        .map_err(|e| HostError::Elevation(format!("cannot locate current executable: {e}")))?;
    let args = state.config.relaunch_args(std::env::args().skip(1));
    let initiated = state.elevation.relaunch_elevated(&exe, &args)?;
    shutdown(state).await;
    Ok(initiated)
}

/// Resolves an intent with the provider currently in settings.
pub async fn resolve_intent(state: &AppState, intent: &str) -> Result<Proposed> {
    let intent = intent.trim();
    if intent.is_empty() {
        return Err(HostError::Resolution("intent is empty".to_string()));
    }
    let settings = state.settings.get_settings().await;
    let request = IntentRequest::new(intent, &settings);
    match state.resolver.resolve_intent(&request).await {
        Ok(proposal) => Ok(Proposed::new(proposal)),
        Err(e) => {
            emit_event(
                tracing::Level::WARN,
                ProcessKind::Host,
                ObservabilityEvent {
                    event: "intent.resolve.failed",
                    component: "commands",
                    provider: Some(settings.ai_provider.as_str()),
                    status: Some("failed"),
                    detail: Some(&format!("{} intent={}", e, redact_text(intent))),
                    ..Default::default()
                },
            );
            Err(e)
        }
    }
}

/// Wraps text the operator typed as a proposal that still has to pass the gate.
pub fn propose_command(command_text: &str) -> Result<Proposed> {
    let command_text = command_text.trim();
    if command_text.is_empty() {
        return Err(HostError::Resolution("command is empty".to_string()));
    }
    Ok(Proposed::new(CommandProposal::operator(command_text)))
}

/// Runs a confirmed command and queues its summary in the background.
/// Returns as soon as the command itself has finished.
pub async fn execute_command(state: &AppState, confirmed: Confirmed) -> ExecutedCommand {
    let executed = state.controller.execute(confirmed).await;
    state.feedback.spawn_summary(&executed);
    executed
}

pub fn open_external_link(url: &str) -> Result<()> {
    links::open_external_link(url)
}

pub async fn get_settings(state: &AppState) -> UserSettings {
    state.settings.get_settings().await
}

pub async fn save_settings(state: &AppState, settings: &UserSettings) -> Result<()> {
    state.settings.update_settings(settings).await
}

pub fn list_log_files(state: &AppState) -> Result<Vec<LogFileInfo>> {
    logs::list_log_files(&state.logs_dir)
}
