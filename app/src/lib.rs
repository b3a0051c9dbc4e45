// WinRegi - natural-language system control center
// Library entry point: worker supervision, guarded command execution and the
// terminal front end built on top of them.

pub mod backend;
mod cli;
pub mod commands;
pub mod config;
pub mod elevation;
pub mod error;
pub mod execution;
pub mod feedback;
pub mod links;
pub mod logs;
pub mod readiness;
pub mod retry;
pub mod state;
mod terminal;
pub mod worker_client;

#[cfg(test)]
mod test_support;

pub use backend::{BackendSupervisor, LaunchProfile, StartOutcome};
pub use cli::run;
pub use config::{HostConfig, RunMode};
pub use elevation::{ElevationManager, PrivilegeQuery, RelaunchInitiated};
pub use error::{HostError, Result};
pub use execution::{Confirmed, ExecutedCommand, ExecutionController, GateNotice, Proposed};
pub use feedback::{FeedbackPipeline, SummaryEvent};
pub use readiness::ReadinessProber;
pub use retry::RetryPolicy;
pub use state::{AppState, Collaborators};
pub use worker_client::{IntentResolver, SettingsSource, Summarizer, WorkerClient};
