pub mod proposal;
pub mod runtime;
pub mod settings;

pub use proposal::{CommandProposal, IntentRequest, Provenance, SafetyTier};
pub use runtime::{BackendProcessState, ExecutionResult, SummaryRequest, SummaryResponse};
pub use settings::{AiProvider, UserSettings};
