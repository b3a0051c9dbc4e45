// WinRegi Safety Gate & Execution Controller
//
// A proposal moves Proposed -> Confirmed -> Executing -> {Succeeded, Failed}.
// `Confirmed` can only be built by `Proposed::confirm`, so nothing reaches
// the shell without an explicit operator decision. Tier and admin flags are
// shown to the operator but never block or force anything.
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use uuid::Uuid;
use winregi_observability::{emit_event, redact_text, ObservabilityEvent, ProcessKind};
use winregi_types::{CommandProposal, ExecutionResult, Provenance, SafetyTier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStage {
    Proposed,
    Confirmed,
    Executing,
    Succeeded,
    Failed,
}

impl ExecutionStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStage::Proposed => "proposed",
            ExecutionStage::Confirmed => "confirmed",
            ExecutionStage::Executing => "executing",
            ExecutionStage::Succeeded => "succeeded",
            ExecutionStage::Failed => "failed",
        }
    }
}

/// What the operator sees before deciding.
#[derive(Debug, Clone, Serialize)]
pub struct GateNotice {
    pub request_id: String,
    pub tier: SafetyTier,
    pub tier_label: &'static str,
    pub requires_admin: bool,
    /// Admin is required but the host is not elevated. Advisory only.
    pub not_elevated_warning: bool,
    pub provenance: Provenance,
    pub description: String,
    pub command: String,
}

impl GateNotice {
    pub fn render(&self) -> String {
        let mut out = format!(
            "[{}] {}\n  {}\n  > {}",
            self.tier_label.to_uppercase(),
            match self.provenance {
                Provenance::Curated => "verified command",
                Provenance::Generated => "AI-generated command",
                Provenance::Operator => "operator command",
            },
            self.description,
            self.command
        );
        if self.requires_admin {
            out.push_str("\n  ADMIN REQUIRED");
            if self.not_elevated_warning {
                out.push_str(" (not elevated: the command may fail; use `elevate` to restart as admin)");
            }
        }
        out
    }
}

/// A proposal awaiting the operator's decision.
#[derive(Debug)]
pub struct Proposed {
    request_id: Uuid,
    proposal: CommandProposal,
}

impl Proposed {
    pub fn new(proposal: CommandProposal) -> Self {
        let proposed = Self {
            request_id: Uuid::new_v4(),
            proposal,
        };
        proposed.record(ExecutionStage::Proposed);
        proposed
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn proposal(&self) -> &CommandProposal {
        &self.proposal
    }

    pub fn notice(&self, elevated: bool) -> GateNotice {
        GateNotice {
            request_id: self.request_id.to_string(),
            tier: self.proposal.safety_tier,
            tier_label: self.proposal.safety_tier.label(),
            requires_admin: self.proposal.requires_admin,
            not_elevated_warning: self.proposal.requires_admin && !elevated,
            provenance: self.proposal.provenance(),
            description: self.proposal.description.clone(),
            command: self.proposal.command.clone(),
        }
    }

    /// The operator's explicit go-ahead. Required for every tier.
    pub fn confirm(self) -> Confirmed {
        let confirmed = Confirmed {
            request_id: self.request_id,
            proposal: self.proposal,
            confirmed_at: Utc::now(),
        };
        emit_stage(
            &confirmed.request_id,
            &confirmed.proposal,
            ExecutionStage::Confirmed,
        );
        confirmed
    }

    /// Dropped without running.
    pub fn reject(self) {
        tracing::info!(request_id = %self.request_id, "Proposal declined by operator");
    }

    fn record(&self, stage: ExecutionStage) {
        emit_stage(&self.request_id, &self.proposal, stage);
    }
}

/// A proposal the operator has approved.
#[derive(Debug)]
pub struct Confirmed {
    request_id: Uuid,
    proposal: CommandProposal,
    confirmed_at: DateTime<Utc>,
}

impl Confirmed {
    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn proposal(&self) -> &CommandProposal {
        &self.proposal
    }

    pub fn confirmed_at(&self) -> DateTime<Utc> {
        self.confirmed_at
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutedCommand {
    pub request_id: String,
    pub intent: String,
    pub command: String,
    pub stage: ExecutionStage,
    pub result: ExecutionResult,
}

fn emit_stage(request_id: &Uuid, proposal: &CommandProposal, stage: ExecutionStage) {
    let request_id = request_id.to_string();
    emit_event(
        tracing::Level::INFO,
        ProcessKind::Host,
        ObservabilityEvent {
            event: "execution.stage",
            component: "safety_gate",
            request_id: Some(&request_id),
            status: Some(stage.as_str()),
            detail: Some(&format!(
                "tier={} requires_admin={} command={}",
                proposal.safety_tier.ordinal(),
                proposal.requires_admin,
                redact_text(&proposal.command)
            )),
            ..Default::default()
        },
    );
}

/// Runs confirmed commands through the platform shell.
#[derive(Debug, Default, Clone)]
pub struct ExecutionController;

impl ExecutionController {
    pub fn new() -> Self {
        Self
    }

    /// Confirmed -> Executing -> terminal. Waits for this request only.
    ///
    /// The operator's confirmation is the only way in:
    ///
    /// ```no_run
    /// # use winregi_lib::{ExecutionController, Proposed};
    /// # use winregi_types::CommandProposal;
    /// # async fn run() {
    /// let proposed = Proposed::new(CommandProposal::operator("echo hi"));
    /// let executed = ExecutionController::new().execute(proposed.confirm()).await;
    /// assert!(executed.result.succeeded);
    /// # }
    /// ```
    ///
    /// An unconfirmed proposal does not type-check:
    ///
    /// ```compile_fail
    /// # use winregi_lib::{ExecutionController, Proposed};
    /// # use winregi_types::CommandProposal;
    /// # async fn run() {
    /// let proposed = Proposed::new(CommandProposal::operator("echo hi"));
    /// ExecutionController::new().execute(proposed).await;
    /// # }
    /// ```
    pub async fn execute(&self, confirmed: Confirmed) -> ExecutedCommand {
        emit_stage(
            &confirmed.request_id,
            &confirmed.proposal,
            ExecutionStage::Executing,
        );
        let result = self.run_command(&confirmed.proposal.command).await;
        let stage = if result.succeeded {
            ExecutionStage::Succeeded
        } else {
            ExecutionStage::Failed
        };
        emit_stage(&confirmed.request_id, &confirmed.proposal, stage);

        ExecutedCommand {
            request_id: confirmed.request_id.to_string(),
            intent: confirmed.proposal.intent,
            command: confirmed.proposal.command,
            stage,
            result,
        }
    }

    /// Runs `command` literally. Spawn errors and non-zero exits come back as
    /// a failed result, never as `Err`.
    pub async fn run_command(&self, command: &str) -> ExecutionResult {
        let started = Instant::now();
        let output = shell_command(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let output = match output {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Failed to start shell: {}", e);
                return ExecutionResult::failure(
                    format!("Failed to start shell: {e}"),
                    None,
                    duration_ms,
                );
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = combine(&stdout, &stderr);
        let exit_code = output.status.code();

        if output.status.success() {
            ExecutionResult::success(combined, exit_code, duration_ms)
        } else {
            let raw_error = if combined.is_empty() {
                format!("Command failed: {}", output.status)
            } else {
                format!("Command failed: {}\n{}", output.status, combined)
            };
            ExecutionResult::failure(raw_error, exit_code, duration_ms)
        }
    }
}

fn combine(stdout: &str, stderr: &str) -> String {
    match (stdout.trim(), stderr.trim()) {
        (out, "") => out.to_string(),
        ("", err) => err.to_string(),
        (out, err) => format!("{out}\n{err}"),
    }
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-Command", command])
        .creation_flags(CREATE_NO_WINDOW);
    cmd
}

#[cfg(not(windows))]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", command]);
    cmd
}
