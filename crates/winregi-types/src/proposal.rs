use serde::{Deserialize, Serialize};

use crate::settings::{AiProvider, UserSettings};

/// Advisory risk classification attached to a proposal by the worker.
///
/// Anything the worker sends outside `1..=3` is treated as tier 3, so an
/// unknown classification is never rendered as safer than it claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub enum SafetyTier {
    ReadOnly,
    Caution,
    Destructive,
}

impl SafetyTier {
    pub fn ordinal(self) -> u8 {
        match self {
            SafetyTier::ReadOnly => 1,
            SafetyTier::Caution => 2,
            SafetyTier::Destructive => 3,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SafetyTier::ReadOnly => "read-only",
            SafetyTier::Caution => "caution",
            SafetyTier::Destructive => "destructive",
        }
    }
}

impl From<i64> for SafetyTier {
    fn from(value: i64) -> Self {
        match value {
            1 => SafetyTier::ReadOnly,
            2 => SafetyTier::Caution,
            _ => SafetyTier::Destructive,
        }
    }
}

impl From<SafetyTier> for u8 {
    fn from(tier: SafetyTier) -> Self {
        tier.ordinal()
    }
}

impl std::fmt::Display for SafetyTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tier {} ({})", self.ordinal(), self.label())
    }
}

/// Where a proposal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Matched an entry in the worker's trusted command catalog.
    Curated,
    /// Produced by a language model.
    Generated,
    /// Typed in directly by the operator.
    Operator,
}

impl Provenance {
    pub fn from_source(source: &str) -> Self {
        let lower = source.to_ascii_lowercase();
        if lower == OPERATOR_SOURCE {
            Provenance::Operator
        } else if lower.contains("trusted") || lower.contains("catalog") || lower.contains("local db") {
            Provenance::Curated
        } else {
            Provenance::Generated
        }
    }
}

const OPERATOR_SOURCE: &str = "operator";

fn default_command_type() -> String {
    "powershell".to_string()
}

/// A resolved, reviewable command as returned by `POST /process-intent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandProposal {
    #[serde(default)]
    pub id: String,
    pub intent: String,
    pub description: String,
    pub command: String,
    #[serde(rename = "type", default = "default_command_type")]
    pub command_type: String,
    #[serde(default)]
    pub requires_admin: bool,
    pub safety_tier: SafetyTier,
    #[serde(default)]
    pub source: String,
}

impl CommandProposal {
    pub fn provenance(&self) -> Provenance {
        Provenance::from_source(&self.source)
    }

    /// Wraps a command the operator typed themselves. Its risk is unknown, so
    /// it is presented at the highest tier.
    pub fn operator(command: impl Into<String>) -> Self {
        let command = command.into();
        Self {
            id: String::new(),
            intent: command.clone(),
            description: "Command entered by the operator".to_string(),
            command,
            command_type: default_command_type(),
            requires_admin: false,
            safety_tier: SafetyTier::Destructive,
            source: OPERATOR_SOURCE.to_string(),
        }
    }
}

/// Body of `POST /process-intent`.
#[derive(Debug, Clone, Serialize)]
pub struct IntentRequest {
    pub intent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub provider: AiProvider,
}

impl IntentRequest {
    /// Builds a request using the provider and key currently in `settings`.
    pub fn new(intent: impl Into<String>, settings: &UserSettings) -> Self {
        Self {
            intent: intent.into(),
            api_key: settings.provider_key().map(str::to_string),
            provider: settings.ai_provider,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_worker_payload() {
        let raw = json!({
            "id": "disable_telemetry",
            "intent": "disable telemetry",
            "description": "Turns off diagnostic data collection",
            "command": "Set-ItemProperty -Path HKLM:\\SOFTWARE\\Policies -Name AllowTelemetry -Value 0",
            "type": "registry",
            "requires_admin": true,
            "safety_tier": 1,
            "source": "Local Trusted DB"
        });
        let proposal: CommandProposal = serde_json::from_value(raw).unwrap();
        assert_eq!(proposal.command_type, "registry");
        assert!(proposal.requires_admin);
        assert_eq!(proposal.safety_tier, SafetyTier::ReadOnly);
        assert_eq!(proposal.provenance(), Provenance::Curated);
    }

    #[test]
    fn unknown_tier_is_treated_as_destructive() {
        let raw = json!({
            "intent": "x",
            "description": "y",
            "command": "z",
            "safety_tier": 9,
            "source": "Gemini"
        });
        let proposal: CommandProposal = serde_json::from_value(raw).unwrap();
        assert_eq!(proposal.safety_tier, SafetyTier::Destructive);
        assert_eq!(proposal.command_type, "powershell");
        assert_eq!(proposal.provenance(), Provenance::Generated);

        let zero: SafetyTier = serde_json::from_value(json!(0)).unwrap();
        assert_eq!(zero, SafetyTier::Destructive);
    }

    #[test]
    fn tier_serializes_as_ordinal() {
        assert_eq!(serde_json::to_value(SafetyTier::Caution).unwrap(), json!(2));
        assert!(SafetyTier::ReadOnly < SafetyTier::Destructive);
    }

    #[test]
    fn intent_request_omits_missing_key() {
        let req = IntentRequest {
            intent: "list services".to_string(),
            api_key: None,
            provider: AiProvider::Local,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert_eq!(value, json!({"intent": "list services", "provider": "ollama"}));
    }

    #[test]
    fn intent_request_takes_key_from_cloud_settings_only() {
        let mut settings = UserSettings {
            api_key: Some("abc".to_string()),
            ..UserSettings::default()
        };
        assert_eq!(IntentRequest::new("x", &settings).api_key, None);
        settings.ai_provider = AiProvider::Cloud;
        assert_eq!(IntentRequest::new("x", &settings).api_key.as_deref(), Some("abc"));
    }

    #[test]
    fn operator_commands_are_top_tier() {
        let proposal = CommandProposal::operator("Get-Service");
        assert_eq!(proposal.safety_tier, SafetyTier::Destructive);
        assert_eq!(proposal.provenance(), Provenance::Operator);
        assert_eq!(proposal.intent, "Get-Service");
    }
}
