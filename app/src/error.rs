// WinRegi Error Types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The OS refused to spawn the worker. A missing executable is reported
    /// as `StartOutcome::ExecutableMissing` instead.
    #[error("Backend launch failed: {0}")]
    Launch(String),

    /// Worker unreachable, after the retry budget was spent.
    #[error("Backend unavailable: {0}")]
    Connectivity(String),

    /// The worker answered but could not resolve the intent.
    #[error("Processing failed: {0}")]
    Resolution(String),

    #[error("Summary unavailable: {0}")]
    Summarization(String),

    #[error("Elevation error: {0}")]
    Elevation(String),

    #[error("Invalid link: {0}")]
    InvalidLink(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HostError {
    /// Launch failures and exhausted connectivity make the whole app unusable;
    /// everything else is reported against the request that caused it.
    pub fn is_system_unusable(&self) -> bool {
        matches!(self, HostError::Launch(_) | HostError::Connectivity(_))
    }
}

// Presentation layers receive errors as plain strings.
impl serde::Serialize for HostError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_launch_and_connectivity_are_system_level() {
        assert!(HostError::Launch("spawn refused".into()).is_system_unusable());
        assert!(HostError::Connectivity("refused".into()).is_system_unusable());
        assert!(!HostError::Resolution("500".into()).is_system_unusable());
        assert!(!HostError::Summarization("timeout".into()).is_system_unusable());
    }

    #[test]
    fn serializes_as_display_string() {
        let err = HostError::Resolution("status 500".into());
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value, serde_json::json!("Processing failed: status 500"));
    }
}
