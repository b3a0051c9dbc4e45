use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which reasoning backend the worker should use.
///
/// The worker names these after its concrete providers, so the wire values
/// are `ollama` and `gemini`; `local` and `cloud` are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AiProvider {
    #[default]
    #[serde(rename = "ollama", alias = "local")]
    Local,
    #[serde(rename = "gemini", alias = "cloud")]
    Cloud,
}

impl AiProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            AiProvider::Local => "local",
            AiProvider::Cloud => "cloud",
        }
    }
}

impl std::str::FromStr for AiProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" | "ollama" => Ok(AiProvider::Local),
            "cloud" | "gemini" => Ok(AiProvider::Cloud),
            other => Err(format!("unknown provider '{other}' (expected local or cloud)")),
        }
    }
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserSettings {
    pub theme: String,
    pub ai_provider: AiProvider,
    #[serde(
        rename = "gemini_api_key",
        alias = "api_key",
        skip_serializing_if = "Option::is_none"
    )]
    pub api_key: Option<String>,
    pub favorites: BTreeSet<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: "dark".to_string(),
            ai_provider: AiProvider::Local,
            api_key: None,
            favorites: BTreeSet::new(),
        }
    }
}

impl UserSettings {
    /// The key to forward to the worker. Only the cloud provider uses one.
    pub fn provider_key(&self) -> Option<&str> {
        match self.ai_provider {
            AiProvider::Cloud => self
                .api_key
                .as_deref()
                .map(str::trim)
                .filter(|k| !k.is_empty()),
            AiProvider::Local => None,
        }
    }
}

impl std::fmt::Debug for UserSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSettings")
            .field("theme", &self.theme)
            .field("ai_provider", &self.ai_provider)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("favorites", &self.favorites)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn empty_object_yields_defaults() {
        let settings: UserSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, UserSettings::default());
        assert_eq!(settings.theme, "dark");
        assert_eq!(settings.ai_provider, AiProvider::Local);
        assert!(settings.favorites.is_empty());
    }

    #[test]
    fn reads_worker_field_names() {
        let settings: UserSettings = serde_json::from_value(json!({
            "theme": "light",
            "ai_provider": "gemini",
            "gemini_api_key": "abc123",
            "favorites": ["b", "a", "b"]
        }))
        .unwrap();
        assert_eq!(settings.ai_provider, AiProvider::Cloud);
        assert_eq!(settings.provider_key(), Some("abc123"));
        assert_eq!(settings.favorites.len(), 2);
    }

    #[test]
    fn key_is_ignored_for_local_provider() {
        let settings = UserSettings {
            api_key: Some("abc123".to_string()),
            ..UserSettings::default()
        };
        assert_eq!(settings.provider_key(), None);
    }

    #[test]
    fn debug_masks_key() {
        let settings = UserSettings {
            ai_provider: AiProvider::Cloud,
            api_key: Some("super-secret".to_string()),
            ..UserSettings::default()
        };
        let rendered = format!("{settings:?}");
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn provider_parses_aliases() {
        assert_eq!("cloud".parse::<AiProvider>().unwrap(), AiProvider::Cloud);
        assert_eq!("Ollama".parse::<AiProvider>().unwrap(), AiProvider::Local);
        assert!("openai".parse::<AiProvider>().is_err());
    }
}
