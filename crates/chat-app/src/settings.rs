use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Format, Json, Serialized},
};
use parley_llm::{CANNED_RESPONDER_ID, DEFAULT_MODEL, Model, default_models};
use parley_storage::AttachmentRef;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

use crate::stream::DEFAULT_CHARS_PER_TICK;

pub const SETTINGS_DIRECTORY_NAME: &str = "parley";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const DEFAULT_FALLBACK_NOTICE: &str = "Sorry, I encountered an error. Please try again.";
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful AI assistant.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub id: String,
    #[serde(default)]
    pub description: Option<String>,
}

impl ModelSettings {
    fn normalized(mut self) -> Option<Self> {
        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            return None;
        }
        Some(self)
    }

    pub fn as_selector_model(&self) -> Model {
        let model = Model::from_id(self.id.clone());
        match &self.description {
            Some(description) => model.with_description(description.clone()),
            None => model,
        }
    }
}

impl From<Model> for ModelSettings {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            description: model.description,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamSettings {
    pub tick_interval_ms: u64,
    pub chars_per_tick: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            chars_per_tick: DEFAULT_CHARS_PER_TICK,
        }
    }
}

impl StreamSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttachmentPolicy {
    pub max_size_bytes: u64,
    pub allowed_mime_types: Vec<String>,
}

impl Default for AttachmentPolicy {
    fn default() -> Self {
        Self {
            max_size_bytes: 10 * 1024 * 1024,
            allowed_mime_types: [
                "text/plain",
                "application/pdf",
                "text/markdown",
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
                "text/csv",
                "application/json",
            ]
            .into_iter()
            .map(str::to_string)
            .collect(),
        }
    }
}

impl AttachmentPolicy {
    /// Returns the reason an attachment is refused, if any.
    pub fn rejection_reason(&self, attachment: &AttachmentRef) -> Option<String> {
        if attachment.size_bytes > self.max_size_bytes {
            return Some(format!(
                "{} bytes exceeds the {} byte limit",
                attachment.size_bytes, self.max_size_bytes
            ));
        }

        let mime_type = attachment.mime_type.trim();
        let allowed = self
            .allowed_mime_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(mime_type));
        if !allowed {
            return Some(format!("file type '{mime_type}' is not allowed"));
        }

        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    #[serde(default = "default_responder")]
    pub responder: String,
    #[serde(default = "default_model")]
    pub default_model: String,
    #[serde(default = "default_model_settings")]
    pub models: Vec<ModelSettings>,
    #[serde(default)]
    pub use_retrieval: bool,
    #[serde(default)]
    pub stream: StreamSettings,
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
    #[serde(default = "default_title_max_chars")]
    pub title_max_chars: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_fallback_notice")]
    pub fallback_notice: String,
    #[serde(default)]
    pub attachments: AttachmentPolicy,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            responder: default_responder(),
            default_model: default_model(),
            models: default_model_settings(),
            use_retrieval: false,
            stream: StreamSettings::default(),
            history_limit: default_history_limit(),
            max_input_chars: default_max_input_chars(),
            title_max_chars: default_title_max_chars(),
            system_prompt: default_system_prompt(),
            fallback_notice: default_fallback_notice(),
            attachments: AttachmentPolicy::default(),
        }
    }
}

impl SessionSettings {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".parley"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn figment(path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Self::default())).merge(Json::file(path))
    }

    /// Strict variant: parse failures are returned to the caller.
    pub fn try_load_from(path: &Path) -> Result<Self, SettingsError> {
        let settings = Self::figment(path)
            .extract::<Self>()
            .map_err(Box::new)
            .context(ExtractSnafu {
                stage: "extract-settings",
                path: path.to_path_buf(),
            })?;
        Ok(settings.normalized())
    }

    /// Missing or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            tracing::info!(path = %path.display(), "settings file not found, using defaults");
            return Self::default();
        }

        match Self::try_load_from(path) {
            Ok(settings) => settings,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %error,
                    "failed to parse settings, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn load() -> Self {
        Self::load_from(&Self::default_config_path())
    }

    pub fn configured_models(&self) -> Vec<Model> {
        self.models
            .iter()
            .map(ModelSettings::as_selector_model)
            .collect()
    }

    pub fn normalized(mut self) -> Self {
        self.responder = self.responder.trim().to_string();
        if self.responder.is_empty() {
            self.responder = default_responder();
        }

        self.default_model = self.default_model.trim().to_string();
        if self.default_model.is_empty() {
            self.default_model = default_model();
        }

        // Blank rows would show up as unnamed entries in a model selector.
        self.models = self
            .models
            .into_iter()
            .filter_map(ModelSettings::normalized)
            .collect();
        if self.models.is_empty() {
            self.models = default_model_settings();
        }

        self.stream.tick_interval_ms = self.stream.tick_interval_ms.max(1);
        self.stream.chars_per_tick = self.stream.chars_per_tick.max(1);
        self.history_limit = self.history_limit.max(1);
        self.max_input_chars = self.max_input_chars.max(1);
        self.title_max_chars = self.title_max_chars.max(1);

        if self.fallback_notice.trim().is_empty() {
            self.fallback_notice = default_fallback_notice();
        }

        self
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("failed to load settings from {path:?} on `{stage}`: {source}"))]
    Extract {
        stage: &'static str,
        path: PathBuf,
        source: Box<figment::Error>,
    },
}

fn default_responder() -> String {
    CANNED_RESPONDER_ID.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_model_settings() -> Vec<ModelSettings> {
    default_models().into_iter().map(ModelSettings::from).collect()
}

fn default_history_limit() -> usize {
    10
}

fn default_max_input_chars() -> usize {
    4_000
}

fn default_title_max_chars() -> usize {
    100
}

fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}

fn default_fallback_notice() -> String {
    DEFAULT_FALLBACK_NOTICE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn missing_file_yields_defaults() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("absent.json");
            assert_eq!(SessionSettings::load_from(&path), SessionSettings::default());
            Ok(())
        });
    }

    #[test]
    fn file_values_override_defaults_and_are_normalized() {
        Jail::expect_with(|jail| {
            jail.create_file(
                SETTINGS_FILE_NAME,
                r#"{
                    "default_model": "  claude-3-opus-20240229 ",
                    "models": [{ "id": "" }, { "id": "claude-3-opus-20240229" }],
                    "stream": { "chars_per_tick": 0 },
                    "history_limit": 4
                }"#,
            )?;

            let settings =
                SessionSettings::try_load_from(&jail.directory().join(SETTINGS_FILE_NAME))
                    .expect("valid settings");
            assert_eq!(settings.default_model, "claude-3-opus-20240229");
            assert_eq!(settings.models.len(), 1);
            assert_eq!(settings.stream.chars_per_tick, 1);
            assert_eq!(settings.stream.tick_interval_ms, 20);
            assert_eq!(settings.history_limit, 4);
            assert_eq!(settings.max_input_chars, 4_000);
            assert_eq!(settings.fallback_notice, DEFAULT_FALLBACK_NOTICE);
            Ok(())
        });
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(SETTINGS_FILE_NAME, "{ not json")?;
            let path = jail.directory().join(SETTINGS_FILE_NAME);

            assert!(SessionSettings::try_load_from(&path).is_err());
            assert_eq!(SessionSettings::load_from(&path), SessionSettings::default());
            Ok(())
        });
    }

    #[test]
    fn attachment_policy_checks_size_and_type() {
        let policy = AttachmentPolicy::default();
        assert_eq!(
            policy.rejection_reason(&AttachmentRef::new("a.csv", "TEXT/CSV", 10)),
            None
        );
        assert!(
            policy
                .rejection_reason(&AttachmentRef::new("a.exe", "application/x-msdownload", 10))
                .is_some_and(|reason| reason.contains("not allowed"))
        );
        assert!(
            policy
                .rejection_reason(&AttachmentRef::new("big.pdf", "application/pdf", u64::MAX))
                .is_some_and(|reason| reason.contains("limit"))
        );
    }
}
