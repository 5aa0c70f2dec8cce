//! TOML configuration file loading
//!
//! Supports `~/.config/paw/voice/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::dialog::PetRecord;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PawConfigFile {
    /// Directory for preferences and other local state
    #[serde(default)]
    pub data_dir: Option<String>,

    /// Voice/audio configuration
    #[serde(default)]
    pub voice: VoiceFileConfig,

    /// Intent parsing and dispatch configuration
    #[serde(default)]
    pub dialog: DialogFileConfig,

    /// Hands-free session configuration
    #[serde(default)]
    pub hands_free: HandsFreeFileConfig,

    /// API keys for external services
    #[serde(default)]
    pub api_keys: ApiKeysFileConfig,

    /// Pets the CLI session resolves names against (`[[pets]]` tables)
    #[serde(default)]
    pub pets: Vec<PetRecord>,
}

/// Voice processing configuration
#[derive(Debug, Default, Deserialize)]
pub struct VoiceFileConfig {
    /// Enable voice input/output
    pub enabled: Option<bool>,

    /// BCP-47 locale for recognition and synthesis (e.g. "en-US")
    pub locale: Option<String>,

    /// Wake phrases (e.g. `["hey paw"]`)
    pub wake_words: Option<Vec<String>>,

    /// Input device name; the system default when unset
    pub input_device: Option<String>,

    /// STT provider ("whisper" or "deepgram")
    pub stt_provider: Option<String>,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: Option<String>,

    /// TTS provider ("openai" or "elevenlabs")
    pub tts_provider: Option<String>,

    /// TTS model (e.g. "tts-1")
    pub tts_model: Option<String>,

    /// TTS voice identifier (e.g. "alloy")
    pub tts_voice: Option<String>,

    /// Speaking rate multiplier
    pub tts_rate: Option<f32>,

    /// Voice pitch multiplier
    pub tts_pitch: Option<f32>,

    /// Upper bound on one utterance, in seconds
    pub max_utterance_secs: Option<u64>,
}

/// Dialog configuration
#[derive(Debug, Default, Deserialize)]
pub struct DialogFileConfig {
    /// Previous intents kept in context
    pub max_previous_intents: Option<usize>,

    /// Recent entities kept in context
    pub max_recent_entities: Option<usize>,

    /// Host command timeout, in seconds
    pub dispatch_timeout_secs: Option<u64>,

    /// Remote NLU endpoint; local rules are used when unset
    pub nlu_url: Option<String>,
}

/// Hands-free configuration
#[derive(Debug, Default, Deserialize)]
pub struct HandsFreeFileConfig {
    /// Minutes without activity before the inactivity prompt
    pub inactivity_timeout_mins: Option<u64>,

    /// Seconds an unanswered prompt stays up before hands-free turns off
    pub auto_disable_secs: Option<u64>,

    /// Seconds between inactivity checks
    pub poll_interval_secs: Option<u64>,
}

/// API keys configuration
#[derive(Debug, Default, Deserialize)]
pub struct ApiKeysFileConfig {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,
    pub nlu: Option<String>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PawConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PawConfigFile {
    config_file_path().map_or_else(PawConfigFile::default, |path| load_config_from(&path))
}

/// Load a TOML config file from an explicit path
///
/// Returns `PawConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_from(path: &Path) -> PawConfigFile {
    if !path.exists() {
        return PawConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                PawConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            PawConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/paw/voice/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("paw").join("voice").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_leaves_other_sections_empty() {
        let parsed: PawConfigFile = toml::from_str(
            r#"
            [voice]
            locale = "en-GB"
            wake_words = ["hey paw", "okay paw"]

            [hands_free]
            inactivity_timeout_mins = 10
            "#,
        )
        .unwrap();

        assert_eq!(parsed.voice.locale.as_deref(), Some("en-GB"));
        assert_eq!(parsed.voice.wake_words.unwrap().len(), 2);
        assert_eq!(parsed.hands_free.inactivity_timeout_mins, Some(10));
        assert!(parsed.hands_free.auto_disable_secs.is_none());
        assert!(parsed.dialog.nlu_url.is_none());
        assert!(parsed.api_keys.openai.is_none());
    }

    #[test]
    fn unreadable_or_invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        assert!(load_config_from(&path).voice.enabled.is_none());

        std::fs::write(&path, "[voice\nenabled = maybe").unwrap();
        assert!(load_config_from(&path).voice.enabled.is_none());

        std::fs::write(&path, "[voice]\nenabled = false").unwrap();
        assert_eq!(load_config_from(&path).voice.enabled, Some(false));
    }
}
