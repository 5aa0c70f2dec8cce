//! Configuration management for the voice pipeline

pub mod file;

use std::path::PathBuf;
use std::time::Duration;

use crate::commands::DEFAULT_DISPATCH_TIMEOUT;
use crate::dialog::{DEFAULT_MAX_ENTITIES, DEFAULT_MAX_INTENTS, PetRecord};
use crate::voice::{DEFAULT_MAX_UTTERANCE, SttProvider, TtsProvider};
use crate::{Error, Result};

use self::file::PawConfigFile;

/// Default wake phrase
pub const DEFAULT_WAKE_WORD: &str = "hey paw";

/// Default time without activity before the inactivity prompt
pub const DEFAULT_INACTIVITY_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Default time an unanswered inactivity prompt stays up
pub const DEFAULT_AUTO_DISABLE_AFTER: Duration = Duration::from_secs(60);

/// Default interval between inactivity checks
pub const DEFAULT_INACTIVITY_POLL: Duration = Duration::from_secs(5);

/// Voice pipeline configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to data directory (preferences, cache)
    pub data_dir: PathBuf,

    /// Voice configuration
    pub voice: VoiceConfig,

    /// Dialog configuration
    pub dialog: DialogConfig,

    /// Hands-free lifecycle timings
    pub hands_free: HandsFreeConfig,

    /// API keys
    pub api_keys: ApiKeys,

    /// Pets known without a host (CLI sessions)
    pub pets: Vec<PetRecord>,
}

/// Voice processing configuration
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    /// Enable voice input and output
    pub enabled: bool,

    /// BCP-47 locale shared by recognition and synthesis
    pub locale: String,

    /// Wake phrases, lower-cased
    pub wake_words: Vec<String>,

    /// Input device name; the system default when `None`
    pub input_device: Option<String>,

    pub stt_provider: SttProvider,

    /// STT model (e.g. "whisper-1", "nova-2")
    pub stt_model: String,

    pub tts_provider: TtsProvider,

    /// TTS model (e.g. "tts-1", "eleven_multilingual_v2")
    pub tts_model: String,

    /// TTS voice identifier (OpenAI voice name or ElevenLabs voice id)
    pub tts_voice: String,

    pub tts_rate: f32,
    pub tts_pitch: f32,

    /// Upper bound on one utterance
    pub max_utterance: Duration,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            locale: "en-US".to_string(),
            wake_words: vec![DEFAULT_WAKE_WORD.to_string()],
            input_device: None,
            stt_provider: SttProvider::Whisper,
            stt_model: "whisper-1".to_string(),
            tts_provider: TtsProvider::OpenAI,
            tts_model: "tts-1".to_string(),
            tts_voice: "alloy".to_string(),
            tts_rate: 1.0,
            tts_pitch: 1.0,
            max_utterance: DEFAULT_MAX_UTTERANCE,
        }
    }
}

/// Dialog configuration
///
/// The confirmation threshold is fixed and not configurable.
#[derive(Debug, Clone)]
pub struct DialogConfig {
    pub max_previous_intents: usize,
    pub max_recent_entities: usize,

    /// Host command timeout
    pub dispatch_timeout: Duration,

    /// Remote NLU endpoint; local rules when `None`
    pub nlu_url: Option<String>,
}

impl Default for DialogConfig {
    fn default() -> Self {
        Self {
            max_previous_intents: DEFAULT_MAX_INTENTS,
            max_recent_entities: DEFAULT_MAX_ENTITIES,
            dispatch_timeout: DEFAULT_DISPATCH_TIMEOUT,
            nlu_url: None,
        }
    }
}

/// Hands-free lifecycle timings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandsFreeConfig {
    /// Time without activity before the inactivity prompt
    pub inactivity_timeout: Duration,

    /// Time an unanswered prompt stays up before hands-free turns off
    pub auto_disable_after: Duration,

    /// How often inactivity is checked
    pub poll_interval: Duration,
}

impl Default for HandsFreeConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: DEFAULT_INACTIVITY_TIMEOUT,
            auto_disable_after: DEFAULT_AUTO_DISABLE_AFTER,
            poll_interval: DEFAULT_INACTIVITY_POLL,
        }
    }
}

/// API keys for external services
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    pub openai: Option<String>,
    pub deepgram: Option<String>,
    pub elevenlabs: Option<String>,

    /// Bearer token for the remote NLU endpoint
    pub nlu: Option<String>,
}

impl Config {
    /// Load configuration (env > toml > default)
    ///
    /// # Errors
    ///
    /// Returns error if a provider name is not recognized or the data
    /// directory cannot be created
    pub fn load() -> Result<Self> {
        let fc = file::load_config_file();
        let config = Self::layer(fc, |key| std::env::var(key).ok())?;

        std::fs::create_dir_all(&config.data_dir)?;

        tracing::debug!(
            data_dir = %config.data_dir.display(),
            locale = %config.voice.locale,
            stt = ?config.voice.stt_provider,
            tts = ?config.voice.tts_provider,
            nlu = config.dialog.nlu_url.is_some(),
            "configuration loaded"
        );

        Ok(config)
    }

    /// Layer an environment lookup over a parsed config file
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a provider name is not recognized
    pub fn layer(fc: PawConfigFile, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = VoiceConfig::default();

        let api_keys = ApiKeys {
            openai: env("OPENAI_API_KEY").or(fc.api_keys.openai),
            deepgram: env("DEEPGRAM_API_KEY").or(fc.api_keys.deepgram),
            elevenlabs: env("ELEVENLABS_API_KEY").or(fc.api_keys.elevenlabs),
            nlu: env("PAW_NLU_API_KEY").or(fc.api_keys.nlu),
        };

        let stt_provider = match env("PAW_STT_PROVIDER").or(fc.voice.stt_provider) {
            Some(name) => parse_stt_provider(&name)?,
            None => defaults.stt_provider,
        };
        let tts_provider = match env("PAW_TTS_PROVIDER").or(fc.voice.tts_provider) {
            Some(name) => parse_tts_provider(&name)?,
            None => defaults.tts_provider,
        };

        let wake_words = env("PAW_WAKE_WORDS")
            .map(|s| s.split(',').map(str::to_string).collect())
            .or(fc.voice.wake_words)
            .map(|words: Vec<String>| {
                words
                    .iter()
                    .map(|w| w.trim().to_lowercase())
                    .filter(|w| !w.is_empty())
                    .collect::<Vec<_>>()
            })
            .filter(|words| !words.is_empty())
            .unwrap_or(defaults.wake_words);

        let voice = VoiceConfig {
            enabled: env("PAW_VOICE_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .or(fc.voice.enabled)
                .unwrap_or(defaults.enabled),
            locale: env("PAW_LOCALE")
                .or(fc.voice.locale)
                .unwrap_or(defaults.locale),
            wake_words,
            input_device: env("PAW_INPUT_DEVICE").or(fc.voice.input_device),
            stt_provider,
            stt_model: env("PAW_STT_MODEL")
                .or(fc.voice.stt_model)
                .unwrap_or_else(|| default_stt_model(stt_provider).to_string()),
            tts_provider,
            tts_model: env("PAW_TTS_MODEL")
                .or(fc.voice.tts_model)
                .unwrap_or_else(|| default_tts_model(tts_provider).to_string()),
            tts_voice: env("PAW_TTS_VOICE")
                .or(fc.voice.tts_voice)
                .unwrap_or(defaults.tts_voice),
            tts_rate: fc.voice.tts_rate.unwrap_or(defaults.tts_rate),
            tts_pitch: fc.voice.tts_pitch.unwrap_or(defaults.tts_pitch),
            max_utterance: fc
                .voice
                .max_utterance_secs
                .map_or(defaults.max_utterance, Duration::from_secs),
        };

        let dialog_defaults = DialogConfig::default();
        let dialog = DialogConfig {
            max_previous_intents: fc
                .dialog
                .max_previous_intents
                .unwrap_or(dialog_defaults.max_previous_intents),
            max_recent_entities: fc
                .dialog
                .max_recent_entities
                .unwrap_or(dialog_defaults.max_recent_entities),
            dispatch_timeout: fc
                .dialog
                .dispatch_timeout_secs
                .map_or(dialog_defaults.dispatch_timeout, Duration::from_secs),
            nlu_url: env("PAW_NLU_URL").or(fc.dialog.nlu_url),
        };

        let hands_free_defaults = HandsFreeConfig::default();
        let hands_free = HandsFreeConfig {
            inactivity_timeout: fc
                .hands_free
                .inactivity_timeout_mins
                .map_or(hands_free_defaults.inactivity_timeout, |m| {
                    Duration::from_secs(m * 60)
                }),
            auto_disable_after: fc
                .hands_free
                .auto_disable_secs
                .map_or(hands_free_defaults.auto_disable_after, Duration::from_secs),
            poll_interval: fc
                .hands_free
                .poll_interval_secs
                .map_or(hands_free_defaults.poll_interval, Duration::from_secs),
        };

        let data_dir = env("PAW_DATA_DIR")
            .or(fc.data_dir)
            .map_or_else(default_data_dir, PathBuf::from);

        let pets = fc
            .pets
            .into_iter()
            .map(|p| PetRecord::new(p.id, p.name, p.species.as_deref()))
            .collect();

        Ok(Self {
            data_dir,
            voice,
            dialog,
            hands_free,
            api_keys,
            pets,
        })
    }

    /// Path of the preference file inside the data directory
    #[must_use]
    pub fn preferences_path(&self) -> PathBuf {
        self.data_dir.join("preferences.json")
    }
}

/// `~/.local/share/paw/voice` or the platform equivalent
fn default_data_dir() -> PathBuf {
    directories::BaseDirs::new().map_or_else(
        || PathBuf::from("."),
        |d| d.data_dir().join("paw").join("voice"),
    )
}

fn parse_stt_provider(name: &str) -> Result<SttProvider> {
    match name.trim().to_lowercase().as_str() {
        "whisper" | "openai" => Ok(SttProvider::Whisper),
        "deepgram" => Ok(SttProvider::Deepgram),
        other => Err(Error::Config(format!("unknown STT provider: {other}"))),
    }
}

fn parse_tts_provider(name: &str) -> Result<TtsProvider> {
    match name.trim().to_lowercase().as_str() {
        "openai" => Ok(TtsProvider::OpenAI),
        "elevenlabs" => Ok(TtsProvider::ElevenLabs),
        other => Err(Error::Config(format!("unknown TTS provider: {other}"))),
    }
}

const fn default_stt_model(provider: SttProvider) -> &'static str {
    match provider {
        SttProvider::Whisper => "whisper-1",
        SttProvider::Deepgram => "nova-2",
    }
}

const fn default_tts_model(provider: TtsProvider) -> &'static str {
    match provider {
        TtsProvider::OpenAI => "tts-1",
        TtsProvider::ElevenLabs => "eleven_multilingual_v2",
    }
}
