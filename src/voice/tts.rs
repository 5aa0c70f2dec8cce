//! Text-to-speech (TTS) processing

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::device::{AudioDevice, DeviceArbiter};
use super::playback::{AudioPlayback, decode_mp3};
use crate::{Error, Result};

/// How long synthesis waits for the speaker to be released
const SPEAKER_WAIT: Duration = Duration::from_secs(2);

/// What to say and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisRequest {
    pub text: String,
    /// BCP-47 locale, e.g. "en-US"
    pub locale: String,
    /// Speaking rate, 1.0 is normal
    pub rate: f32,
    /// Voice pitch, 1.0 is normal
    pub pitch: f32,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(text: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            locale: locale.into(),
            rate: 1.0,
            pitch: 1.0,
        }
    }
}

/// Speaks a response aloud
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Speak and return once playback has finished
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires first, or a synthesis
    /// or device error
    async fn speak(&self, request: SynthesisRequest, cancel: CancellationToken) -> Result<()>;
}

/// TTS provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TtsProvider {
    OpenAI,
    ElevenLabs,
}

/// Synthesizes speech from text
pub struct TextToSpeech {
    client: reqwest::Client,
    api_key: String,
    voice: String,
    model: String,
    provider: TtsProvider,
}

impl TextToSpeech {
    /// Create a new TTS instance using `OpenAI`
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_openai(api_key: String, voice: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("OpenAI API key required for TTS".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice,
            model,
            provider: TtsProvider::OpenAI,
        })
    }

    /// Create a new TTS instance using ElevenLabs
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_elevenlabs(api_key: String, voice_id: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "ElevenLabs API key required for TTS".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            voice: voice_id,
            model,
            provider: TtsProvider::ElevenLabs,
        })
    }

    /// Synthesize a request to MP3 bytes
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    pub async fn synthesize(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        match self.provider {
            TtsProvider::OpenAI => self.synthesize_openai(request).await,
            TtsProvider::ElevenLabs => self.synthesize_elevenlabs(request).await,
        }
    }

    /// Synthesize using OpenAI TTS
    async fn synthesize_openai(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
        }

        // The speech endpoint takes no pitch or language
        let body = TtsRequest {
            model: &self.model,
            input: &request.text,
            voice: &self.voice,
            speed: request.rate.clamp(0.25, 4.0),
        };

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/speech")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!("OpenAI TTS error {status}: {body}")));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }

    /// Synthesize using ElevenLabs TTS
    async fn synthesize_elevenlabs(&self, request: &SynthesisRequest) -> Result<Vec<u8>> {
        #[derive(Serialize)]
        struct ElevenLabsRequest<'a> {
            text: &'a str,
            model_id: &'a str,
            language_code: &'a str,
            voice_settings: VoiceSettings,
        }

        #[derive(Serialize)]
        struct VoiceSettings {
            stability: f32,
            similarity_boost: f32,
            speed: f32,
        }

        let url = format!(
            "https://api.elevenlabs.io/v1/text-to-speech/{}",
            self.voice
        );

        let body = ElevenLabsRequest {
            text: &request.text,
            model_id: &self.model,
            language_code: request
                .locale
                .split(['-', '_'])
                .next()
                .unwrap_or(&request.locale),
            voice_settings: VoiceSettings {
                stability: 0.5,
                similarity_boost: 0.75,
                speed: request.rate.clamp(0.7, 1.2),
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Synthesis(format!(
                "ElevenLabs TTS error {status}: {body}"
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| Error::Synthesis(e.to_string()))?;
        Ok(audio.to_vec())
    }
}

/// Cloud TTS played on the default speaker
pub struct SpokenOutput {
    tts: TextToSpeech,
    devices: DeviceArbiter,
}

impl SpokenOutput {
    #[must_use]
    pub const fn new(tts: TextToSpeech, devices: DeviceArbiter) -> Self {
        Self { tts, devices }
    }
}

#[async_trait]
impl SpeechSynthesizer for SpokenOutput {
    async fn speak(&self, request: SynthesisRequest, cancel: CancellationToken) -> Result<()> {
        if request.text.trim().is_empty() {
            return Ok(());
        }

        let mp3 = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            audio = self.tts.synthesize(&request) => audio?,
        };
        let samples = decode_mp3(&mp3)?;

        let lease = self
            .devices
            .acquire(AudioDevice::Speaker, "synthesis", SPEAKER_WAIT)
            .await?;

        tokio::task::spawn_blocking(move || {
            let _lease = lease;
            AudioPlayback::open()?.play_blocking(samples, &cancel)
        })
        .await
        .map_err(|e| Error::Audio(format!("playback task failed: {e}")))?
    }
}

/// Text-only output for setups without a TTS backend
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

#[async_trait]
impl SpeechSynthesizer for SilentOutput {
    async fn speak(&self, request: SynthesisRequest, cancel: CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        tracing::debug!(text = %request.text, "speech output disabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_defaults_to_normal_rate_and_pitch() {
        let request = SynthesisRequest::new("Hello", "en-US");
        assert!((request.rate - 1.0).abs() < f32::EPSILON);
        assert!((request.pitch - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn missing_api_key_is_rejected() {
        assert!(TextToSpeech::new_openai(String::new(), "alloy".into(), "tts-1".into()).is_err());
        assert!(
            TextToSpeech::new_elevenlabs(String::new(), "voice".into(), "model".into()).is_err()
        );
    }
}
