//! Speech-to-text (STT) processing

use async_trait::async_trait;

use crate::dialog::{Confidence, Transcript};
use crate::{Error, Result};

/// Turns a recorded utterance into a final transcript
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe WAV audio
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached or rejects the audio
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<Transcript>;
}

/// Response from OpenAI Whisper transcription API (`verbose_json`)
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(serde::Deserialize)]
struct WhisperSegment {
    avg_logprob: f64,
    #[serde(default)]
    no_speech_prob: f64,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
}

/// Response from Deepgram transcription API
#[derive(serde::Deserialize)]
struct DeepgramResponse {
    results: DeepgramResults,
}

#[derive(serde::Deserialize)]
struct DeepgramResults {
    channels: Vec<DeepgramChannel>,
}

#[derive(serde::Deserialize)]
struct DeepgramChannel {
    alternatives: Vec<DeepgramAlternative>,
}

#[derive(serde::Deserialize)]
struct DeepgramAlternative {
    transcript: String,
    #[serde(default)]
    confidence: f32,
}

/// STT provider backend
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SttProvider {
    Whisper,
    Deepgram,
}

/// Transcribes speech to text over HTTP
pub struct SpeechToText {
    client: reqwest::Client,
    api_key: String,
    model: String,
    provider: SttProvider,
}

impl SpeechToText {
    /// Create a new STT instance using `OpenAI` Whisper
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_whisper(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config(
                "OpenAI API key required for Whisper".to_string(),
            ));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Whisper,
        })
    }

    /// Create a new STT instance using Deepgram
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new_deepgram(api_key: String, model: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(Error::Config("Deepgram API key required".to_string()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            provider: SttProvider::Deepgram,
        })
    }

    #[must_use]
    pub const fn provider(&self) -> SttProvider {
        self.provider
    }

    /// Transcribe using OpenAI Whisper
    async fn transcribe_whisper(&self, audio: &[u8], language: &str) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Whisper transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| Error::Recognition(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("language", primary_language(language).to_string());

        let response = self
            .client
            .post("https://api.openai.com/v1/audio/transcriptions")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Whisper request failed");
                Error::Recognition(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Whisper API error");
            return Err(Error::Recognition(format!(
                "Whisper API error {status}: {body}"
            )));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            Error::Recognition(e.to_string())
        })?;

        let confidence = whisper_confidence(&result.segments);
        tracing::info!(transcript = %result.text, %confidence, "transcription complete");
        Ok(Transcript::final_result(result.text.trim(), confidence))
    }

    /// Transcribe using Deepgram
    async fn transcribe_deepgram(&self, audio: &[u8], language: &str) -> Result<Transcript> {
        tracing::debug!(audio_bytes = audio.len(), "starting Deepgram transcription");

        let url = format!(
            "https://api.deepgram.com/v1/listen?model={}&punctuate=true&language={}",
            self.model, language
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Token {}", self.api_key))
            .header("Content-Type", "audio/wav")
            .body(audio.to_vec())
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Deepgram request failed");
                Error::Recognition(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Deepgram API error");
            return Err(Error::Recognition(format!(
                "Deepgram API error {status}: {body}"
            )));
        }

        let result: DeepgramResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse Deepgram response");
            Error::Recognition(e.to_string())
        })?;

        let transcript = result
            .results
            .channels
            .first()
            .and_then(|c| c.alternatives.first())
            .map(|a| Transcript::final_result(a.transcript.trim(), a.confidence))
            .unwrap_or_else(|| Transcript::final_result("", Confidence::NONE));

        tracing::info!(
            transcript = %transcript.text,
            confidence = %transcript.confidence,
            "transcription complete"
        );
        Ok(transcript)
    }
}

#[async_trait]
impl Transcriber for SpeechToText {
    async fn transcribe(&self, wav: &[u8], language: &str) -> Result<Transcript> {
        match self.provider {
            SttProvider::Whisper => self.transcribe_whisper(wav, language).await,
            SttProvider::Deepgram => self.transcribe_deepgram(wav, language).await,
        }
    }
}

/// "en-US" -> "en"; Whisper takes ISO-639-1 codes
fn primary_language(language: &str) -> &str {
    language.split(['-', '_']).next().unwrap_or(language)
}

/// Duration-weighted `exp(avg_logprob)`, discounted by each segment's
/// no-speech probability
#[allow(clippy::cast_possible_truncation)]
fn whisper_confidence(segments: &[WhisperSegment]) -> Confidence {
    let (weighted, total) = segments.iter().fold((0.0_f64, 0.0_f64), |(sum, total), s| {
        let weight = (s.end - s.start).max(0.01);
        let score = s.avg_logprob.exp() * (1.0 - s.no_speech_prob.clamp(0.0, 1.0));
        (weight.mul_add(score, sum), total + weight)
    });

    if total <= 0.0 {
        return Confidence::NONE;
    }
    Confidence::new((weighted / total) as f32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(avg_logprob: f64, no_speech_prob: f64, start: f64, end: f64) -> WhisperSegment {
        WhisperSegment {
            avg_logprob,
            no_speech_prob,
            start,
            end,
        }
    }

    #[test]
    fn confident_segment_scores_high() {
        let confidence = whisper_confidence(&[segment(-0.05, 0.01, 0.0, 1.5)]);
        assert!(!confidence.is_low());
    }

    #[test]
    fn likely_silence_scores_low() {
        let confidence = whisper_confidence(&[segment(-0.05, 0.9, 0.0, 1.5)]);
        assert!(confidence.is_low());
    }

    #[test]
    fn longer_segments_weigh_more() {
        let confidence = whisper_confidence(&[
            segment(-0.01, 0.0, 0.0, 3.0),
            segment(-2.0, 0.0, 3.0, 3.2),
        ]);
        assert!(confidence.value() > 0.85);
    }

    #[test]
    fn no_segments_means_no_confidence() {
        assert_eq!(whisper_confidence(&[]), Confidence::NONE);
    }

    #[test]
    fn language_is_reduced_to_primary_tag() {
        assert_eq!(primary_language("en-US"), "en");
        assert_eq!(primary_language("de"), "de");
    }

    #[test]
    fn missing_api_key_is_rejected() {
        assert!(SpeechToText::new_whisper(String::new(), "whisper-1".into()).is_err());
        assert!(SpeechToText::new_deepgram(String::new(), "nova-2".into()).is_err());
    }

    #[test]
    fn deepgram_confidence_is_parsed() {
        let body = r#"{"results":{"channels":[{"alternatives":[{"transcript":"show me my pets","confidence":0.75}]}]}}"#;
        let parsed: DeepgramResponse = serde_json::from_str(body).unwrap();
        let alt = &parsed.results.channels[0].alternatives[0];
        assert!((alt.confidence - 0.75).abs() < f32::EPSILON);
    }
}
