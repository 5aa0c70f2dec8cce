//! Remote NLU backend
//!
//! Posts the transcript and a context snapshot to an HTTP endpoint and
//! rebuilds the reply through [`Intent::builder`], so a remote service can
//! never hand back an out-of-range confidence or skip confirmation.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::context::DialogContext;
use super::parser::IntentParser;
use super::types::{Ambiguity, Confidence, Entity, Intent, IntentAction, Priority, Transcript};
use crate::{Error, Result};

/// Default request timeout for the NLU endpoint
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct ParseRequest<'a> {
    transcript: &'a str,
    confidence: Confidence,
    context: &'a DialogContext,
}

/// Intent as returned by the NLU service
#[derive(Debug, Deserialize)]
struct RemoteIntent {
    action: IntentAction,
    #[serde(default)]
    target: String,
    #[serde(default)]
    parameters: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    confidence: Option<Confidence>,
    #[serde(default)]
    requires_confirmation: bool,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    entities: Vec<Entity>,
    #[serde(default)]
    ambiguities: Vec<Ambiguity>,
}

/// Intent parser backed by a remote NLU service
pub struct HttpIntentParser {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpIntentParser {
    /// Create a parser posting to `endpoint`
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint is empty or the HTTP client cannot be built
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            return Err(Error::Config("NLU endpoint URL required".to_string()));
        }

        let client = reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?;

        Ok(Self {
            client,
            endpoint,
            api_key: api_key.filter(|k| !k.is_empty()),
        })
    }

    fn validate(remote: RemoteIntent, transcript: &Transcript) -> Intent {
        // The service may lower the capture confidence but never raise it
        let confidence = remote
            .confidence
            .map_or(transcript.confidence, |c| c.min(transcript.confidence));

        let mut builder = Intent::builder(remote.action, remote.target, transcript.text.trim())
            .confidence(confidence)
            .priority(remote.priority);
        for (name, value) in remote.parameters {
            builder = builder.parameter(name, value);
        }
        for entity in remote.entities {
            builder = builder.entity(entity);
        }
        for ambiguity in remote.ambiguities.into_iter().filter(|a| a.candidates.len() > 1) {
            builder = builder.ambiguity(ambiguity);
        }
        if remote.requires_confirmation {
            builder = builder.require_confirmation();
        }
        builder.build()
    }
}

#[async_trait]
impl IntentParser for HttpIntentParser {
    async fn parse_intent(&self, transcript: &Transcript, context: &DialogContext) -> Result<Intent> {
        tracing::debug!(endpoint = %self.endpoint, transcript = %transcript.text, "remote intent parse");

        let mut request = self.client.post(&self.endpoint).json(&ParseRequest {
            transcript: &transcript.text,
            confidence: transcript.confidence,
            context,
        });
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, "NLU request failed");
            Error::Parse(format!("NLU request failed: {e}"))
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "NLU API error");
            return Err(Error::Parse(format!("NLU API error {status}: {body}")));
        }

        let remote: RemoteIntent = response
            .json()
            .await
            .map_err(|e| Error::Parse(format!("invalid NLU response: {e}")))?;

        Ok(Self::validate(remote, transcript))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote(json: &str) -> RemoteIntent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn remote_confidence_cannot_exceed_capture() {
        let intent = HttpIntentParser::validate(
            remote(r#"{"action": "show", "target": "pets", "confidence": 0.99}"#),
            &Transcript::final_result("show me my pets", 0.75),
        );

        assert!((intent.confidence().value() - 0.75).abs() < f32::EPSILON);
        assert!(intent.requires_confirmation());
    }

    #[test]
    fn out_of_range_confidence_is_clamped_and_gated() {
        let intent = HttpIntentParser::validate(
            remote(r#"{"action": "log", "target": "expenses", "confidence": -3.0}"#),
            &Transcript::final_result("log forty dollars", 0.95),
        );

        assert!(intent.confidence().value().abs() < f32::EPSILON);
        assert!(intent.requires_confirmation());
    }

    #[test]
    fn single_candidate_ambiguity_is_dropped() {
        let intent = HttpIntentParser::validate(
            remote(
                r#"{"action": "show", "target": "health",
                    "ambiguities": [{"kind": "pet", "mention": "him",
                                     "candidates": [{"kind": "pet", "id": "1", "name": "Rex"}]}]}"#,
            ),
            &Transcript::final_result("how is he", 0.9),
        );
        assert!(!intent.is_ambiguous());
    }

    #[test]
    fn empty_endpoint_is_rejected() {
        assert!(matches!(
            HttpIntentParser::new("  ", None),
            Err(Error::Config(_))
        ));
    }
}
