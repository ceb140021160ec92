// Oracle module
// Judgement and speech requests against the remote generative service

pub mod gemini;
pub mod prompt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::audio::AudioPayload;
use crate::credentials::{Credential, DispatchError, Failure, ResilientDispatcher};

pub use gemini::GeminiBackend;

/// Intensity per flavor axis
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlavorProfile {
    pub heat: f64,
    pub earthy: f64,
    pub sweet: f64,
    pub tangy: f64,
    pub aromatic: f64,
}

/// A dish concept the player is asked to season
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub title: String,
    pub description: String,
    /// Base ingredients, as free text
    pub base: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub target_profile: FlavorProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSpice {
    pub id: String,
    pub name: String,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Judgement {
    pub dish_name: String,
    pub description: String,
    /// 0.0 to 10.0
    pub score: f64,
    pub feedback: String,
}

impl Judgement {
    /// Shown whenever the remote service cannot produce a valid judgement
    pub fn fallback() -> Self {
        Self {
            dish_name: "The Muddled Concoction".to_string(),
            description: "The ether was disturbed, and the Oracle could not get a clear vision of your dish. The flavors are chaotic and unbalanced.".to_string(),
            score: 2.1,
            feedback: "An error occurred while consulting the Oracle. Perhaps the cosmic energies are not aligned. Please try your offering again.".to_string(),
        }
    }

    /// Accept a JSON object only if all four fields have the right types
    /// and the score is within 0..=10.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        let text = |field: &str| -> Result<String, String> {
            value
                .get(field)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("field '{}' missing or not a string", field))
        };

        let score = value
            .get("score")
            .and_then(Value::as_f64)
            .ok_or_else(|| "field 'score' missing or not a number".to_string())?;
        if !score.is_finite() || !(0.0..=10.0).contains(&score) {
            return Err(format!("score {} out of range", score));
        }

        Ok(Self {
            dish_name: text("dishName")?,
            description: text("description")?,
            score,
            feedback: text("feedback")?,
        })
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    /// The service answered but gave nothing usable
    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Client setup failed: {0}")]
    Setup(String),
}

/// One attempt against the remote service with a given credential
#[async_trait]
pub trait OracleBackend: Send + Sync {
    async fn judge(
        &self,
        credential: &Credential,
        challenge: &Challenge,
        spices: &[SelectedSpice],
    ) -> Result<Judgement, Failure>;

    async fn synthesize(&self, credential: &Credential, text: &str) -> Result<AudioPayload, Failure>;
}

/// Logical judgement and speech calls, retried across the credential pool
pub struct Oracle {
    backend: Arc<dyn OracleBackend>,
    dispatcher: Arc<ResilientDispatcher>,
}

impl Oracle {
    pub fn new(backend: Arc<dyn OracleBackend>, dispatcher: Arc<ResilientDispatcher>) -> Self {
        Self {
            backend,
            dispatcher,
        }
    }

    pub async fn try_request_judgement(
        &self,
        challenge: &Challenge,
        spices: &[SelectedSpice],
    ) -> Result<Judgement, OracleError> {
        let backend = &self.backend;
        self.dispatcher
            .dispatch(|credential| async move { backend.judge(&credential, challenge, spices).await })
            .await
            .map_err(Self::classify)
    }

    /// Never fails: any error yields `Judgement::fallback()`
    pub async fn request_judgement(&self, challenge: &Challenge, spices: &[SelectedSpice]) -> Judgement {
        match self.try_request_judgement(challenge, spices).await {
            Ok(judgement) => {
                info!(dish = %judgement.dish_name, score = judgement.score, "Oracle has spoken");
                judgement
            }
            Err(e) => {
                warn!("Error getting judgement from Oracle: {}", e);
                Judgement::fallback()
            }
        }
    }

    pub async fn try_request_speech(&self, text: &str) -> Result<AudioPayload, OracleError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(OracleError::Generation("nothing to speak".to_string()));
        }

        let backend = &self.backend;
        let payload = self
            .dispatcher
            .dispatch(|credential| async move { backend.synthesize(&credential, text).await })
            .await
            .map_err(Self::classify)?;

        if payload.is_empty() {
            return Err(OracleError::Generation("speech service returned no audio".to_string()));
        }
        Ok(payload)
    }

    /// None when no audio could be produced, for whatever reason
    pub async fn request_speech(&self, text: &str) -> Option<AudioPayload> {
        match self.try_request_speech(text).await {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!("Speech generation failed: {}", e);
                None
            }
        }
    }

    fn classify(err: DispatchError) -> OracleError {
        match err {
            DispatchError::Rejected(msg) => OracleError::Generation(msg),
            other => OracleError::Dispatch(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::CredentialPool;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    struct Scripted {
        judge: Result<Judgement, Failure>,
        speech: Result<AudioPayload, Failure>,
    }

    #[async_trait]
    impl OracleBackend for Scripted {
        async fn judge(&self, _: &Credential, _: &Challenge, _: &[SelectedSpice]) -> Result<Judgement, Failure> {
            self.judge.clone()
        }

        async fn synthesize(&self, _: &Credential, _: &str) -> Result<AudioPayload, Failure> {
            self.speech.clone()
        }
    }

    fn oracle(backend: Scripted, keys: &[&str]) -> Oracle {
        let pool = CredentialPool::starting_at(keys.iter().copied(), 0);
        Oracle::new(Arc::new(backend), Arc::new(ResilientDispatcher::new(pool)))
    }

    fn challenge() -> Challenge {
        Challenge {
            title: "Chana Masala".to_string(),
            description: "Tangy chickpea curry".to_string(),
            base: "Chickpeas, onion, tomato".to_string(),
            region: "North".to_string(),
            target_profile: FlavorProfile::default(),
        }
    }

    #[test]
    fn validation_accepts_well_typed_judgement() {
        let value = json!({
            "dishName": "Saffron Dawn",
            "description": "Golden and warm",
            "score": 8.5,
            "feedback": "Less chili"
        });
        let judgement = Judgement::from_value(&value).unwrap();
        assert_eq!(judgement.dish_name, "Saffron Dawn");
        assert_eq!(judgement.score, 8.5);
    }

    #[test]
    fn validation_rejects_wrong_types_and_ranges() {
        let wrong_type = json!({"dishName": "x", "description": "y", "score": "9", "feedback": "z"});
        assert!(Judgement::from_value(&wrong_type).is_err());

        let missing = json!({"dishName": "x", "description": "y", "score": 9});
        assert!(Judgement::from_value(&missing).is_err());

        let out_of_range = json!({"dishName": "x", "description": "y", "score": 11, "feedback": "z"});
        assert!(Judgement::from_value(&out_of_range).is_err());
    }

    #[tokio::test]
    async fn judgement_falls_back_when_pool_is_exhausted() {
        let oracle = oracle(
            Scripted {
                judge: Err(Failure::retryable("429")),
                speech: Err(Failure::retryable("429")),
            },
            &["k1", "k2"],
        );
        let judgement = oracle.request_judgement(&challenge(), &[]).await;
        assert_eq!(judgement, Judgement::fallback());
    }

    #[tokio::test]
    async fn judgement_falls_back_without_credentials() {
        let oracle = oracle(
            Scripted {
                judge: Ok(Judgement::fallback()),
                speech: Err(Failure::fatal("unused")),
            },
            &[],
        );
        let err = oracle.try_request_judgement(&challenge(), &[]).await.unwrap_err();
        assert_eq!(err, OracleError::Dispatch(DispatchError::NoCredentialsAvailable));
    }

    #[tokio::test]
    async fn missing_audio_is_a_generation_failure() {
        let oracle = oracle(
            Scripted {
                judge: Err(Failure::fatal("unused")),
                speech: Err(Failure::fatal("no audio data in response")),
            },
            &["k1"],
        );
        let err = oracle.try_request_speech("Behold").await.unwrap_err();
        assert!(matches!(err, OracleError::Generation(_)));
        assert!(oracle.request_speech("Behold").await.is_none());
    }

    #[tokio::test]
    async fn blank_text_is_not_sent() {
        let oracle = oracle(
            Scripted {
                judge: Err(Failure::fatal("unused")),
                speech: Ok(AudioPayload::from_samples(&[1, 2])),
            },
            &["k1"],
        );
        assert!(oracle.request_speech("   ").await.is_none());
        assert!(oracle.request_speech("Behold").await.is_some());
    }

    #[test]
    fn challenge_reads_camel_case_json() {
        let challenge: Challenge = serde_json::from_value(json!({
            "title": "Rogan Josh",
            "description": "Kashmiri lamb",
            "base": "Lamb, yogurt",
            "targetProfile": {"heat": 6, "aromatic": 8}
        }))
        .unwrap();
        assert_eq!(challenge.target_profile.heat, 6.0);
        assert_eq!(challenge.target_profile.sweet, 0.0);
        assert_eq!(challenge.region, "");
    }
}
