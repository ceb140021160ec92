// Gemini backend
// generateContent calls for judgements (JSON) and speech (inline PCM audio)

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::prompt::{judgement_prompt, judgement_schema, SYSTEM_INSTRUCTION};
use super::{Challenge, Judgement, OracleBackend, OracleError, SelectedSpice};
use crate::audio::AudioPayload;
use crate::credentials::{Credential, Failure};
use crate::settings::GeminiSettings;

pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    judgement_model: String,
    speech_model: String,
    voice: String,
}

impl GeminiBackend {
    pub fn new(settings: &GeminiSettings) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs.max(1)))
            .build()
            .map_err(|e| OracleError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            judgement_model: settings.judgement_model.clone(),
            speech_model: settings.speech_model.clone(),
            voice: settings.voice.clone(),
        })
    }

    async fn generate(&self, credential: &Credential, model: &str, body: Value) -> Result<Value, Failure> {
        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        debug!(model, credential = %credential, "Calling generateContent");

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", credential.expose())
            .json(&body)
            .send()
            .await
            .map_err(|e| Failure::retryable(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| Failure::fatal(format!("unreadable response: {}", e)))
    }
}

#[async_trait]
impl OracleBackend for GeminiBackend {
    async fn judge(
        &self,
        credential: &Credential,
        challenge: &Challenge,
        spices: &[SelectedSpice],
    ) -> Result<Judgement, Failure> {
        let body = json!({
            "systemInstruction": { "parts": [{ "text": SYSTEM_INSTRUCTION }] },
            "contents": [{ "role": "user", "parts": [{ "text": judgement_prompt(challenge, spices) }] }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": judgement_schema(),
            }
        });

        let response = self.generate(credential, &self.judgement_model, body).await?;
        parse_judgement(&response).map_err(Failure::fatal)
    }

    async fn synthesize(&self, credential: &Credential, text: &str) -> Result<AudioPayload, Failure> {
        let body = json!({
            "contents": [{ "parts": [{ "text": text }] }],
            "generationConfig": {
                "responseModalities": ["AUDIO"],
                "speechConfig": {
                    "voiceConfig": { "prebuiltVoiceConfig": { "voiceName": self.voice } }
                }
            }
        });

        let response = self.generate(credential, &self.speech_model, body).await?;
        extract_audio(&response).ok_or_else(|| Failure::fatal("no audio data in response"))
    }
}

/// Decide whether another credential might get a different answer
pub fn classify_status(status: StatusCode, body: &str) -> Failure {
    let msg = format!("HTTP {}: {}", status.as_u16(), body.chars().take(200).collect::<String>());

    let key_rejected = status == StatusCode::BAD_REQUEST
        && (body.contains("API_KEY_INVALID") || body.contains("API key not valid"));

    if status.is_server_error()
        || key_rejected
        || matches!(
            status,
            StatusCode::UNAUTHORIZED
                | StatusCode::FORBIDDEN
                | StatusCode::REQUEST_TIMEOUT
                | StatusCode::TOO_MANY_REQUESTS
        )
    {
        Failure::Retryable(msg)
    } else {
        Failure::Fatal(msg)
    }
}

fn parts(response: &Value) -> impl Iterator<Item = &Value> {
    response
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

/// Pull the JSON judgement out of a generateContent response
pub fn parse_judgement(response: &Value) -> Result<Judgement, String> {
    let text: String = parts(response)
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();

    if text.trim().is_empty() {
        return Err("response contained no text".to_string());
    }

    let value: Value = serde_json::from_str(text.trim())
        .map_err(|e| format!("response is not valid JSON: {}", e))?;
    Judgement::from_value(&value)
}

/// First inline audio part of a generateContent response
pub fn extract_audio(response: &Value) -> Option<AudioPayload> {
    parts(response)
        .filter_map(|p| p.pointer("/inlineData/data").and_then(Value::as_str))
        .find(|data| !data.is_empty())
        .map(AudioPayload::from_base64)
}
