//! Error types for speech playback

use thiserror::Error;

pub type AudioResult<T> = Result<T, AudioError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Malformed or truncated payload. Never retried.
    #[error("Failed to decode audio payload: {0}")]
    Decode(String),

    #[error("Sample rate conversion failed: {0}")]
    Resample(String),

    #[error("Audio device error: {0}")]
    Device(String),

    #[error("Audio stream error: {0}")]
    Stream(String),

    #[error("Decode task failed: {0}")]
    Task(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Stream(err.to_string())
    }
}

impl From<base64::DecodeError> for AudioError {
    fn from(err: base64::DecodeError) -> Self {
        AudioError::Decode(err.to_string())
    }
}
