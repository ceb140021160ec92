// Speech payload decoder
// Turns base64 raw PCM (s16le, mono, 24 kHz) into interleaved f32 at the device format

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rubato::{FftFixedIn, Resampler};
use std::time::Duration;

use super::error::{AudioError, AudioResult};

/// Sample rate of every speech payload
pub const PAYLOAD_SAMPLE_RATE: u32 = 24_000;

/// Payloads are mono
pub const PAYLOAD_CHANNELS: u16 = 1;

const RESAMPLE_CHUNK: usize = 1024;

/// Raw speech audio as delivered by the speech service: base64 text of
/// headerless signed 16-bit little-endian mono frames at 24 kHz.
#[derive(Clone, PartialEq, Eq)]
pub struct AudioPayload(String);

impl AudioPayload {
    pub fn from_base64(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    /// Encode PCM samples into a payload (used by tests and tooling)
    pub fn from_samples(samples: &[i16]) -> Self {
        let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self(BASE64.encode(bytes))
    }

    pub fn as_base64(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for AudioPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "AudioPayload({} base64 chars)", self.0.len())
    }
}

/// Decoded audio ready for an output device
#[derive(Debug, Clone, PartialEq)]
pub struct PcmBuffer {
    /// Interleaved samples in [-1.0, 1.0]
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl PcmBuffer {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }
}

/// Decode a payload into mono f32 samples at the payload rate
pub fn decode_pcm(payload: &AudioPayload) -> AudioResult<Vec<f32>> {
    if payload.is_empty() {
        return Err(AudioError::Decode("payload is empty".to_string()));
    }

    let bytes = BASE64.decode(payload.as_base64().trim())?;

    if bytes.len() % 2 != 0 {
        return Err(AudioError::Decode(format!(
            "truncated payload: {} bytes is not a whole number of 16-bit samples",
            bytes.len()
        )));
    }

    let scale = 1.0 / 32768.0;
    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 * scale)
        .collect())
}

/// Decode a payload and convert it to the given output format
pub fn decode_for_output(
    payload: &AudioPayload,
    sample_rate: u32,
    channels: u16,
) -> AudioResult<PcmBuffer> {
    let mono = decode_pcm(payload)?;
    let mono = resample(&mono, PAYLOAD_SAMPLE_RATE, sample_rate)?;
    let channels = channels.max(1);

    Ok(PcmBuffer {
        samples: fan_out(&mono, channels),
        sample_rate,
        channels,
    })
}

/// Convert mono samples between sample rates
pub fn resample(mono: &[f32], from: u32, to: u32) -> AudioResult<Vec<f32>> {
    if from == to || mono.is_empty() {
        return Ok(mono.to_vec());
    }
    if from == 0 || to == 0 {
        return Err(AudioError::Resample(format!("invalid rates {} -> {}", from, to)));
    }

    let mut resampler = FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, 2, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let expected = (mono.len() as u64 * to as u64 / from as u64) as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);

    let mut pos = 0;
    while mono.len() - pos >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk = resampler
            .process(&[&mono[pos..pos + needed]][..], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
        pos += needed;
    }

    if pos < mono.len() {
        let chunk = resampler
            .process_partial(Some(&[&mono[pos..]][..]), None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        out.extend_from_slice(&chunk[0]);
    }

    // Flush whatever the filter delay still holds
    while out.len() < expected + delay {
        let chunk = resampler
            .process_partial(None::<&[&[f32]]>, None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        if chunk[0].is_empty() {
            break;
        }
        out.extend_from_slice(&chunk[0]);
    }

    Ok(out.into_iter().skip(delay).take(expected).collect())
}

/// Duplicate mono samples across `channels` interleaved channels
pub fn fan_out(mono: &[f32], channels: u16) -> Vec<f32> {
    if channels <= 1 {
        return mono.to_vec();
    }

    let mut interleaved = Vec::with_capacity(mono.len() * channels as usize);
    for &sample in mono {
        for _ in 0..channels {
            interleaved.push(sample);
        }
    }
    interleaved
}
