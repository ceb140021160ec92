// Audio playback module
// Decodes speech payloads and plays them one at a time through cpal

pub mod decoder;
pub mod error;
pub mod output;
pub mod player;
pub mod state;

pub use decoder::{AudioPayload, PcmBuffer, PAYLOAD_SAMPLE_RATE};
pub use error::{AudioError, AudioResult};
pub use output::{CpalOutput, NullOutput, OutputDevice};
pub use player::{PlaybackEngine, PlaybackOutcome};
pub use state::{PlaybackState, PlaybackStateStore, PlaybackStatus, Subscription};
