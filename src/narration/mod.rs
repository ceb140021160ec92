// Narration module
// Two-segment spoken presentation of a judgement

pub mod sequencer;

pub use sequencer::{
    oracle_segments, NarrationReport, NarrationSequencer, Segment, SequencerStage, SpeechSource,
    VISION_SEGMENT, WISDOM_SEGMENT,
};
