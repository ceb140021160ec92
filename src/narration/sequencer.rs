// Narration sequencer
// generate first -> play first (second generating meanwhile) -> play second -> complete

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audio::{AudioPayload, PlaybackEngine};
use crate::oracle::{Judgement, Oracle};

pub const VISION_SEGMENT: &str = "oracle-vision";
pub const WISDOM_SEGMENT: &str = "oracle-wisdom";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencerStage {
    Preparing,
    PlayingFirst,
    PlayingSecond,
    Complete,
}

/// One narrated unit: the text to speak and the identifier it plays under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub identifier: String,
    pub text: String,
}

impl Segment {
    pub fn new(identifier: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            text: text.into(),
        }
    }
}

/// The description is narrated first, then the feedback
pub fn oracle_segments(judgement: &Judgement) -> (Segment, Segment) {
    (
        Segment::new(VISION_SEGMENT, judgement.description.clone()),
        Segment::new(WISDOM_SEGMENT, judgement.feedback.clone()),
    )
}

/// Where segment audio comes from. `None` means no audio could be produced.
#[async_trait]
pub trait SpeechSource: Send + Sync {
    async fn synthesize(&self, text: &str) -> Option<AudioPayload>;
}

#[async_trait]
impl SpeechSource for Oracle {
    async fn synthesize(&self, text: &str) -> Option<AudioPayload> {
        self.request_speech(text).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NarrationReport {
    /// Every stage entered, in order, starting with `Preparing`
    pub stages: Vec<SequencerStage>,
    /// True when torn down before reaching `Complete`
    pub cancelled: bool,
}

struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Drives one judgement's narration through the four stages.
///
/// After `cancel` no stage transition or playback call happens, and audio is
/// only stopped if one of this sequencer's own segments is active. Dropping
/// an unfinished sequencer cancels it.
pub struct NarrationSequencer {
    engine: PlaybackEngine,
    speech: Arc<dyn SpeechSource>,
    first: Segment,
    second: Segment,
    stage: watch::Sender<SequencerStage>,
    history: Mutex<Vec<SequencerStage>>,
    cancel: CancellationToken,
    started: AtomicBool,
}

impl NarrationSequencer {
    pub fn new(
        engine: PlaybackEngine,
        speech: Arc<dyn SpeechSource>,
        first: Segment,
        second: Segment,
    ) -> Self {
        let (stage, _) = watch::channel(SequencerStage::Preparing);
        Self {
            engine,
            speech,
            first,
            second,
            stage,
            history: Mutex::new(vec![SequencerStage::Preparing]),
            cancel: CancellationToken::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn for_judgement(
        engine: PlaybackEngine,
        speech: Arc<dyn SpeechSource>,
        judgement: &Judgement,
    ) -> Self {
        let (first, second) = oracle_segments(judgement);
        Self::new(engine, speech, first, second)
    }

    pub fn stage(&self) -> SequencerStage {
        *self.stage.borrow()
    }

    pub fn watch_stage(&self) -> watch::Receiver<SequencerStage> {
        self.stage.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn report(&self) -> NarrationReport {
        NarrationReport {
            stages: self.history.lock().clone(),
            cancelled: self.stage() != SequencerStage::Complete,
        }
    }

    /// Tear down. Stops playback only when this sequencer owns it.
    pub fn cancel(&self) {
        if self.stage() == SequencerStage::Complete {
            return;
        }
        if !self.cancel.is_cancelled() {
            info!(stage = ?self.stage(), "Narration cancelled");
        }
        self.cancel.cancel();
        self.release_audio();
    }

    /// Run the narration to `Complete`, or until cancelled.
    /// Only the first call does anything; later calls return the report.
    pub async fn run(&self) -> NarrationReport {
        if self.started.swap(true, Ordering::SeqCst) {
            warn!("Narration already started");
            return self.report();
        }

        self.drive().await;

        if self.cancel.is_cancelled() {
            self.release_audio();
        }
        self.report()
    }

    async fn drive(&self) {
        let first = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            payload = self.speech.synthesize(&self.first.text) => payload,
        };

        let Some(first) = first else {
            info!(segment = %self.first.identifier, "No audio for first segment, text only");
            self.advance(SequencerStage::Complete);
            return;
        };

        // Second segment generates while the first one plays
        let speech = self.speech.clone();
        let text = self.second.text.clone();
        let mut second = AbortOnDrop(tokio::spawn(async move { speech.synthesize(&text).await }));

        if !self.advance(SequencerStage::PlayingFirst) {
            return;
        }
        if !self.play(first, &self.first.identifier).await {
            return;
        }

        let second = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            joined = &mut second.0 => joined.ok().flatten(),
        };

        let Some(second) = second else {
            info!(segment = %self.second.identifier, "No audio for second segment, text only");
            self.advance(SequencerStage::Complete);
            return;
        };

        if !self.advance(SequencerStage::PlayingSecond) {
            return;
        }
        if !self.play(second, &self.second.identifier).await {
            return;
        }

        self.advance(SequencerStage::Complete);
    }

    /// Play one segment. Returns false if cancelled meanwhile.
    /// Decode failures and interruptions move on to the next step.
    async fn play(&self, payload: AudioPayload, identifier: &str) -> bool {
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return false,
            result = self.engine.play(payload, identifier) => result,
        };

        match result {
            Ok(outcome) => debug!(identifier, ?outcome, "Segment ended"),
            Err(e) => warn!(identifier, "Segment could not be played: {}", e),
        }
        !self.cancel.is_cancelled()
    }

    /// Move forward only; never after cancellation
    fn advance(&self, next: SequencerStage) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }

        let moved = self.stage.send_if_modified(|current| {
            if next > *current {
                *current = next;
                true
            } else {
                false
            }
        });

        if moved {
            self.history.lock().push(next);
            debug!(stage = ?next, "Narration stage");
        }
        moved
    }

    fn release_audio(&self) {
        self.engine
            .stop_if_active(&[self.first.identifier.as_str(), self.second.identifier.as_str()]);
    }
}

impl Drop for NarrationSequencer {
    fn drop(&mut self) {
        self.cancel();
    }
}
