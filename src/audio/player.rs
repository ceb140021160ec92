// Playback engine
// Single writer for the output device and the published playback state

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::decoder::{self, AudioPayload};
use super::error::{AudioError, AudioResult};
use super::output::OutputDevice;
use super::state::{PlaybackState, PlaybackStateStore, PlaybackStatus, TransitionGuard};

/// How a `play` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackOutcome {
    /// The audio played to its natural end
    Finished,
    /// Another `play` or a `stop` took over first
    Interrupted,
}

struct Active {
    /// Bumped by every play, stop and loading mark; a play only acts while
    /// the generation it started with is still current.
    generation: u64,
    /// Identifier of the buffer handed to the device, if any
    voice: Option<String>,
}

/// Store guard first, then the engine's own state
struct Locked<'a> {
    _order: TransitionGuard<'a>,
    active: ReentrantMutexGuard<'a, RefCell<Active>>,
}

impl Deref for Locked<'_> {
    type Target = RefCell<Active>;

    fn deref(&self) -> &RefCell<Active> {
        &self.active
    }
}

struct Shared {
    device: Arc<dyn OutputDevice>,
    store: Arc<PlaybackStateStore>,
    active: ReentrantMutex<RefCell<Active>>,
}

/// Plays speech payloads one at a time.
///
/// Starting a new payload always stops the previous one first, so at most one
/// buffer renders at any instant. All state transitions are published from
/// here. Cloning gives another handle to the same engine.
#[derive(Clone)]
pub struct PlaybackEngine {
    shared: Arc<Shared>,
}

impl PlaybackEngine {
    pub fn new(device: Arc<dyn OutputDevice>, store: Arc<PlaybackStateStore>) -> Self {
        Self {
            shared: Arc::new(Shared {
                device,
                store,
                active: ReentrantMutex::new(RefCell::new(Active {
                    generation: 0,
                    voice: None,
                })),
            }),
        }
    }

    pub fn store(&self) -> &Arc<PlaybackStateStore> {
        &self.shared.store
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.store.current_state()
    }

    pub fn is_rendering(&self) -> bool {
        self.shared.device.is_rendering()
    }

    pub fn set_volume(&self, volume: f32) {
        self.shared.device.set_volume(volume);
    }

    pub fn volume(&self) -> f32 {
        self.shared.device.volume()
    }

    /// Stop whatever is playing and announce that `identifier` is being prepared
    pub fn mark_loading(&self, identifier: &str) {
        let shared = &self.shared;
        let _guard = shared.lock();
        shared.supersede();

        let loading = PlaybackState::loading(identifier);
        if shared.store.current_state() != loading {
            shared.store.publish(loading);
        }
    }

    /// Decode `payload` and play it as `identifier`, resolving when playback ends.
    ///
    /// Any current audio is stopped first. A decode failure leaves the state
    /// idle and is returned as `AudioError::Decode`.
    pub async fn play(&self, payload: AudioPayload, identifier: &str) -> AudioResult<PlaybackOutcome> {
        let shared = self.shared.clone();
        let generation = {
            let _guard = shared.lock();
            shared.supersede()
        };

        let sample_rate = shared.device.sample_rate();
        let channels = shared.device.channels();
        let decoded = tokio::task::spawn_blocking(move || {
            decoder::decode_for_output(&payload, sample_rate, channels)
        })
        .await
        .map_err(|e| AudioError::Task(e.to_string()))
        .and_then(|result| result);

        let buffer = match decoded {
            Ok(buffer) => buffer,
            Err(e) => {
                warn!(identifier, "Failed to decode speech: {}", e);
                shared.settle_idle(generation);
                return Err(e);
            }
        };

        let (finished_tx, finished_rx) = oneshot::channel();
        {
            let guard = shared.lock();
            if guard.borrow().generation != generation {
                debug!(identifier, "Superseded before playback started");
                return Ok(PlaybackOutcome::Interrupted);
            }

            if let Err(e) = shared.device.start(buffer, finished_tx) {
                warn!(identifier, "Failed to start playback: {}", e);
                shared.settle_idle(generation);
                return Err(e);
            }

            guard.borrow_mut().voice = Some(identifier.to_string());
            shared.store.publish(PlaybackState::playing(identifier));
        }
        debug!(identifier, "Playback started");

        // Completion is handled on its own task so the state returns to idle
        // even if the caller stops waiting.
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let watcher = shared.clone();
        tokio::spawn(async move {
            let finished = finished_rx.await.is_ok();
            let outcome = watcher.complete(generation, finished);
            let _ = outcome_tx.send(outcome);
        });

        let outcome = outcome_rx.await.unwrap_or(PlaybackOutcome::Interrupted);
        debug!(identifier, ?outcome, "Playback ended");
        Ok(outcome)
    }

    /// Halt playback and publish idle. Does nothing, and publishes nothing,
    /// when already idle. A play still decoding will not start.
    pub fn stop(&self) {
        let shared = &self.shared;
        let _guard = shared.lock();
        shared.supersede();

        if !shared.store.current_state().is_idle() {
            shared.store.publish(PlaybackState::idle());
        }
    }

    /// Stop only if one of `identifiers` is loading or playing.
    /// Returns whether a stop happened.
    pub fn stop_if_active(&self, identifiers: &[&str]) -> bool {
        let _guard = self.shared.lock();
        let state = self.shared.store.current_state();
        let owned = identifiers.iter().any(|id| state.is_active(id));
        if owned {
            self.stop();
        }
        owned
    }
}

impl Shared {
    fn lock(&self) -> Locked<'_> {
        let order = self.store.hold();
        Locked {
            _order: order,
            active: self.active.lock(),
        }
    }

    /// Invalidate any in-flight play and silence the device.
    /// Publishes idle if something was playing.
    fn supersede(&self) -> u64 {
        let guard = self.lock();
        let (generation, had_voice) = {
            let mut active = guard.borrow_mut();
            active.generation += 1;
            (active.generation, active.voice.take().is_some())
        };

        if had_voice || self.device.is_rendering() {
            self.device.halt();
        }
        if self.store.current_state().status == PlaybackStatus::Playing {
            self.store.publish(PlaybackState::idle());
        }

        generation
    }

    /// Return to idle after a failed play, unless someone else took over
    fn settle_idle(&self, generation: u64) {
        let guard = self.lock();
        if guard.borrow().generation == generation && !self.store.current_state().is_idle() {
            self.store.publish(PlaybackState::idle());
        }
    }

    fn complete(&self, generation: u64, finished: bool) -> PlaybackOutcome {
        let guard = self.lock();
        let current = {
            let mut active = guard.borrow_mut();
            if active.generation == generation {
                active.voice = None;
                true
            } else {
                false
            }
        };

        if !current {
            return PlaybackOutcome::Interrupted;
        }

        if !self.store.current_state().is_idle() {
            self.store.publish(PlaybackState::idle());
        }

        if finished {
            PlaybackOutcome::Finished
        } else {
            PlaybackOutcome::Interrupted
        }
    }
}
