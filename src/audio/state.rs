// Published playback state
// One process-wide {status, active identifier} value with ordered, synchronous fan-out

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use serde::Serialize;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub status: PlaybackStatus,
    /// Which logical audio unit is loading or playing. Always None when idle.
    pub active_identifier: Option<String>,
}

impl PlaybackState {
    pub fn idle() -> Self {
        Self {
            status: PlaybackStatus::Idle,
            active_identifier: None,
        }
    }

    pub fn loading(identifier: impl Into<String>) -> Self {
        Self {
            status: PlaybackStatus::Loading,
            active_identifier: Some(identifier.into()),
        }
    }

    pub fn playing(identifier: impl Into<String>) -> Self {
        Self {
            status: PlaybackStatus::Playing,
            active_identifier: Some(identifier.into()),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status == PlaybackStatus::Idle
    }

    pub fn is_active(&self, identifier: &str) -> bool {
        self.active_identifier.as_deref() == Some(identifier)
    }
}

impl Default for PlaybackState {
    fn default() -> Self {
        Self::idle()
    }
}

type Listener = Arc<dyn Fn(&PlaybackState) + Send + Sync>;

struct Registration {
    id: u64,
    /// Sequence number of the last state this listener already knows
    since: u64,
    listener: Listener,
}

struct Inner {
    current: PlaybackState,
    listeners: Vec<Registration>,
    next_id: u64,
    /// Sequence number of the latest publish
    published: u64,
    pending: VecDeque<(u64, PlaybackState)>,
    dispatching: bool,
}

/// Keeps every state change, and every listener call, on one thread at a time.
/// The playback engine takes this before its own lock.
pub(crate) struct TransitionGuard<'a> {
    _guard: ReentrantMutexGuard<'a, RefCell<Inner>>,
}

/// Holds the live playback state and notifies subscribers of every transition.
///
/// Delivery is synchronous and in publish order. A publish made from inside a
/// listener is queued and delivered, after the current one, before the outer
/// publish returns. A listener registered while publishes are queued starts
/// from the latest state and skips the queued ones.
pub struct PlaybackStateStore {
    inner: ReentrantMutex<RefCell<Inner>>,
}

impl PlaybackStateStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: ReentrantMutex::new(RefCell::new(Inner {
                current: PlaybackState::idle(),
                listeners: Vec::new(),
                next_id: 0,
                published: 0,
                pending: VecDeque::new(),
                dispatching: false,
            })),
        })
    }

    pub fn current_state(&self) -> PlaybackState {
        self.inner.lock().borrow().current.clone()
    }

    pub(crate) fn hold(&self) -> TransitionGuard<'_> {
        TransitionGuard {
            _guard: self.inner.lock(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().borrow().listeners.len()
    }

    /// Register a listener. It is called immediately with the current state,
    /// then once per transition until unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&PlaybackState) + Send + Sync + 'static,
    {
        let guard = self.inner.lock();
        let listener: Listener = Arc::new(listener);

        let (id, current) = {
            let mut inner = guard.borrow_mut();
            let id = inner.next_id;
            inner.next_id += 1;
            let since = inner.published;
            inner.listeners.push(Registration {
                id,
                since,
                listener: listener.clone(),
            });
            (id, inner.current.clone())
        };

        listener(&current);

        Subscription {
            store: Arc::downgrade(self),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Subscribe through a channel, for async consumers
    pub fn subscribe_channel(
        self: &Arc<Self>,
    ) -> (Subscription, mpsc::UnboundedReceiver<PlaybackState>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let subscription = self.subscribe(move |state| {
            let _ = tx.send(state.clone());
        });
        (subscription, rx)
    }

    /// Replace the state and notify every subscriber.
    /// Only the playback engine publishes.
    pub(crate) fn publish(&self, state: PlaybackState) {
        debug_assert!(!state.is_idle() || state.active_identifier.is_none());

        let guard = self.inner.lock();
        {
            let mut inner = guard.borrow_mut();
            inner.published += 1;
            let seq = inner.published;
            inner.current = state.clone();
            inner.pending.push_back((seq, state));
            if inner.dispatching {
                return;
            }
            inner.dispatching = true;
        }

        loop {
            let (state, listeners) = {
                let mut inner = guard.borrow_mut();
                match inner.pending.pop_front() {
                    Some((seq, state)) => {
                        let listeners: Vec<Listener> = inner
                            .listeners
                            .iter()
                            .filter(|r| r.since < seq)
                            .map(|r| r.listener.clone())
                            .collect();
                        (state, listeners)
                    }
                    None => {
                        inner.dispatching = false;
                        break;
                    }
                }
            };

            for listener in listeners {
                listener(&state);
            }
        }
    }

    fn remove(&self, id: u64) {
        let guard = self.inner.lock();
        guard.borrow_mut().listeners.retain(|r| r.id != id);
    }
}

/// Registration handle returned by `subscribe`.
/// Unsubscribing is explicit; dropping the handle keeps the listener registered.
pub struct Subscription {
    store: Weak<PlaybackStateStore>,
    id: u64,
    active: AtomicBool,
}

impl Subscription {
    /// Remove the listener. Calling this more than once does nothing.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
