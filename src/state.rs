// Application state management
use anyhow::Context;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::{CpalOutput, NullOutput, OutputDevice, PlaybackEngine, PlaybackStateStore};
use crate::credentials::{CredentialPool, ResilientDispatcher};
use crate::narration::{NarrationReport, NarrationSequencer};
use crate::oracle::{GeminiBackend, Oracle};
use crate::settings::{AppSettings, OutputKind};

/// The narration of the judgement currently on screen
pub struct ActiveNarration {
    pub sequencer: Arc<NarrationSequencer>,
    pub task: Option<JoinHandle<NarrationReport>>,
}

pub struct AppState {
    pub settings: Mutex<AppSettings>,
    pub engine: PlaybackEngine,
    pub oracle: Arc<Oracle>,
    pub narration: Mutex<Option<ActiveNarration>>,
    pub app_dir: PathBuf,
}

impl AppState {
    pub fn new(settings: AppSettings, engine: PlaybackEngine, oracle: Arc<Oracle>, app_dir: PathBuf) -> Self {
        Self {
            settings: Mutex::new(settings),
            engine,
            oracle,
            narration: Mutex::new(None),
            app_dir,
        }
    }

    /// Build the process-wide state from settings: output device, playback
    /// engine, credential pool and the remote service client.
    pub fn initialize(settings: AppSettings, app_dir: PathBuf) -> anyhow::Result<Self> {
        let device = open_output(&settings);
        device.set_volume(settings.audio.volume);
        let engine = PlaybackEngine::new(device, PlaybackStateStore::new());

        let pool = CredentialPool::new(&settings.credentials);
        info!(credentials = pool.len(), "Credential pool ready");
        let dispatcher = Arc::new(ResilientDispatcher::new(pool));

        let backend = GeminiBackend::new(&settings.gemini).context("Failed to create Gemini client")?;
        let oracle = Arc::new(Oracle::new(Arc::new(backend), dispatcher));

        Ok(Self::new(settings, engine, oracle, app_dir))
    }

    /// Swap in a new narration, tearing down the previous one
    pub fn replace_narration(&self, next: Option<ActiveNarration>) {
        let previous = std::mem::replace(&mut *self.narration.lock(), next);
        if let Some(previous) = previous {
            previous.sequencer.cancel();
        }
    }
}

fn open_output(settings: &AppSettings) -> Arc<dyn OutputDevice> {
    match settings.audio.output {
        OutputKind::Null => {
            info!("Audio output disabled, using silent output");
            Arc::new(NullOutput::new())
        }
        OutputKind::Device => match CpalOutput::open(settings.audio.volume) {
            Ok(output) => Arc::new(output),
            Err(e) => {
                warn!("No usable audio device ({}), falling back to silent output", e);
                Arc::new(NullOutput::new())
            }
        },
    }
}
