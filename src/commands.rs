// UI command handlers
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::audio::{PlaybackOutcome, PlaybackState, Subscription};
use crate::narration::{NarrationReport, NarrationSequencer, SequencerStage};
use crate::oracle::{Challenge, Judgement, SelectedSpice};
use crate::state::{ActiveNarration, AppState};

// ===== Oracle Commands =====

/// Judge a dish and start narrating the verdict in the background.
/// Any narration from an earlier judgement is torn down first.
pub async fn consult_oracle(
    challenge: Challenge,
    spices: Vec<SelectedSpice>,
    state: &AppState,
) -> Result<Judgement, String> {
    if spices.is_empty() {
        return Err("Select at least one spice before consulting the Oracle".to_string());
    }

    state.replace_narration(None);

    info!(challenge = %challenge.title, spices = spices.len(), "Consulting the Oracle");
    let judgement = state.oracle.request_judgement(&challenge, &spices).await;

    let sequencer = Arc::new(NarrationSequencer::for_judgement(
        state.engine.clone(),
        state.oracle.clone(),
        &judgement,
    ));
    let task = {
        let sequencer = sequencer.clone();
        tokio::spawn(async move { sequencer.run().await })
    };
    state.replace_narration(Some(ActiveNarration {
        sequencer,
        task: Some(task),
    }));

    Ok(judgement)
}

/// Close the judgement: its narration stops if still going
pub fn dismiss_judgement(state: &AppState) -> Result<(), String> {
    state.replace_narration(None);
    Ok(())
}

pub fn narration_stage(state: &AppState) -> Result<Option<SequencerStage>, String> {
    Ok(state.narration.lock().as_ref().map(|n| n.sequencer.stage()))
}

/// Wait for the current narration to finish (or be torn down)
pub async fn await_narration(state: &AppState) -> Result<NarrationReport, String> {
    let (sequencer, task) = {
        let mut narration = state.narration.lock();
        let active = narration
            .as_mut()
            .ok_or_else(|| "No narration in progress".to_string())?;
        (active.sequencer.clone(), active.task.take())
    };

    match task {
        Some(task) => task
            .await
            .map_err(|e| format!("Narration task failed: {}", e)),
        None => Ok(sequencer.report()),
    }
}

// ===== Playback Commands =====

/// Generate speech for `text` and play it as `identifier`.
/// The state shows loading while the audio is being generated.
pub async fn speak_text(
    text: String,
    identifier: String,
    state: &AppState,
) -> Result<PlaybackOutcome, String> {
    state.engine.mark_loading(&identifier);

    let payload = match state.oracle.try_request_speech(&text).await {
        Ok(payload) => payload,
        Err(e) => {
            state.engine.stop_if_active(&[identifier.as_str()]);
            return Err(format!("Failed to generate speech: {}", e));
        }
    };

    if !state.engine.state().is_active(&identifier) {
        debug!(identifier = %identifier, "Speech no longer wanted");
        return Ok(PlaybackOutcome::Interrupted);
    }

    state
        .engine
        .play(payload, &identifier)
        .await
        .map_err(|e| format!("Failed to play speech: {}", e))
}

pub fn stop_playback(state: &AppState) -> Result<(), String> {
    state.engine.stop();
    Ok(())
}

pub fn get_playback_state(state: &AppState) -> Result<PlaybackState, String> {
    Ok(state.engine.state())
}

/// Playback transitions as a stream, starting with the current state
pub fn subscribe_playback(
    state: &AppState,
) -> Result<(Subscription, mpsc::UnboundedReceiver<PlaybackState>), String> {
    Ok(state.engine.store().subscribe_channel())
}

/// Set and persist the output volume (0.0-1.0)
pub fn set_volume(volume: f32, state: &AppState) -> Result<(), String> {
    if !volume.is_finite() {
        return Err(format!("Invalid volume: {}", volume));
    }
    let volume = volume.clamp(0.0, 1.0);
    state.engine.set_volume(volume);

    let mut settings = state.settings.lock();
    settings.audio.volume = volume;
    if let Err(e) = settings.save(&state.app_dir) {
        warn!("Volume changed but not saved: {}", e);
        return Err(format!("Failed to save settings: {}", e));
    }
    Ok(())
}
