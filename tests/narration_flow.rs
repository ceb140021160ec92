use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

use spice_jadoo_lib::audio::{AudioPayload, NullOutput, PlaybackEngine, PlaybackState, PlaybackStateStore, PlaybackStatus};
use spice_jadoo_lib::commands;
use spice_jadoo_lib::credentials::{Credential, CredentialPool, Failure, ResilientDispatcher};
use spice_jadoo_lib::narration::{SequencerStage, VISION_SEGMENT, WISDOM_SEGMENT};
use spice_jadoo_lib::oracle::{Challenge, Judgement, Oracle, OracleBackend, SelectedSpice};
use spice_jadoo_lib::settings::AppSettings;
use spice_jadoo_lib::state::AppState;

/// Backend that judges every dish the same and speaks anything not listed as silent
struct Kitchen {
    speech_latency: Duration,
    silent_texts: Vec<&'static str>,
}

#[async_trait]
impl OracleBackend for Kitchen {
    async fn judge(&self, _: &Credential, _: &Challenge, _: &[SelectedSpice]) -> Result<Judgement, Failure> {
        Ok(Judgement {
            dish_name: "Tamarind Thunder".to_string(),
            description: "D".to_string(),
            score: 8.0,
            feedback: "F".to_string(),
        })
    }

    async fn synthesize(&self, _: &Credential, text: &str) -> Result<AudioPayload, Failure> {
        tokio::time::sleep(self.speech_latency).await;
        if self.silent_texts.iter().any(|silent| *silent == text) {
            return Err(Failure::fatal("no audio data in response"));
        }
        // 300ms of audio
        Ok(AudioPayload::from_samples(&vec![800i16; 7200]))
    }
}

fn app(kitchen: Kitchen) -> (AppState, Arc<Mutex<Vec<PlaybackState>>>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let engine = PlaybackEngine::new(Arc::new(NullOutput::new()), PlaybackStateStore::new());
    let dispatcher = Arc::new(ResilientDispatcher::new(CredentialPool::starting_at(["k1", "k2"], 0)));
    let oracle = Arc::new(Oracle::new(Arc::new(kitchen), dispatcher));

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    engine.store().subscribe(move |s| sink.lock().push(s.clone()));

    let state = AppState::new(AppSettings::default(), engine, oracle, dir.path().to_path_buf());
    (state, seen, dir)
}

fn challenge() -> Challenge {
    spice_jadoo_lib::default_challenge()
}

fn spices() -> Vec<SelectedSpice> {
    vec![spice_jadoo_lib::parse_spice("Cumin=2").unwrap()]
}

#[tokio::test(start_paused = true)]
async fn consultation_narrates_vision_then_wisdom() {
    let (state, seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(50),
        silent_texts: vec![],
    });

    let judgement = commands::consult_oracle(challenge(), spices(), &state).await.unwrap();
    assert_eq!(judgement.dish_name, "Tamarind Thunder");

    let report = commands::await_narration(&state).await.unwrap();
    assert_eq!(
        report.stages,
        vec![
            SequencerStage::Preparing,
            SequencerStage::PlayingFirst,
            SequencerStage::PlayingSecond,
            SequencerStage::Complete
        ]
    );
    assert_eq!(
        *seen.lock(),
        vec![
            PlaybackState::idle(),
            PlaybackState::playing(VISION_SEGMENT),
            PlaybackState::idle(),
            PlaybackState::playing(WISDOM_SEGMENT),
            PlaybackState::idle(),
        ]
    );
    assert_eq!(commands::narration_stage(&state).unwrap(), Some(SequencerStage::Complete));
}

#[tokio::test(start_paused = true)]
async fn missing_wisdom_audio_still_completes() {
    let (state, seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(50),
        silent_texts: vec!["F"],
    });

    commands::consult_oracle(challenge(), spices(), &state).await.unwrap();
    let report = commands::await_narration(&state).await.unwrap();

    assert_eq!(
        report.stages,
        vec![SequencerStage::Preparing, SequencerStage::PlayingFirst, SequencerStage::Complete]
    );
    assert!(!seen.lock().iter().any(|s| s.is_active(WISDOM_SEGMENT)));
}

#[tokio::test(start_paused = true)]
async fn dismissing_stops_the_narration() {
    let (state, seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(50),
        silent_texts: vec![],
    });

    commands::consult_oracle(challenge(), spices(), &state).await.unwrap();
    while !state.engine.state().is_active(VISION_SEGMENT) {
        tokio::task::yield_now().await;
    }

    let active = state.narration.lock().as_ref().map(|n| n.sequencer.clone()).unwrap();
    commands::dismiss_judgement(&state).unwrap();
    assert_eq!(commands::get_playback_state(&state).unwrap(), PlaybackState::idle());
    assert!(commands::narration_stage(&state).unwrap().is_none());

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(active.is_cancelled());
    assert_eq!(active.stage(), SequencerStage::PlayingFirst);
    assert!(!seen.lock().iter().any(|s| s.is_active(WISDOM_SEGMENT)));
}

#[tokio::test(start_paused = true)]
async fn new_consultation_replaces_the_old_narration() {
    let (state, _seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(50),
        silent_texts: vec![],
    });

    commands::consult_oracle(challenge(), spices(), &state).await.unwrap();
    let first = state.narration.lock().as_ref().map(|n| n.sequencer.clone()).unwrap();

    commands::consult_oracle(challenge(), spices(), &state).await.unwrap();
    assert!(first.is_cancelled());

    let report = commands::await_narration(&state).await.unwrap();
    assert!(!report.cancelled);
}

#[tokio::test]
async fn consultation_needs_spices() {
    let (state, _seen, _dir) = app(Kitchen {
        speech_latency: Duration::ZERO,
        silent_texts: vec![],
    });
    assert!(commands::consult_oracle(challenge(), vec![], &state).await.is_err());
    assert!(commands::await_narration(&state).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn speak_text_shows_loading_then_playing() {
    let (state, seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(200),
        silent_texts: vec![],
    });

    let outcome = commands::speak_text("Season the dal".to_string(), "challenge".to_string(), &state)
        .await
        .unwrap();

    assert_eq!(outcome, spice_jadoo_lib::audio::PlaybackOutcome::Finished);
    let statuses: Vec<PlaybackStatus> = seen.lock().iter().map(|s| s.status).collect();
    assert_eq!(
        statuses,
        vec![
            PlaybackStatus::Idle,
            PlaybackStatus::Loading,
            PlaybackStatus::Playing,
            PlaybackStatus::Idle
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn failed_speech_returns_to_idle() {
    let (state, seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(10),
        silent_texts: vec!["quiet"],
    });

    let result = commands::speak_text("quiet".to_string(), "challenge".to_string(), &state).await;

    assert!(result.is_err());
    assert_eq!(
        *seen.lock(),
        vec![
            PlaybackState::idle(),
            PlaybackState::loading("challenge"),
            PlaybackState::idle()
        ]
    );
}

#[tokio::test]
async fn volume_is_applied_and_saved() {
    let (state, _seen, dir) = app(Kitchen {
        speech_latency: Duration::ZERO,
        silent_texts: vec![],
    });

    commands::set_volume(0.25, &state).unwrap();
    assert_eq!(state.engine.volume(), 0.25);
    assert_eq!(AppSettings::load(dir.path()).unwrap().audio.volume, 0.25);

    assert!(commands::set_volume(f32::NAN, &state).is_err());
}

#[tokio::test(start_paused = true)]
async fn stop_command_silences_and_subscribers_see_it() {
    let (state, _seen, _dir) = app(Kitchen {
        speech_latency: Duration::from_millis(10),
        silent_texts: vec![],
    });
    let (subscription, mut rx) = commands::subscribe_playback(&state).unwrap();

    let speaking = {
        let engine = state.engine.clone();
        tokio::spawn(async move { engine.play(AudioPayload::from_samples(&vec![1i16; 24_000]), "x").await })
    };
    assert_eq!(rx.recv().await, Some(PlaybackState::idle()));
    assert_eq!(rx.recv().await, Some(PlaybackState::playing("x")));

    commands::stop_playback(&state).unwrap();
    assert_eq!(rx.recv().await, Some(PlaybackState::idle()));
    assert!(!state.engine.is_rendering());

    speaking.await.unwrap().unwrap();
    subscription.unsubscribe();
    subscription.unsubscribe();
}
