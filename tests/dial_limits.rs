//! Dial-manager behavior: slot limits, cursor, audio focus, persistence.

use std::sync::Arc;

use tokio::sync::mpsc;

use wavetalk::audio::NullAudio;
use wavetalk::config::EngineConfig;
use wavetalk::dial::{SlotState, DIAL_POSITIONS};
use wavetalk::engine::Engine;
use wavetalk::error::{DialError, Error};
use wavetalk::identity::{DeviceIdentity, NoHardware};
use wavetalk::storage::{MemoryStore, Storage};
use wavetalk::transport::NullRadio;
use wavetalk::types::ConnectionKind;

fn make_engine(storage: Arc<dyn Storage>) -> Engine {
    let mut identity = DeviceIdentity::init(storage.clone(), &NoHardware).unwrap();
    identity.set_custom("11111111").unwrap();

    let (_tx, rx) = mpsc::channel(8);
    let engine = Engine::new(
        EngineConfig::default(),
        identity,
        Arc::new(NullRadio),
        Arc::new(NullAudio::new()),
        storage,
    )
    .unwrap();
    engine.start(rx);
    engine
}

#[tokio::test]
async fn test_unconfigured_slot_refuses_connect() {
    let engine = make_engine(Arc::new(MemoryStore::new()));
    let err = engine.dial().connect(5).await.unwrap_err();
    assert!(matches!(err, Error::Dial(DialError::SlotUnconfigured(5))));
    assert_eq!(engine.dial().active_workers(), 0);
    engine.shutdown().await;
}

#[tokio::test]
async fn test_position_bounds() {
    let engine = make_engine(Arc::new(MemoryStore::new()));
    assert!(matches!(
        engine.dial().set_position(DIAL_POSITIONS).await.unwrap_err(),
        Error::Dial(DialError::InvalidPosition(_))
    ));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_rotate_wraps_both_ways() {
    let engine = make_engine(Arc::new(MemoryStore::new()));
    assert_eq!(engine.dial().position(), 0);

    assert_eq!(engine.dial().rotate(-1).await, DIAL_POSITIONS - 1);
    assert_eq!(engine.dial().rotate(1).await, 0);

    for expected in 1..DIAL_POSITIONS {
        assert_eq!(engine.dial().rotate(1).await, expected);
    }
    assert_eq!(engine.dial().rotate(1).await, 0, "full circle");
    engine.shutdown().await;
}

#[tokio::test]
async fn test_worker_limit_reached_on_16th_connect() {
    let engine = make_engine(Arc::new(MemoryStore::new()));

    for i in 0..DIAL_POSITIONS {
        let code = format!("{:08}", 20_000_000 + i);
        engine
            .dial()
            .save(i, ConnectionKind::Device, &code, "", None)
            .await
            .unwrap();
        engine.dial().connect(i).await.unwrap();
    }
    assert_eq!(engine.dial().active_workers(), DIAL_POSITIONS);

    // The sixteenth connect cannot get a worker.
    let err = engine.dial().connect(0).await.unwrap_err();
    assert!(matches!(err, Error::Dial(DialError::SlotLimitReached)));
    assert_eq!(engine.dial().active_workers(), DIAL_POSITIONS);
    assert!(engine.dial().check_invariants());

    engine.dial().disconnect_all().await;
    assert_eq!(engine.dial().active_workers(), 0);
    assert!(engine.dial().check_invariants());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_audio_focus_is_unique() {
    let engine = make_engine(Arc::new(MemoryStore::new()));

    for i in 0..3 {
        let code = format!("{:08}", 30_000_000 + i);
        engine
            .dial()
            .save(i, ConnectionKind::Device, &code, "", None)
            .await
            .unwrap();
        engine.dial().connect(i).await.unwrap();
    }

    engine.dial().set_active_audio(1).await.unwrap();
    let (slots, _) = engine.slots();
    assert_eq!(slots.iter().filter(|s| s.audio_active).count(), 1);
    assert!(slots[1].audio_active);

    // Moving focus clears the previous slot.
    engine.dial().set_active_audio(2).await.unwrap();
    let (slots, _) = engine.slots();
    assert_eq!(slots.iter().filter(|s| s.audio_active).count(), 1);
    assert!(slots[2].audio_active);
    assert!(engine.dial().check_invariants());

    engine.shutdown().await;
}

#[tokio::test]
async fn test_save_while_connected_tears_down_first() {
    let engine = make_engine(Arc::new(MemoryStore::new()));

    engine
        .dial()
        .save(4, ConnectionKind::Device, "44444444", "old", None)
        .await
        .unwrap();
    engine.dial().connect(4).await.unwrap();
    assert_eq!(engine.dial().active_workers(), 1);

    // Overwriting the slot disconnects the old session.
    engine
        .dial()
        .save(4, ConnectionKind::Frequency, "55555555", "new", Some("pw".into()))
        .await
        .unwrap();
    assert_eq!(engine.dial().active_workers(), 0);

    let (slots, _) = engine.slots();
    assert_eq!(slots[4].state, SlotState::Saved);
    assert_eq!(slots[4].code.as_deref(), Some("55555555"));
    assert_eq!(slots[4].kind, Some(ConnectionKind::Frequency));
    engine.shutdown().await;
}

#[tokio::test]
async fn test_slot_metadata_survives_reboot() {
    let storage: Arc<dyn Storage> = Arc::new(MemoryStore::new());

    {
        let engine = make_engine(storage.clone());
        engine
            .dial()
            .save(7, ConnectionKind::Frequency, "66667777", "team", Some("pw".into()))
            .await
            .unwrap();
        engine
            .dial()
            .save(8, ConnectionKind::Device, "88889999", "base", None)
            .await
            .unwrap();
        engine.dial().connect(8).await.unwrap();
        engine.shutdown().await;
    }

    // "Reboot": a fresh engine over the same storage.
    let engine = make_engine(storage);
    let (slots, _) = engine.slots();

    // Metadata rehydrated, runtime state not: nothing reconnects.
    assert_eq!(slots[7].code.as_deref(), Some("66667777"));
    assert_eq!(slots[7].state, SlotState::Saved);
    assert_eq!(slots[8].code.as_deref(), Some("88889999"));
    assert_eq!(slots[8].state, SlotState::Saved);
    assert_eq!(engine.dial().active_workers(), 0);

    // Clearing removes the saved entry durably.
    engine.dial().clear(7).await.unwrap();
    let (slots, _) = engine.slots();
    assert_eq!(slots[7].state, SlotState::Empty);
    assert!(slots[7].code.is_none());
    engine.shutdown().await;
}

#[tokio::test]
async fn test_clear_while_connected() {
    let engine = make_engine(Arc::new(MemoryStore::new()));
    engine
        .dial()
        .save(0, ConnectionKind::Device, "12121212", "x", None)
        .await
        .unwrap();
    engine.dial().connect(0).await.unwrap();

    engine.dial().clear(0).await.unwrap();
    assert_eq!(engine.dial().active_workers(), 0);
    let (slots, _) = engine.slots();
    assert_eq!(slots[0].state, SlotState::Empty);
    assert!(engine.dial().check_invariants());
    engine.shutdown().await;
}
