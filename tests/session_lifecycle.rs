//! End-to-end session scenarios: two engines over a loopback radio.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use wavetalk::audio::NullAudio;
use wavetalk::config::EngineConfig;
use wavetalk::dial::SlotState;
use wavetalk::engine::Engine;
use wavetalk::error::SessionError;
use wavetalk::events::EngineEvent;
use wavetalk::identity::{DeviceIdentity, NoHardware};
use wavetalk::storage::MemoryStore;
use wavetalk::transport::{LoopbackRadio, NullRadio, RadioTransport, RxFrame};
use wavetalk::types::{ConnectionKind, PeerKey};

const WAIT: Duration = Duration::from_secs(10);

/// Guard for the paused-clock test: must exceed the 30 s call timeout.
const LONG_WAIT: Duration = Duration::from_secs(120);

fn make_engine(
    id: &str,
    radio: Arc<dyn RadioTransport>,
    rx: mpsc::Receiver<RxFrame>,
) -> Engine {
    let storage = Arc::new(MemoryStore::new());
    let mut identity = DeviceIdentity::init(storage.clone(), &NoHardware).unwrap();
    identity.set_custom(id).unwrap();

    let engine = Engine::new(
        EngineConfig::default(),
        identity,
        radio,
        Arc::new(NullAudio::new()),
        storage,
    )
    .unwrap();
    engine.start(rx);
    engine
}

fn engine_pair() -> (Engine, Engine) {
    let (radio_a, rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let a = make_engine("11111111", radio_a, rx_a);
    let b = make_engine("22222222", radio_b, rx_b);
    (a, b)
}

async fn next_matching_within<F>(
    wait: Duration,
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    mut pred: F,
) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    timeout(wait, async {
        loop {
            let event = rx.recv().await.expect("event stream closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected event did not arrive")
}

async fn next_matching<F>(
    rx: &mut tokio::sync::broadcast::Receiver<EngineEvent>,
    pred: F,
) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    next_matching_within(WAIT, rx, pred).await
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_accept_connects_both_sides() {
    let (a, b) = engine_pair();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.dial()
        .save(0, ConnectionKind::Device, "22222222", "peer-b", None)
        .await
        .unwrap();
    a.dial().connect(0).await.unwrap();

    // B sees the incoming call and its slot binding.
    let event = next_matching(&mut b_events, |e| {
        matches!(e, EngineEvent::IncomingCall { .. })
    })
    .await;
    let EngineEvent::IncomingCall { slot, from } = event else {
        unreachable!();
    };
    assert_eq!(from.as_str(), "11111111");

    // B accepts; both sides reach CONNECTED.
    b.dial().accept_incoming(slot).await.unwrap();

    let event = next_matching(&mut a_events, |e| {
        matches!(e, EngineEvent::Connected { .. })
    })
    .await;
    let EngineEvent::Connected { peer, .. } = event else {
        unreachable!();
    };
    assert!(matches!(peer, PeerKey::Device(d) if d.as_str() == "22222222"));

    next_matching(&mut b_events, |e| matches!(e, EngineEvent::Connected { .. })).await;

    // The in-band handshake follows; both sides report the fresh epoch.
    next_matching(&mut a_events, |e| {
        matches!(e, EngineEvent::KeyRefreshed { .. })
    })
    .await;
    next_matching(&mut b_events, |e| {
        matches!(e, EngineEvent::KeyRefreshed { .. })
    })
    .await;

    assert_eq!(a.dial().active_workers(), 1);
    assert_eq!(b.dial().active_workers(), 1);
    assert!(a.dial().check_invariants());
    assert!(b.dial().check_invariants());

    // A hangs up; B observes the end and both sides quiesce.
    a.dial().disconnect(0).await.unwrap();
    next_matching(&mut b_events, |e| matches!(e, EngineEvent::Ended { .. })).await;

    assert_eq!(a.dial().active_workers(), 0);
    let (slots, _) = a.slots();
    assert_eq!(slots[0].state, SlotState::Saved);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reject_surfaces_reason() {
    let (a, b) = engine_pair();
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.dial()
        .save(0, ConnectionKind::Device, "22222222", "peer-b", None)
        .await
        .unwrap();
    a.dial().connect(0).await.unwrap();

    let event = next_matching(&mut b_events, |e| {
        matches!(e, EngineEvent::IncomingCall { .. })
    })
    .await;
    let EngineEvent::IncomingCall { slot, .. } = event else {
        unreachable!();
    };
    b.dial().reject_incoming(slot).await.unwrap();

    let event = next_matching(&mut a_events, |e| matches!(e, EngineEvent::Ended { .. })).await;
    let EngineEvent::Ended { reason, .. } = event else {
        unreachable!();
    };
    assert!(matches!(reason, SessionError::Rejected(_)));

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_waiting_times_out_after_30s() {
    // Nobody answers on a null radio; WAITING must expire at the call
    // timeout and return the slot to SAVED.
    let (_tx, rx) = mpsc::channel(8);
    let engine = make_engine("11111111", Arc::new(NullRadio), rx);
    let mut events = engine.subscribe();

    engine
        .dial()
        .save(2, ConnectionKind::Device, "99999999", "ghost", None)
        .await
        .unwrap();
    engine.dial().connect(2).await.unwrap();
    assert_eq!(engine.dial().active_workers(), 1);

    let event = next_matching_within(LONG_WAIT, &mut events, |e| {
        matches!(e, EngineEvent::Timeout { .. })
    })
    .await;
    assert!(matches!(event, EngineEvent::Timeout { slot: 2 }));

    // Worker quiesced: slot back to SAVED, no workers left.
    let mut yields = 0;
    while engine.dial().active_workers() != 0 {
        tokio::task::yield_now().await;
        yields += 1;
        assert!(yields < 100_000, "worker did not quiesce");
    }

    let (slots, _) = engine.slots();
    assert_eq!(slots[2].state, SlotState::Saved);
    assert!(engine.dial().check_invariants());

    engine.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_ping_answered_with_pong() {
    let (radio_a, mut rx_a, radio_b, rx_b) = LoopbackRadio::pair();
    let b = make_engine("22222222", radio_b, rx_b);

    // Hand-built PING from a non-engine peer.
    let src: wavetalk::types::DeviceId = "11111111".parse().unwrap();
    let frame = wavetalk::protocol::build(wavetalk::protocol::MsgType::Ping, src, &[]).unwrap();
    radio_a.send(&frame).await.unwrap();

    let reply = timeout(WAIT, async {
        loop {
            let frame = rx_a.recv().await.expect("loopback closed");
            if let Ok((header, payload)) = wavetalk::protocol::parse(&frame.bytes) {
                if header.msg_type() == Some(wavetalk::protocol::MsgType::Pong) {
                    return (header, payload.to_vec());
                }
            }
        }
    })
    .await
    .expect("no PONG");

    assert_eq!(reply.0.src_id.as_str(), "22222222");
    assert_eq!(&reply.1, src.as_bytes());

    b.shutdown().await;
}
