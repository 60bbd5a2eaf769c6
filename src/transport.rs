//! Radio transport seam.
//!
//! The radio driver lives outside the core; this module defines the contract
//! the core requires of it and a loopback implementation used by tests and
//! bench rigs. Framing below the packet level (preamble, FEC, LoRa payload
//! length) is the transport's concern.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{Result, TransportError};

/// One received frame with link metadata.
#[derive(Debug, Clone)]
pub struct RxFrame {
    pub bytes: Vec<u8>,
    /// Received signal strength in dBm.
    pub rssi: i16,
    /// Signal-to-noise ratio in dB.
    pub snr: i8,
    pub received_at: Instant,
}

impl RxFrame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            rssi: -60,
            snr: 10,
            received_at: Instant::now(),
        }
    }
}

/// Outbound side of the radio.
///
/// `send` is frame-atomic: the whole buffer goes out as one radio frame or
/// the call fails. Inbound frames are delivered on an [`mpsc`] channel the
/// driver feeds, one whole frame per message.
#[async_trait]
pub trait RadioTransport: Send + Sync {
    /// Transmit one frame.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Advisory channel-activity check before voice transmissions.
    fn channel_is_free(&self) -> bool {
        true
    }
}

/// Capacity of the inbound frame channel.
pub const RX_CHANNEL_CAPACITY: usize = 64;

/// In-process radio pair: everything sent on one side arrives on the other.
///
/// Models a perfect RF link; tests drop or reorder frames by intercepting
/// the channels themselves.
pub struct LoopbackRadio {
    peer_tx: mpsc::Sender<RxFrame>,
}

impl LoopbackRadio {
    /// Create two linked radios and their inbound frame channels.
    pub fn pair() -> (
        Arc<Self>,
        mpsc::Receiver<RxFrame>,
        Arc<Self>,
        mpsc::Receiver<RxFrame>,
    ) {
        let (a_tx, a_rx) = mpsc::channel(RX_CHANNEL_CAPACITY);
        let (b_tx, b_rx) = mpsc::channel(RX_CHANNEL_CAPACITY);
        (
            Arc::new(Self { peer_tx: b_tx }),
            a_rx,
            Arc::new(Self { peer_tx: a_tx }),
            b_rx,
        )
    }
}

#[async_trait]
impl RadioTransport for LoopbackRadio {
    async fn send(&self, frame: &[u8]) -> Result<()> {
        self.peer_tx
            .send(RxFrame::new(frame.to_vec()))
            .await
            .map_err(|_| TransportError::TxError("peer channel closed".into()))?;
        Ok(())
    }
}

/// Radio that drops every frame; a stand-in when no link exists.
pub struct NullRadio;

#[async_trait]
impl RadioTransport for NullRadio {
    async fn send(&self, _frame: &[u8]) -> Result<()> {
        Ok(())
    }

    fn channel_is_free(&self) -> bool {
        true
    }
}
