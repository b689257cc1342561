//! Sender state machine — pure logic over an injected I/O boundary.
//!
//! Drains the scheduler, paces against the congestion controller, serializes
//! the packet, and hands the bytes to a [`DatagramSink`]. No socket type
//! appears anywhere in this module, so it is unit-testable without a live
//! network.

use std::net::SocketAddr;
use std::sync::Mutex;

use tracing::{debug, trace};

use crate::clock;
use crate::codec::{Packet, PacketType};
use crate::congestion::CongestionController;
use crate::error::{DtpError, Result};
use crate::metrics::MetricsCollector;
use crate::scheduler::Scheduler;

/// How long a received CONGESTION packet holds the scheduler's congested
/// flag before it is automatically cleared, absent further signals.
const CONGESTION_HOLD_MS: i64 = 1000;

/// Destination for serialized datagrams. Implemented by a thin UDP socket
/// wrapper in production and by an in-memory recorder in tests.
pub trait DatagramSink: Send + Sync {
    fn send_to(&self, data: &[u8], dest: SocketAddr) -> std::io::Result<()>;
}

/// Drives one outbound stream: scheduler → pacing → wire → sink.
pub struct Sender<C: DatagramSink> {
    sink: C,
    dest: SocketAddr,
    congestion: std::sync::Arc<CongestionController>,
    metrics: std::sync::Arc<MetricsCollector>,
    congestion_expiry_ms: Mutex<Option<i64>>,
}

impl<C: DatagramSink> Sender<C> {
    pub fn new(
        sink: C,
        dest: SocketAddr,
        congestion: std::sync::Arc<CongestionController>,
        metrics: std::sync::Arc<MetricsCollector>,
    ) -> Self {
        Sender {
            sink,
            dest,
            congestion,
            metrics,
            congestion_expiry_ms: Mutex::new(None),
        }
    }

    /// Dequeue and send one packet from `scheduler`, pacing against the
    /// congestion controller. Returns `Ok(None)` when the scheduler is empty,
    /// `Err(DtpError::SocketError)` if the sink write fails.
    pub fn try_send_one(&self, scheduler: &dyn Scheduler) -> Result<Option<Packet>> {
        let Some(packet) = scheduler.dequeue() else {
            return Ok(None);
        };

        if !self.congestion.can_send() {
            trace!(sequence = packet.header.sequence, "pacing bucket empty, requeueing");
            scheduler
                .enqueue(packet.clone())
                .map_err(|_| DtpError::QueueFull)?;
            return Ok(None);
        }

        let bytes = packet.serialize();
        self.sink
            .send_to(&bytes, self.dest)
            .map_err(|e| DtpError::SocketError(e.to_string()))?;

        self.congestion.on_packet_sent();
        self.metrics.record_sent(packet.header.priority);
        trace!(sequence = packet.header.sequence, priority = ?packet.header.priority, "sent packet");

        Ok(Some(packet))
    }

    /// Blocking variant of [`Self::try_send_one`]: waits up to `max_wait_ms`
    /// for a pacing token before giving up on an otherwise-ready packet.
    pub fn send_one_paced(&self, scheduler: &dyn Scheduler, max_wait_ms: u64) -> Result<Option<Packet>> {
        let Some(packet) = scheduler.dequeue() else {
            return Ok(None);
        };

        if !self.congestion.wait_for_token(max_wait_ms) {
            scheduler
                .enqueue(packet.clone())
                .map_err(|_| DtpError::QueueFull)?;
            return Ok(None);
        }

        let bytes = packet.serialize();
        self.sink
            .send_to(&bytes, self.dest)
            .map_err(|e| DtpError::SocketError(e.to_string()))?;

        self.congestion.on_packet_sent();
        self.metrics.record_sent(packet.header.priority);

        Ok(Some(packet))
    }

    /// Feed a received control packet back into the sender's feedback loop.
    /// ACKs drive congestion-window growth; a CONGESTION packet engages the
    /// scheduler's congested state for [`CONGESTION_HOLD_MS`].
    pub fn on_feedback(&self, packet: &Packet, scheduler: &dyn Scheduler) {
        match packet.header.packet_type {
            PacketType::Ack => self.congestion.on_ack_received(1),
            PacketType::Nack => self.congestion.on_loss_detected(1),
            PacketType::Congestion => {
                debug!("congestion signal received, engaging scheduler backpressure");
                scheduler.set_congested(true);
                *self.congestion_expiry_ms.lock().unwrap() = Some(clock::now_ms() + CONGESTION_HOLD_MS);
            }
            PacketType::Data | PacketType::Keepalive => {}
        }
    }

    /// Called periodically by the driving loop to expire a held congestion
    /// signal once [`CONGESTION_HOLD_MS`] has elapsed without renewal.
    pub fn tick(&self, scheduler: &dyn Scheduler) {
        let mut expiry = self.congestion_expiry_ms.lock().unwrap();
        if let Some(at) = *expiry {
            if clock::now_ms() >= at {
                scheduler.set_congested(false);
                *expiry = None;
            }
        }
    }
}
