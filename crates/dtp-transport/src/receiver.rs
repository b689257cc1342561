//! Receiver state machine — pure logic over raw datagram bytes.
//!
//! Accepts whatever bytes arrived on a socket, decodes them, updates the
//! metrics collector, and produces a small list of events (deliver to the
//! application, send an ACK) for the caller to act on. No socket type
//! appears in this module.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tracing::trace;

use crate::codec::{flags, Packet};
use crate::metrics::MetricsCollector;

#[derive(Debug, Clone, Copy)]
pub struct ReceiverConfig {
    /// When set, `on_datagram` blocks for a priority-proportional delay
    /// before returning, standing in for downstream processing cost in
    /// simulation runs. Off by default — production receivers shouldn't
    /// pay this.
    pub simulate_processing_latency: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        ReceiverConfig {
            simulate_processing_latency: false,
        }
    }
}

/// Synthetic per-class processing cost used only when
/// [`ReceiverConfig::simulate_processing_latency`] is enabled.
fn simulated_latency_ms(priority: crate::codec::Priority) -> u64 {
    use crate::codec::Priority::*;
    match priority {
        Critical => 1,
        High => 2,
        Medium => 5,
        Low => 10,
    }
}

/// A side effect the caller (the UDP boundary, or the simulation harness)
/// must act on.
#[derive(Debug, Clone)]
pub enum ReceiverEvent {
    /// Completed, non-expired packet ready for the application.
    Delivered(Packet),
    /// An ACK that must be written back to `to`.
    SendAck { bytes: Bytes, to: SocketAddr },
}

/// Stateless-except-for-metrics receiver. One instance can serve any number
/// of peers since nothing here is keyed by source address beyond routing the
/// ACK reply.
pub struct Receiver {
    config: ReceiverConfig,
    metrics: Arc<MetricsCollector>,
}

impl Receiver {
    pub fn new(config: ReceiverConfig, metrics: Arc<MetricsCollector>) -> Self {
        Receiver { config, metrics }
    }

    /// Process one arrived datagram. Malformed datagrams are silently
    /// discarded (no event, no metric) per the wire format's failure
    /// contract: a bad packet must not be distinguishable from one that
    /// never arrived.
    pub fn on_datagram(&self, data: &[u8], from: SocketAddr) -> Vec<ReceiverEvent> {
        let mut packet = match Packet::deserialize(data) {
            Ok(p) => p,
            Err(e) => {
                trace!(error = %e, "discarding malformed datagram");
                return Vec::new();
            }
        };

        let priority = packet.header.priority;

        if packet.header.is_expired() {
            self.metrics.record_dropped(priority, "expired_on_arrival");
            return Vec::new();
        }

        packet.mark_received();

        if self.config.simulate_processing_latency {
            std::thread::sleep(std::time::Duration::from_millis(simulated_latency_ms(priority)));
        }

        let latency_ms = packet.latency_ms().unwrap_or(0);
        let on_time = packet.is_on_time();
        self.metrics
            .record_received(priority, packet.header.sequence, latency_ms, on_time);

        let mut events = vec![ReceiverEvent::Delivered(packet.clone())];

        if packet.header.flags & flags::RELIABLE != 0 {
            let ack = Packet::create_ack(packet.header.sequence, priority);
            events.push(ReceiverEvent::SendAck { bytes: ack.serialize(), to: from });
        }

        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Priority;
    use crate::metrics::MetricsConfig;

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    fn receiver() -> (Receiver, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
        (Receiver::new(ReceiverConfig::default(), metrics.clone()), metrics)
    }

    #[test]
    fn malformed_datagram_produces_no_events_and_no_metric() {
        let (receiver, metrics) = receiver();
        let events = receiver.on_datagram(&[1, 2, 3], addr());
        assert!(events.is_empty());
        assert_eq!(metrics.class_metrics(Priority::Critical).received, 0);
    }

    #[test]
    fn well_formed_data_packet_is_delivered_and_recorded() {
        let (receiver, metrics) = receiver();
        let packet = Packet::create_data(Bytes::from_static(b"payload"), Priority::High, 7, Some(3000));
        let events = receiver.on_datagram(&packet.serialize(), addr());
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ReceiverEvent::Delivered(p) if p.header.sequence == 7));
        assert_eq!(metrics.class_metrics(Priority::High).received, 1);
    }

    #[test]
    fn expired_packet_is_dropped_and_counted() {
        let (receiver, metrics) = receiver();
        let mut packet = Packet::create_data(Bytes::new(), Priority::Medium, 1, Some(100));
        packet.header.timestamp = (crate::clock::now_ms() - 5000) as u32;
        let events = receiver.on_datagram(&packet.serialize(), addr());
        assert!(events.is_empty());
        assert_eq!(metrics.class_metrics(Priority::Medium).dropped, 1);
    }

    #[test]
    fn reliable_flag_triggers_ack_event() {
        let (receiver, _metrics) = receiver();
        let mut packet = Packet::create_data(Bytes::new(), Priority::Critical, 42, Some(2000));
        packet.header.flags |= flags::RELIABLE;
        let events = receiver.on_datagram(&packet.serialize(), addr());
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ReceiverEvent::SendAck { to, .. } if *to == addr()));
    }

    #[test]
    fn unreliable_data_packet_yields_no_ack() {
        let (receiver, _metrics) = receiver();
        let packet = Packet::create_data(Bytes::new(), Priority::Low, 1, Some(6000));
        let events = receiver.on_datagram(&packet.serialize(), addr());
        assert_eq!(events.len(), 1);
    }
}
