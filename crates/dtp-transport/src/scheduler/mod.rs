//! Outbound packet scheduling.
//!
//! Two implementations share one capability: [`Scheduler`]. [`dtp::DtpScheduler`]
//! orders by the composite priority/deadline/arrival key described in the
//! wire-format module docs; [`fifo::FifoScheduler`] is a plain FIFO baseline
//! retained only so comparison tests can swap implementations without
//! duplicating the driver code in [`crate::sender`].

pub mod dtp;
pub mod fifo;

use crate::codec::Packet;
use crate::error::DtpError;

/// Aggregate counters a [`Scheduler`] implementation must expose.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerStats {
    pub enqueued: u64,
    pub dequeued: u64,
    pub dropped_full: u64,
    pub dropped_expired: u64,
    pub queue_size: usize,
    pub advisory_rate: f64,
}

/// Abstract scheduling capability. Both concrete implementations hold all
/// mutable state behind a single internal lock; no mutator blocks.
pub trait Scheduler: Send + Sync {
    /// Enqueue a packet. `Err(DtpError::QueueFull)` means the packet was
    /// rejected outright (not merely that something else was evicted).
    fn enqueue(&self, packet: Packet) -> Result<(), DtpError>;

    /// Pop the next packet to send, silently skipping and counting any
    /// already-expired entries. `None` means the queue is empty.
    fn dequeue(&self) -> Option<Packet>;

    /// Drop all queued state.
    fn clear(&self);

    fn stats(&self) -> SchedulerStats;

    /// Advisory congestion signal: scales the exposed advisory send rate.
    /// Pacing itself is enforced by [`crate::congestion::CongestionController`],
    /// not here.
    fn set_congested(&self, congested: bool);
}
