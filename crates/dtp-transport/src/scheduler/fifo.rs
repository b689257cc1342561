//! Plain FIFO scheduler, retained only as a behavioral baseline for tests
//! comparing deadline-aware scheduling against simple first-in-first-out
//! delivery order.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::codec::Packet;
use crate::error::DtpError;

use super::{Scheduler, SchedulerStats};

#[derive(Debug, Clone, Copy)]
pub struct FifoSchedulerConfig {
    pub queue_max: usize,
}

impl Default for FifoSchedulerConfig {
    fn default() -> Self {
        FifoSchedulerConfig { queue_max: 1000 }
    }
}

struct Inner {
    queue: VecDeque<Packet>,
    enqueued: u64,
    dequeued: u64,
    dropped_full: u64,
    dropped_expired: u64,
    advisory_rate: f64,
}

/// Unconditional-ordering FIFO queue — no priority, no EDF, no eviction.
/// A full queue rejects the incoming packet outright.
pub struct FifoScheduler {
    config: FifoSchedulerConfig,
    inner: Mutex<Inner>,
}

impl FifoScheduler {
    pub fn new(config: FifoSchedulerConfig) -> Self {
        FifoScheduler {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                enqueued: 0,
                dequeued: 0,
                dropped_full: 0,
                dropped_expired: 0,
                advisory_rate: 500.0,
            }),
            config,
        }
    }
}

impl Scheduler for FifoScheduler {
    fn enqueue(&self, packet: Packet) -> Result<(), DtpError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.len() >= self.config.queue_max {
            inner.dropped_full += 1;
            return Err(DtpError::QueueFull);
        }
        inner.queue.push_back(packet);
        inner.enqueued += 1;
        Ok(())
    }

    fn dequeue(&self) -> Option<Packet> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let packet = inner.queue.pop_front()?;
            if packet.header.is_expired() {
                inner.dropped_expired += 1;
                continue;
            }
            inner.dequeued += 1;
            return Some(packet);
        }
    }

    fn clear(&self) {
        self.inner.lock().unwrap().queue.clear();
    }

    fn stats(&self) -> SchedulerStats {
        let inner = self.inner.lock().unwrap();
        SchedulerStats {
            enqueued: inner.enqueued,
            dequeued: inner.dequeued,
            dropped_full: inner.dropped_full,
            dropped_expired: inner.dropped_expired,
            queue_size: inner.queue.len(),
            advisory_rate: inner.advisory_rate,
        }
    }

    /// The FIFO baseline is deliberately insensitive to congestion signals —
    /// it exists to show the *absence* of deadline-aware behavior.
    fn set_congested(&self, _congested: bool) {}
}
