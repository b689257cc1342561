//! Deadline-aware priority scheduler.
//!
//! Orders queued packets by the composite key `(priority, time_to_deadline,
//! enqueue_sequence)` — highest priority first, then earliest deadline
//! (EDF), then arrival order. `time_to_deadline` is snapshotted at enqueue
//! and never recomputed while queued, so the key is stable for the entry's
//! lifetime even though wall-clock time moves on underneath it.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use tracing::info;

use crate::codec::{flags, Packet, Priority};
use crate::error::DtpError;

use super::{Scheduler, SchedulerStats};

#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct DtpSchedulerConfig {
    pub queue_max: usize,
    pub batch_size: usize,
    pub batch_timeout_ms: i64,
    pub initial_advisory_rate: f64,
    pub min_advisory_rate: f64,
    pub max_advisory_rate: f64,
}

impl Default for DtpSchedulerConfig {
    fn default() -> Self {
        DtpSchedulerConfig {
            queue_max: 1000,
            batch_size: 10,
            batch_timeout_ms: 50,
            initial_advisory_rate: 500.0,
            min_advisory_rate: 50.0,
            max_advisory_rate: 1000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    priority: Priority,
    time_to_deadline_ms: i64,
    enqueue_sequence: u64,
}

struct QueueEntry {
    key: QueueKey,
    packet: Packet,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}
impl Eq for QueueEntry {}
impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.key.cmp(&other.key)
    }
}

struct Inner {
    queue: BinaryHeap<Reverse<QueueEntry>>,
    next_sequence: u64,
    enqueued: u64,
    dequeued: u64,
    dropped_full: u64,
    dropped_expired: u64,
    congested: bool,
    advisory_rate: f64,

    batch_buffer: Vec<Packet>,
    batch_started_at_ms: Option<i64>,
    next_batch_id: u64,
}

/// Deadline-aware priority scheduler with a drop-lowest admission policy
/// under queue pressure and a parallel batching buffer.
pub struct DtpScheduler {
    config: DtpSchedulerConfig,
    inner: Mutex<Inner>,
}

impl DtpScheduler {
    pub fn new(config: DtpSchedulerConfig) -> Self {
        DtpScheduler {
            inner: Mutex::new(Inner {
                queue: BinaryHeap::new(),
                next_sequence: 0,
                enqueued: 0,
                dequeued: 0,
                dropped_full: 0,
                dropped_expired: 0,
                congested: false,
                advisory_rate: config.initial_advisory_rate,
                batch_buffer: Vec::new(),
                batch_started_at_ms: None,
                next_batch_id: 1,
            }),
            config,
        }
    }

    fn queue_key_for(&self, packet: &Packet, seq: u64) -> QueueKey {
        QueueKey {
            priority: packet.header.priority,
            time_to_deadline_ms: packet.header.time_to_deadline(),
            enqueue_sequence: seq,
        }
    }

    /// Append `packet` to the batch buffer. Returns the flushed batch (each
    /// packet tagged `BATCHED` with a shared, strictly increasing batch id)
    /// once either `batch_size` or `batch_timeout_ms` is reached.
    pub fn add_to_batch(&self, packet: Packet) -> Option<Vec<Packet>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.batch_buffer.is_empty() {
            inner.batch_started_at_ms = Some(crate::clock::now_ms());
        }
        inner.batch_buffer.push(packet);

        let size_hit = inner.batch_buffer.len() >= self.config.batch_size;
        let age_hit = inner
            .batch_started_at_ms
            .map(|start| crate::clock::now_ms() - start >= self.config.batch_timeout_ms)
            .unwrap_or(false);

        if size_hit || age_hit {
            Some(flush_locked(&mut inner))
        } else {
            None
        }
    }

    /// Check whether the batch buffer's age threshold has elapsed without
    /// adding a new packet — the non-blocking tick a single scheduler task
    /// can poll instead of running one thread per timer.
    pub fn check_batch_timeout(&self) -> Option<Vec<Packet>> {
        let mut inner = self.inner.lock().unwrap();
        let age_hit = inner
            .batch_started_at_ms
            .map(|start| crate::clock::now_ms() - start >= self.config.batch_timeout_ms)
            .unwrap_or(false);
        if age_hit {
            Some(flush_locked(&mut inner))
        } else {
            None
        }
    }

    /// Force-flush the batch buffer regardless of thresholds. `None` if empty.
    pub fn flush_all(&self) -> Option<Vec<Packet>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.batch_buffer.is_empty() {
            None
        } else {
            Some(flush_locked(&mut inner))
        }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }
}

fn flush_locked(inner: &mut Inner) -> Vec<Packet> {
    let batch_id = inner.next_batch_id;
    inner.next_batch_id += 1;
    let mut batch: Vec<Packet> = inner.batch_buffer.drain(..).collect();
    for packet in &mut batch {
        packet.header.flags |= flags::BATCHED;
        packet.header.batch_id = batch_id as u16;
    }
    inner.batch_started_at_ms = None;
    batch
}

/// Remove and return the queued entry with the numerically highest priority
/// value (i.e. lowest importance); `None` if the queue is empty. Rebuilds
/// the heap around the removed entry.
fn evict_lowest_importance(queue: &mut BinaryHeap<Reverse<QueueEntry>>) -> bool {
    if queue.is_empty() {
        return false;
    }
    let items: Vec<QueueEntry> = std::mem::take(queue).into_vec().into_iter().map(|r| r.0).collect();
    let evict_idx = items
        .iter()
        .enumerate()
        .max_by_key(|(_, e)| (e.key.priority, e.key.time_to_deadline_ms, e.key.enqueue_sequence))
        .map(|(idx, _)| idx);

    let Some(evict_idx) = evict_idx else {
        return false;
    };
    for (idx, entry) in items.into_iter().enumerate() {
        if idx != evict_idx {
            queue.push(Reverse(entry));
        }
    }
    true
}

impl Scheduler for DtpScheduler {
    fn enqueue(&self, packet: Packet) -> Result<(), DtpError> {
        let mut inner = self.inner.lock().unwrap();

        if inner.queue.len() >= self.config.queue_max {
            let is_low_droppable =
                packet.header.priority == Priority::Low && packet.header.flags & flags::DROPPABLE != 0;
            if is_low_droppable {
                inner.dropped_full += 1;
                return Err(DtpError::QueueFull);
            }
            evict_lowest_importance(&mut inner.queue);
            inner.dropped_full += 1;
        }

        let seq = inner.next_sequence;
        inner.next_sequence += 1;
        let key = self.queue_key_for(&packet, seq);
        inner.queue.push(Reverse(QueueEntry { key, packet }));
        inner.enqueued += 1;
        Ok(())
    }

    fn dequeue(&self) -> Option<Packet> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            let Reverse(entry) = inner.queue.pop()?;
            if entry.packet.header.is_expired() {
                inner.dropped_expired += 1;
                continue;
            }
            inner.dequeued += 1;
            return Some(entry.packet);
        }
    }

    fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.clear();
        inner.batch_buffer.clear();
        inner.batch_started_at_ms = None;
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

    fn set_congested(&self, congested: bool) {
        let mut inner = self.inner.lock().unwrap();
        if inner.congested == congested {
            return;
        }
        inner.congested = congested;
        inner.advisory_rate = if congested {
            (inner.advisory_rate * 0.5).max(self.config.min_advisory_rate)
        } else {
            (inner.advisory_rate * 1.2).min(self.config.max_advisory_rate)
        };
        info!(congested, advisory_rate = inner.advisory_rate, "scheduler congestion state changed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn data(priority: Priority, seq: u16, deadline_ms: u64) -> Packet {
        Packet::create_data(Bytes::new(), priority, seq, Some(deadline_ms))
    }

    // ─── Priority ordering ──────────────────────────────────────────────

    #[test]
    fn higher_priority_dequeues_first() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        sched.enqueue(data(Priority::Low, 1, 6000)).unwrap();
        sched.enqueue(data(Priority::High, 2, 1500)).unwrap();
        sched.enqueue(data(Priority::Critical, 3, 500)).unwrap();

        assert_eq!(sched.dequeue().unwrap().header.priority, Priority::Critical);
        assert_eq!(sched.dequeue().unwrap().header.priority, Priority::High);
        assert_eq!(sched.dequeue().unwrap().header.priority, Priority::Low);
        assert!(sched.dequeue().is_none());
    }

    // ─── EDF within a class ─────────────────────────────────────────────

    #[test]
    fn edf_orders_by_deadline_within_same_priority() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        sched.enqueue(data(Priority::Medium, 1, 1000)).unwrap();
        sched.enqueue(data(Priority::Medium, 2, 50)).unwrap();

        let first = sched.dequeue().unwrap();
        assert_eq!(first.header.deadline, 50);
        let second = sched.dequeue().unwrap();
        assert_eq!(second.header.deadline, 1000);
    }

    #[test]
    fn ties_break_by_arrival_order() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        sched.enqueue(data(Priority::Medium, 1, 1000)).unwrap();
        sched.enqueue(data(Priority::Medium, 2, 1000)).unwrap();
        assert_eq!(sched.dequeue().unwrap().header.sequence, 1);
        assert_eq!(sched.dequeue().unwrap().header.sequence, 2);
    }

    // ─── Expiry ─────────────────────────────────────────────────────────

    #[test]
    fn expired_packet_is_dropped_on_dequeue() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        let mut pkt = data(Priority::Medium, 1, 100);
        pkt.header.timestamp = (crate::clock::now_ms() - 2000) as u32;
        sched.enqueue(pkt).unwrap();

        assert!(sched.dequeue().is_none());
        assert_eq!(sched.stats().dropped_expired, 1);
    }

    // ─── Queue-full drop-lowest ─────────────────────────────────────────

    #[test]
    fn queue_full_evicts_lowest_importance() {
        let config = DtpSchedulerConfig {
            queue_max: 3,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        sched.enqueue(data(Priority::High, 1, 1500)).unwrap();
        sched.enqueue(data(Priority::Medium, 2, 3000)).unwrap();
        sched.enqueue(data(Priority::Low, 3, 6000)).unwrap();
        sched.enqueue(data(Priority::Critical, 4, 500)).unwrap();

        assert_eq!(sched.queue_size(), 3);
        let mut remaining = Vec::new();
        while let Some(pkt) = sched.dequeue() {
            remaining.push(pkt.header.priority);
        }
        assert_eq!(
            remaining,
            vec![Priority::Critical, Priority::High, Priority::Medium]
        );
        assert_eq!(sched.stats().dropped_full, 1);
    }

    #[test]
    fn queue_full_low_droppable_is_rejected_outright() {
        let config = DtpSchedulerConfig {
            queue_max: 1,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        sched.enqueue(data(Priority::Low, 1, 6000)).unwrap();

        let mut incoming = data(Priority::Low, 2, 6000);
        incoming.header.flags |= flags::DROPPABLE;
        let result = sched.enqueue(incoming);
        assert!(matches!(result, Err(DtpError::QueueFull)));
        assert_eq!(sched.queue_size(), 1);
        assert_eq!(sched.stats().dropped_full, 1);
    }

    // ─── Queue-size invariant ───────────────────────────────────────────

    #[test]
    fn queue_size_never_exceeds_max() {
        let config = DtpSchedulerConfig {
            queue_max: 5,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        for i in 0..50u16 {
            let _ = sched.enqueue(data(Priority::Medium, i, 3000));
            assert!(sched.queue_size() <= 5);
        }
    }

    // ─── Batching ───────────────────────────────────────────────────────

    #[test]
    fn batch_flushes_at_size_threshold() {
        let config = DtpSchedulerConfig {
            batch_size: 3,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        assert!(sched.add_to_batch(data(Priority::Medium, 1, 3000)).is_none());
        assert!(sched.add_to_batch(data(Priority::Medium, 2, 3000)).is_none());
        let flushed = sched.add_to_batch(data(Priority::Medium, 3, 3000));
        let batch = flushed.expect("size threshold should flush");
        assert_eq!(batch.len(), 3);
        let batch_id = batch[0].header.batch_id;
        assert!(batch_id >= 1);
        for pkt in &batch {
            assert_eq!(pkt.header.batch_id, batch_id);
            assert_ne!(pkt.header.flags & flags::BATCHED, 0);
        }
    }

    #[test]
    fn batch_ids_strictly_increase_across_flushes() {
        let config = DtpSchedulerConfig {
            batch_size: 1,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        let first = sched.add_to_batch(data(Priority::Medium, 1, 3000)).unwrap();
        let second = sched.add_to_batch(data(Priority::Medium, 2, 3000)).unwrap();
        assert!(second[0].header.batch_id > first[0].header.batch_id);
    }

    #[test]
    fn flush_all_forces_partial_batch_out() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        sched.add_to_batch(data(Priority::Medium, 1, 3000));
        let flushed = sched.flush_all().expect("partial batch should flush");
        assert_eq!(flushed.len(), 1);
        assert!(sched.flush_all().is_none());
    }

    // ─── Congestion signal ──────────────────────────────────────────────

    #[test]
    fn set_congested_true_halves_rate_with_floor() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        assert_eq!(sched.stats().advisory_rate, 500.0);
        sched.set_congested(true);
        assert_eq!(sched.stats().advisory_rate, 250.0);
    }

    #[test]
    fn set_congested_false_raises_rate_with_ceiling() {
        let config = DtpSchedulerConfig {
            initial_advisory_rate: 900.0,
            ..DtpSchedulerConfig::default()
        };
        let sched = DtpScheduler::new(config);
        sched.set_congested(true);
        sched.set_congested(false);
        assert!(sched.stats().advisory_rate <= 1000.0);
    }

    #[test]
    fn repeated_same_state_is_a_no_op() {
        let sched = DtpScheduler::new(DtpSchedulerConfig::default());
        sched.set_congested(true);
        let rate = sched.stats().advisory_rate;
        sched.set_congested(true);
        assert_eq!(sched.stats().advisory_rate, rate);
    }
}
