//! Per-class delivery metrics: aggregate counters, latency distributions,
//! rolling rings for dashboards, and a reduced comparison view for judging
//! scheduler variants against each other.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::Serialize;

use crate::clock;
use crate::codec::Priority;

const DEFAULT_RECENT_CAPACITY: usize = 100;
const DEFAULT_TIMESERIES_CAPACITY: usize = 200;
const DEFAULT_EVENT_CAPACITY: usize = 100;
const THROUGHPUT_WINDOW_MS: i64 = 1000;
const THROUGHPUT_REFRESH_MS: i64 = 100;
/// Below this many latency samples, p95/p99 fall back to the observed max
/// rather than interpolating a percentile from too few points.
const PERCENTILE_MIN_SAMPLES: usize = 20;

#[derive(Debug, Clone, Copy)]
pub struct MetricsConfig {
    pub recent_capacity: usize,
    pub timeseries_capacity: usize,
    pub event_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            recent_capacity: DEFAULT_RECENT_CAPACITY,
            timeseries_capacity: DEFAULT_TIMESERIES_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Raw per-class counters plus the latency samples they were computed from.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClassMetrics {
    pub total_sent: u64,
    pub received: u64,
    pub dropped: u64,
    pub on_time: u64,
    pub late: u64,
    #[serde(skip)]
    latencies: Vec<i64>,
}

impl ClassMetrics {
    pub fn delivery_rate(&self) -> f64 {
        if self.total_sent == 0 {
            0.0
        } else {
            self.received as f64 / self.total_sent as f64
        }
    }

    pub fn on_time_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            self.on_time as f64 / self.received as f64
        }
    }

    pub fn latency_mean_ms(&self) -> f64 {
        if self.latencies.is_empty() {
            0.0
        } else {
            self.latencies.iter().sum::<i64>() as f64 / self.latencies.len() as f64
        }
    }

    pub fn latency_median_ms(&self) -> f64 {
        percentile(&self.latencies, 0.50)
    }

    pub fn latency_p95_ms(&self) -> f64 {
        percentile(&self.latencies, 0.95)
    }

    pub fn latency_p99_ms(&self) -> f64 {
        percentile(&self.latencies, 0.99)
    }
}

/// Sorts a copy of `samples` and interpolates the given quantile. Falls back
/// to the maximum observed value when there are too few samples to trust a
/// tail percentile.
fn percentile(samples: &[i64], q: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    if sorted.len() < PERCENTILE_MIN_SAMPLES && q > 0.5 {
        return *sorted.last().unwrap() as f64;
    }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx] as f64
}

#[derive(Debug, Clone, Serialize)]
pub struct PacketSummary {
    pub priority: Priority,
    pub sequence: u16,
    pub latency_ms: i64,
    pub on_time: bool,
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventRecord {
    Received { priority: Priority, sequence: u16 },
    Dropped { priority: Priority, reason: String },
    Custom { label: String, detail: String },
}

fn class_index(priority: Priority) -> usize {
    match priority {
        Priority::Critical => 0,
        Priority::High => 1,
        Priority::Medium => 2,
        Priority::Low => 3,
    }
}

struct Inner {
    classes: [ClassMetrics; 4],
    recent: VecDeque<PacketSummary>,
    timeseries: [VecDeque<(u64, i64)>; 4],
    events: VecDeque<EventRecord>,
    received_since_sample: [u8; 4],
    throughput_samples: VecDeque<i64>,
    throughput_cached: f64,
    throughput_last_refresh_ms: i64,
}

/// Single-lock metrics sink. All operations are O(1) except the on-demand
/// percentile calculations, which sort a clone of the latency samples.
pub struct MetricsCollector {
    config: MetricsConfig,
    start_ms: i64,
    inner: Mutex<Inner>,
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        MetricsCollector {
            start_ms: clock::now_ms(),
            inner: Mutex::new(Inner {
                classes: Default::default(),
                recent: VecDeque::with_capacity(config.recent_capacity),
                timeseries: Default::default(),
                events: VecDeque::with_capacity(config.event_capacity),
                received_since_sample: [0; 4],
                throughput_samples: VecDeque::new(),
                throughput_cached: 0.0,
                throughput_last_refresh_ms: 0,
            }),
            config,
        }
    }

    pub fn record_sent(&self, priority: Priority) {
        let mut inner = self.inner.lock().unwrap();
        inner.classes[class_index(priority)].total_sent += 1;
        inner.throughput_samples.push_back(clock::now_ms());
    }

    pub fn record_received(&self, priority: Priority, sequence: u16, latency_ms: i64, on_time: bool) {
        let mut inner = self.inner.lock().unwrap();
        let idx = class_index(priority);
        {
            let class = &mut inner.classes[idx];
            class.received += 1;
            if on_time {
                class.on_time += 1;
            } else {
                class.late += 1;
            }
            class.latencies.push(latency_ms);
        }

        let elapsed_ms = (clock::now_ms() - self.start_ms).max(0) as u64;
        push_capped(&mut inner.timeseries[idx], (elapsed_ms, latency_ms), self.config.timeseries_capacity);

        push_capped(
            &mut inner.recent,
            PacketSummary {
                priority,
                sequence,
                latency_ms,
                on_time,
                timestamp_ms: clock::now_ms(),
            },
            self.config.recent_capacity,
        );

        // Received events are high-volume; sample 1-in-10 into the event ring.
        inner.received_since_sample[idx] = inner.received_since_sample[idx].wrapping_add(1);
        if inner.received_since_sample[idx] % 10 == 0 {
            let cap = self.config.event_capacity;
            push_capped(&mut inner.events, EventRecord::Received { priority, sequence }, cap);
        }
    }

    pub fn record_dropped(&self, priority: Priority, reason: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.classes[class_index(priority)].dropped += 1;
        let cap = self.config.event_capacity;
        push_capped(
            &mut inner.events,
            EventRecord::Dropped { priority, reason: reason.into() },
            cap,
        );
    }

    pub fn record_custom_event(&self, label: impl Into<String>, detail: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        let cap = self.config.event_capacity;
        push_capped(
            &mut inner.events,
            EventRecord::Custom { label: label.into(), detail: detail.into() },
            cap,
        );
    }

    /// Packets/sec sent over the trailing one-second window, refreshed at
    /// most once every 100 ms — callers polling faster than that get the
    /// cached value rather than re-scanning the sample deque each time.
    pub fn throughput(&self) -> f64 {
        let mut inner = self.inner.lock().unwrap();
        let now = clock::now_ms();
        if now - inner.throughput_last_refresh_ms < THROUGHPUT_REFRESH_MS {
            return inner.throughput_cached;
        }
        let cutoff = now - THROUGHPUT_WINDOW_MS;
        while matches!(inner.throughput_samples.front(), Some(&t) if t < cutoff) {
            inner.throughput_samples.pop_front();
        }
        inner.throughput_cached = inner.throughput_samples.len() as f64 * 1000.0 / THROUGHPUT_WINDOW_MS as f64;
        inner.throughput_last_refresh_ms = now;
        inner.throughput_cached
    }

    pub fn class_metrics(&self, priority: Priority) -> ClassMetrics {
        self.inner.lock().unwrap().classes[class_index(priority)].clone()
    }

    pub fn recent_packets(&self) -> Vec<PacketSummary> {
        self.inner.lock().unwrap().recent.iter().cloned().collect()
    }

    pub fn timeseries(&self, priority: Priority) -> Vec<(u64, i64)> {
        self.inner.lock().unwrap().timeseries[class_index(priority)]
            .iter()
            .cloned()
            .collect()
    }

    pub fn events(&self) -> Vec<EventRecord> {
        self.inner.lock().unwrap().events.iter().cloned().collect()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let classes = {
            let inner = self.inner.lock().unwrap();
            inner.classes.clone()
        };
        MetricsSnapshot {
            critical: classes[0].clone(),
            high: classes[1].clone(),
            medium: classes[2].clone(),
            low: classes[3].clone(),
            throughput_pps: self.throughput(),
        }
    }

    /// Reduces the full stats table to the handful of fields used when
    /// comparing scheduler variants or experiment runs side by side.
    pub fn comparison_summary(&self) -> ComparisonSummary {
        let inner = self.inner.lock().unwrap();
        let per_class = Priority::ALL.map(|p| {
            let class = &inner.classes[class_index(p)];
            ClassComparisonEntry {
                priority: p,
                sent: class.total_sent,
                received: class.received,
                on_time_rate: class.on_time_rate(),
                avg_latency_ms: class.latency_mean_ms(),
                p95_latency_ms: class.latency_p95_ms(),
            }
        });
        ComparisonSummary { per_class: per_class.to_vec() }
    }
}

fn push_capped<T>(ring: &mut VecDeque<T>, item: T, capacity: usize) {
    if ring.len() >= capacity {
        ring.pop_front();
    }
    ring.push_back(item);
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub critical: ClassMetrics,
    pub high: ClassMetrics,
    pub medium: ClassMetrics,
    pub low: ClassMetrics,
    pub throughput_pps: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClassComparisonEntry {
    pub priority: Priority,
    pub sent: u64,
    pub received: u64,
    pub on_time_rate: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComparisonSummary {
    pub per_class: Vec<ClassComparisonEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sent_and_received_counted_independently_per_class() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        collector.record_sent(Priority::Critical);
        collector.record_sent(Priority::Low);
        collector.record_received(Priority::Critical, 1, 10, true);

        let critical = collector.class_metrics(Priority::Critical);
        assert_eq!(critical.total_sent, 1);
        assert_eq!(critical.received, 1);
        let low = collector.class_metrics(Priority::Low);
        assert_eq!(low.total_sent, 1);
        assert_eq!(low.received, 0);
    }

    #[test]
    fn delivery_and_on_time_rates() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for i in 0..10u16 {
            collector.record_sent(Priority::High);
            collector.record_received(Priority::High, i, 5, i < 8);
        }
        let high = collector.class_metrics(Priority::High);
        assert_eq!(high.delivery_rate(), 1.0);
        assert!((high.on_time_rate() - 0.8).abs() < 1e-9);
    }

    #[test]
    fn percentile_falls_back_to_max_under_minimum_sample_count() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for i in 0..5u16 {
            collector.record_sent(Priority::Medium);
            collector.record_received(Priority::Medium, i, (i as i64 + 1) * 10, true);
        }
        let medium = collector.class_metrics(Priority::Medium);
        assert_eq!(medium.latency_p95_ms(), 50.0);
        assert_eq!(medium.latency_p99_ms(), 50.0);
    }

    #[test]
    fn percentile_interpolates_with_enough_samples() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for i in 0..100u16 {
            collector.record_sent(Priority::Low);
            collector.record_received(Priority::Low, i, i as i64, true);
        }
        let low = collector.class_metrics(Priority::Low);
        assert!((low.latency_p95_ms() - 95.0).abs() < 1.0);
    }

    #[test]
    fn dropped_packets_recorded_with_reason() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        collector.record_dropped(Priority::Low, "queue_full");
        assert_eq!(collector.class_metrics(Priority::Low).dropped, 1);
        let events = collector.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], EventRecord::Dropped { reason, .. } if reason == "queue_full"));
    }

    #[test]
    fn received_events_are_sampled_one_in_ten() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for i in 0..30u16 {
            collector.record_received(Priority::Critical, i, 1, true);
        }
        let received_events = collector
            .events()
            .into_iter()
            .filter(|e| matches!(e, EventRecord::Received { .. }))
            .count();
        assert_eq!(received_events, 3);
    }

    #[test]
    fn recent_ring_is_capped() {
        let config = MetricsConfig { recent_capacity: 5, ..MetricsConfig::default() };
        let collector = MetricsCollector::new(config);
        for i in 0..20u16 {
            collector.record_received(Priority::Medium, i, 1, true);
        }
        assert_eq!(collector.recent_packets().len(), 5);
        // Oldest entries are evicted first.
        assert_eq!(collector.recent_packets().first().unwrap().sequence, 15);
    }

    #[test]
    fn timeseries_ring_is_capped_per_class() {
        let config = MetricsConfig { timeseries_capacity: 3, ..MetricsConfig::default() };
        let collector = MetricsCollector::new(config);
        for i in 0..10u16 {
            collector.record_received(Priority::High, i, i as i64, true);
        }
        assert_eq!(collector.timeseries(Priority::High).len(), 3);
    }

    #[test]
    fn comparison_summary_covers_all_classes() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        collector.record_sent(Priority::Critical);
        collector.record_received(Priority::Critical, 1, 20, true);
        let summary = collector.comparison_summary();
        assert_eq!(summary.per_class.len(), 4);
        let critical_entry = summary
            .per_class
            .iter()
            .find(|c| c.priority == Priority::Critical)
            .unwrap();
        assert_eq!(critical_entry.sent, 1);
        assert_eq!(critical_entry.received, 1);
        assert!((critical_entry.avg_latency_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn throughput_counts_recent_sends() {
        let collector = MetricsCollector::new(MetricsConfig::default());
        for _ in 0..5 {
            collector.record_sent(Priority::Medium);
        }
        assert!(collector.throughput() > 0.0);
    }
}
