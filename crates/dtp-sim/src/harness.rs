//! Synthetic traffic generator driving one [`dtp_transport`] scheduler +
//! admission + congestion stack end to end over real loopback UDP sockets,
//! feeding the shared [`MetricsCollector`] and (optionally) an
//! [`ExperimentLogger`].
//!
//! Four long-lived threads per run, matching the preemptive-multithreading
//! model the rest of the stack assumes: a traffic generator, a sender, a
//! sender-side feedback listener (ACKs and CONGESTION packets arriving
//! back), and a receiver. All communicate through the shared scheduler,
//! metrics collector, and atomics — never a channel — the same way the
//! wider design's sender/receiver/monitor tasks are specified to.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use serde_json::json;
use tracing::{debug, warn};

use dtp_transport::admission::AdmissionController;
use dtp_transport::clock;
use dtp_transport::codec::{flags, Packet, Priority};
use dtp_transport::congestion::CongestionController;
use dtp_transport::metrics::{ComparisonSummary, MetricsCollector, MetricsConfig, MetricsSnapshot};
use dtp_transport::receiver::{Receiver, ReceiverConfig, ReceiverEvent};
use dtp_transport::scheduler::dtp::DtpScheduler;
use dtp_transport::scheduler::fifo::{FifoScheduler, FifoSchedulerConfig};
use dtp_transport::scheduler::Scheduler;
use dtp_transport::sender::{DatagramSink, Sender};
use dtp_transport::udp::UdpTransport;

use crate::config::{Mode, SimulationConfig};
use crate::logger::{EventLine, ExperimentLogger};
use crate::loss::LossInjector;

/// Minimum time between generated packets, regardless of configured rate —
/// keeps a misconfigured `send_rate_pps` from spinning the generator thread.
const MIN_GENERATOR_INTERVAL_MS: u64 = 1;
/// How often the synthetic congestion signal, if enabled, is re-asserted.
const CONGESTION_SIGNAL_INTERVAL_MS: u64 = 2_000;

/// A [`dtp_transport::sender::DatagramSink`] decorator that drops datagrams
/// per a [`LossInjector`] before they ever reach the wire, and records the
/// drop against the shared metrics collector. Functionally indistinguishable
/// from loss in transit.
struct LossyTransport {
    inner: UdpTransport,
    injector: Mutex<LossInjector>,
    metrics: Arc<MetricsCollector>,
}

impl DatagramSink for LossyTransport {
    fn send_to(&self, data: &[u8], dest: std::net::SocketAddr) -> std::io::Result<()> {
        let drop = self.injector.lock().unwrap().should_drop(clock::now_ms());
        if drop {
            if let Ok(header) = dtp_transport::codec::DtpHeader::unpack(data) {
                self.metrics.record_dropped(header.priority, "network_loss");
            }
            return Ok(());
        }
        self.inner.send_to(data, dest)
    }
}

/// Final state returned once a run's threads have all joined.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub mode: Mode,
    pub snapshot: MetricsSnapshot,
    pub comparison: ComparisonSummary,
    pub duration_ms: i64,
}

/// One running (or completed) simulation. Cheap to clone — everything is
/// `Arc`-backed — so the control API can hand a handle to request handlers
/// while the driving threads keep running in the background.
#[derive(Clone)]
pub struct Simulation {
    config: SimulationConfig,
    metrics: Arc<MetricsCollector>,
    scheduler: Arc<dyn Scheduler>,
    congestion: Arc<CongestionController>,
    admission: Arc<AdmissionController>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    started_at_ms: i64,
    threads: Arc<Mutex<Vec<JoinHandle<()>>>>,
    logger: Option<Arc<ExperimentLogger>>,
}

impl Simulation {
    /// Binds two loopback sockets and spawns the generator/sender/feedback/
    /// receiver threads. Returns once everything is up; the run itself
    /// proceeds in the background until `total_packets()` have been
    /// generated and the scheduler drains, or [`Self::stop`] is called.
    pub fn start(
        config: SimulationConfig,
        logger: Option<Arc<ExperimentLogger>>,
    ) -> std::io::Result<Self> {
        clock::reset_reference_time();
        let started_at_ms = clock::now_ms();

        let metrics = Arc::new(MetricsCollector::new(MetricsConfig::default()));
        let admission = Arc::new(AdmissionController::new(config.admission));
        let congestion = Arc::new(CongestionController::new(config.congestion));
        let scheduler: Arc<dyn Scheduler> = match config.mode {
            Mode::Dtp => Arc::new(DtpScheduler::new(config.scheduler)),
            Mode::UdpRaw => Arc::new(FifoScheduler::new(FifoSchedulerConfig {
                queue_max: config.scheduler.queue_max,
            })),
        };

        let receiver_socket = UdpTransport::bind("127.0.0.1:0")?;
        let receiver_addr = receiver_socket.local_addr()?;
        let sender_socket = UdpTransport::bind("127.0.0.1:0")?;
        let sender_feedback_socket = sender_socket.try_clone()?;

        let running = Arc::new(AtomicBool::new(true));
        let paused = Arc::new(AtomicBool::new(false));
        let mut threads = Vec::new();

        let lossy = LossyTransport {
            inner: sender_socket,
            injector: Mutex::new(LossInjector::new(config.loss_model, config.seed)),
            metrics: metrics.clone(),
        };
        let sender = Arc::new(Sender::new(lossy, receiver_addr, congestion.clone(), metrics.clone()));

        // Receiver thread: unpack datagrams, drop expired, record metrics,
        // write ACKs back.
        {
            let receiver_socket = receiver_socket;
            let running = running.clone();
            let metrics = metrics.clone();
            let logger = logger.clone();
            let receiver = Receiver::new(
                ReceiverConfig { simulate_processing_latency: false },
                metrics,
            );
            threads.push(thread::spawn(move || {
                let mut buf = [0u8; 2048];
                while running.load(Ordering::Relaxed) {
                    match receiver_socket.recv(&mut buf) {
                        Ok(Some((n, from))) => {
                            for event in receiver.on_datagram(&buf[..n], from) {
                                match event {
                                    ReceiverEvent::Delivered(packet) => {
                                        if let Some(logger) = &logger {
                                            logger.record(EventLine::Recv {
                                                seq: packet.header.sequence,
                                                pri: packet.header.priority,
                                                latency: packet.latency_ms().unwrap_or(0),
                                                on_time: packet.is_on_time(),
                                                ts: clock::now_ms(),
                                            });
                                        }
                                    }
                                    ReceiverEvent::SendAck { bytes, to } => {
                                        if let Err(e) = receiver_socket.send_to(&bytes, to) {
                                            warn!(error = %e, "failed writing ack");
                                        }
                                    }
                                }
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "receiver socket error"),
                    }
                }
            }));
        }

        // Sender-feedback thread: ACK/CONGESTION packets arriving back at
        // the sender's own socket drive the congestion controller.
        {
            let running = running.clone();
            let sender = sender.clone();
            let scheduler = scheduler.clone();
            threads.push(thread::spawn(move || {
                let mut buf = [0u8; 64];
                while running.load(Ordering::Relaxed) {
                    match sender_feedback_socket.recv(&mut buf) {
                        Ok(Some((n, _from))) => {
                            if let Ok(packet) = Packet::deserialize(&buf[..n]) {
                                sender.on_feedback(&packet, &*scheduler);
                            }
                        }
                        Ok(None) => {}
                        Err(e) => warn!(error = %e, "sender feedback socket error"),
                    }
                    sender.tick(&*scheduler);
                }
            }));
        }

        // Sender thread: drain scheduler, pace, write datagrams.
        {
            let running = running.clone();
            let paused = paused.clone();
            let scheduler = scheduler.clone();
            let sender = sender.clone();
            let generation_done = Arc::new(AtomicBool::new(false));
            let generation_done_for_sender = generation_done.clone();
            let sender_handle = thread::spawn(move || loop {
                if paused.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                }
                match sender.try_send_one(&*scheduler) {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        if !running.load(Ordering::Relaxed)
                            && generation_done_for_sender.load(Ordering::Relaxed)
                            && scheduler.stats().queue_size == 0
                        {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                    Err(e) => {
                        debug!(error = %e, "sender loop error");
                        thread::sleep(Duration::from_millis(5));
                    }
                }
            });

            // Generator thread: emits packets per class, respecting
            // admission control, interleaved round-robin across classes.
            let running_gen = running.clone();
            let paused_gen = paused.clone();
            let admission_gen = admission.clone();
            let scheduler_gen = scheduler.clone();
            let metrics_gen = metrics.clone();
            let logger_gen = logger.clone();
            let sender_gen = sender.clone();
            let congestion_for_signal = congestion.clone();
            let cfg = config.clone();
            threads.push(thread::spawn(move || {
                let mut remaining = [
                    (Priority::Critical, cfg.critical_count),
                    (Priority::High, cfg.high_count),
                    (Priority::Medium, cfg.medium_count),
                    (Priority::Low, cfg.low_count),
                ];
                let interval_ms = if cfg.send_rate_pps > 0.0 {
                    ((1000.0 / cfg.send_rate_pps) as u64).max(MIN_GENERATOR_INTERVAL_MS)
                } else {
                    MIN_GENERATOR_INTERVAL_MS
                };
                let mut sequence: u16 = 0;
                let payload = Bytes::from(vec![0u8; cfg.payload_size]);

                // Optional synthetic congestion signal, held open for the
                // whole generation phase.
                if cfg.simulate_congestion {
                    let sender = sender_gen.clone();
                    let scheduler = scheduler_gen.clone();
                    let congestion = congestion_for_signal.clone();
                    let running = running_gen.clone();
                    let logger = logger_gen.clone();
                    let level = cfg.congestion_level;
                    thread::spawn(move || {
                        while running.load(Ordering::Relaxed) {
                            let signal = Packet::create_congestion(level);
                            sender.on_feedback(&signal, &*scheduler);
                            if let Some(logger) = &logger {
                                logger.record(EventLine::Congestion {
                                    congested: congestion.is_congested(),
                                    rate: congestion.rate(),
                                    ts: clock::now_ms(),
                                });
                            }
                            thread::sleep(Duration::from_millis(CONGESTION_SIGNAL_INTERVAL_MS));
                        }
                    });
                }

                loop {
                    if !running_gen.load(Ordering::Relaxed) {
                        break;
                    }
                    if paused_gen.load(Ordering::Relaxed) {
                        thread::sleep(Duration::from_millis(10));
                        continue;
                    }
                    let mut emitted_any = false;
                    for (priority, count) in remaining.iter_mut() {
                        if *count == 0 {
                            continue;
                        }
                        *count -= 1;
                        emitted_any = true;

                        if !admission_gen.admit(*priority) {
                            if let Some(logger) = &logger_gen {
                                logger.record(EventLine::Drop {
                                    seq: sequence,
                                    pri: *priority,
                                    reason: "admission_rejected".into(),
                                    ts: clock::now_ms(),
                                });
                            }
                            sequence = sequence.wrapping_add(1);
                            continue;
                        }

                        let seq_used = sequence;
                        let mut packet = Packet::create_data(
                            payload.clone(),
                            *priority,
                            seq_used,
                            Some(priority.default_deadline_ms()),
                        );
                        packet.header.flags |= flags::RELIABLE;
                        let deadline = packet.header.deadline;
                        sequence = sequence.wrapping_add(1);

                        match scheduler_gen.enqueue(packet) {
                            Ok(()) => {
                                if let Some(logger) = &logger_gen {
                                    logger.record(EventLine::Sent {
                                        seq: seq_used,
                                        pri: *priority,
                                        deadline,
                                        batch: 0,
                                        ts: clock::now_ms(),
                                    });
                                }
                            }
                            Err(_) => {
                                metrics_gen.record_dropped(*priority, "queue_full");
                                if let Some(logger) = &logger_gen {
                                    logger.record(EventLine::Drop {
                                        seq: seq_used,
                                        pri: *priority,
                                        reason: "queue_full".into(),
                                        ts: clock::now_ms(),
                                    });
                                }
                            }
                        }
                    }
                    if !emitted_any {
                        break;
                    }
                    thread::sleep(Duration::from_millis(interval_ms));
                }
                generation_done.store(true, Ordering::Relaxed);
            }));

            threads.push(sender_handle);
        }

        Ok(Simulation {
            config,
            metrics,
            scheduler,
            congestion,
            admission,
            running,
            paused,
            started_at_ms,
            threads: Arc::new(Mutex::new(threads)),
            logger,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Relaxed);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn congestion(&self) -> &Arc<CongestionController> {
        &self.congestion
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    /// Blocks until every driving thread has finished (generation exhausted
    /// and the scheduler drained, or [`Self::stop`] was called), closes the
    /// logger with a final summary, and returns the run's result.
    pub fn join(self) -> RunResult {
        self.running.store(false, Ordering::Relaxed);
        let handles = std::mem::take(&mut *self.threads.lock().unwrap());
        for handle in handles {
            let _ = handle.join();
        }
        let end_ms = clock::now_ms();
        let snapshot = self.metrics.snapshot();
        let comparison = self.metrics.comparison_summary();

        if let Some(logger) = &self.logger {
            let stats = json!({
                "comparison": comparison.per_class.iter().map(|c| json!({
                    "priority": c.priority,
                    "sent": c.sent,
                    "received": c.received,
                    "on_time_rate": c.on_time_rate,
                    "avg_latency_ms": c.avg_latency_ms,
                    "p95_latency_ms": c.p95_latency_ms,
                })).collect::<Vec<_>>(),
            });
            let _ = logger.close(end_ms, stats);
        }

        RunResult {
            mode: self.config.mode,
            snapshot,
            comparison,
            duration_ms: end_ms - self.started_at_ms,
        }
    }
}
