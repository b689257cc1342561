//! # dtp-transport
//!
//! Deadline-aware Transport Protocol — a connectionless, datagram-based
//! transport that orders, paces, and (when necessary) drops mixed-priority
//! traffic so that higher-priority and nearer-deadline messages win scarce
//! capacity under congestion.
//!
//! ## Crate structure
//!
//! - [`codec`] — wire format: header pack/unpack, packet constructors
//! - [`clock`] — monotonic millisecond time source, process-wide offset
//! - [`clock_sync`] — three-timestamp handshake for offset/RTT estimation
//! - [`token_bucket`] — refill-on-read rate limiter with burst
//! - [`admission`] — per-class token buckets guarding ingress
//! - [`congestion`] — AIMD congestion control over a pacing bucket
//! - [`scheduler`] — deadline-aware priority queue and FIFO baseline
//! - [`metrics`] — per-class counters, latency distributions, time series
//! - [`sender`] — drains the scheduler, paces, emits datagrams
//! - [`receiver`] — parses datagrams, drops expired packets, records metrics
//! - [`udp`] — thin UDP-backed implementation of the sender/receiver boundary
//! - [`error`] — crate-wide error type

pub mod admission;
pub mod clock;
pub mod clock_sync;
pub mod codec;
pub mod congestion;
pub mod error;
pub mod metrics;
pub mod receiver;
pub mod scheduler;
pub mod sender;
pub mod token_bucket;
pub mod udp;

pub use error::{DtpError, Result};
