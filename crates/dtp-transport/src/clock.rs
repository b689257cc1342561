//! Monotonic millisecond time source and the process-wide clock-offset register.
//!
//! Header timestamps are always relative to this process's monotonic clock,
//! never to wall time. [`Clock`] is the injectable handle implementations
//! should prefer; the module-level functions back it with a single global
//! [`quanta::Clock`] plus an atomic offset register, kept for compatibility
//! with the on-the-wire timestamp semantics (§9 of the design notes).

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, OnceLock};

use quanta::{Clock as QuantaClock, Instant as QuantaInstant};

static CLOCK: OnceLock<QuantaClock> = OnceLock::new();
static REFERENCE: OnceLock<Mutex<QuantaInstant>> = OnceLock::new();
static CLOCK_OFFSET_MS: AtomicI64 = AtomicI64::new(0);

fn clock() -> &'static QuantaClock {
    CLOCK.get_or_init(QuantaClock::new)
}

fn reference() -> &'static Mutex<QuantaInstant> {
    REFERENCE.get_or_init(|| Mutex::new(clock().now()))
}

/// Current monotonic time in milliseconds since this process's reference point.
pub fn now_ms() -> i64 {
    let reference = *reference().lock().unwrap();
    clock().now().duration_since(reference).as_millis() as i64
}

/// Reset the monotonic reference to "now" — used at simulation start so a run's
/// timestamps begin near zero. Unlike a `OnceLock`-only reference, this can be
/// called repeatedly across the process's lifetime (e.g. once per simulation run).
pub fn reset_reference_time() {
    *reference().lock().unwrap() = clock().now();
}

/// Read the current process-wide clock offset (milliseconds), as last written
/// by a successful [`crate::clock_sync`] round.
pub fn global_clock_offset_ms() -> i64 {
    CLOCK_OFFSET_MS.load(Ordering::Acquire)
}

/// Overwrite the process-wide clock offset. Called only by the clock-sync
/// client on a successful sync.
pub fn set_global_clock_offset_ms(offset_ms: i64) {
    CLOCK_OFFSET_MS.store(offset_ms, Ordering::Release);
}

/// Adjust a remote timestamp into local time using the current offset.
pub fn adjust_remote_timestamp(remote_ts_ms: i64) -> i64 {
    remote_ts_ms + global_clock_offset_ms()
}

/// A small injectable clock handle, for code that would rather not touch the
/// global register directly (tests, anything constructing synthetic time).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Default [`Clock`] backed by the process-wide monotonic reference.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        now_ms()
    }
}
