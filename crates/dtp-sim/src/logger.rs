//! On-disk JSONL experiment log: `config.jsonl`, `events.jsonl`,
//! `summary.jsonl` in one experiment directory, per the control-surface
//! design's persisted-log format.
//!
//! Events are buffered in memory and flushed in batches to amortize I/O;
//! all three files are flushed again on [`ExperimentLogger::close`].

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use dtp_transport::codec::Priority;

use crate::config::SimulationConfig;

const DEFAULT_BATCH_SIZE: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventLine {
    Sent { seq: u16, pri: Priority, deadline: u64, batch: u16, ts: i64 },
    Recv { seq: u16, pri: Priority, latency: i64, on_time: bool, ts: i64 },
    Drop { seq: u16, pri: Priority, reason: String, ts: i64 },
    Congestion { congested: bool, rate: f64, ts: i64 },
    #[serde(rename = "parameters")]
    Parameters { ts: i64, data: Value },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryLine {
    #[serde(rename = "type")]
    pub kind: String,
    pub experiment_id: String,
    pub end_timestamp: i64,
    pub duration_ms: i64,
    pub total_events: u64,
    pub stats: Value,
}

struct Writers {
    events: File,
    buffer: Vec<EventLine>,
    batch_size: usize,
    total_events: u64,
}

/// Owns one experiment directory's three JSONL files.
pub struct ExperimentLogger {
    dir: PathBuf,
    experiment_id: String,
    started_at_ms: i64,
    writers: Mutex<Writers>,
    closed: Mutex<bool>,
}

impl ExperimentLogger {
    /// Creates `dir` if needed and writes the `config.jsonl` header line.
    pub fn create(
        dir: impl Into<PathBuf>,
        experiment_id: impl Into<String>,
        config: &SimulationConfig,
        started_at_ms: i64,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut config_file = File::create(dir.join("config.jsonl"))?;
        serde_json::to_writer(&mut config_file, config)?;
        config_file.write_all(b"\n")?;
        config_file.flush()?;

        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("events.jsonl"))?;

        Ok(ExperimentLogger {
            dir,
            experiment_id: experiment_id.into(),
            started_at_ms,
            writers: Mutex::new(Writers {
                events,
                buffer: Vec::with_capacity(DEFAULT_BATCH_SIZE),
                batch_size: DEFAULT_BATCH_SIZE,
                total_events: 0,
            }),
            closed: Mutex::new(false),
        })
    }

    pub fn record(&self, event: EventLine) {
        let mut w = self.writers.lock().unwrap();
        w.buffer.push(event);
        w.total_events += 1;
        if w.buffer.len() >= w.batch_size {
            Self::flush_locked(&mut w);
        }
    }

    fn flush_locked(w: &mut Writers) {
        for event in w.buffer.drain(..) {
            if let Ok(line) = serde_json::to_string(&event) {
                let _ = writeln!(w.events, "{line}");
            }
        }
        let _ = w.events.flush();
    }

    pub fn flush(&self) {
        let mut w = self.writers.lock().unwrap();
        Self::flush_locked(&mut w);
    }

    /// Flush remaining events and write the terminal `summary.jsonl` line.
    /// Idempotent — a second call is a no-op.
    pub fn close(&self, end_timestamp_ms: i64, stats: Value) -> io::Result<()> {
        let mut closed = self.closed.lock().unwrap();
        if *closed {
            return Ok(());
        }
        self.flush();

        let total_events = self.writers.lock().unwrap().total_events;
        let summary = SummaryLine {
            kind: "summary".into(),
            experiment_id: self.experiment_id.clone(),
            end_timestamp: end_timestamp_ms,
            duration_ms: end_timestamp_ms - self.started_at_ms,
            total_events,
            stats,
        };
        let mut summary_file = File::create(self.dir.join("summary.jsonl"))?;
        serde_json::to_writer(&mut summary_file, &summary)?;
        summary_file.write_all(b"\n")?;
        summary_file.flush()?;

        *closed = true;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for ExperimentLogger {
    fn drop(&mut self) {
        // Best-effort: a logger dropped without an explicit close() still
        // shouldn't lose buffered events.
        self.flush();
    }
}

/// Reads back a completed experiment directory and recomputes simple
/// per-priority statistics from the raw event log, mirroring the analysis
/// helpers a standalone log reader would expose.
pub struct LogReader {
    pub config: SimulationConfig,
    pub events: Vec<EventLine>,
    pub summary: Option<SummaryLine>,
}

impl LogReader {
    pub fn open(dir: impl AsRef<Path>) -> io::Result<Self> {
        let dir = dir.as_ref();
        let config_text = fs::read_to_string(dir.join("config.jsonl"))?;
        let config: SimulationConfig = serde_json::from_str(config_text.lines().next().unwrap_or(""))
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let events_file = File::open(dir.join("events.jsonl"))?;
        let events = BufReader::new(events_file)
            .lines()
            .filter_map(|l| l.ok())
            .filter(|l| !l.trim().is_empty())
            .filter_map(|l| serde_json::from_str::<EventLine>(&l).ok())
            .collect();

        let summary = fs::read_to_string(dir.join("summary.jsonl"))
            .ok()
            .and_then(|text| text.lines().next().and_then(|l| serde_json::from_str(l).ok()));

        Ok(LogReader { config, events, summary })
    }

    /// Recomputed `(on_time_count, late_count)` for one priority class from
    /// the raw `recv` events — independent of whatever the live metrics
    /// collector reported, useful as a cross-check against a replayed log.
    pub fn on_time_split(&self, priority: Priority) -> (u64, u64) {
        let mut on_time = 0u64;
        let mut late = 0u64;
        for event in &self.events {
            if let EventLine::Recv { pri, on_time: ok, .. } = event {
                if *pri == priority {
                    if *ok {
                        on_time += 1;
                    } else {
                        late += 1;
                    }
                }
            }
        }
        (on_time, late)
    }
}
