//! Shared application state: exactly one simulation host per process, per
//! the design's stated scope — no multi-tenant persistence layer here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;

use dtp_sim::{RunResult, Simulation, SimulationConfig};
use dtp_transport::metrics::ComparisonSummary;

/// One entry in the `/comparison` table: a completed run's reduced stats,
/// keyed by mode so the dashboard can plot DTP against the FIFO baseline.
#[derive(Debug, Clone, Serialize)]
pub struct ComparisonEntry {
    pub mode: String,
    pub duration_ms: i64,
    pub comparison: ComparisonSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
}

struct Inner {
    /// The in-flight simulation, if any. Taken out and joined on stop.
    current: Option<Simulation>,
    run_state: RunState,
    last_result: Option<RunResult>,
    comparisons: HashMap<String, ComparisonEntry>,
}

/// State shared across all request handlers. Cheap to clone — everything
/// meaningful lives behind the one internal lock plus a broadcast channel.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<Mutex<Inner>>,
    metrics_tx: broadcast::Sender<String>,
}

impl Default for AppState {
    fn default() -> Self {
        let (metrics_tx, _) = broadcast::channel(64);
        AppState {
            inner: Arc::new(Mutex::new(Inner {
                current: None,
                run_state: RunState::Idle,
                last_result: None,
                comparisons: HashMap::new(),
            })),
            metrics_tx,
        }
    }
}

impl AppState {
    pub fn subscribe_metrics(&self) -> broadcast::Receiver<String> {
        self.metrics_tx.subscribe()
    }

    pub fn broadcast_metrics(&self, payload: String) {
        let _ = self.metrics_tx.send(payload);
    }

    pub fn run_state(&self) -> RunState {
        self.inner.lock().unwrap().run_state
    }

    /// Starts a new simulation, replacing any prior one in the "idle"
    /// terminal state. Returns an error string if a run is already active.
    pub fn start(&self, config: SimulationConfig) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        if inner.current.is_some() {
            return Err("a simulation is already running".into());
        }
        let sim = Simulation::start(config, None).map_err(|e| e.to_string())?;
        inner.current = Some(sim);
        inner.run_state = RunState::Running;
        Ok(())
    }

    pub fn pause(&self) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.current {
            Some(sim) => {
                sim.pause();
                inner.run_state = RunState::Paused;
                Ok(())
            }
            None => Err("no simulation is running".into()),
        }
    }

    pub fn resume(&self) -> Result<(), String> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.current {
            Some(sim) => {
                sim.resume();
                inner.run_state = RunState::Running;
                Ok(())
            }
            None => Err("no simulation is running".into()),
        }
    }

    /// Stops the active run (if any), joins its threads, records the result
    /// for `/simulation/results` and `/comparison`, and returns to idle.
    pub fn stop(&self) -> Result<(), String> {
        let sim = {
            let mut inner = self.inner.lock().unwrap();
            inner.current.take()
        };
        let Some(sim) = sim else {
            return Err("no simulation is running".into());
        };
        sim.stop();
        let result = sim.join();

        let mut inner = self.inner.lock().unwrap();
        inner.run_state = RunState::Idle;
        inner.comparisons.insert(
            result.mode.as_str().to_string(),
            ComparisonEntry {
                mode: result.mode.as_str().to_string(),
                duration_ms: result.duration_ms,
                comparison: result.comparison.clone(),
            },
        );
        inner.last_result = Some(result);
        Ok(())
    }

    /// Current metrics snapshot, whether or not a run is active — `None`
    /// only if nothing has ever run.
    pub fn status_snapshot(&self) -> Option<dtp_transport::metrics::MetricsSnapshot> {
        let inner = self.inner.lock().unwrap();
        inner.current.as_ref().map(|sim| sim.status())
    }

    pub fn last_result(&self) -> Option<RunResult> {
        self.inner.lock().unwrap().last_result.clone()
    }

    pub fn comparisons(&self) -> HashMap<String, ComparisonEntry> {
        self.inner.lock().unwrap().comparisons.clone()
    }

    pub fn clear_comparisons(&self) {
        self.inner.lock().unwrap().comparisons.clear();
    }
}
