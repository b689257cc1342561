//! Experiment configuration shared by the simulation harness and the
//! control API: the same struct is what `POST /simulation/start` deserializes
//! from JSON and what [`crate::logger::ExperimentLogger`] writes as the first
//! line of `config.jsonl`.

use serde::{Deserialize, Serialize};

use dtp_transport::admission::AdmissionConfig;
use dtp_transport::congestion::CongestionConfig;
use dtp_transport::scheduler::dtp::DtpSchedulerConfig;

/// Which scheduler stack a run drives traffic through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The deadline-aware priority scheduler under test.
    Dtp,
    /// The FIFO baseline, for side-by-side comparison.
    UdpRaw,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Dtp => "dtp",
            Mode::UdpRaw => "udp_raw",
        }
    }
}

/// Network loss applied on the receive path, independent of any real socket
/// loss — lets a run exercise the drop-and-recover paths deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LossModel {
    None,
    Uniform { rate: f64 },
    Bursty { rate: f64, burst_duration_ms: u64 },
}

impl Default for LossModel {
    fn default() -> Self {
        LossModel::None
    }
}

/// One experiment's full configuration. Matches the `POST /simulation/start`
/// request body (§6 of the design) plus the fields `config.jsonl` records
/// that aren't part of that request (seed, scheduler type, rates, notes).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub mode: Mode,
    pub critical_count: u32,
    pub high_count: u32,
    pub medium_count: u32,
    pub low_count: u32,
    pub simulate_congestion: bool,
    pub congestion_level: f32,

    /// Payload size, in bytes, of every synthetic DATA packet.
    pub payload_size: usize,
    /// Packets per second generated per class, before admission control.
    pub send_rate_pps: f64,
    /// Deterministic seed for the loss model and send-rate jitter.
    pub seed: u64,
    pub loss_model: LossModel,
    /// Free-text annotation carried through to `config.jsonl`.
    pub notes: String,

    pub scheduler: DtpSchedulerConfig,
    pub admission: AdmissionConfig,
    pub congestion: CongestionConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            mode: Mode::Dtp,
            critical_count: 50,
            high_count: 100,
            medium_count: 150,
            low_count: 200,
            simulate_congestion: false,
            congestion_level: 0.0,
            payload_size: 256,
            send_rate_pps: 200.0,
            seed: 0,
            loss_model: LossModel::None,
            notes: String::new(),
            scheduler: DtpSchedulerConfig::default(),
            admission: AdmissionConfig::default(),
            congestion: CongestionConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn total_packets(&self) -> u32 {
        self.critical_count + self.high_count + self.medium_count + self.low_count
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let cfg = SimulationConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: SimulationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.mode, cfg.mode);
        assert_eq!(back.total_packets(), cfg.total_packets());
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let back: SimulationConfig =
            serde_json::from_str(r#"{"mode":"udp_raw","critical_count":5}"#).unwrap();
        assert_eq!(back.mode, Mode::UdpRaw);
        assert_eq!(back.critical_count, 5);
        assert_eq!(back.high_count, SimulationConfig::default().high_count);
    }

    #[test]
    fn loads_from_toml() {
        let toml_text = r#"
            mode = "dtp"
            critical_count = 1
            high_count = 2
            medium_count = 3
            low_count = 4
            simulate_congestion = false
            congestion_level = 0.0
            payload_size = 64
            send_rate_pps = 50.0
            seed = 7
            notes = "smoke test"

            [loss_model]
            kind = "uniform"
            rate = 0.01
        "#;
        let cfg = SimulationConfig::from_toml(toml_text).unwrap();
        assert_eq!(cfg.total_packets(), 10);
        assert_eq!(cfg.loss_model, LossModel::Uniform { rate: 0.01 });
    }
}
