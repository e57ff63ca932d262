use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::types::SensorPacket;

/// Seconds over which the fit cycle rate is averaged
const RATE_WINDOW_SECS: f64 = 2.0;

pub type SharedStatus = Arc<Mutex<ServerStatus>>;

/// Runtime counters and timing state of one server instance
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServerStatus {
    pub timestamp: f64,
    pub started_at: f64,
    pub port: Option<u16>,
    pub grammar: String,
    // Ingest
    pub datagrams_received: u64,
    pub packets_accepted: u64,
    pub decode_failures: u64,
    pub parse_failures: u64,
    pub bind_failures: u64,
    pub socket_errors: u64,
    pub packets_evicted: u64,
    pub buffer_len: usize,
    pub last_packet: Option<SensorPacket>,
    // Fitting
    pub fit_cycles: u64,
    pub fit_triggers: u64,
    pub last_fit_window: usize,
    pub last_fit_millis: f64,
    pub last_fit_converged: usize,
    pub cycles_per_sec: f64,
    #[serde(skip)]
    rate_window_start: f64,
    #[serde(skip)]
    rate_window_cycles: u64,
}

impl ServerStatus {
    pub fn new() -> Self {
        let now = current_timestamp();
        Self {
            timestamp: now,
            started_at: now,
            port: None,
            grammar: String::new(),
            datagrams_received: 0,
            packets_accepted: 0,
            decode_failures: 0,
            parse_failures: 0,
            bind_failures: 0,
            socket_errors: 0,
            packets_evicted: 0,
            buffer_len: 0,
            last_packet: None,
            fit_cycles: 0,
            fit_triggers: 0,
            last_fit_window: 0,
            last_fit_millis: 0.0,
            last_fit_converged: 0,
            cycles_per_sec: 0.0,
            rate_window_start: now,
            rate_window_cycles: 0,
        }
    }

    pub fn shared() -> SharedStatus {
        Arc::new(Mutex::new(Self::new()))
    }

    /// Record a completed fit cycle and refresh the averaged cycle rate
    pub fn record_fit_cycle(&mut self, window: usize, millis: f64, converged: usize) {
        self.record_fit_cycle_at(current_timestamp(), window, millis, converged);
    }

    pub fn record_fit_cycle_at(&mut self, now: f64, window: usize, millis: f64, converged: usize) {
        self.fit_cycles += 1;
        self.last_fit_window = window;
        self.last_fit_millis = millis;
        self.last_fit_converged = converged;
        self.rate_window_cycles += 1;

        let elapsed = now - self.rate_window_start;
        if elapsed > RATE_WINDOW_SECS {
            self.cycles_per_sec = self.rate_window_cycles as f64 / elapsed;
            self.rate_window_start = now;
            self.rate_window_cycles = 0;
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        (current_timestamp() - self.started_at).max(0.0)
    }

    /// One-line summary for periodic logging
    pub fn summary(&self) -> String {
        format!(
            "port {} | rx {} ok {} bad {}/{} | buffer {} | fits {} ({:.1}/s, last {:.2} ms, {}/9 converged)",
            self.port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string()),
            self.datagrams_received,
            self.packets_accepted,
            self.decode_failures,
            self.parse_failures,
            self.buffer_len,
            self.fit_cycles,
            self.cycles_per_sec,
            self.last_fit_millis,
            self.last_fit_converged,
        )
    }

    pub fn save(&self, path: impl AsRef<Path>) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new()
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_rate_over_window() {
        let mut status = ServerStatus::new();
        let start = status.rate_window_start;
        for i in 0..10 {
            status.record_fit_cycle_at(start + 0.2 * i as f64, 100, 1.0, 9);
        }
        assert_eq!(status.cycles_per_sec, 0.0);
        status.record_fit_cycle_at(start + 2.5, 100, 1.0, 9);
        assert!((status.cycles_per_sec - 11.0 / 2.5).abs() < 1e-9);
        assert_eq!(status.fit_cycles, 11);
    }

    #[test]
    fn test_save_roundtrip() {
        let mut status = ServerStatus::new();
        status.port = Some(5554);
        status.parse_failures = 3;
        let path = std::env::temp_dir().join(format!("racket_status_{}.json", std::process::id()));
        status.save(&path).unwrap();
        let loaded: ServerStatus =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.port, Some(5554));
        assert_eq!(loaded.parse_failures, 3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_summary_mentions_port() {
        let mut status = ServerStatus::new();
        assert!(status.summary().starts_with("port -"));
        status.port = Some(6000);
        assert!(status.summary().contains("6000"));
    }
}
