//! Tunable limits for an analysis run.
//!
//! Every field has a default, so a config file only needs the values it overrides.
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;
use super::error::AnalyserError;

/// Longest allowed wait for a single reverse-name lookup.
pub const MAX_LOOKUP_TIMEOUT_MS: u64 = 1000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatThresholds {
    /// Distinct destination ports from one source to one destination.
    pub port_scan_ports: usize,
    /// Transport-labelled packets from one source.
    pub flood_packets: usize,
    /// Attempts from one source against one login service.
    pub brute_force_attempts: usize,
    /// Cumulative payload bytes from one source.
    pub exfiltration_bytes: u64,
    pub dns_query_count: usize,
    pub dns_query_length: usize,
    pub large_packet_bytes: u64,
    /// Fraction of packets above `large_packet_bytes`, in `0.0..=1.0`.
    pub large_packet_ratio: f64,
    pub icmp_share_percent: f64,
}

impl Default for ThreatThresholds {
    fn default() -> Self {
        Self {
            port_scan_ports: 5,
            flood_packets: 30,
            brute_force_attempts: 10,
            exfiltration_bytes: 5 * 1024 * 1024,
            dns_query_count: 50,
            dns_query_length: 50,
            large_packet_bytes: 1000,
            large_packet_ratio: 0.8,
            icmp_share_percent: 30.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub thresholds: ThreatThresholds,
    pub top_addresses: usize,
    pub top_ports: usize,
    pub max_timeline_buckets: usize,
    pub flow_sample_size: usize,
    pub packet_sample_size: usize,
    pub lookup_timeout_ms: u64,
    pub resolve_names: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            thresholds: ThreatThresholds::default(),
            top_addresses: 10,
            top_ports: 15,
            max_timeline_buckets: 100,
            flow_sample_size: 10,
            packet_sample_size: 100,
            lookup_timeout_ms: MAX_LOOKUP_TIMEOUT_MS,
            resolve_names: true,
        }
    }
}

impl AnalysisConfig {
    /// Reads a JSON config file. Keys that are left out keep their defaults.
    pub fn from_file(path: &str) -> Result<Self, AnalyserError> {
        log::info!("Loading config from {path}");
        let raw = fs::read_to_string(path).map_err(|source| AnalyserError::ConfigRead {
            path: path.to_string(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| AnalyserError::ConfigParse {
            path: path.to_string(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Lookup timeout, capped at [MAX_LOOKUP_TIMEOUT_MS].
    pub fn lookup_timeout(&self) -> Duration {
        if self.lookup_timeout_ms > MAX_LOOKUP_TIMEOUT_MS {
            log::warn!(
                "Lookup timeout of {}ms exceeds the {}ms cap.",
                self.lookup_timeout_ms,
                MAX_LOOKUP_TIMEOUT_MS
            );
        }
        Duration::from_millis(self.lookup_timeout_ms.min(MAX_LOOKUP_TIMEOUT_MS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = AnalysisConfig::from_json(
            r#"{ "top_ports": 5, "thresholds": { "port_scan_ports": 20 } }"#,
        )
        .unwrap();

        assert_eq!(config.top_ports, 5);
        assert_eq!(config.top_addresses, 10);
        assert_eq!(config.thresholds.port_scan_ports, 20);
        assert_eq!(config.thresholds.flood_packets, 30);
        assert_eq!(config.max_timeline_buckets, 100);
    }

    #[test]
    fn lookup_timeout_is_capped() {
        let config = AnalysisConfig {
            lookup_timeout_ms: 30_000,
            ..Default::default()
        };
        assert_eq!(config.lookup_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = AnalysisConfig::from_file("/nonexistent/pcapsight.json").unwrap_err();
        assert!(matches!(err, AnalyserError::ConfigRead { .. }));
    }
}
