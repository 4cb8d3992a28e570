use serde::Serialize;
use std::sync::Arc;
use super::config::AnalysisConfig;
use super::containers::{PacketRecord, ThreatRecord};
use super::enrich::NameResolver;
use super::flows::{group_flows, summarize_flows, FlowSummary};
use super::graph::{build_graph, NetworkGraph};
use super::risk::{score_threats, RiskAssessment, SeverityCount};
use super::scan::{detect_threats, scan_for_cleartext, CleartextNotice};
use super::stats::{compute_statistics, CaptureStatistics};
use super::timeline::{build_timeline, Timeline};
use super::utils::isolate;

/// Everything derived from one capture. Built fresh per run and owned by the caller.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub total_packets: usize,
    pub statistics: CaptureStatistics,
    pub flow_count: usize,
    /// Leading flows by first packet, bounded by the configured sample size.
    pub flows: Vec<FlowSummary>,
    /// Leading packets, bounded by the configured sample size.
    pub packets: Vec<PacketRecord>,
    pub network_graph: NetworkGraph,
    pub timeline: Timeline,
    pub threats: Vec<ThreatRecord>,
    /// Plaintext-service traffic, reported alongside the threats but never scored.
    pub cleartext_traffic: Vec<CleartextNotice>,
    pub risk_score: u32,
    pub severity_count: SeverityCount,
}

/// Runs the whole pipeline over one decoded capture.
///
/// Never fails: a stage that cannot complete contributes its empty value and the rest of the
/// report is still produced. An empty capture gives an all-empty result.
pub fn analyse(packets: &[PacketRecord], config: &AnalysisConfig, resolver: &Arc<dyn NameResolver>) -> AnalysisResult {
    log::info!("Starting analysis of {} packets.", packets.len());

    let flows = isolate("flows", || summarize_flows(&group_flows(packets)));
    let statistics = isolate("statistics", || compute_statistics(packets, config.top_addresses, config.top_ports));
    let network_graph = isolate("graph", || build_graph(packets));
    let timeline = isolate("timeline", || build_timeline(packets, config.max_timeline_buckets));

    let threats = isolate("threats", || {
        detect_threats(packets, &statistics, &config.thresholds, resolver, config.lookup_timeout())
    });
    let cleartext_traffic = isolate("cleartext", || scan_for_cleartext(packets));
    let RiskAssessment { risk_score, severity_count } = isolate("risk", || score_threats(&threats));

    log::info!("Analysis complete, risk score {risk_score}.");

    AnalysisResult {
        total_packets: packets.len(),
        statistics,
        flow_count: flows.len(),
        flows: flows.into_iter().take(config.flow_sample_size).collect(),
        packets: packets.iter().take(config.packet_sample_size).cloned().collect(),
        network_graph,
        timeline,
        threats,
        cleartext_traffic,
        risk_score,
        severity_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::containers::TransportProtocol;
    use crate::analyser::enrich::NoResolver;
    use pretty_assertions::assert_eq;

    fn resolver() -> Arc<dyn NameResolver> {
        Arc::new(NoResolver)
    }

    #[test]
    fn empty_capture_is_not_an_error() {
        let result = analyse(&[], &AnalysisConfig::default(), &resolver());
        assert_eq!(result, AnalysisResult::default());
    }

    #[test]
    fn samples_are_bounded() {
        let packets: Vec<PacketRecord> = (0..20)
            .map(|i| {
                PacketRecord::new(i, i as f64, 100)
                    .with_addrs("10.0.0.1", &format!("10.0.1.{i}"))
                    .with_protocol(TransportProtocol::Udp)
            })
            .collect();
        let config = AnalysisConfig {
            flow_sample_size: 3,
            packet_sample_size: 5,
            ..Default::default()
        };
        let result = analyse(&packets, &config, &resolver());

        assert_eq!(result.flow_count, 20);
        assert_eq!(result.flows.len(), 3);
        assert_eq!(result.flows[0].first_index, 0);
        assert_eq!(result.packets.len(), 5);
        assert_eq!(result.total_packets, 20);
        assert_eq!(result.statistics.total_bytes, 2000);
    }

    #[test]
    fn cleartext_notices_do_not_raise_risk() {
        let packets: Vec<PacketRecord> = (0..4)
            .map(|i| {
                PacketRecord::new(i, i as f64, 100)
                    .with_addrs("10.0.0.1", "10.0.0.2")
                    .with_ports(40000, 23)
                    .with_protocol(TransportProtocol::Tcp)
            })
            .collect();
        let result = analyse(&packets, &AnalysisConfig::default(), &resolver());

        assert_eq!(result.cleartext_traffic.len(), 1);
        assert_eq!(result.cleartext_traffic[0].packet_count, 4);
        assert!(result.threats.is_empty());
        assert_eq!(result.risk_score, 0);
    }
}
