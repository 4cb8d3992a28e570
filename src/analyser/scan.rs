//! Heuristic threat rules.
//!
//! Each `scan_for_*` rule reads the packets (and, where needed, the capture statistics) and
//! returns its own findings. Rules share no state, so they can run in any order.
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use super::config::ThreatThresholds;
use super::containers::{PacketRecord, Severity, Threat, ThreatRecord, TransportProtocol};
use super::enrich::{enrich_threats, NameResolver};
use super::stats::CaptureStatistics;
use super::utils::{
    isolate, percentage, round2, service_name, FirstSeenCounter, BRUTE_FORCE_PORTS, BYTES_PER_MB, CLEARTEXT_PORTS,
    SUSPICIOUS_PORTS,
};

/// Sample ports listed on a port-scan finding.
const PORT_SCAN_SAMPLE: usize = 10;
/// Over-long queries listed on a DNS anomaly finding.
const LONG_QUERY_SAMPLE: usize = 3;

/// Traffic to a plaintext service. Informational only, it does not count toward the risk score.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CleartextNotice {
    pub port: u16,
    pub service: String,
    pub packet_count: usize,
    pub description: String,
}

type Rule = fn(&[PacketRecord], &CaptureStatistics, &ThreatThresholds) -> Vec<ThreatRecord>;

/// The full battery, in reporting order.
const RULES: [(&str, Rule); 9] = [
    ("port_scan", scan_for_port_scan as Rule),
    ("syn_flood", scan_for_flood as Rule),
    ("brute_force", scan_for_brute_force as Rule),
    ("suspicious_port", scan_for_suspicious_ports as Rule),
    ("data_exfiltration", scan_for_exfiltration as Rule),
    ("dns_volume", scan_for_dns_volume as Rule),
    ("dns_query_length", scan_for_long_queries as Rule),
    ("traffic_volume", scan_for_large_packets as Rule),
    ("protocol_share", scan_for_icmp_share as Rule),
];

/// Runs every rule, then resolves threat sources to host names.
///
/// A rule that fails contributes nothing; the others still report. Name resolution runs
/// after the battery and cannot drop findings.
pub fn detect_threats(
    packets: &[PacketRecord],
    stats: &CaptureStatistics,
    thresholds: &ThreatThresholds,
    resolver: &Arc<dyn NameResolver>,
    lookup_timeout: Duration,
) -> Vec<ThreatRecord> {
    log::info!("Scanning for threats.");
    let mut threats = run_rules(packets, stats, thresholds);
    log::info!("Found {} threat(s).", threats.len());

    enrich_threats(&mut threats, resolver, lookup_timeout);
    threats
}

/// The rule battery without name enrichment.
pub fn run_rules(packets: &[PacketRecord], stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    run_battery(&RULES, packets, stats, thresholds)
}

fn run_battery(
    rules: &[(&str, Rule)],
    packets: &[PacketRecord],
    stats: &CaptureStatistics,
    thresholds: &ThreatThresholds,
) -> Vec<ThreatRecord> {
    rules
        .iter()
        .flat_map(|(name, rule)| isolate(name, || rule(packets, stats, thresholds)))
        .collect()
}

/// Flags a source probing more than the allowed number of distinct ports on one destination.
pub fn scan_for_port_scan(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut pairs: Vec<((&str, &str), BTreeSet<u16>)> = Vec::new();

    for packet in packets {
        let (Some(pair), Some(port)) = (packet.endpoints(), packet.dst_port) else {
            continue;
        };
        let slot = *slots.entry(pair).or_insert_with(|| {
            pairs.push((pair, BTreeSet::new()));
            pairs.len() - 1
        });
        pairs[slot].1.insert(port);
    }

    pairs
        .into_iter()
        .filter(|(_, ports)| ports.len() > thresholds.port_scan_ports)
        .map(|((src, dst), ports)| {
            ThreatRecord::new(
                Threat::PortScan {
                    ports_scanned: ports.len(),
                    sample_ports: ports.iter().copied().take(PORT_SCAN_SAMPLE).collect(),
                },
                Severity::High,
                format!("Port scanning detected: {src} scanned {} ports on {dst}", ports.len()),
            )
            .with_source(Some(src))
            .with_destination(Some(dst))
        })
        .collect()
}

/// Flags a source sending an outsized number of transport-labelled packets.
///
/// A volume proxy for SYN floods; TCP flags are not inspected.
pub fn scan_for_flood(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let mut senders = FirstSeenCounter::new();
    for packet in packets {
        if let (Some(src), Some(_)) = (packet.src_addr.as_deref(), packet.protocol) {
            senders.add(&src);
        }
    }

    senders
        .iter()
        .filter(|(_, count)| *count > thresholds.flood_packets)
        .map(|&(src, count)| {
            ThreatRecord::new(
                Threat::SynFlood { packet_count: count },
                Severity::Critical,
                format!("Possible SYN flood from {src} ({count} packets)"),
            )
            .with_source(Some(src))
        })
        .collect()
}

/// Flags repeated attempts from one source against a login service.
pub fn scan_for_brute_force(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let mut attempts = FirstSeenCounter::new();
    for packet in packets {
        if let (Some(src), Some(port)) = (packet.src_addr.as_deref(), packet.dst_port) {
            if BRUTE_FORCE_PORTS.contains(&port) {
                attempts.add(&(src, port));
            }
        }
    }

    attempts
        .iter()
        .filter(|(_, count)| *count > thresholds.brute_force_attempts)
        .map(|&((src, port), count)| {
            let service = service_name(port);
            ThreatRecord::new(
                Threat::BruteForce {
                    target_port: port,
                    port_service: service.to_string(),
                    attempt_count: count,
                },
                Severity::High,
                format!("Brute force attack on {service}: {src} made {count} attempts"),
            )
            .with_source(Some(src))
        })
        .collect()
}

/// Flags traffic to known backdoor ports, once per (source, destination, port).
pub fn scan_for_suspicious_ports(packets: &[PacketRecord], _stats: &CaptureStatistics, _thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let mut reported: HashSet<(Option<&str>, Option<&str>, u16)> = HashSet::new();
    let mut threats = Vec::new();

    for packet in packets {
        let Some(port) = packet.dst_port else {
            continue;
        };
        let Some(purpose) = SUSPICIOUS_PORTS.get(&port) else {
            continue;
        };
        let (src, dst) = (packet.src_addr.as_deref(), packet.dst_addr.as_deref());
        if !reported.insert((src, dst, port)) {
            continue;
        }

        threats.push(
            ThreatRecord::new(
                Threat::SuspiciousPort {
                    port,
                    port_purpose: purpose.to_string(),
                },
                Severity::High,
                format!("Suspicious port {port} ({purpose}) in use"),
            )
            .with_source(src)
            .with_destination(dst),
        );
    }

    threats
}

/// Flags a source whose cumulative payload exceeds the exfiltration limit.
pub fn scan_for_exfiltration(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let mut volume: FirstSeenCounter<&str> = FirstSeenCounter::new();
    let mut carriers: FirstSeenCounter<&str> = FirstSeenCounter::new();

    for packet in packets {
        if let (Some(src), Some(size)) = (packet.src_addr.as_deref(), packet.payload_size) {
            if size > 0 {
                volume.add_n(&src, size as usize);
                carriers.add(&src);
            }
        }
    }

    volume
        .iter()
        .filter(|(_, bytes)| *bytes as u64 > thresholds.exfiltration_bytes)
        .map(|&(src, bytes)| {
            let megabytes = round2(bytes as f64 / BYTES_PER_MB);
            ThreatRecord::new(
                Threat::DataExfiltration {
                    data_size_mb: megabytes,
                    packet_count: carriers.get(&src),
                },
                Severity::High,
                format!("Potential data exfiltration from {src} ({megabytes:.2}MB)"),
            )
            .with_source(Some(src))
        })
        .collect()
}

/// Flags a capture with an unusually high number of name-resolution queries.
pub fn scan_for_dns_volume(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let queries = packets.iter().filter(|p| p.dns_query.is_some()).count();
    if queries <= thresholds.dns_query_count {
        return Vec::new();
    }

    vec![ThreatRecord::new(
        Threat::DnsTunneling { packet_count: queries },
        Severity::Medium,
        format!("High DNS activity ({queries} queries) - possible DNS tunneling"),
    )]
}

/// Flags query names longer than a normal host name, a common tunnelling signature.
pub fn scan_for_long_queries(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let long: Vec<(&PacketRecord, &str)> = packets
        .iter()
        .filter_map(|p| p.dns_query.as_ref().map(|q| (p, q)))
        .flat_map(|(p, q)| q.queries.iter().map(move |name| (p, name.as_str())))
        .filter(|(_, name)| name.chars().count() > thresholds.dns_query_length)
        .collect();

    let Some((first, _)) = long.first() else {
        return Vec::new();
    };

    let sample: Vec<String> = long
        .iter()
        .map(|(_, name)| name.to_string())
        .take(LONG_QUERY_SAMPLE)
        .collect();

    vec![ThreatRecord::new(
        Threat::DnsAnomaly {
            query_count: long.len(),
            sample_queries: sample,
        },
        Severity::Medium,
        format!(
            "{} DNS queries longer than {} characters - possible encoded data",
            long.len(),
            thresholds.dns_query_length
        ),
    )
    .with_source(first.src_addr.as_deref())]
}

/// Flags a capture dominated by large packets.
pub fn scan_for_large_packets(packets: &[PacketRecord], _stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    if packets.is_empty() {
        return Vec::new();
    }

    let large = packets.iter().filter(|p| p.length > thresholds.large_packet_bytes).count();
    if (large as f64 / packets.len() as f64) <= thresholds.large_packet_ratio {
        return Vec::new();
    }

    let share = percentage(large, packets.len());
    vec![ThreatRecord::new(
        Threat::TrafficAnomaly {
            packet_count: large,
            percentage: share,
        },
        Severity::Low,
        format!(
            "{share:.2}% of packets exceed {} bytes - unusual bulk transfer",
            thresholds.large_packet_bytes
        ),
    )]
}

/// Flags ICMP making up an outsized share of labelled traffic.
pub fn scan_for_icmp_share(_packets: &[PacketRecord], stats: &CaptureStatistics, thresholds: &ThreatThresholds) -> Vec<ThreatRecord> {
    let share = stats.protocol_percentage(TransportProtocol::Icmp);
    if share <= thresholds.icmp_share_percent {
        return Vec::new();
    }

    vec![ThreatRecord::new(
        Threat::ProtocolAnomaly {
            protocol: TransportProtocol::Icmp.to_string(),
            percentage: share,
        },
        Severity::Medium,
        format!("ICMP accounts for {share:.2}% of traffic - possible ping sweep or ICMP tunnel"),
    )]
}

/// Summarises traffic to unencrypted services, one notice per destination port.
pub fn scan_for_cleartext(packets: &[PacketRecord]) -> Vec<CleartextNotice> {
    let mut ports = FirstSeenCounter::new();
    for port in packets.iter().filter_map(|p| p.dst_port) {
        if CLEARTEXT_PORTS.contains(&port) {
            ports.add(&port);
        }
    }

    ports
        .iter()
        .map(|&(port, count)| {
            let service = service_name(port);
            CleartextNotice {
                port,
                service: service.to_string(),
                packet_count: count,
                description: format!("Unencrypted {service} traffic on port {port} ({count} packets)"),
            }
        })
        .collect()
}
