use serde::Serialize;
use std::fmt;

/// Label used wherever a packet has no resolved transport protocol.
pub const OTHER_PROTOCOL: &str = "OTHER";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum TransportProtocol {
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP")]
    Udp,
    #[serde(rename = "ICMP")]
    Icmp,
}

impl TransportProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportProtocol::Tcp => "TCP",
            TransportProtocol::Udp => "UDP",
            TransportProtocol::Icmp => "ICMP",
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Name-resolution metadata carried by a packet (DNS questions).
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DnsQuery {
    pub queries: Vec<String>,
}

/// One decoded packet. Produced once by the capture decoder and only ever read afterwards.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PacketRecord {
    pub index: usize,
    /// Capture-relative seconds. Not guaranteed to be monotonic across a capture.
    pub timestamp: f64,
    pub length: u64,
    /// Layer names, outermost first.
    pub layers: Vec<String>,
    pub src_addr: Option<String>,
    pub dst_addr: Option<String>,
    pub src_port: Option<u16>,
    pub dst_port: Option<u16>,
    pub protocol: Option<TransportProtocol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_query: Option<DnsQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload_size: Option<u64>,
}

impl PacketRecord {
    pub fn new(index: usize, timestamp: f64, length: u64) -> Self {
        Self {
            index,
            timestamp,
            length,
            ..Default::default()
        }
    }

    pub fn with_layers(mut self, layers: &[&str]) -> Self {
        self.layers = layers.iter().map(|l| l.to_string()).collect();
        self
    }

    pub fn with_addrs(mut self, src: &str, dst: &str) -> Self {
        self.src_addr = Some(src.to_string());
        self.dst_addr = Some(dst.to_string());
        self
    }

    pub fn with_ports(mut self, src: u16, dst: u16) -> Self {
        self.src_port = Some(src);
        self.dst_port = Some(dst);
        self
    }

    pub fn with_protocol(mut self, protocol: TransportProtocol) -> Self {
        self.protocol = Some(protocol);
        self
    }

    pub fn with_dns_query(mut self, query: &str) -> Self {
        self.dns_query
            .get_or_insert_with(DnsQuery::default)
            .queries
            .push(query.to_string());
        self
    }

    pub fn with_payload(mut self, size: u64) -> Self {
        self.payload_size = Some(size);
        self
    }

    /// Both endpoints, if the packet carries a network layer.
    pub fn endpoints(&self) -> Option<(&str, &str)> {
        match (self.src_addr.as_deref(), self.dst_addr.as_deref()) {
            (Some(src), Some(dst)) => Some((src, dst)),
            _ => None,
        }
    }

    /// Transport label, or [OTHER_PROTOCOL] when unresolved.
    pub fn protocol_label(&self) -> &'static str {
        self.protocol.map_or(OTHER_PROTOCOL, |p| p.as_str())
    }

    pub fn has_timestamp(&self) -> bool {
        self.timestamp.is_finite()
    }
}

/// Direction-independent identity of a conversation between two addresses.
///
/// The lexicographically smaller address always comes first, so `(A, B)` and `(B, A)`
/// produce the same key.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowKey(String, String);

impl FlowKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            FlowKey(a.to_string(), b.to_string())
        } else {
            FlowKey(b.to_string(), a.to_string())
        }
    }

    pub fn first(&self) -> &str {
        &self.0
    }

    pub fn second(&self) -> &str {
        &self.1
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} <-> {}", self.0, self.1)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Contribution of one finding to the risk score.
    pub fn weight(&self) -> u32 {
        match self {
            Severity::Critical => 100,
            Severity::High => 40,
            Severity::Medium => 20,
            Severity::Low => 5,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        write!(f, "{name}")
    }
}

/// What a rule found, along with the numbers specific to that finding.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Threat {
    PortScan {
        ports_scanned: usize,
        sample_ports: Vec<u16>,
    },
    SynFlood {
        packet_count: usize,
    },
    BruteForce {
        target_port: u16,
        port_service: String,
        attempt_count: usize,
    },
    SuspiciousPort {
        port: u16,
        port_purpose: String,
    },
    DataExfiltration {
        data_size_mb: f64,
        packet_count: usize,
    },
    DnsTunneling {
        packet_count: usize,
    },
    DnsAnomaly {
        query_count: usize,
        sample_queries: Vec<String>,
    },
    TrafficAnomaly {
        packet_count: usize,
        percentage: f64,
    },
    ProtocolAnomaly {
        protocol: String,
        percentage: f64,
    },
}

impl Threat {
    pub fn name(&self) -> &'static str {
        match self {
            Threat::PortScan { .. } => "port_scan",
            Threat::SynFlood { .. } => "syn_flood",
            Threat::BruteForce { .. } => "brute_force",
            Threat::SuspiciousPort { .. } => "suspicious_port",
            Threat::DataExfiltration { .. } => "data_exfiltration",
            Threat::DnsTunneling { .. } => "dns_tunneling",
            Threat::DnsAnomaly { .. } => "dns_anomaly",
            Threat::TrafficAnomaly { .. } => "traffic_anomaly",
            Threat::ProtocolAnomaly { .. } => "protocol_anomaly",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThreatRecord {
    #[serde(flatten)]
    pub threat: Threat,
    pub severity: Severity,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Reverse-DNS name of `source`, filled in on a best-effort basis.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_hostname: Option<String>,
}

impl ThreatRecord {
    pub fn new(threat: Threat, severity: Severity, description: String) -> Self {
        Self {
            threat,
            severity,
            description,
            source: None,
            destination: None,
            source_hostname: None,
        }
    }

    pub fn with_source(mut self, source: Option<&str>) -> Self {
        self.source = source.map(str::to_string);
        self
    }

    pub fn with_destination(mut self, destination: Option<&str>) -> Self {
        self.destination = destination.map(str::to_string);
        self
    }

    pub fn kind(&self) -> &'static str {
        self.threat.name()
    }
}
