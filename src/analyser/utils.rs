//! Contains utilities and helper functions shared by the analysis stages, plus the
//! rtshark-backed capture decoder.
use lazy_static::lazy_static;
use rtshark::{Layer, Packet};
use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use super::containers::{PacketRecord, TransportProtocol};
use super::error::AnalyserError;

/// Bytes per megabyte when reporting byte volumes.
pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

lazy_static! {
    /// Well-known services, used to label port rankings.
    pub static ref PORT_SERVICES: HashMap<u16, &'static str> = HashMap::from([
        (20, "FTP-DATA"),
        (21, "FTP"),
        (22, "SSH"),
        (23, "Telnet"),
        (25, "SMTP"),
        (53, "DNS"),
        (80, "HTTP"),
        (110, "POP3"),
        (139, "NetBIOS"),
        (143, "IMAP"),
        (443, "HTTPS"),
        (445, "SMB"),
        (3306, "MySQL"),
        (3389, "RDP"),
        (5432, "PostgreSQL"),
        (5900, "VNC"),
        (8080, "HTTP-Alt"),
        (8443, "HTTPS-Alt"),
    ]);

    /// Ports commonly used by shells, backdoors and botnets.
    pub static ref SUSPICIOUS_PORTS: HashMap<u16, &'static str> = HashMap::from([
        (4444, "Remote shell"),
        (5555, "Reverse shell"),
        (6666, "IRC botnet"),
        (8888, "Remote access"),
        (12345, "NetBus trojan"),
        (27374, "SubSeven trojan"),
        (31337, "Leet backdoor"),
        (6379, "Redis exploit"),
    ]);
}

/// Login services watched for repeated connection attempts.
pub const BRUTE_FORCE_PORTS: [u16; 5] = [22, 3389, 21, 445, 139];

/// Services that carry credentials and content in the clear.
pub const CLEARTEXT_PORTS: [u16; 5] = [23, 21, 80, 143, 110];

/// Returns the service name for a port, or `Unknown`.
pub fn service_name(port: u16) -> &'static str {
    PORT_SERVICES.get(&port).copied().unwrap_or("Unknown")
}

/// Rounds to two decimal places so repeated runs print identical numbers.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// `part / whole` as a rounded percentage. A zero denominator yields 0.
pub fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    round2(part as f64 * 100.0 / whole as f64)
}

/// Counter that remembers the order keys were first seen in.
///
/// Rankings sort by descending count with a stable sort, so equal counts keep first-seen order.
#[derive(Debug, Clone)]
pub struct FirstSeenCounter<K> {
    slots: HashMap<K, usize>,
    counts: Vec<(K, usize)>,
}

impl<K: Eq + Hash + Clone> FirstSeenCounter<K> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            counts: Vec::new(),
        }
    }

    pub fn add(&mut self, key: &K) {
        self.add_n(key, 1);
    }

    pub fn add_n(&mut self, key: &K, n: usize) {
        match self.slots.get(key) {
            Some(&slot) => self.counts[slot].1 += n,
            None => {
                self.slots.insert(key.clone(), self.counts.len());
                self.counts.push((key.clone(), n));
            }
        }
    }

    pub fn get(&self, key: &K) -> usize {
        self.slots.get(key).map_or(0, |&slot| self.counts[slot].1)
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Entries in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = &(K, usize)> {
        self.counts.iter()
    }

    /// All entries, highest count first.
    pub fn ranked(&self) -> Vec<(K, usize)> {
        let mut ranked = self.counts.clone();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked
    }

    pub fn top(&self, n: usize) -> Vec<(K, usize)> {
        let mut ranked = self.ranked();
        ranked.truncate(n);
        ranked
    }
}

impl<K: Eq + Hash + Clone> Default for FirstSeenCounter<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one analysis stage, replacing a panic with the stage's empty value.
///
/// Keeps a single failing stage from taking down the rest of the report.
pub fn isolate<T: Default>(stage: &str, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(_) => {
            log::error!("Stage '{stage}' failed, substituting an empty result.");
            T::default()
        }
    }
}

/// Loads a PCAP/PCAPNG file via rtshark and decodes every packet into a [PacketRecord].
///
/// Packets are kept in capture order; their ordinal index is their position in the file.
pub fn load_file(filepath: &str) -> Result<Vec<PacketRecord>, AnalyserError> {
    log::info!("Loading capture file.");

    if !Path::new(filepath).is_file() {
        return Err(AnalyserError::CaptureNotFound(filepath.to_string()));
    }

    let builder = rtshark::RTSharkBuilder::builder().input_path(filepath);

    let mut rtshark = match builder.spawn() {
        Err(err) => {
            log::error!("Error spawning tshark: {err}");
            return Err(AnalyserError::Decoder(err));
        }
        Ok(rtshark) => {
            log::info!("Reading from {}", filepath);
            rtshark
        }
    };

    let mut records = Vec::new();
    let mut first_micros = None;

    loop {
        match rtshark.read() {
            Ok(Some(packet)) => {
                let index = records.len();
                records.push(packet_to_record(&packet, index, &mut first_micros));
            }
            Ok(None) => break,
            Err(err) => {
                log::error!("Error parsing TShark output after {} packets: {err}", records.len());
                rtshark.kill();
                return Err(AnalyserError::Decoder(err));
            }
        }
    }
    rtshark.kill();

    log::info!("Decoded {} packets.", records.len());
    Ok(records)
}

/// Converts one dissected rtshark [Packet] into a [PacketRecord].
///
/// Fields tshark could not dissect are left empty rather than rejected.
pub fn packet_to_record(packet: &Packet, index: usize, first_micros: &mut Option<i64>) -> PacketRecord {
    let mut record = PacketRecord::new(index, 0.0, 0);

    record.layers = packet
        .iter()
        .map(|layer| layer.name().to_string())
        .filter(|name| name != "frame")
        .collect();

    if let Some(frame) = packet.layer_name("frame") {
        record.length = metadata_value(frame, "frame.len").unwrap_or(0);
        if let Some(relative) = metadata_value::<f64>(frame, "frame.time_relative") {
            record.timestamp = relative;
        }
    }
    if record.timestamp == 0.0 {
        if let Some(micros) = packet.timestamp_micros() {
            let first = *first_micros.get_or_insert(micros);
            record.timestamp = (micros - first) as f64 / 1_000_000.0;
        }
    }

    if let Some(ip) = packet.layer_name("ip") {
        record.src_addr = metadata_value(ip, "ip.src");
        record.dst_addr = metadata_value(ip, "ip.dst");
    } else if let Some(ipv6) = packet.layer_name("ipv6") {
        record.src_addr = metadata_value(ipv6, "ipv6.src");
        record.dst_addr = metadata_value(ipv6, "ipv6.dst");
    }

    if let Some(tcp) = packet.layer_name("tcp") {
        record.src_port = metadata_value(tcp, "tcp.srcport");
        record.dst_port = metadata_value(tcp, "tcp.dstport");
        record.protocol = Some(TransportProtocol::Tcp);
    } else if let Some(udp) = packet.layer_name("udp") {
        record.src_port = metadata_value(udp, "udp.srcport");
        record.dst_port = metadata_value(udp, "udp.dstport");
        record.protocol = Some(TransportProtocol::Udp);
    } else if packet.layer_name("icmp").is_some() || packet.layer_name("icmpv6").is_some() {
        record.protocol = Some(TransportProtocol::Icmp);
    }

    if let Some(dns) = packet.layer_name("dns") {
        if let Some(name) = dns.metadata("dns.qry.name") {
            record = record.with_dns_query(name.value());
        }
    }

    if let Some(data) = packet.layer_name("data") {
        record.payload_size = metadata_value(data, "data.len");
    }

    record
}

/// Parses a metadata field of a layer, if present and well-formed.
fn metadata_value<T: std::str::FromStr>(layer: &Layer, name: &str) -> Option<T> {
    layer.metadata(name).and_then(|m| m.value().parse::<T>().ok())
}
