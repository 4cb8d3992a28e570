//! Capture-wide counters and top-N rankings.
use serde::Serialize;
use std::collections::HashSet;
use super::containers::{PacketRecord, TransportProtocol};
use super::utils::{percentage, round2, service_name, FirstSeenCounter};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProtocolShare {
    pub protocol: String,
    pub count: usize,
    /// Share of packets that carry a transport label.
    pub percentage: f64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LayerCount {
    pub layer: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AddressCount {
    pub address: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PortCount {
    pub port: u16,
    pub count: usize,
    pub service: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CaptureStatistics {
    pub total_packets: usize,
    pub total_bytes: u64,
    pub average_packet_size: f64,
    pub largest_packet: u64,
    pub smallest_packet: u64,
    /// Transport label breakdown, over packets that have a label.
    pub protocols: Vec<ProtocolShare>,
    /// Packets without a transport label; the graph and timeline file these under `OTHER`.
    pub other_packets: usize,
    /// Raw frequency of every layer name across all packets.
    pub layers: Vec<LayerCount>,
    pub unique_sources: usize,
    pub unique_destinations: usize,
    pub unique_addresses: usize,
    pub top_sources: Vec<AddressCount>,
    pub top_destinations: Vec<AddressCount>,
    /// Ports ranked by combined source and destination usage.
    pub top_ports: Vec<PortCount>,
    /// Ports ranked by how often they were the destination.
    pub top_destination_ports: Vec<PortCount>,
    pub dns_query_packets: usize,
}

impl CaptureStatistics {
    /// Percentage recorded for a transport protocol, 0 if it never appeared.
    pub fn protocol_percentage(&self, protocol: TransportProtocol) -> f64 {
        self.protocols
            .iter()
            .find(|share| share.protocol == protocol.as_str())
            .map_or(0.0, |share| share.percentage)
    }
}

/// Computes capture-wide statistics. An empty capture yields all-zero values.
pub fn compute_statistics(packets: &[PacketRecord], top_addresses: usize, top_ports: usize) -> CaptureStatistics {
    log::info!("Computing capture statistics.");
    let mut stats = CaptureStatistics {
        total_packets: packets.len(),
        ..Default::default()
    };
    if packets.is_empty() {
        return stats;
    }

    let mut protocols = FirstSeenCounter::new();
    let mut layers = FirstSeenCounter::new();
    let mut sources = FirstSeenCounter::new();
    let mut destinations = FirstSeenCounter::new();
    let mut ports = FirstSeenCounter::new();
    let mut destination_ports = FirstSeenCounter::new();
    let mut addresses: HashSet<&str> = HashSet::new();

    stats.smallest_packet = u64::MAX;
    for packet in packets {
        stats.total_bytes += packet.length;
        stats.largest_packet = stats.largest_packet.max(packet.length);
        stats.smallest_packet = stats.smallest_packet.min(packet.length);

        match packet.protocol {
            Some(protocol) => protocols.add(&protocol),
            None => stats.other_packets += 1,
        }
        for layer in &packet.layers {
            layers.add(layer);
        }

        if let Some(src) = &packet.src_addr {
            sources.add(src);
            addresses.insert(src);
        }
        if let Some(dst) = &packet.dst_addr {
            destinations.add(dst);
            addresses.insert(dst);
        }
        for port in [packet.src_port, packet.dst_port].into_iter().flatten() {
            ports.add(&port);
        }
        if let Some(port) = packet.dst_port {
            destination_ports.add(&port);
        }

        if packet.dns_query.is_some() {
            stats.dns_query_packets += 1;
        }
    }

    stats.average_packet_size = round2(stats.total_bytes as f64 / packets.len() as f64);

    let labelled = packets.len() - stats.other_packets;
    stats.protocols = protocols
        .ranked()
        .into_iter()
        .map(|(protocol, count)| ProtocolShare {
            protocol: protocol.to_string(),
            count,
            percentage: percentage(count, labelled),
        })
        .collect();

    stats.layers = layers
        .ranked()
        .into_iter()
        .map(|(layer, count)| LayerCount { layer, count })
        .collect();

    stats.unique_sources = sources.len();
    stats.unique_destinations = destinations.len();
    stats.unique_addresses = addresses.len();
    stats.top_sources = address_ranking(&sources, top_addresses);
    stats.top_destinations = address_ranking(&destinations, top_addresses);
    stats.top_ports = port_ranking(&ports, top_ports);
    stats.top_destination_ports = port_ranking(&destination_ports, top_ports);

    stats
}

fn address_ranking(counter: &FirstSeenCounter<String>, n: usize) -> Vec<AddressCount> {
    counter
        .top(n)
        .into_iter()
        .map(|(address, count)| AddressCount { address, count })
        .collect()
}

fn port_ranking(counter: &FirstSeenCounter<u16>, n: usize) -> Vec<PortCount> {
    counter
        .top(n)
        .into_iter()
        .map(|(port, count)| PortCount {
            port,
            count,
            service: service_name(port).to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tcp(index: usize, src: &str, dst: &str, dst_port: u16, length: u64) -> PacketRecord {
        PacketRecord::new(index, index as f64, length)
            .with_layers(&["eth", "ip", "tcp"])
            .with_addrs(src, dst)
            .with_ports(40000, dst_port)
            .with_protocol(TransportProtocol::Tcp)
    }

    #[test]
    fn empty_capture_is_all_zero() {
        let stats = compute_statistics(&[], 10, 15);
        assert_eq!(stats, CaptureStatistics::default());
    }

    #[test]
    fn average_of_ten_packets() {
        let packets: Vec<PacketRecord> = (0..10)
            .map(|i| tcp(i, "10.0.0.1", "10.0.0.2", 80, if i % 2 == 0 { 500 } else { 1500 }))
            .collect();
        let stats = compute_statistics(&packets, 10, 15);

        assert_eq!(stats.total_bytes, 10_000);
        assert_eq!(stats.average_packet_size, 1000.0);
        assert_eq!(stats.largest_packet, 1500);
        assert_eq!(stats.smallest_packet, 500);
    }

    #[test]
    fn protocol_percentages_use_labelled_packets() {
        let packets = vec![
            tcp(0, "10.0.0.1", "10.0.0.2", 80, 60),
            PacketRecord::new(1, 1.0, 60)
                .with_layers(&["eth", "ip", "udp", "dns"])
                .with_addrs("10.0.0.1", "8.8.8.8")
                .with_ports(5353, 53)
                .with_protocol(TransportProtocol::Udp)
                .with_dns_query("example.com"),
            PacketRecord::new(2, 2.0, 42).with_layers(&["eth", "arp"]),
            tcp(3, "10.0.0.2", "10.0.0.1", 80, 60),
        ];
        let stats = compute_statistics(&packets, 10, 15);

        assert_eq!(
            stats.protocols,
            vec![
                ProtocolShare { protocol: "TCP".into(), count: 2, percentage: 66.67 },
                ProtocolShare { protocol: "UDP".into(), count: 1, percentage: 33.33 },
            ]
        );
        assert_eq!(stats.other_packets, 1);
        assert_eq!(stats.protocol_percentage(TransportProtocol::Icmp), 0.0);
        assert_eq!(stats.layers[0], LayerCount { layer: "eth".into(), count: 4 });
        assert_eq!(stats.dns_query_packets, 1);
        assert_eq!(stats.unique_sources, 2);
        assert_eq!(stats.unique_destinations, 3);
        assert_eq!(stats.unique_addresses, 3);
    }

    #[test]
    fn rankings_are_stable_and_bounded() {
        let packets = vec![
            tcp(0, "10.0.0.3", "10.0.0.9", 22, 60),
            tcp(1, "10.0.0.1", "10.0.0.9", 443, 60),
            tcp(2, "10.0.0.1", "10.0.0.9", 443, 60),
            tcp(3, "10.0.0.2", "10.0.0.9", 80, 60),
            tcp(4, "10.0.0.3", "10.0.0.9", 22, 60),
        ];
        let stats = compute_statistics(&packets, 2, 2);

        let sources: Vec<_> = stats.top_sources.iter().map(|a| (a.address.as_str(), a.count)).collect();
        assert_eq!(sources, vec![("10.0.0.3", 2), ("10.0.0.1", 2)]);
        assert_eq!(
            stats.top_ports,
            vec![
                PortCount { port: 40000, count: 5, service: "Unknown".into() },
                PortCount { port: 22, count: 2, service: "SSH".into() },
            ]
        );
        assert_eq!(
            stats.top_destination_ports,
            vec![
                PortCount { port: 22, count: 2, service: "SSH".into() },
                PortCount { port: 443, count: 2, service: "HTTPS".into() },
            ]
        );
    }
}
