//! Groups packets into bidirectional conversations.
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use super::containers::{FlowKey, PacketRecord};

/// Packets of each conversation, in capture order.
pub type Flows<'a> = HashMap<FlowKey, Vec<&'a PacketRecord>>;

/// Partitions the packets by their unordered address pair.
///
/// Packets missing either endpoint belong to no flow and are skipped.
pub fn group_flows(packets: &[PacketRecord]) -> Flows<'_> {
    log::info!("Grouping flows.");
    let mut flows: Flows = HashMap::new();

    for packet in packets {
        if let Some((src, dst)) = packet.endpoints() {
            flows.entry(FlowKey::new(src, dst)).or_default().push(packet);
        }
    }

    flows
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FlowSummary {
    pub endpoints: FlowKey,
    pub packet_count: usize,
    pub bytes: u64,
    pub first_index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub protocols: BTreeMap<String, usize>,
}

/// Summarises every flow, ordered by the index of its first packet.
pub fn summarize_flows(flows: &Flows) -> Vec<FlowSummary> {
    let mut summaries: Vec<FlowSummary> = flows
        .iter()
        .filter_map(|(key, packets)| summarize(key, packets))
        .collect();

    summaries.sort_by_key(|s| s.first_index);
    summaries
}

fn summarize(key: &FlowKey, packets: &[&PacketRecord]) -> Option<FlowSummary> {
    let first = packets.first()?;
    let mut summary = FlowSummary {
        endpoints: key.clone(),
        first_index: first.index,
        start_time: f64::INFINITY,
        end_time: f64::NEG_INFINITY,
        ..Default::default()
    };

    for packet in packets {
        summary.packet_count += 1;
        summary.bytes += packet.length;
        *summary
            .protocols
            .entry(packet.protocol_label().to_string())
            .or_insert(0) += 1;
        if packet.has_timestamp() {
            summary.start_time = summary.start_time.min(packet.timestamp);
            summary.end_time = summary.end_time.max(packet.timestamp);
        }
    }

    if !summary.start_time.is_finite() {
        summary.start_time = 0.0;
        summary.end_time = 0.0;
    }
    Some(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::containers::TransportProtocol;
    use pretty_assertions::assert_eq;

    fn sample() -> Vec<PacketRecord> {
        vec![
            PacketRecord::new(0, 0.5, 100).with_addrs("10.0.0.2", "10.0.0.1").with_protocol(TransportProtocol::Tcp),
            PacketRecord::new(1, 1.0, 60),
            PacketRecord::new(2, 1.5, 200).with_addrs("10.0.0.1", "10.0.0.2"),
            PacketRecord::new(3, 2.0, 80).with_addrs("10.0.0.3", "10.0.0.1").with_protocol(TransportProtocol::Udp),
        ]
    }

    #[test]
    fn both_directions_share_one_flow() {
        let packets = sample();
        let flows = group_flows(&packets);

        assert_eq!(flows.len(), 2);
        let pair = &flows[&FlowKey::new("10.0.0.1", "10.0.0.2")];
        assert_eq!(pair.iter().map(|p| p.index).collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn summaries_follow_first_packet() {
        let packets = sample();
        let summaries = summarize_flows(&group_flows(&packets));

        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].endpoints, FlowKey::new("10.0.0.1", "10.0.0.2"));
        assert_eq!(summaries[0].packet_count, 2);
        assert_eq!(summaries[0].bytes, 300);
        assert_eq!(summaries[0].start_time, 0.5);
        assert_eq!(summaries[0].end_time, 1.5);
        assert_eq!(summaries[0].protocols["TCP"], 1);
        assert_eq!(summaries[0].protocols["OTHER"], 1);
        assert_eq!(summaries[1].first_index, 3);
    }

    #[test]
    fn packets_without_endpoints_form_no_flow() {
        let packets = vec![PacketRecord::new(0, 0.0, 60).with_layers(&["eth", "arp"])];
        assert!(group_flows(&packets).is_empty());
    }
}
