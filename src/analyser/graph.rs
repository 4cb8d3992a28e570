//! Host communication graph, plus the protocol layer adjacency graph.
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use super::containers::{FlowKey, PacketRecord};
use super::utils::FirstSeenCounter;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphNode {
    pub address: String,
    pub sent: usize,
    pub received: usize,
    /// Bytes of every packet this host sent or received.
    pub bytes: u64,
    /// Number of distinct peers.
    pub degree: usize,
    pub protocols: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct GraphEdge {
    pub endpoints: FlowKey,
    pub packet_count: usize,
    pub bytes: u64,
    pub protocols: BTreeMap<String, usize>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct LayerLink {
    pub from: String,
    pub to: String,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NetworkGraph {
    /// Hosts in order of first appearance.
    pub nodes: Vec<GraphNode>,
    /// Undirected edges in order of first appearance.
    pub edges: Vec<GraphEdge>,
    /// How often each layer directly encapsulates another.
    pub layer_links: Vec<LayerLink>,
}

impl NetworkGraph {
    pub fn node(&self, address: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.address == address)
    }

    pub fn edge(&self, a: &str, b: &str) -> Option<&GraphEdge> {
        let key = FlowKey::new(a, b);
        self.edges.iter().find(|e| e.endpoints == key)
    }
}

/// Builds the host graph.
///
/// A packet with both endpoints updates each endpoint's node and exactly one edge.
/// Packets without a transport label are counted under `OTHER`.
pub fn build_graph(packets: &[PacketRecord]) -> NetworkGraph {
    log::info!("Building network graph.");
    let mut nodes: Vec<GraphNode> = Vec::new();
    let mut node_slots: HashMap<&str, usize> = HashMap::new();
    let mut peers: HashMap<&str, BTreeSet<&str>> = HashMap::new();
    let mut edges: Vec<GraphEdge> = Vec::new();
    let mut edge_slots: HashMap<FlowKey, usize> = HashMap::new();

    for packet in packets {
        let Some((src, dst)) = packet.endpoints() else {
            continue;
        };
        let protocol = packet.protocol_label();

        let src_node = slot_for(&mut nodes, &mut node_slots, src);
        nodes[src_node].sent += 1;
        touch(&mut nodes[src_node], packet.length, protocol);

        let dst_node = slot_for(&mut nodes, &mut node_slots, dst);
        nodes[dst_node].received += 1;
        if dst_node != src_node {
            touch(&mut nodes[dst_node], packet.length, protocol);
        }

        peers.entry(src).or_default().insert(dst);
        peers.entry(dst).or_default().insert(src);

        let key = FlowKey::new(src, dst);
        let slot = *edge_slots.entry(key.clone()).or_insert_with(|| {
            edges.push(GraphEdge {
                endpoints: key,
                ..Default::default()
            });
            edges.len() - 1
        });
        let edge = &mut edges[slot];
        edge.packet_count += 1;
        edge.bytes += packet.length;
        *edge.protocols.entry(protocol.to_string()).or_insert(0) += 1;
    }

    for node in nodes.iter_mut() {
        node.degree = peers
            .get(node.address.as_str())
            .map_or(0, |p| p.iter().filter(|&&peer| peer != node.address).count());
    }

    NetworkGraph {
        nodes,
        edges,
        layer_links: build_layer_links(packets),
    }
}

fn slot_for<'a>(nodes: &mut Vec<GraphNode>, slots: &mut HashMap<&'a str, usize>, address: &'a str) -> usize {
    *slots.entry(address).or_insert_with(|| {
        nodes.push(GraphNode {
            address: address.to_string(),
            ..Default::default()
        });
        nodes.len() - 1
    })
}

fn touch(node: &mut GraphNode, length: u64, protocol: &str) {
    node.bytes += length;
    *node.protocols.entry(protocol.to_string()).or_insert(0) += 1;
}

/// Counts each consecutive `(outer, inner)` layer pair, e.g. `eth -> ip`.
pub fn build_layer_links(packets: &[PacketRecord]) -> Vec<LayerLink> {
    let mut links = FirstSeenCounter::new();
    for packet in packets {
        for pair in packet.layers.windows(2) {
            links.add(&(pair[0].clone(), pair[1].clone()));
        }
    }

    links
        .iter()
        .map(|((from, to), count)| LayerLink {
            from: from.clone(),
            to: to.clone(),
            count: *count,
        })
        .collect()
}
