use crate::analyser::containers::Severity;
use crate::analyser::core::AnalysisResult;
use crate::analyser::error::AnalyserError;
use ansi_term::Colour;
use std::fs;
use std::path::Path;

/// Number of flows and talkers shown in the terminal report.
const REPORT_ROWS: usize = 5;

pub fn print_results(result: &AnalysisResult) {
    println!("\n\u{250F}\u{2501}\u{2501}\u{2501}\u{2501} Results");
    print_overview(result);
    print_talkers(result);
    print_threats(result);
    println!("\u{2517}\u{2501}\u{2501}\u{2501}\u{2501} Generated {}", chrono::Local::now().format("%Y-%m-%d %H:%M:%S"));
}

pub fn print_overview(result: &AnalysisResult) {
    let stats = &result.statistics;
    println!("\u{2503}");
    println!("\u{2503} Packets          : {}", Colour::Fixed(226).paint(stats.total_packets.to_string()));
    println!("\u{2503} Bytes            : {}", Colour::Fixed(226).paint(stats.total_bytes.to_string()));
    println!("\u{2503} Average size     : {:.2}", stats.average_packet_size);
    println!("\u{2503} Duration         : {:.2}s", result.timeline.duration);
    println!("\u{2503} Flows            : {}", result.flow_count);
    println!("\u{2503} Hosts            : {}", stats.unique_addresses);
    for share in &stats.protocols {
        println!("\u{2503}   {:<14} : {} ({:.2}%)", share.protocol, share.count, share.percentage);
    }
    println!("\u{2503} ");
}

pub fn print_talkers(result: &AnalysisResult) {
    println!("\u{2503} Top sources");
    for talker in result.statistics.top_sources.iter().take(REPORT_ROWS) {
        println!("\u{2503}   {:<39} {}", talker.address, talker.count);
    }
    println!("\u{2503} Top ports");
    for port in result.statistics.top_ports.iter().take(REPORT_ROWS) {
        println!("\u{2503}   {:<6} {:<12} {}", port.port, port.service, port.count);
    }
    println!("\u{2503} ");
}

pub fn print_threats(result: &AnalysisResult) {
    let score = result.risk_score.to_string();
    let painted = if result.risk_score >= 70 {
        Colour::Red.bold().paint(score)
    } else if result.risk_score >= 30 {
        Colour::Yellow.paint(score)
    } else {
        Colour::Green.paint(score)
    };
    let counts = &result.severity_count;
    println!("\u{2503} Risk score       : {painted}/100");
    println!(
        "\u{2503} Findings         : {} critical, {} high, {} medium, {} low",
        counts.critical, counts.high, counts.medium, counts.low
    );

    for threat in &result.threats {
        let host = threat
            .source_hostname
            .as_deref()
            .map(|name| format!(" [{name}]"))
            .unwrap_or_default();
        println!(
            "\u{2503}   {} {}{}",
            severity_label(threat.severity),
            threat.description,
            host
        );
    }
    for notice in &result.cleartext_traffic {
        println!("\u{2503}   {} {}", Colour::Cyan.paint(format!("{:<8}", "NOTICE")), notice.description);
    }
    println!("\u{2503} ");
}

fn severity_label(severity: Severity) -> String {
    let label = format!("{:<8}", severity.to_string().to_uppercase());
    match severity {
        Severity::Critical => Colour::Red.bold().paint(label).to_string(),
        Severity::High => Colour::Red.paint(label).to_string(),
        Severity::Medium => Colour::Yellow.paint(label).to_string(),
        Severity::Low => Colour::Blue.paint(label).to_string(),
    }
}

pub fn data_as_json(result: &AnalysisResult) -> Result<String, AnalyserError> {
    Ok(serde_json::to_string_pretty(result)?)
}

pub fn data_to_file(json: &str, path: &Path) -> Result<(), AnalyserError> {
    log::info!("Writing results to {}", path.display());
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::config::AnalysisConfig;
    use crate::analyser::containers::{PacketRecord, TransportProtocol};
    use crate::analyser::core::analyse;
    use crate::analyser::enrich::{NameResolver, NoResolver};
    use std::sync::Arc;

    #[test]
    fn json_is_plain_nested_values() {
        let packets: Vec<PacketRecord> = (0..35)
            .map(|i| {
                PacketRecord::new(i, i as f64, 80)
                    .with_addrs("10.0.0.9", "10.0.0.1")
                    .with_ports(40000, 4444)
                    .with_protocol(TransportProtocol::Tcp)
            })
            .collect();
        let resolver: Arc<dyn NameResolver> = Arc::new(NoResolver);
        let result = analyse(&packets, &AnalysisConfig::default(), &resolver);

        let json = data_as_json(&result).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["risk_score"], 100);
        assert_eq!(value["threats"][0]["type"], "syn_flood");
        assert_eq!(value["flows"][0]["endpoints"][0], "10.0.0.1");
        assert_eq!(value["statistics"]["protocols"][0]["protocol"], "TCP");
        assert!(value["network_graph"]["edges"].is_array());
    }
}
