use clap::{ArgAction, Parser};
use log::LevelFilter;
use pcapsight::analyser::enrich::{DnsResolver, NameResolver, NoResolver};
use pcapsight::analyser::utils;
use pcapsight::ui::output;
use pcapsight::{analyse, AnalyserError, AnalysisConfig};
use simple_logger::SimpleLogger;
use std::fs;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

/// pcapsight derives traffic analytics and a threat assessment from a packet capture
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// pcap/pcapng file to analyze
    #[arg(short = 'f', long, value_parser)]
    file: String,

    /// JSON file overriding analysis thresholds and limits
    #[arg(short = 'c', long, value_parser)]
    config: Option<String>,

    /// Directory to write analysis.json to
    #[arg(short = 'o', long, value_parser)]
    output_dir: Option<String>,

    /// Display output as formatted JSON
    #[arg(short = 'j', long, action = ArgAction::SetTrue)]
    json: bool,

    /// Skip reverse DNS lookups of threat sources
    #[arg(long, action = ArgAction::SetTrue)]
    no_dns: bool,

    /// Number of top source/destination addresses to rank
    #[arg(short = 't', long, value_parser)]
    top: Option<usize>,

    /// Reverse lookup timeout in milliseconds, at most 1000
    #[arg(long, value_parser)]
    lookup_timeout: Option<u64>,
}

fn main() -> ExitCode {
    // RUST_LOG overrides the default level
    if let Err(err) = SimpleLogger::new().with_level(LevelFilter::Info).env().init() {
        eprintln!("Failed to initialise logging: {err}");
    }

    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) if err.is_decode_failure() => {
            log::error!("Could not decode capture: {err}");
            ExitCode::from(2)
        }
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), AnalyserError> {
    let mut config = match args.config.as_deref() {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(top) = args.top {
        config.top_addresses = top;
    }
    if let Some(timeout) = args.lookup_timeout {
        config.lookup_timeout_ms = timeout;
    }
    if args.no_dns {
        config.resolve_names = false;
    }

    let packets = utils::load_file(&args.file)?;
    let resolver = build_resolver(&config);
    let result = analyse(&packets, &config, &resolver);

    // ---- Output ----
    let json = if args.json || args.output_dir.is_some() {
        Some(output::data_as_json(&result)?)
    } else {
        None
    };

    if let Some(out_dir) = args.output_dir.as_deref() {
        log::info!("Output directory {out_dir}");
        fs::create_dir_all(out_dir)?;
        if let Some(json) = &json {
            output::data_to_file(json, &Path::new(out_dir).join("analysis.json"))?;
        }
    }

    match json {
        Some(json) if args.json => println!("{json}"),
        _ => output::print_results(&result),
    }
    Ok(())
}

fn build_resolver(config: &AnalysisConfig) -> Arc<dyn NameResolver> {
    if !config.resolve_names {
        log::info!("Reverse DNS lookups disabled.");
        return Arc::new(NoResolver);
    }

    match DnsResolver::new(config.lookup_timeout()) {
        Ok(resolver) => Arc::new(resolver),
        Err(err) => {
            log::warn!("Reverse DNS unavailable ({err}), continuing without host names.");
            Arc::new(NoResolver)
        }
    }
}
