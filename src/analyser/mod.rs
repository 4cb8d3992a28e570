//! The core of capture analysis.
//! Turns decoded packets into statistics, flows, a host graph, a timeline and a threat assessment.
pub mod utils;
pub mod core;
pub mod config;
pub mod containers;
pub mod enrich;
pub mod error;
pub mod flows;
pub mod graph;
pub mod risk;
pub mod scan;
pub mod stats;
pub mod timeline;
