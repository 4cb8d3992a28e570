//! pcapsight derives traffic analytics and a heuristic threat assessment from packet captures.
pub mod analyser;
pub mod ui;

pub use analyser::config::AnalysisConfig;
pub use analyser::containers::PacketRecord;
pub use analyser::core::{analyse, AnalysisResult};
pub use analyser::error::AnalyserError;
