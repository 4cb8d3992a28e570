//! Reduces threat findings to a single 0-100 risk score.
use serde::Serialize;
use super::containers::{Severity, ThreatRecord};

pub const MAX_RISK_SCORE: u32 = 100;

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SeverityCount {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCount {
    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RiskAssessment {
    pub risk_score: u32,
    pub severity_count: SeverityCount,
}

/// Sums severity weights and saturates at [MAX_RISK_SCORE].
///
/// Saturating rather than averaging: one critical finding is enough to max out the score.
pub fn score_threats(threats: &[ThreatRecord]) -> RiskAssessment {
    let mut severity_count = SeverityCount::default();
    let mut total: u32 = 0;

    for threat in threats {
        total = total.saturating_add(threat.severity.weight());
        match threat.severity {
            Severity::Critical => severity_count.critical += 1,
            Severity::High => severity_count.high += 1,
            Severity::Medium => severity_count.medium += 1,
            Severity::Low => severity_count.low += 1,
        }
    }

    RiskAssessment {
        risk_score: total.min(MAX_RISK_SCORE),
        severity_count,
    }
}
