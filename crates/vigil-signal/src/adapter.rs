use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use vigil_core::{Event, EvidenceSource, SignalReport, SignalStatus};

/// Uniform wrapper around one scoring collaborator.
///
/// Normalizes whatever the source returns into a SignalReport and absorbs
/// per-source failures: an error or an out-of-range score yields a report
/// with status ERROR and no score, never a propagated error. Deadlines are
/// enforced by the aggregator, not here.
#[derive(Clone)]
pub struct SourceAdapter {
    source: Arc<dyn EvidenceSource>,
}

impl SourceAdapter {
    pub fn new(source: Arc<dyn EvidenceSource>) -> Self {
        Self { source }
    }

    pub fn source_name(&self) -> String {
        self.source.name().to_string()
    }

    /// Invoke the source synchronously and normalize the outcome.
    pub fn invoke(&self, event: &Event) -> SignalReport {
        let name = self.source.name().to_string();
        let start = Instant::now();

        match self.source.score(event) {
            Ok(raw) if (0.0..=1.0).contains(&raw.score) => SignalReport {
                source: name,
                score: Some(raw.score),
                evidence: raw.evidence,
                status: SignalStatus::Ok,
                latency_ms: start.elapsed().as_millis() as u64,
            },
            Ok(raw) => {
                tracing::warn!(
                    source = %name,
                    score = raw.score,
                    "evidence source returned out-of-range score, treating as missing"
                );
                let mut evidence = BTreeMap::new();
                evidence.insert(
                    "failure".to_string(),
                    format!("score {} outside [0, 1]", raw.score),
                );
                SignalReport {
                    source: name,
                    score: None,
                    evidence,
                    status: SignalStatus::Error,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
            Err(err) => {
                tracing::warn!(source = %name, error = %err, "evidence source failed");
                let mut evidence = BTreeMap::new();
                evidence.insert("failure".to_string(), err.to_string());
                SignalReport {
                    source: name,
                    score: None,
                    evidence,
                    status: SignalStatus::Error,
                    latency_ms: start.elapsed().as_millis() as u64,
                }
            }
        }
    }

    /// The report emitted when the aggregator's deadline elapses before the
    /// source answers.
    pub fn timeout_report(source: &str, deadline_ms: u64) -> SignalReport {
        let mut evidence = BTreeMap::new();
        evidence.insert(
            "failure".to_string(),
            format!("deadline of {}ms elapsed", deadline_ms),
        );
        SignalReport {
            source: source.to_string(),
            score: None,
            evidence,
            status: SignalStatus::Timeout,
            latency_ms: deadline_ms,
        }
    }
}
