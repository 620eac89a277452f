use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::timeout;

use vigil_core::{
    AggregatedSignal, Event, EventId, EvidenceSource, SignalQuality, SignalReport,
};

use crate::adapter::SourceAdapter;

/// Configuration for one evaluation fan-out.
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Per-adapter deadline, enforced by the aggregator.
    pub deadline_ms: u64,
    /// Missing ratio strictly above this marks the aggregate insufficient.
    pub max_missing_ratio: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 200,
            max_missing_ratio: 0.5,
        }
    }
}

/// Runs every configured evidence source concurrently and combines the
/// available reports into one AggregatedSignal.
///
/// Sources are blind to each other; each invocation runs on its own
/// blocking task with an individual deadline. A hung source cannot delay
/// the call past `deadline_ms` plus scheduling overhead — its task is
/// abandoned and a TIMEOUT report is recorded in its place.
pub struct SignalAggregator {
    adapters: Vec<SourceAdapter>,
    config: AggregatorConfig,
}

impl SignalAggregator {
    pub fn new(sources: Vec<Arc<dyn EvidenceSource>>, config: AggregatorConfig) -> Self {
        Self {
            adapters: sources.into_iter().map(SourceAdapter::new).collect(),
            config,
        }
    }

    pub fn source_count(&self) -> usize {
        self.adapters.len()
    }

    /// Fan out to all sources and return the combined signal. Adapter
    /// failures and timeouts degrade the aggregate; they are never raised.
    pub async fn evaluate(&self, event: &Event) -> AggregatedSignal {
        if self.adapters.is_empty() {
            tracing::warn!(event_id = %event.event_id, "no evidence sources configured");
            return combine(event.event_id.clone(), Vec::new(), self.config.max_missing_ratio);
        }

        let deadline = Duration::from_millis(self.config.deadline_ms);
        let mut tasks: JoinSet<(usize, Option<SignalReport>)> = JoinSet::new();

        for (idx, adapter) in self.adapters.iter().enumerate() {
            let adapter = adapter.clone();
            let event = event.clone();
            tasks.spawn(async move {
                let handle = tokio::task::spawn_blocking(move || adapter.invoke(&event));
                match timeout(deadline, handle).await {
                    Ok(Ok(report)) => (idx, Some(report)),
                    // Source panicked; the adapter's error path covers
                    // everything else.
                    Ok(Err(join_err)) => {
                        tracing::warn!(error = %join_err, "evidence source task aborted");
                        (idx, None)
                    }
                    // Deadline elapsed; the blocking task keeps running
                    // detached but nobody waits for it.
                    Err(_) => (idx, None),
                }
            });
        }

        let mut slots: Vec<Option<SignalReport>> = vec![None; self.adapters.len()];
        while let Some(joined) = tasks.join_next().await {
            if let Ok((idx, report)) = joined {
                slots[idx] = report;
            }
        }

        let reports: Vec<SignalReport> = slots
            .into_iter()
            .enumerate()
            .map(|(idx, slot)| {
                slot.unwrap_or_else(|| {
                    SourceAdapter::timeout_report(
                        &self.adapters[idx].source_name(),
                        self.config.deadline_ms,
                    )
                })
            })
            .collect();

        let signal = combine(event.event_id.clone(), reports, self.config.max_missing_ratio);
        tracing::debug!(
            event_id = %event.event_id,
            mean = ?signal.mean_score,
            disagreement = signal.disagreement,
            missing_ratio = signal.missing_ratio,
            quality = ?signal.quality,
            "signal aggregation complete"
        );
        signal
    }
}

/// Combine collected reports into the immutable aggregate.
///
/// Disagreement is the maximum pairwise absolute difference between OK
/// scores: exact for small source counts and needs no normalization.
pub fn combine(
    event_id: EventId,
    reports: Vec<SignalReport>,
    max_missing_ratio: f64,
) -> AggregatedSignal {
    let total = reports.len();
    let ok_scores: Vec<f64> = reports.iter().filter_map(|r| r.score).collect();
    let missing = total - ok_scores.len();

    let missing_ratio = if total == 0 {
        1.0
    } else {
        missing as f64 / total as f64
    };

    let mean_score = if ok_scores.is_empty() {
        None
    } else {
        Some(ok_scores.iter().sum::<f64>() / ok_scores.len() as f64)
    };

    let mut disagreement: f64 = 0.0;
    for i in 0..ok_scores.len() {
        for j in (i + 1)..ok_scores.len() {
            disagreement = disagreement.max((ok_scores[i] - ok_scores[j]).abs());
        }
    }

    let quality = if total == 0 || missing_ratio > max_missing_ratio {
        SignalQuality::InsufficientSignal
    } else {
        SignalQuality::Sufficient
    };

    AggregatedSignal {
        event_id,
        reports,
        mean_score,
        disagreement,
        missing_ratio,
        quality,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Instant;
    use vigil_core::{
        SessionId, SignalStatus, SourceScore, SubjectId, Timestamp, VigilError, VigilResult,
    };

    struct FixedSource {
        name: String,
        score: f64,
    }

    impl EvidenceSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn score(&self, _event: &Event) -> VigilResult<SourceScore> {
            Ok(SourceScore {
                score: self.score,
                evidence: BTreeMap::new(),
            })
        }
    }

    struct SlowSource {
        name: String,
        delay_ms: u64,
        score: f64,
    }

    impl EvidenceSource for SlowSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn score(&self, _event: &Event) -> VigilResult<SourceScore> {
            std::thread::sleep(Duration::from_millis(self.delay_ms));
            Ok(SourceScore {
                score: self.score,
                evidence: BTreeMap::new(),
            })
        }
    }

    struct BrokenSource;

    impl EvidenceSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn score(&self, _event: &Event) -> VigilResult<SourceScore> {
            Err(VigilError::Signal("model endpoint unreachable".into()))
        }
    }

    fn fixed(name: &str, score: f64) -> Arc<dyn EvidenceSource> {
        Arc::new(FixedSource {
            name: name.into(),
            score,
        })
    }

    fn test_event() -> Event {
        Event {
            event_id: EventId::new("evt-1"),
            subject_id: SubjectId::new("sub-1"),
            session_id: SessionId::new("sess-1"),
            occurred_at: Timestamp::now(),
            attributes: BTreeMap::new(),
        }
    }

    fn report(source: &str, score: Option<f64>, status: SignalStatus) -> SignalReport {
        SignalReport {
            source: source.into(),
            score,
            evidence: BTreeMap::new(),
            status,
            latency_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_all_sources_report() {
        let aggregator = SignalAggregator::new(
            vec![
                fixed("detection", 0.9),
                fixed("behavior", 0.88),
                fixed("network", 0.91),
            ],
            AggregatorConfig::default(),
        );

        let signal = aggregator.evaluate(&test_event()).await;
        assert_eq!(signal.reports.len(), 3);
        assert_eq!(signal.quality, SignalQuality::Sufficient);
        assert!((signal.mean_score.unwrap() - 0.896_666).abs() < 1e-3);
        assert!((signal.disagreement - 0.03).abs() < 1e-9);
        assert_eq!(signal.missing_ratio, 0.0);
    }

    #[tokio::test]
    async fn test_reports_keep_configured_order() {
        let aggregator = SignalAggregator::new(
            vec![fixed("a", 0.1), fixed("b", 0.2), fixed("c", 0.3)],
            AggregatorConfig::default(),
        );
        let signal = aggregator.evaluate(&test_event()).await;
        let names: Vec<&str> = signal.reports.iter().map(|r| r.source.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_slow_source_times_out() {
        let aggregator = SignalAggregator::new(
            vec![
                fixed("detection", 0.5),
                Arc::new(SlowSource {
                    name: "behavior".into(),
                    delay_ms: 5_000,
                    score: 0.5,
                }),
                fixed("network", 0.6),
            ],
            AggregatorConfig {
                deadline_ms: 50,
                max_missing_ratio: 0.5,
            },
        );

        let start = Instant::now();
        let signal = aggregator.evaluate(&test_event()).await;
        // Returns near the deadline, not near the source's 5s hang.
        assert!(start.elapsed() < Duration::from_millis(1_500));

        let behavior = &signal.reports[1];
        assert_eq!(behavior.status, SignalStatus::Timeout);
        assert!(behavior.score.is_none());
        assert!((signal.missing_ratio - 1.0 / 3.0).abs() < 1e-9);
        assert_eq!(signal.quality, SignalQuality::Sufficient);
    }

    #[tokio::test]
    async fn test_missing_ratio_above_threshold_is_insufficient() {
        let aggregator = SignalAggregator::new(
            vec![
                fixed("detection", 0.5),
                Arc::new(BrokenSource),
                Arc::new(SlowSource {
                    name: "behavior".into(),
                    delay_ms: 5_000,
                    score: 0.5,
                }),
            ],
            AggregatorConfig {
                deadline_ms: 50,
                max_missing_ratio: 0.5,
            },
        );

        let signal = aggregator.evaluate(&test_event()).await;
        assert!((signal.missing_ratio - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(signal.quality, SignalQuality::InsufficientSignal);
        assert_eq!(signal.mean_score, Some(0.5));
    }

    #[tokio::test]
    async fn test_single_timeout_with_tight_threshold() {
        // Two OK reports remain but the configured threshold treats even one
        // missing source as insufficient.
        let aggregator = SignalAggregator::new(
            vec![
                fixed("detection", 0.4),
                fixed("network", 0.45),
                Arc::new(SlowSource {
                    name: "behavior".into(),
                    delay_ms: 5_000,
                    score: 0.5,
                }),
            ],
            AggregatorConfig {
                deadline_ms: 50,
                max_missing_ratio: 0.25,
            },
        );

        let signal = aggregator.evaluate(&test_event()).await;
        assert_eq!(signal.quality, SignalQuality::InsufficientSignal);
    }

    #[tokio::test]
    async fn test_no_sources_is_insufficient() {
        let aggregator = SignalAggregator::new(vec![], AggregatorConfig::default());
        let signal = aggregator.evaluate(&test_event()).await;
        assert_eq!(signal.quality, SignalQuality::InsufficientSignal);
        assert_eq!(signal.missing_ratio, 1.0);
        assert!(signal.mean_score.is_none());
    }

    #[test]
    fn test_combine_missing_ratio_boundary() {
        // Exactly at the threshold stays sufficient; the mark requires
        // strictly greater.
        let reports = vec![
            report("a", Some(0.5), SignalStatus::Ok),
            report("b", None, SignalStatus::Timeout),
        ];
        let signal = combine(EventId::new("evt-1"), reports, 0.5);
        assert_eq!(signal.missing_ratio, 0.5);
        assert_eq!(signal.quality, SignalQuality::Sufficient);
    }

    #[test]
    fn test_combine_disagreement_is_max_pairwise() {
        let reports = vec![
            report("a", Some(0.2), SignalStatus::Ok),
            report("b", Some(0.85), SignalStatus::Ok),
            report("c", Some(0.5), SignalStatus::Ok),
        ];
        let signal = combine(EventId::new("evt-1"), reports, 0.5);
        assert!((signal.disagreement - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_combine_single_ok_report_has_no_disagreement() {
        let reports = vec![report("a", Some(0.7), SignalStatus::Ok)];
        let signal = combine(EventId::new("evt-1"), reports, 0.5);
        assert_eq!(signal.disagreement, 0.0);
        assert_eq!(signal.mean_score, Some(0.7));
    }
}
