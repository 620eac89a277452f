//! Signal aggregation: concurrent fan-out to independent evidence sources.
//!
//! Each scoring collaborator sits behind a narrow `EvidenceSource` seam and
//! is invoked blind to every other source. The aggregator enforces one
//! deadline per invocation and degrades gracefully: timeouts and failures
//! become TIMEOUT/ERROR reports that lower signal quality instead of
//! propagating. A missing ratio above the configured threshold marks the
//! aggregate INSUFFICIENT_SIGNAL, which the confidence gate treats as
//! forcing human review.

pub mod adapter;
pub mod aggregator;

pub use adapter::SourceAdapter;
pub use aggregator::{combine, AggregatorConfig, SignalAggregator};
