use std::collections::BTreeMap;

use crate::error::VigilResult;
use crate::types::{
    EntryId, Event, AggregatedSignal, Action, PartitionKey, SessionId, SubjectId, Timestamp,
};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EvidenceSource — one scoring collaborator behind a narrow interface
//
// Sources are blind to each other: no shared state, no cross-source
// references. The aggregator enforces the deadline, not the source.
// ---------------------------------------------------------------------------

/// A raw score plus evidence links from one scoring collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceScore {
    /// Risk score in [0, 1]. Values outside the range are rejected by the
    /// adapter wrapper, not clamped.
    pub score: f64,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
}

pub trait EvidenceSource: Send + Sync {
    fn name(&self) -> &str;
    fn score(&self, event: &Event) -> VigilResult<SourceScore>;
}

// ---------------------------------------------------------------------------
// ActionPlanner — the action/explanation collaborator
//
// Given an AI_ALLOWED verdict plus the aggregated signal, proposes an
// action and a human-readable rationale. Opaque to the core.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedAction {
    pub action: Action,
    pub rationale: String,
}

pub trait ActionPlanner: Send + Sync {
    fn propose(&self, event: &Event, signal: &AggregatedSignal) -> VigilResult<ProposedAction>;
}

// ---------------------------------------------------------------------------
// ImmutableLog — append-only newline-delimited JSON storage per partition
//
// The log is the ground truth of the audit trail. Hashing and chain
// discipline live above this interface; implementations only append and
// read raw lines.
// ---------------------------------------------------------------------------

pub trait ImmutableLog: Send + Sync {
    /// Append one serialized entry line to the partition. Must be durable
    /// before returning.
    fn append(&self, partition: &PartitionKey, line: &str) -> VigilResult<()>;

    /// Read every line of the partition in append order.
    fn read_all(&self, partition: &PartitionKey) -> VigilResult<Vec<String>>;

    fn partitions(&self) -> VigilResult<Vec<PartitionKey>>;
}

// ---------------------------------------------------------------------------
// FastIndex — denormalized lookup rows derived from the log
//
// Always rebuildable from the log, never the reverse. Upserts are
// idempotent keyed by (entity, id) so concurrent writers and
// reconciliation passes converge.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Decision,
    Override,
    Escalation,
    System,
}

/// One denormalized index row. `entry_json` carries the full audit entry so
/// id lookups never touch the log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexRecord {
    pub entity: EntityKind,
    pub id: String,
    pub entry_id: EntryId,
    pub partition: PartitionKey,
    pub event_id: Option<String>,
    pub subject_id: Option<SubjectId>,
    pub session_id: Option<SessionId>,
    pub recorded_at: Timestamp,
    /// Operational rows expire; regulatory ground truth lives in the log.
    pub expires_at: Option<Timestamp>,
    pub entry_json: String,
}

pub trait FastIndex: Send + Sync {
    fn upsert(&self, record: &IndexRecord) -> VigilResult<()>;

    fn get(&self, entity: EntityKind, id: &str) -> VigilResult<Option<IndexRecord>>;

    /// Look up the decision row recorded for an event, if any.
    fn get_by_event(&self, entity: EntityKind, event_id: &str) -> VigilResult<Option<IndexRecord>>;

    fn query_by_subject(&self, subject_id: &SubjectId, limit: usize)
        -> VigilResult<Vec<IndexRecord>>;

    fn query_by_session(&self, session_id: &SessionId) -> VigilResult<Vec<IndexRecord>>;

    /// Remove expired rows. Returns how many were purged.
    fn purge_expired(&self, now: Timestamp) -> VigilResult<u64>;
}
