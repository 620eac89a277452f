use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use vigil_core::{
    Action, Decision, DecisionId, EntityKind, EntryHash, EntryId, EscalationId, EventId, Override,
    PartitionKey, SessionId, SubjectId, Timestamp,
};
use vigil_policy::PolicyViolation;

use crate::error::AuditResult;

// ---------------------------------------------------------------------------
// AuditPayload — what one entry records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EscalationStatus {
    Raised,
    Resolved,
}

impl fmt::Display for EscalationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EscalationStatus::Raised => write!(f, "RAISED"),
            EscalationStatus::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// One of the four record kinds the trail persists. Maps carry BTreeMap so
/// serialization order is stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditPayload {
    Decision {
        decision: Decision,
        violations: Vec<PolicyViolation>,
    },
    Override {
        override_record: Override,
        subject_id: SubjectId,
        session_id: SessionId,
        original_action: Action,
        original_confidence: f64,
    },
    Escalation {
        escalation_id: EscalationId,
        decision_id: DecisionId,
        subject_id: SubjectId,
        session_id: SessionId,
        status: EscalationStatus,
        reason: String,
    },
    System {
        description: String,
        #[serde(default)]
        metadata: BTreeMap<String, String>,
    },
}

impl AuditPayload {
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            AuditPayload::Decision { .. } => EntityKind::Decision,
            AuditPayload::Override { .. } => EntityKind::Override,
            AuditPayload::Escalation { .. } => EntityKind::Escalation,
            AuditPayload::System { .. } => EntityKind::System,
        }
    }

    /// The id the fast index keys this payload under.
    pub fn entity_id(&self) -> Option<String> {
        match self {
            AuditPayload::Decision { decision, .. } => Some(decision.decision_id.0.clone()),
            AuditPayload::Override {
                override_record, ..
            } => Some(override_record.override_id.0.clone()),
            AuditPayload::Escalation { escalation_id, .. } => Some(escalation_id.0.clone()),
            AuditPayload::System { .. } => None,
        }
    }

    pub fn event_id(&self) -> Option<&EventId> {
        match self {
            AuditPayload::Decision { decision, .. } => Some(&decision.event_id),
            _ => None,
        }
    }

    pub fn subject_id(&self) -> Option<&SubjectId> {
        match self {
            AuditPayload::Decision { decision, .. } => Some(&decision.subject_id),
            AuditPayload::Override { subject_id, .. } => Some(subject_id),
            AuditPayload::Escalation { subject_id, .. } => Some(subject_id),
            AuditPayload::System { .. } => None,
        }
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            AuditPayload::Decision { decision, .. } => Some(&decision.session_id),
            AuditPayload::Override { session_id, .. } => Some(session_id),
            AuditPayload::Escalation { session_id, .. } => Some(session_id),
            AuditPayload::System { .. } => None,
        }
    }
}

// ---------------------------------------------------------------------------
// AuditEntry — the hash-chained persisted unit
// ---------------------------------------------------------------------------

/// One persisted line of the immutable log.
///
/// `entry_hash = SHA256(body || previous_hash)` where body is the entry
/// serialized without its hash fields, in declared field order. Any change
/// to a stored entry, or to the order of entries, breaks the chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: EntryId,
    pub partition: PartitionKey,
    pub recorded_at: Timestamp,
    pub payload: AuditPayload,
    pub previous_hash: EntryHash,
    pub entry_hash: EntryHash,
}

/// The hashed portion of an entry. Field order here is the canonical
/// serialization order; changing it invalidates every existing chain.
#[derive(Serialize)]
struct EntryBody<'a> {
    entry_id: &'a EntryId,
    partition: &'a PartitionKey,
    recorded_at: &'a Timestamp,
    payload: &'a AuditPayload,
}

fn compute_hash(body: &[u8], previous: &EntryHash) -> EntryHash {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(previous.0);
    let digest = hasher.finalize();
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    EntryHash(out)
}

impl AuditEntry {
    /// Build a sealed entry: serialize the body deterministically and chain
    /// it onto `previous_hash`.
    pub fn seal(
        entry_id: EntryId,
        partition: PartitionKey,
        recorded_at: Timestamp,
        payload: AuditPayload,
        previous_hash: EntryHash,
    ) -> AuditResult<Self> {
        let body = serde_json::to_vec(&EntryBody {
            entry_id: &entry_id,
            partition: &partition,
            recorded_at: &recorded_at,
            payload: &payload,
        })?;
        let entry_hash = compute_hash(&body, &previous_hash);
        Ok(Self {
            entry_id,
            partition,
            recorded_at,
            payload,
            previous_hash,
            entry_hash,
        })
    }

    /// Recompute this entry's hash from its stored fields.
    pub fn recomputed_hash(&self) -> AuditResult<EntryHash> {
        let body = serde_json::to_vec(&EntryBody {
            entry_id: &self.entry_id,
            partition: &self.partition,
            recorded_at: &self.recorded_at,
            payload: &self.payload,
        })?;
        Ok(compute_hash(&body, &self.previous_hash))
    }

    pub fn to_jsonl(&self) -> AuditResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_jsonl(line: &str) -> AuditResult<Self> {
        Ok(serde_json::from_str(line)?)
    }
}
