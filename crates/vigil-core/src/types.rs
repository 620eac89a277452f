use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// Timestamp — canonical time representation (seconds + nanoseconds)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp {
    pub seconds_since_epoch: u64,
    pub nanoseconds: u32,
}

impl Timestamp {
    pub fn now() -> Self {
        let now = chrono::Utc::now();
        Self {
            seconds_since_epoch: now.timestamp() as u64,
            nanoseconds: now.timestamp_subsec_nanos(),
        }
    }

    pub fn from_seconds(seconds: u64) -> Self {
        Self {
            seconds_since_epoch: seconds,
            nanoseconds: 0,
        }
    }

    pub fn to_rfc3339(&self) -> String {
        let dt =
            chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, self.nanoseconds);
        dt.map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "invalid".to_string())
    }

    /// UTC calendar date of this timestamp, as `YYYY-MM-DD`.
    /// Used for audit log partitioning.
    pub fn utc_date(&self) -> String {
        chrono::DateTime::from_timestamp(self.seconds_since_epoch as i64, 0)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "invalid".to_string())
    }
}

impl From<chrono::DateTime<chrono::Utc>> for Timestamp {
    fn from(dt: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            seconds_since_epoch: dt.timestamp() as u64,
            nanoseconds: dt.timestamp_subsec_nanos(),
        }
    }
}

// ---------------------------------------------------------------------------
// Typed identifiers — prevent stringly-typed confusion
// ---------------------------------------------------------------------------

macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh id with the entity prefix.
            pub fn generate() -> Self {
                let hex = uuid::Uuid::new_v4().simple().to_string();
                Self(format!("{}_{}", $prefix, &hex[..12]))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

define_id!(EventId, "evt", "Unique identifier for an evaluated event.");
define_id!(SubjectId, "sub", "Unique identifier for the subject (account) of an event.");
define_id!(SessionId, "sess", "Unique identifier for the session an event belongs to.");
define_id!(DecisionId, "dec", "Unique identifier for a committed decision.");
define_id!(OverrideId, "ovr", "Unique identifier for a human override record.");
define_id!(EscalationId, "esc", "Unique identifier for an escalation case.");
define_id!(EntryId, "aud", "Unique identifier for an audit trail entry.");
define_id!(ReviewerId, "rev", "Unique identifier for a human reviewer.");

// ---------------------------------------------------------------------------
// PolicyVersion — monotonically increasing version number
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyVersion(pub u64);

impl PolicyVersion {
    pub fn initial() -> Self {
        Self(1)
    }

    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for PolicyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Action — the enforcement vocabulary, ordered by strictness
// ---------------------------------------------------------------------------

/// Exhaustive (no #[non_exhaustive]) so new actions force compile-time
/// review of all match sites.
///
/// Strictness order: Allow < Challenge < Block < PermanentBlock
/// < TerminateAccount < Escalate. Automatic transitions may only move
/// toward stricter actions; relaxation requires a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Allow,
    Challenge,
    Block,
    PermanentBlock,
    TerminateAccount,
    Escalate,
}

/// Whether an action may be taken autonomously or requires a human.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionClass {
    Routine,
    HumanOnly,
}

impl Action {
    fn ordinal(self) -> u8 {
        match self {
            Action::Allow => 0,
            Action::Challenge => 1,
            Action::Block => 2,
            Action::PermanentBlock => 3,
            Action::TerminateAccount => 4,
            Action::Escalate => 5,
        }
    }

    /// Irreversible actions are human-only regardless of configuration.
    pub fn class(self) -> ActionClass {
        match self {
            Action::PermanentBlock | Action::TerminateAccount => ActionClass::HumanOnly,
            Action::Allow | Action::Challenge | Action::Block | Action::Escalate => {
                ActionClass::Routine
            }
        }
    }

    /// True if `self` is at least as strict as `other`.
    pub fn at_least_as_strict_as(self, other: Action) -> bool {
        self.ordinal() >= other.ordinal()
    }

    /// An automated intervention is any action that changes the subject's
    /// experience without a human in the loop. ALLOW is non-intrusive and
    /// ESCALATE defers to a human, so neither counts.
    pub fn is_automated_intervention(self) -> bool {
        matches!(self, Action::Challenge | Action::Block)
    }
}

impl PartialOrd for Action {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Action {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Allow => write!(f, "ALLOW"),
            Action::Challenge => write!(f, "CHALLENGE"),
            Action::Block => write!(f, "BLOCK"),
            Action::PermanentBlock => write!(f, "PERMANENT_BLOCK"),
            Action::TerminateAccount => write!(f, "TERMINATE_ACCOUNT"),
            Action::Escalate => write!(f, "ESCALATE"),
        }
    }
}

// ---------------------------------------------------------------------------
// DecidedBy — who made a decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecidedBy {
    Ai,
    Human,
    Policy,
}

impl fmt::Display for DecidedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecidedBy::Ai => write!(f, "AI"),
            DecidedBy::Human => write!(f, "HUMAN"),
            DecidedBy::Policy => write!(f, "POLICY"),
        }
    }
}

// ---------------------------------------------------------------------------
// Event — the immutable input record
// ---------------------------------------------------------------------------

/// Created by the caller, never mutated, referenced by id thereafter.
/// Attributes use a BTreeMap so serialization order is deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub event_id: EventId,
    pub subject_id: SubjectId,
    pub session_id: SessionId,
    pub occurred_at: Timestamp,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

// ---------------------------------------------------------------------------
// SignalReport — one evidence source's normalized output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalStatus {
    Ok,
    Timeout,
    Error,
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStatus::Ok => write!(f, "OK"),
            SignalStatus::Timeout => write!(f, "TIMEOUT"),
            SignalStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// One adapter's output for one event. `score` is present only when the
/// status is OK; timed-out and failed sources contribute no score and are
/// counted in the aggregate's missing ratio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalReport {
    pub source: String,
    pub score: Option<f64>,
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
    pub status: SignalStatus,
    pub latency_ms: u64,
}

impl SignalReport {
    pub fn is_ok(&self) -> bool {
        self.status == SignalStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// AggregatedSignal — the combined view of all reports for one event
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalQuality {
    Sufficient,
    InsufficientSignal,
}

/// Immutable once built. The derived statistics are computed exactly once
/// by the aggregator; downstream stages only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedSignal {
    pub event_id: EventId,
    pub reports: Vec<SignalReport>,
    /// Mean of OK scores. None when no source reported successfully.
    pub mean_score: Option<f64>,
    /// Maximum pairwise absolute difference between OK scores.
    pub disagreement: f64,
    /// Fraction of sources that produced no usable score.
    pub missing_ratio: f64,
    pub quality: SignalQuality,
}

impl AggregatedSignal {
    pub fn ok_scores(&self) -> Vec<f64> {
        self.reports.iter().filter_map(|r| r.score).collect()
    }

    pub fn is_insufficient(&self) -> bool {
        self.quality == SignalQuality::InsufficientSignal
    }
}

// ---------------------------------------------------------------------------
// Verdict — the confidence gate's output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authority {
    AiAllowed,
    HumanRequired,
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Authority::AiAllowed => write!(f, "AI_ALLOWED"),
            Authority::HumanRequired => write!(f, "HUMAN_REQUIRED"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateReason {
    ConfidentAgreement,
    LowConfidence,
    HighDisagreement,
    InsufficientSignal,
}

impl fmt::Display for GateReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateReason::ConfidentAgreement => write!(f, "confident_agreement"),
            GateReason::LowConfidence => write!(f, "low_confidence"),
            GateReason::HighDisagreement => write!(f, "high_disagreement"),
            GateReason::InsufficientSignal => write!(f, "insufficient_signal"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub authority: Authority,
    pub confidence: f64,
    pub reason: GateReason,
}

// ---------------------------------------------------------------------------
// Decision — the terminal record for one event
// ---------------------------------------------------------------------------

/// Once created it is never mutated. Corrections are represented as new
/// linked Override records, never edits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_id: DecisionId,
    pub event_id: EventId,
    pub subject_id: SubjectId,
    pub session_id: SessionId,
    pub action: Action,
    pub decided_by: DecidedBy,
    pub confidence: f64,
    pub policy_version: PolicyVersion,
    #[serde(default)]
    pub override_ref: Option<OverrideId>,
    pub decided_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Override — a human correction of a Decision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverrideKind {
    Approve,
    Reject,
    Modify,
    Defer,
}

impl fmt::Display for OverrideKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverrideKind::Approve => write!(f, "APPROVE"),
            OverrideKind::Reject => write!(f, "REJECT"),
            OverrideKind::Modify => write!(f, "MODIFY"),
            OverrideKind::Defer => write!(f, "DEFER"),
        }
    }
}

/// Append-only; linked to the original Decision by reference. The AI
/// decision is retained, never replaced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Override {
    pub override_id: OverrideId,
    pub decision_id: DecisionId,
    pub kind: OverrideKind,
    pub new_action: Action,
    pub reviewer_id: ReviewerId,
    pub reviewer_role: String,
    pub reason: String,
    pub created_at: Timestamp,
}

// ---------------------------------------------------------------------------
// EntryHash — SHA-256 digest linking audit entries into a chain
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryHash(#[serde(with = "hex_bytes")] pub [u8; 32]);

impl EntryHash {
    /// The fixed previous-hash value for the first entry in a partition.
    pub fn genesis() -> Self {
        Self([0u8; 32])
    }
}

impl fmt::Display for EntryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

// ---------------------------------------------------------------------------
// PartitionKey — one logical audit chain per (environment, UTC date)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PartitionKey {
    pub environment: String,
    pub date: String,
}

impl PartitionKey {
    pub fn new(environment: impl Into<String>, date: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            date: date.into(),
        }
    }

    pub fn for_timestamp(environment: &str, at: Timestamp) -> Self {
        Self {
            environment: environment.to_string(),
            date: at.utc_date(),
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.environment, self.date)
    }
}

// ---------------------------------------------------------------------------
// Hex serialization helper for fixed-size byte arrays
// ---------------------------------------------------------------------------

mod hex_bytes {
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S, const N: usize>(bytes: &[u8; N], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D, const N: usize>(deserializer: D) -> Result<[u8; N], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom(format!("expected {} bytes", N)))
    }
}
