//! Tamper-evident audit trail over dual storage backends.
//!
//! Every committed decision, human override, and escalation lifecycle event
//! becomes one hash-chained entry in an append-only JSONL log partitioned by
//! (environment, UTC date). A denormalized fast index serves id, subject,
//! and session lookups. The log is ground truth and the index is a derived
//! cache, which fixes the failure semantics: log-write failure fails the
//! evaluation closed, index-write failure is absorbed and repaired by
//! reconciliation.

pub mod entry;
pub mod error;
pub mod index;
pub mod log;
pub mod trail;

pub use entry::{AuditEntry, AuditPayload, EscalationStatus};
pub use error::{AuditError, AuditResult};
pub use index::{MemoryIndex, SqliteIndex};
pub use log::{JsonlLog, MemoryLog};
pub use trail::{AuditTrail, AuditTrailConfig, ChainReport, RetryPolicy, TamperFinding};
