use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use vigil_core::{
    Decision, DecisionId, EntityKind, EntryHash, EntryId, EscalationId, EventId, FastIndex,
    ImmutableLog, IndexRecord, Override, PartitionKey, SessionId, SubjectId, Timestamp,
};
use vigil_policy::PolicyViolation;

use crate::entry::{AuditEntry, AuditPayload, EscalationStatus};
use crate::error::{AuditError, AuditResult};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Bounded retry for the immutable-log write. Exhaustion fails the whole
/// evaluation; there is no silent unbounded retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 25,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditTrailConfig {
    /// Environment component of every partition key.
    pub environment: String,
    pub retry: RetryPolicy,
    /// TTL for operational index rows (escalations, system events).
    /// Decision and override rows never expire.
    pub index_ttl_secs: Option<u64>,
}

impl AuditTrailConfig {
    pub fn new(environment: impl Into<String>) -> Self {
        Self {
            environment: environment.into(),
            retry: RetryPolicy::default(),
            index_ttl_secs: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Verification report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TamperFinding {
    /// 1-based line number in the partition.
    pub line: usize,
    pub entry_id: Option<EntryId>,
    pub detail: String,
}

#[derive(Debug, Clone)]
pub struct ChainReport {
    pub partition: PartitionKey,
    pub entries: usize,
    pub findings: Vec<TamperFinding>,
}

impl ChainReport {
    pub fn is_intact(&self) -> bool {
        self.findings.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AuditTrail — single write/read API over both backends
// ---------------------------------------------------------------------------

/// Dual-backend audit trail.
///
/// The immutable log is ground truth; the fast index is a derived cache.
/// The write discipline follows from that asymmetry: the log write must
/// succeed (with bounded retries) before the index is touched, and an index
/// failure is absorbed because `reconcile` can always rebuild the row from
/// the log. A failed log write fails the evaluation closed.
///
/// Within one partition exactly one writer appends at a time: each
/// partition's chain head lives behind its own mutex, recovered lazily from
/// the log on first use. Evaluations touching different partitions never
/// contend.
pub struct AuditTrail {
    log: Arc<dyn ImmutableLog>,
    index: Arc<dyn FastIndex>,
    config: AuditTrailConfig,
    partitions: Mutex<HashMap<PartitionKey, Arc<Mutex<Option<PartitionState>>>>>,
    quarantined: Mutex<HashSet<PartitionKey>>,
}

/// Mutable per-partition writer state, recovered from the log on first use.
/// Guarded by the partition's own mutex — the single-writer discipline.
struct PartitionState {
    head: EntryHash,
    /// Event ids with a committed decision entry, for duplicate detection
    /// without rescanning the log on every append.
    decision_events: HashSet<String>,
}

impl AuditTrail {
    pub fn new(
        log: Arc<dyn ImmutableLog>,
        index: Arc<dyn FastIndex>,
        config: AuditTrailConfig,
    ) -> Self {
        Self {
            log,
            index,
            config,
            partitions: Mutex::new(HashMap::new()),
            quarantined: Mutex::new(HashSet::new()),
        }
    }

    pub fn environment(&self) -> &str {
        &self.config.environment
    }

    pub fn partition_for(&self, at: Timestamp) -> PartitionKey {
        PartitionKey::for_timestamp(&self.config.environment, at)
    }

    // -- write path ---------------------------------------------------------

    /// Record a committed decision. Idempotent on event id: if a decision
    /// entry for this event already exists, the previously committed entry
    /// is returned and nothing is appended.
    pub fn record_decision(
        &self,
        decision: &Decision,
        violations: &[PolicyViolation],
    ) -> AuditResult<AuditEntry> {
        if let Some(row) = self
            .index
            .get_by_event(EntityKind::Decision, decision.event_id.as_str())?
        {
            tracing::debug!(
                event_id = %decision.event_id,
                "duplicate decision submission, returning committed entry"
            );
            return AuditEntry::from_jsonl(&row.entry_json);
        }

        let partition = self.partition_for(decision.decided_at);
        self.ensure_not_quarantined(&partition)?;

        let lock = self.partition_lock(&partition);
        let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = self.recover_state(&partition, &mut guard)?;

        // The index may be behind the log (failed upsert not yet
        // reconciled); the recovered log state is the final word on
        // duplicates.
        if state.decision_events.contains(decision.event_id.as_str()) {
            for line in self.log.read_all(&partition)? {
                if let Ok(existing) = AuditEntry::from_jsonl(&line) {
                    if let AuditPayload::Decision { decision: d, .. } = &existing.payload {
                        if d.event_id == decision.event_id {
                            return Ok(existing);
                        }
                    }
                }
            }
        }

        let payload = AuditPayload::Decision {
            decision: decision.clone(),
            violations: violations.to_vec(),
        };
        let entry = self.append_locked(&partition, state, payload, decision.decided_at)?;
        state.decision_events.insert(decision.event_id.0.clone());
        Ok(entry)
    }

    /// Record a human override, linked to the original decision.
    pub fn record_override(
        &self,
        override_record: &Override,
        original: &Decision,
    ) -> AuditResult<AuditEntry> {
        let payload = AuditPayload::Override {
            override_record: override_record.clone(),
            subject_id: original.subject_id.clone(),
            session_id: original.session_id.clone(),
            original_action: original.action,
            original_confidence: original.confidence,
        };
        self.append(payload, override_record.created_at)
    }

    /// Record an escalation lifecycle event (raised or resolved).
    pub fn record_escalation(
        &self,
        escalation_id: &EscalationId,
        decision: &Decision,
        status: EscalationStatus,
        reason: impl Into<String>,
        at: Timestamp,
    ) -> AuditResult<AuditEntry> {
        let payload = AuditPayload::Escalation {
            escalation_id: escalation_id.clone(),
            decision_id: decision.decision_id.clone(),
            subject_id: decision.subject_id.clone(),
            session_id: decision.session_id.clone(),
            status,
            reason: reason.into(),
        };
        self.append(payload, at)
    }

    /// Record a system lifecycle event (startup, policy reload, ...).
    pub fn record_system(
        &self,
        description: impl Into<String>,
        metadata: BTreeMap<String, String>,
        at: Timestamp,
    ) -> AuditResult<AuditEntry> {
        let payload = AuditPayload::System {
            description: description.into(),
            metadata,
        };
        self.append(payload, at)
    }

    fn append(&self, payload: AuditPayload, at: Timestamp) -> AuditResult<AuditEntry> {
        let partition = self.partition_for(at);
        self.ensure_not_quarantined(&partition)?;

        let lock = self.partition_lock(&partition);
        let mut guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let state = self.recover_state(&partition, &mut guard)?;
        self.append_locked(&partition, state, payload, at)
    }

    /// Append one sealed entry: log first (bounded retries), index second
    /// (absorbed on failure). Must be called with the partition lock held.
    fn append_locked(
        &self,
        partition: &PartitionKey,
        state: &mut PartitionState,
        payload: AuditPayload,
        at: Timestamp,
    ) -> AuditResult<AuditEntry> {
        let entry = AuditEntry::seal(
            EntryId::generate(),
            partition.clone(),
            at,
            payload,
            state.head,
        )?;
        let line = entry.to_jsonl()?;

        let mut last_error = String::new();
        let mut written = false;
        for attempt in 1..=self.config.retry.max_attempts {
            match self.log.append(partition, &line) {
                Ok(()) => {
                    written = true;
                    break;
                }
                Err(err) => {
                    last_error = err.to_string();
                    tracing::warn!(
                        partition = %partition,
                        attempt,
                        error = %last_error,
                        "audit log append failed"
                    );
                    if attempt < self.config.retry.max_attempts {
                        std::thread::sleep(Duration::from_millis(
                            self.config.retry.backoff_ms * attempt as u64,
                        ));
                    }
                }
            }
        }

        if !written {
            return Err(AuditError::WriteFailure(format!(
                "log append to {} failed after {} attempts: {}",
                partition, self.config.retry.max_attempts, last_error
            )));
        }

        state.head = entry.entry_hash;

        // Index second. A failure here does not un-commit the entry; the
        // row is rebuilt from the log by `reconcile`.
        let record = self.index_record_for(&entry, &line);
        if let Err(err) = self.index.upsert(&record) {
            tracing::warn!(
                partition = %partition,
                entry_id = %entry.entry_id,
                error = %err,
                "fast-index upsert failed; reconciliation will rebuild the row"
            );
        }

        tracing::debug!(
            partition = %partition,
            entry_id = %entry.entry_id,
            hash = %entry.entry_hash,
            "audit entry committed"
        );
        Ok(entry)
    }

    fn index_record_for(&self, entry: &AuditEntry, line: &str) -> IndexRecord {
        let entity = entry.payload.entity_kind();
        let expires_at = match entity {
            // Lifecycle rows are operational metadata and may expire;
            // decision and override rows stay queryable for their lifetime.
            EntityKind::Escalation | EntityKind::System => self
                .config
                .index_ttl_secs
                .map(|ttl| Timestamp::from_seconds(entry.recorded_at.seconds_since_epoch + ttl)),
            EntityKind::Decision | EntityKind::Override => None,
        };

        IndexRecord {
            entity,
            id: entry
                .payload
                .entity_id()
                .unwrap_or_else(|| entry.entry_id.0.clone()),
            entry_id: entry.entry_id.clone(),
            partition: entry.partition.clone(),
            event_id: entry.payload.event_id().map(|e| e.0.clone()),
            subject_id: entry.payload.subject_id().cloned(),
            session_id: entry.payload.session_id().cloned(),
            recorded_at: entry.recorded_at,
            expires_at,
            entry_json: line.to_string(),
        }
    }

    // -- chain head management ---------------------------------------------

    fn partition_lock(&self, partition: &PartitionKey) -> Arc<Mutex<Option<PartitionState>>> {
        let mut partitions = self
            .partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        partitions
            .entry(partition.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone()
    }

    /// Recover a partition's writer state from the log the first time this
    /// process touches it: the chain head is the hash of the last entry,
    /// and every committed decision's event id is collected for duplicate
    /// detection.
    fn recover_state<'a>(
        &self,
        partition: &PartitionKey,
        cached: &'a mut Option<PartitionState>,
    ) -> AuditResult<&'a mut PartitionState> {
        match cached {
            Some(state) => Ok(state),
            None => {
                let mut state = PartitionState {
                    head: EntryHash::genesis(),
                    decision_events: HashSet::new(),
                };
                for line in self.log.read_all(partition)? {
                    let entry = AuditEntry::from_jsonl(&line)?;
                    state.head = entry.entry_hash;
                    if let AuditPayload::Decision { decision, .. } = entry.payload {
                        state.decision_events.insert(decision.event_id.0);
                    }
                }
                Ok(cached.insert(state))
            }
        }
    }

    // -- quarantine ---------------------------------------------------------

    fn ensure_not_quarantined(&self, partition: &PartitionKey) -> AuditResult<()> {
        let quarantined = self
            .quarantined
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if quarantined.contains(partition) {
            return Err(AuditError::Quarantined(partition.to_string()));
        }
        Ok(())
    }

    pub fn is_quarantined(&self, partition: &PartitionKey) -> bool {
        self.quarantined
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(partition)
    }

    /// Manually clear a quarantine after the partition has been inspected.
    /// The cached chain head is dropped so the next append re-reads the log.
    pub fn clear_quarantine(&self, partition: &PartitionKey) {
        self.quarantined
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(partition);
        self.partitions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(partition);
        tracing::info!(partition = %partition, "audit partition quarantine cleared");
    }

    // -- verification & reconciliation --------------------------------------

    /// Walk the partition and verify every hash and every link.
    ///
    /// Any mismatch is reported as a tamper finding and the partition is
    /// quarantined; nothing is ever silently corrected.
    pub fn verify_chain(&self, partition: &PartitionKey) -> AuditResult<ChainReport> {
        let lines = self.log.read_all(partition)?;
        let mut findings = Vec::new();
        let mut expected_previous = EntryHash::genesis();

        for (idx, line) in lines.iter().enumerate() {
            let line_no = idx + 1;
            let entry = match AuditEntry::from_jsonl(line) {
                Ok(entry) => entry,
                Err(err) => {
                    findings.push(TamperFinding {
                        line: line_no,
                        entry_id: None,
                        detail: format!("malformed entry: {}", err),
                    });
                    continue;
                }
            };

            if entry.partition != *partition {
                findings.push(TamperFinding {
                    line: line_no,
                    entry_id: Some(entry.entry_id.clone()),
                    detail: format!(
                        "entry belongs to partition {}, found in {}",
                        entry.partition, partition
                    ),
                });
            }

            if entry.previous_hash != expected_previous {
                findings.push(TamperFinding {
                    line: line_no,
                    entry_id: Some(entry.entry_id.clone()),
                    detail: format!(
                        "chain link broken: expected previous_hash {}, stored {}",
                        expected_previous, entry.previous_hash
                    ),
                });
            }

            match entry.recomputed_hash() {
                Ok(computed) if computed == entry.entry_hash => {}
                Ok(computed) => findings.push(TamperFinding {
                    line: line_no,
                    entry_id: Some(entry.entry_id.clone()),
                    detail: format!(
                        "entry hash mismatch: stored {}, recomputed {}",
                        entry.entry_hash, computed
                    ),
                }),
                Err(err) => findings.push(TamperFinding {
                    line: line_no,
                    entry_id: Some(entry.entry_id.clone()),
                    detail: format!("hash recomputation failed: {}", err),
                }),
            }

            // Follow the stored chain so one tampered entry yields one
            // finding instead of cascading through the rest.
            expected_previous = entry.entry_hash;
        }

        if !findings.is_empty() {
            tracing::error!(
                partition = %partition,
                findings = findings.len(),
                "audit chain integrity violation; partition quarantined"
            );
            self.quarantined
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(partition.clone());
        }

        Ok(ChainReport {
            partition: partition.clone(),
            entries: lines.len(),
            findings,
        })
    }

    /// Rebuild fast-index rows from the log. Returns how many missing rows
    /// were restored. The index is never treated as authoritative: rows are
    /// only ever written from what the log contains.
    pub fn reconcile(&self, partition: &PartitionKey) -> AuditResult<u64> {
        let mut rebuilt = 0;
        for line in self.log.read_all(partition)? {
            let entry = match AuditEntry::from_jsonl(&line) {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(partition = %partition, error = %err, "skipping malformed log line during reconciliation");
                    continue;
                }
            };

            let record = self.index_record_for(&entry, &line);
            if self.index.get(record.entity, &record.id)?.is_none() {
                self.index.upsert(&record)?;
                rebuilt += 1;
            }
        }

        if rebuilt > 0 {
            tracing::info!(partition = %partition, rebuilt, "fast index reconciled from log");
        }
        Ok(rebuilt)
    }

    // -- reads --------------------------------------------------------------

    pub fn entry(&self, entity: EntityKind, id: &str) -> AuditResult<Option<AuditEntry>> {
        match self.index.get(entity, id)? {
            Some(row) => Ok(Some(AuditEntry::from_jsonl(&row.entry_json)?)),
            None => Ok(None),
        }
    }

    pub fn decision_by_id(&self, id: &DecisionId) -> AuditResult<Option<AuditEntry>> {
        self.entry(EntityKind::Decision, id.as_str())
    }

    pub fn decision_for_event(&self, event_id: &EventId) -> AuditResult<Option<AuditEntry>> {
        match self
            .index
            .get_by_event(EntityKind::Decision, event_id.as_str())?
        {
            Some(row) => Ok(Some(AuditEntry::from_jsonl(&row.entry_json)?)),
            None => Ok(None),
        }
    }

    pub fn entries_for_subject(
        &self,
        subject_id: &SubjectId,
        limit: usize,
    ) -> AuditResult<Vec<AuditEntry>> {
        self.index
            .query_by_subject(subject_id, limit)?
            .iter()
            .map(|row| AuditEntry::from_jsonl(&row.entry_json))
            .collect()
    }

    pub fn entries_for_session(&self, session_id: &SessionId) -> AuditResult<Vec<AuditEntry>> {
        self.index
            .query_by_session(session_id)?
            .iter()
            .map(|row| AuditEntry::from_jsonl(&row.entry_json))
            .collect()
    }

    pub fn purge_expired(&self, now: Timestamp) -> AuditResult<u64> {
        Ok(self.index.purge_expired(now)?)
    }

    pub fn partitions(&self) -> AuditResult<Vec<PartitionKey>> {
        Ok(self.log.partitions()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::MemoryIndex;
    use crate::log::{JsonlLog, MemoryLog};
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use vigil_core::{Action, DecidedBy, PolicyVersion, VigilError, VigilResult};

    struct FailingLog {
        attempts: AtomicU32,
    }

    impl FailingLog {
        fn new() -> Self {
            Self {
                attempts: AtomicU32::new(0),
            }
        }
    }

    impl ImmutableLog for FailingLog {
        fn append(&self, _partition: &PartitionKey, _line: &str) -> VigilResult<()> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Err(VigilError::Storage("disk full".into()))
        }

        fn read_all(&self, _partition: &PartitionKey) -> VigilResult<Vec<String>> {
            Ok(Vec::new())
        }

        fn partitions(&self) -> VigilResult<Vec<PartitionKey>> {
            Ok(Vec::new())
        }
    }

    /// Index whose upserts can be switched off to simulate backend outage.
    struct FlakyIndex {
        inner: MemoryIndex,
        fail_upserts: AtomicBool,
    }

    impl FlakyIndex {
        fn new() -> Self {
            Self {
                inner: MemoryIndex::new(),
                fail_upserts: AtomicBool::new(false),
            }
        }
    }

    impl FastIndex for FlakyIndex {
        fn upsert(&self, record: &IndexRecord) -> VigilResult<()> {
            if self.fail_upserts.load(Ordering::SeqCst) {
                return Err(VigilError::Storage("index unavailable".into()));
            }
            self.inner.upsert(record)
        }

        fn get(&self, entity: EntityKind, id: &str) -> VigilResult<Option<IndexRecord>> {
            self.inner.get(entity, id)
        }

        fn get_by_event(
            &self,
            entity: EntityKind,
            event_id: &str,
        ) -> VigilResult<Option<IndexRecord>> {
            self.inner.get_by_event(entity, event_id)
        }

        fn query_by_subject(
            &self,
            subject_id: &SubjectId,
            limit: usize,
        ) -> VigilResult<Vec<IndexRecord>> {
            self.inner.query_by_subject(subject_id, limit)
        }

        fn query_by_session(&self, session_id: &SessionId) -> VigilResult<Vec<IndexRecord>> {
            self.inner.query_by_session(session_id)
        }

        fn purge_expired(&self, now: Timestamp) -> VigilResult<u64> {
            self.inner.purge_expired(now)
        }
    }

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            backoff_ms: 1,
        }
    }

    fn memory_trail() -> AuditTrail {
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        AuditTrail::new(
            Arc::new(MemoryLog::new()),
            Arc::new(MemoryIndex::new()),
            config,
        )
    }

    fn decision(id: &str, event: &str, action: Action) -> Decision {
        Decision {
            decision_id: DecisionId::new(id),
            event_id: EventId::new(event),
            subject_id: SubjectId::new("sub-1"),
            session_id: SessionId::new("sess-1"),
            action,
            decided_by: DecidedBy::Ai,
            confidence: 0.9,
            policy_version: PolicyVersion::initial(),
            override_ref: None,
            decided_at: Timestamp::from_seconds(1_700_000_000),
        }
    }

    #[test]
    fn test_entries_chain_in_append_order() {
        let trail = memory_trail();
        let first = trail
            .record_decision(&decision("dec-1", "evt-1", Action::Allow), &[])
            .unwrap();
        let second = trail
            .record_decision(&decision("dec-2", "evt-2", Action::Challenge), &[])
            .unwrap();
        let third = trail
            .record_decision(&decision("dec-3", "evt-3", Action::Block), &[])
            .unwrap();

        assert_eq!(first.previous_hash, EntryHash::genesis());
        assert_eq!(second.previous_hash, first.entry_hash);
        assert_eq!(third.previous_hash, second.entry_hash);

        let partition = trail.partition_for(Timestamp::from_seconds(1_700_000_000));
        let report = trail.verify_chain(&partition).unwrap();
        assert!(report.is_intact());
        assert_eq!(report.entries, 3);
    }

    #[test]
    fn test_duplicate_decision_submission_is_idempotent() {
        let trail = memory_trail();
        let d = decision("dec-1", "evt-1", Action::Allow);
        let first = trail.record_decision(&d, &[]).unwrap();

        // Second submission for the same event: even with a fresh decision
        // id, the committed entry comes back and nothing new is appended.
        let resubmit = decision("dec-99", "evt-1", Action::Allow);
        let second = trail.record_decision(&resubmit, &[]).unwrap();

        assert_eq!(second.entry_id, first.entry_id);
        assert_eq!(second.entry_hash, first.entry_hash);

        let partition = trail.partition_for(d.decided_at);
        assert_eq!(trail.verify_chain(&partition).unwrap().entries, 1);
    }

    #[test]
    fn test_duplicate_detected_from_log_when_index_is_behind() {
        let index = Arc::new(FlakyIndex::new());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        let trail = AuditTrail::new(Arc::new(MemoryLog::new()), index.clone(), config);

        index.fail_upserts.store(true, Ordering::SeqCst);
        let first = trail
            .record_decision(&decision("dec-1", "evt-1", Action::Allow), &[])
            .unwrap();
        index.fail_upserts.store(false, Ordering::SeqCst);

        // The index never saw evt-1; the log scan still finds it.
        let second = trail
            .record_decision(&decision("dec-2", "evt-1", Action::Allow), &[])
            .unwrap();
        assert_eq!(second.entry_id, first.entry_id);
    }

    #[test]
    fn test_log_write_failure_fails_closed_after_retries() {
        let log = Arc::new(FailingLog::new());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        let index = Arc::new(MemoryIndex::new());
        let trail = AuditTrail::new(log.clone(), index.clone(), config);

        let d = decision("dec-1", "evt-1", Action::Allow);
        let err = trail.record_decision(&d, &[]).unwrap_err();
        assert!(matches!(err, AuditError::WriteFailure(_)));
        assert_eq!(log.attempts.load(Ordering::SeqCst), 3);

        // Nothing was committed anywhere.
        assert!(trail.decision_for_event(&d.event_id).unwrap().is_none());
        assert!(index
            .get(EntityKind::Decision, "dec-1")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_index_failure_is_absorbed_and_reconciled() {
        let index = Arc::new(FlakyIndex::new());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        let trail = AuditTrail::new(Arc::new(MemoryLog::new()), index.clone(), config);

        index.fail_upserts.store(true, Ordering::SeqCst);
        let d = decision("dec-1", "evt-1", Action::Allow);
        // The append succeeds: the log write stands even though the index
        // write failed.
        let entry = trail.record_decision(&d, &[]).unwrap();
        assert!(trail.decision_by_id(&d.decision_id).unwrap().is_none());

        index.fail_upserts.store(false, Ordering::SeqCst);
        let rebuilt = trail.reconcile(&entry.partition).unwrap();
        assert_eq!(rebuilt, 1);

        let restored = trail.decision_by_id(&d.decision_id).unwrap().unwrap();
        assert_eq!(restored.entry_hash, entry.entry_hash);
    }

    #[test]
    fn test_reconcile_is_idempotent() {
        let trail = memory_trail();
        let entry = trail
            .record_decision(&decision("dec-1", "evt-1", Action::Allow), &[])
            .unwrap();
        assert_eq!(trail.reconcile(&entry.partition).unwrap(), 0);
    }

    #[test]
    fn test_tampered_log_file_is_detected_and_quarantined() {
        let dir = std::env::temp_dir().join(format!(
            "vigil-test-tamper-{:?}-{}",
            std::thread::current().id(),
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        let log = Arc::new(JsonlLog::open(&dir).unwrap());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        let trail = AuditTrail::new(log, Arc::new(MemoryIndex::new()), config);

        let d1 = decision("dec-1", "evt-1", Action::Allow);
        trail.record_decision(&d1, &[]).unwrap();
        trail
            .record_decision(&decision("dec-2", "evt-2", Action::Block), &[])
            .unwrap();

        let partition = trail.partition_for(d1.decided_at);
        assert!(trail.verify_chain(&partition).unwrap().is_intact());

        // Tamper with the stored payload of the first entry.
        let file = dir.join(format!("vigil_audit_test_{}.jsonl", partition.date));
        let contents = std::fs::read_to_string(&file).unwrap();
        let tampered = contents.replacen("\"ALLOW\"", "\"BLOCK\"", 1);
        assert_ne!(contents, tampered);
        std::fs::write(&file, tampered).unwrap();

        let report = trail.verify_chain(&partition).unwrap();
        assert!(!report.is_intact());
        assert!(report.findings.iter().any(|f| f.detail.contains("hash mismatch")));
        assert!(trail.is_quarantined(&partition));

        // Appends are rejected until the quarantine is cleared.
        let err = trail
            .record_decision(&decision("dec-3", "evt-3", Action::Allow), &[])
            .unwrap_err();
        assert!(matches!(err, AuditError::Quarantined(_)));

        trail.clear_quarantine(&partition);
        assert!(!trail.is_quarantined(&partition));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_deleted_line_breaks_the_chain() {
        let trail = memory_trail();
        let log = MemoryLog::new();
        let partition = PartitionKey::new("test", "2023-11-14");

        // Build three chained entries by hand, then drop the middle one.
        let d1 = decision("dec-1", "evt-1", Action::Allow);
        let e1 = trail.record_decision(&d1, &[]).unwrap();
        let e2 = trail
            .record_decision(&decision("dec-2", "evt-2", Action::Allow), &[])
            .unwrap();
        let e3 = trail
            .record_decision(&decision("dec-3", "evt-3", Action::Allow), &[])
            .unwrap();

        log.append(&partition, &e1.to_jsonl().unwrap()).unwrap();
        log.append(&partition, &e3.to_jsonl().unwrap()).unwrap();
        drop(e2);

        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        let gapped = AuditTrail::new(Arc::new(log), Arc::new(MemoryIndex::new()), config);
        let report = gapped.verify_chain(&partition).unwrap();
        assert!(!report.is_intact());
        assert!(report
            .findings
            .iter()
            .any(|f| f.detail.contains("chain link broken")));
    }

    #[test]
    fn test_escalation_and_system_rows_carry_ttl() {
        let index = Arc::new(MemoryIndex::new());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();
        config.index_ttl_secs = Some(3_600);
        let trail = AuditTrail::new(Arc::new(MemoryLog::new()), index.clone(), config);

        let d = decision("dec-1", "evt-1", Action::Escalate);
        trail.record_decision(&d, &[]).unwrap();
        let esc = EscalationId::new("esc-1");
        trail
            .record_escalation(
                &esc,
                &d,
                EscalationStatus::Raised,
                "low_confidence",
                d.decided_at,
            )
            .unwrap();

        let decision_row = index.get(EntityKind::Decision, "dec-1").unwrap().unwrap();
        assert!(decision_row.expires_at.is_none());

        let escalation_row = index.get(EntityKind::Escalation, "esc-1").unwrap().unwrap();
        let expires = escalation_row.expires_at.unwrap();
        assert_eq!(
            expires.seconds_since_epoch,
            d.decided_at.seconds_since_epoch + 3_600
        );
    }

    #[test]
    fn test_override_entry_links_to_decision() {
        let trail = memory_trail();
        let d = decision("dec-1", "evt-1", Action::Escalate);
        trail.record_decision(&d, &[]).unwrap();

        let ovr = Override {
            override_id: vigil_core::OverrideId::new("ovr-1"),
            decision_id: d.decision_id.clone(),
            kind: vigil_core::OverrideKind::Reject,
            new_action: Action::Allow,
            reviewer_id: vigil_core::ReviewerId::new("rev-1"),
            reviewer_role: "fraud_analyst".into(),
            reason: "confirmed legitimate travel".into(),
            created_at: Timestamp::from_seconds(1_700_000_100),
        };
        let entry = trail.record_override(&ovr, &d).unwrap();

        match &entry.payload {
            AuditPayload::Override {
                override_record,
                original_action,
                ..
            } => {
                assert_eq!(override_record.decision_id, d.decision_id);
                assert_eq!(*original_action, Action::Escalate);
            }
            other => panic!("expected override payload, got {:?}", other),
        }

        // Both the decision and the override show up on the session view.
        let session_entries = trail
            .entries_for_session(&SessionId::new("sess-1"))
            .unwrap();
        assert_eq!(session_entries.len(), 2);
    }

    #[test]
    fn test_subject_lookup_returns_entries() {
        let trail = memory_trail();
        trail
            .record_decision(&decision("dec-1", "evt-1", Action::Allow), &[])
            .unwrap();
        trail
            .record_decision(&decision("dec-2", "evt-2", Action::Challenge), &[])
            .unwrap();

        let entries = trail
            .entries_for_subject(&SubjectId::new("sub-1"), 10)
            .unwrap();
        assert_eq!(entries.len(), 2);
        assert!(trail
            .entries_for_subject(&SubjectId::new("sub-unknown"), 10)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_head_recovered_from_existing_log() {
        let log = Arc::new(MemoryLog::new());
        let index = Arc::new(MemoryIndex::new());
        let mut config = AuditTrailConfig::new("test");
        config.retry = fast_retry();

        let first_entry = {
            let trail = AuditTrail::new(log.clone(), index.clone(), config.clone());
            trail
                .record_decision(&decision("dec-1", "evt-1", Action::Allow), &[])
                .unwrap()
        };

        // A fresh trail over the same backends continues the chain instead
        // of restarting from genesis.
        let trail = AuditTrail::new(log, index, config);
        let next = trail
            .record_decision(&decision("dec-2", "evt-2", Action::Allow), &[])
            .unwrap();
        assert_eq!(next.previous_hash, first_entry.entry_hash);
    }
}
