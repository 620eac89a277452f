//! Vigil root library.
//!
//! Wires the subsystem crates into one governed decision pipeline:
//! signal aggregation fans out to the configured evidence sources, the
//! confidence gate decides whether automation may act, the policy engine
//! enforces deterministic safety rules over the chosen action, and the
//! audit trail commits a hash-chained record before any caller sees a
//! result. The `ReviewDesk` is the human override channel over the same
//! policy and audit machinery.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod review;

pub use config::{AuditConfig, SignalConfig, VigilConfig};
pub use error::{RootError, RootResult};
pub use pipeline::{DecisionPipeline, EvaluationOutcome};
pub use planner::RiskBandPlanner;
pub use review::{OverrideRequest, ReviewDesk, ReviewOutcome};

use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_audit::{AuditTrail, JsonlLog, SqliteIndex};
use vigil_core::{ActionPlanner, EvidenceSource, PolicyVersion, Timestamp};
use vigil_policy::{ActionRateTracker, PolicyEngine, PolicySet};
use vigil_signal::SignalAggregator;

/// Runtime state for the vigil orchestrator: the pipeline, the override
/// channel, and shared handles to the policy engine and audit trail.
pub struct VigilRuntime {
    pub config: VigilConfig,
    pub policy: Arc<PolicyEngine>,
    pub trail: Arc<AuditTrail>,
    pub pipeline: DecisionPipeline,
    pub review: ReviewDesk,
}

/// Initialize the runtime from configuration.
///
/// Opens both audit backends, loads the policy document (writing the
/// baseline if none exists yet), and records a system entry marking the
/// start of this process's appends.
pub fn initialize(
    config: VigilConfig,
    sources: Vec<Arc<dyn EvidenceSource>>,
    planner: Arc<dyn ActionPlanner>,
) -> RootResult<VigilRuntime> {
    config.validate()?;

    tracing::info!(
        environment = %config.environment,
        policy_path = %config.policy_path.display(),
        log_dir = %config.audit.log_dir.display(),
        sources = sources.len(),
        "initializing vigil"
    );

    let log = Arc::new(JsonlLog::open(&config.audit.log_dir)?);
    if let Some(parent) = config.audit.index_path.parent() {
        std::fs::create_dir_all(parent).map_err(RootError::Io)?;
    }
    let index_path = config
        .audit
        .index_path
        .to_str()
        .ok_or_else(|| RootError::Config("index_path is not valid UTF-8".into()))?;
    let index = Arc::new(SqliteIndex::open(index_path)?);
    let trail = Arc::new(AuditTrail::new(log, index, config.audit_trail_config()));

    let policy_set = if config.policy_path.exists() {
        let bytes = std::fs::read(&config.policy_path).map_err(RootError::Io)?;
        PolicyEngine::load_policies(&bytes)?
    } else {
        let baseline = PolicySet::baseline(Timestamp::now());
        let bytes = PolicyEngine::save_policies(&baseline)?;
        if let Some(parent) = config.policy_path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(&config.policy_path, bytes).map_err(RootError::Io)?;
        tracing::info!(path = %config.policy_path.display(), "wrote baseline policy document");
        baseline
    };
    let policy_version = policy_set.version;
    let policy = Arc::new(PolicyEngine::new(policy_set)?);

    let aggregator = SignalAggregator::new(sources, config.aggregator_config());
    let tracker = Arc::new(ActionRateTracker::new());
    let pipeline = DecisionPipeline::new(
        aggregator,
        planner,
        policy.clone(),
        trail.clone(),
        tracker,
    );
    let review = ReviewDesk::new(policy.clone(), trail.clone());

    let mut metadata = BTreeMap::new();
    metadata.insert("policy_version".to_string(), policy_version.to_string());
    // Best effort: a failed startup marker must not block the verify and
    // reconcile tooling from inspecting a damaged partition.
    if let Err(err) = trail.record_system("vigil initialized", metadata, Timestamp::now()) {
        tracing::warn!(error = %err, "startup system entry could not be appended");
    }

    Ok(VigilRuntime {
        config,
        policy,
        trail,
        pipeline,
        review,
    })
}

impl VigilRuntime {
    /// Swap in a newer policy document and record the reload. Evaluations
    /// already in flight finish under the version they started with.
    pub fn reload_policy(&self, policy_data: &[u8]) -> RootResult<PolicyVersion> {
        let offered = PolicyEngine::load_policies(policy_data)?;
        let active = self.policy.reload(offered)?;

        let mut metadata = BTreeMap::new();
        metadata.insert("policy_version".to_string(), active.version.to_string());
        self.trail
            .record_system("policy reloaded", metadata, Timestamp::now())?;

        Ok(active.version)
    }
}
