use std::sync::{Arc, RwLock};

use vigil_core::{Action, ActionClass, DecidedBy, PolicyVersion};

use crate::error::{PolicyError, PolicyResult};
use crate::rule::{evaluate_rule, human_only_violation, validate_policy_set};
use crate::types::{
    Enforcement, PolicyContext, PolicySet, PolicyViolation, RuleEffect, Severity, ViolationKind,
};

/// Maximum accepted size for a serialized policy document.
const MAX_POLICY_BYTES: usize = 10 * 1024 * 1024;

// ---------------------------------------------------------------------------
// enforce — the deterministic safety check over a proposed action
// ---------------------------------------------------------------------------

/// Enforce safety policy over a proposed action.
///
/// Pure function of (action, context, policy): no hidden state, so any
/// historical decision can be replayed against the policy version that
/// governed it.
///
/// Three hard invariants run before the configured rules and cannot be
/// disabled by configuration:
/// 1. automation never executes a human-only action — rewritten to ESCALATE;
/// 2. automated interventions beyond the subject's rolling-window cap
///    escalate;
/// 3. disagreement at or above the ceiling escalates, whatever the
///    confidence gate said.
///
/// Configured rules then run top-to-bottom against the working action.
/// A rule may pass, tighten the action, or force ESCALATE; it can never
/// relax. Every triggered rule is returned as a violation for audit.
pub fn enforce(policy: &PolicySet, proposed: Action, ctx: &PolicyContext) -> Enforcement {
    let mut working = proposed;
    let mut violations: Vec<PolicyViolation> = Vec::new();

    if ctx.decided_by == DecidedBy::Ai {
        // Invariant 1: irreversible actions are off-limits to automation,
        // both the built-in class and the configured list.
        if working.class() == ActionClass::HumanOnly || policy.human_only_actions.contains(&working)
        {
            violations.push(human_only_violation("hard:human_only", working));
            working = Action::Escalate;
        }

        // Invariant 3: the disagreement ceiling binds even when the gate
        // allowed automation (defense in depth). Ties escalate.
        if ctx.disagreement >= policy.disagreement_ceiling && working != Action::Escalate {
            violations.push(PolicyViolation::new(
                "hard:disagreement_ceiling",
                ViolationKind::DisagreementTooHigh,
                format!("{:.2}", ctx.disagreement),
                format!("{:.2}", policy.disagreement_ceiling),
                Severity::HardStop,
                format!(
                    "source disagreement {:.2} reached the hard ceiling {:.2}",
                    ctx.disagreement, policy.disagreement_ceiling
                ),
            ));
            working = Action::Escalate;
        }

        // Invariant 2: rolling-window cap on automated interventions.
        if working.is_automated_intervention()
            && ctx.recent_automated_actions >= policy.max_automated_interventions
        {
            violations.push(PolicyViolation::new(
                "hard:rate_limit",
                ViolationKind::RateLimitExceeded,
                ctx.recent_automated_actions.to_string(),
                policy.max_automated_interventions.to_string(),
                Severity::HardStop,
                format!(
                    "subject reached {} automated interventions in 24h (cap {})",
                    ctx.recent_automated_actions, policy.max_automated_interventions
                ),
            ));
            working = Action::Escalate;
        }
    }

    for rule in &policy.rules {
        match evaluate_rule(rule, working, ctx) {
            RuleEffect::NotApplicable | RuleEffect::Pass => {}
            RuleEffect::Downgrade { to, violation } => {
                violations.push(violation);
                working = to;
            }
            RuleEffect::Escalate { violation } => {
                violations.push(violation);
                working = Action::Escalate;
            }
        }
    }

    if working != proposed {
        tracing::info!(
            proposed = %proposed,
            final_action = %working,
            violations = violations.len(),
            "policy rewrote proposed action"
        );
    }

    Enforcement {
        proposed_action: proposed,
        final_action: working,
        violations,
        policy_version: policy.version,
    }
}

// ---------------------------------------------------------------------------
// PolicyEngine — versioned policy holder with snapshot/reload discipline
// ---------------------------------------------------------------------------

/// Holds the active PolicySet and hands out immutable snapshots.
///
/// An evaluation takes one snapshot at its start and keeps it for its whole
/// lifetime; a concurrent reload never changes a decision in flight.
pub struct PolicyEngine {
    current: RwLock<Arc<PolicySet>>,
}

impl PolicyEngine {
    pub fn new(policy: PolicySet) -> PolicyResult<Self> {
        if let Err(errors) = validate_policy_set(&policy) {
            return Err(PolicyError::ValidationError(errors.join("; ")));
        }
        Ok(Self {
            current: RwLock::new(Arc::new(policy)),
        })
    }

    /// The policy version currently in force.
    pub fn active_version(&self) -> PolicyVersion {
        self.snapshot().version
    }

    /// Take an immutable snapshot of the active policy.
    pub fn snapshot(&self) -> Arc<PolicySet> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Replace the active policy. The offered document must validate and
    /// carry a strictly newer version than the one in force.
    pub fn reload(&self, policy: PolicySet) -> PolicyResult<Arc<PolicySet>> {
        if let Err(errors) = validate_policy_set(&policy) {
            return Err(PolicyError::ValidationError(errors.join("; ")));
        }

        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if policy.version <= guard.version {
            return Err(PolicyError::StaleVersion {
                current: guard.version,
                offered: policy.version,
            });
        }

        tracing::info!(
            from = %guard.version,
            to = %policy.version,
            rules = policy.rules.len(),
            "policy reloaded"
        );
        let next = Arc::new(policy);
        *guard = next.clone();
        Ok(next)
    }

    /// Parse and validate a PolicySet from raw JSON bytes.
    pub fn load_policies(policy_data: &[u8]) -> PolicyResult<PolicySet> {
        if policy_data.is_empty() {
            return Err(PolicyError::LoadError("policy data is empty".to_string()));
        }
        if policy_data.len() > MAX_POLICY_BYTES {
            return Err(PolicyError::LoadError(
                "policy data exceeds 10MB size limit".to_string(),
            ));
        }

        let json_str = std::str::from_utf8(policy_data)
            .map_err(|_| PolicyError::LoadError("policy data is not valid UTF-8".to_string()))?;

        let policy_set: PolicySet = serde_json::from_str(json_str)
            .map_err(|e| PolicyError::DeserializationError(format!("JSON parse error: {}", e)))?;

        if let Err(errors) = validate_policy_set(&policy_set) {
            return Err(PolicyError::ValidationError(errors.join("; ")));
        }

        Ok(policy_set)
    }

    /// Serialize a PolicySet to JSON bytes for storage.
    pub fn save_policies(policy_set: &PolicySet) -> PolicyResult<Vec<u8>> {
        if let Err(errors) = validate_policy_set(policy_set) {
            return Err(PolicyError::ValidationError(errors.join("; ")));
        }

        serde_json::to_vec_pretty(policy_set)
            .map_err(|e| PolicyError::SerializationError(format!("JSON serialize error: {}", e)))
    }
}
