use serde::{Deserialize, Serialize};
use std::fmt;
use vigil_core::{Action, DecidedBy, OverrideKind, PolicyVersion, Timestamp};
use vigil_gate::GateConfig;

// ---------------------------------------------------------------------------
// PolicyContext — everything a rule may look at
//
// The subject's recent action count is supplied by the caller so the
// evaluator stays a pure function of (action, context, policy version).
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyContext {
    pub decided_by: DecidedBy,
    pub confidence: f64,
    pub disagreement: f64,
    /// Mean risk score across OK signal reports; None when every source
    /// was missing.
    pub risk_score: Option<f64>,
    /// Automated interventions recorded for this subject in the rolling
    /// 24h window, as counted by the ActionRateTracker.
    pub recent_automated_actions: u32,
    pub evaluated_at: Timestamp,
}

// ---------------------------------------------------------------------------
// Rule kinds — deterministic checks evaluated top-to-bottom
// ---------------------------------------------------------------------------

/// Every configured rule constrains automation: rules never trigger for
/// human-decided actions, which only the hard override validation governs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleKind {
    /// Escalate when confidence falls below the floor.
    ConfidenceFloor { min_confidence: f64 },
    /// Escalate when disagreement reaches the ceiling (ties escalate).
    DisagreementCeiling { max_disagreement: f64 },
    /// Escalate when the mean risk score reaches the critical level.
    RiskCeiling { max_risk: f64 },
    /// Escalate automated interventions beyond the per-subject daily cap.
    RateLimit { max_automated_actions: u32 },
    /// Escalate listed actions when proposed autonomously.
    HumanOnlyActions { actions: Vec<Action> },
    /// Tighten `from` to the stricter `to` when confidence is below the
    /// bound. Relaxing downgrades are rejected at validation time.
    Downgrade {
        from: Action,
        to: Action,
        below_confidence: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    pub rule_id: String,
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Result of evaluating a single rule against a proposed action.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleEffect {
    /// The rule does not apply to this proposal.
    NotApplicable,
    /// The rule applies and is satisfied.
    Pass,
    /// The rule tightens the action.
    Downgrade { to: Action, violation: PolicyViolation },
    /// The rule forces escalation.
    Escalate { violation: PolicyViolation },
}

// ---------------------------------------------------------------------------
// Violations — the audit-facing record of triggered rules
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    HumanOnlyAction,
    RateLimitExceeded,
    DisagreementTooHigh,
    ConfidenceTooLow,
    CriticalRisk,
    ActionDowngraded,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ViolationKind::HumanOnlyAction => write!(f, "human_only_action"),
            ViolationKind::RateLimitExceeded => write!(f, "rate_limit_exceeded"),
            ViolationKind::DisagreementTooHigh => write!(f, "disagreement_too_high"),
            ViolationKind::ConfidenceTooLow => write!(f, "confidence_too_low"),
            ViolationKind::CriticalRisk => write!(f, "critical_risk"),
            ViolationKind::ActionDowngraded => write!(f, "action_downgraded"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    HardStop,
}

/// A single triggered rule, recorded for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub violation_id: String,
    pub rule_id: String,
    pub kind: ViolationKind,
    pub actual: String,
    pub limit: String,
    pub severity: Severity,
    pub message: String,
}

impl PolicyViolation {
    pub fn new(
        rule_id: impl Into<String>,
        kind: ViolationKind,
        actual: impl Into<String>,
        limit: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        Self {
            violation_id: format!("vio_{}", &hex[..12]),
            rule_id: rule_id.into(),
            kind,
            actual: actual.into(),
            limit: limit.into(),
            severity,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Enforcement — the engine's output
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enforcement {
    pub proposed_action: Action,
    pub final_action: Action,
    pub violations: Vec<PolicyViolation>,
    pub policy_version: PolicyVersion,
}

impl Enforcement {
    pub fn was_rewritten(&self) -> bool {
        self.final_action != self.proposed_action
    }
}

// ---------------------------------------------------------------------------
// OverrideRules — constraints on the human override channel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideRules {
    #[serde(default = "default_true")]
    pub require_reason: bool,
    #[serde(default = "default_min_reason_length")]
    pub min_reason_length: usize,
    #[serde(default = "default_override_kinds")]
    pub allowed_kinds: Vec<OverrideKind>,
}

fn default_min_reason_length() -> usize {
    10
}

fn default_override_kinds() -> Vec<OverrideKind> {
    vec![
        OverrideKind::Approve,
        OverrideKind::Reject,
        OverrideKind::Modify,
        OverrideKind::Defer,
    ]
}

impl Default for OverrideRules {
    fn default() -> Self {
        Self {
            require_reason: true,
            min_reason_length: default_min_reason_length(),
            allowed_kinds: default_override_kinds(),
        }
    }
}

// ---------------------------------------------------------------------------
// PolicySet — the versioned rule document
// ---------------------------------------------------------------------------

/// Versioned collection of safety policy. Serialized as JSON and loaded
/// through the engine; reloads must carry a strictly newer version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySet {
    pub version: PolicyVersion,
    pub schema_version: u32,
    pub created_at: Timestamp,
    /// Actions automation may never take, beyond the built-in
    /// irreversible class.
    #[serde(default = "default_human_only")]
    pub human_only_actions: Vec<Action>,
    /// Rolling 24h cap on automated interventions per subject.
    #[serde(default = "default_intervention_cap")]
    pub max_automated_interventions: u32,
    /// Hard disagreement ceiling, enforced independently of the rule list.
    #[serde(default = "default_disagreement_ceiling")]
    pub disagreement_ceiling: f64,
    /// Confidence gate thresholds, versioned with the rest of the policy.
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default)]
    pub overrides: OverrideRules,
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

fn default_human_only() -> Vec<Action> {
    vec![Action::PermanentBlock, Action::TerminateAccount]
}

fn default_intervention_cap() -> u32 {
    10
}

fn default_disagreement_ceiling() -> f64 {
    0.30
}

impl PolicySet {
    /// A baseline policy with the default thresholds and an empty rule
    /// list. The hard invariants apply regardless.
    pub fn baseline(created_at: Timestamp) -> Self {
        Self {
            version: PolicyVersion::initial(),
            schema_version: 1,
            created_at,
            human_only_actions: default_human_only(),
            max_automated_interventions: default_intervention_cap(),
            disagreement_ceiling: default_disagreement_ceiling(),
            gate: GateConfig::default(),
            overrides: OverrideRules::default(),
            rules: Vec::new(),
        }
    }
}
