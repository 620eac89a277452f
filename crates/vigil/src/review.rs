use std::sync::Arc;

use vigil_audit::{AuditEntry, AuditPayload, AuditTrail, EscalationStatus};
use vigil_core::{
    Action, DecidedBy, Decision, DecisionId, EscalationId, Override, OverrideId, OverrideKind,
    ReviewerId, Timestamp,
};
use vigil_policy::{enforce, Enforcement, PolicyContext, PolicyEngine};

use crate::error::{RootError, RootResult};

/// A reviewer's correction of a committed decision.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub decision_id: DecisionId,
    pub kind: OverrideKind,
    pub new_action: Action,
    pub reviewer_id: ReviewerId,
    pub reviewer_role: String,
    pub reason: String,
    /// The escalation case this review resolves, if it originated from one.
    pub escalation_id: Option<EscalationId>,
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub override_record: Override,
    pub enforcement: Enforcement,
    pub entry: AuditEntry,
}

/// The human override channel.
///
/// Overrides never edit the original decision: they are appended as new
/// linked records, and the override action passes through the policy engine
/// exactly as an automated proposal would — with `decided_by = HUMAN`, so
/// human authority over human-only actions is preserved.
pub struct ReviewDesk {
    policy: Arc<PolicyEngine>,
    trail: Arc<AuditTrail>,
}

impl ReviewDesk {
    pub fn new(policy: Arc<PolicyEngine>, trail: Arc<AuditTrail>) -> Self {
        Self { policy, trail }
    }

    pub fn submit_override(&self, request: OverrideRequest) -> RootResult<ReviewOutcome> {
        let policy = self.policy.snapshot();
        let rules = &policy.overrides;

        if !rules.allowed_kinds.contains(&request.kind) {
            return Err(RootError::Review(format!(
                "override kind {} is not allowed by policy {}",
                request.kind, policy.version
            )));
        }
        if rules.require_reason && request.reason.trim().len() < rules.min_reason_length {
            return Err(RootError::Review(format!(
                "override reason is mandatory and must be at least {} characters, got {}",
                rules.min_reason_length,
                request.reason.trim().len()
            )));
        }

        let original = self.original_decision(&request.decision_id)?;
        let now = Timestamp::now();

        let ctx = PolicyContext {
            decided_by: DecidedBy::Human,
            confidence: original.confidence,
            disagreement: 0.0,
            risk_score: None,
            recent_automated_actions: 0,
            evaluated_at: now,
        };
        let enforcement = enforce(&policy, request.new_action, &ctx);

        let override_record = Override {
            override_id: OverrideId::generate(),
            decision_id: original.decision_id.clone(),
            kind: request.kind,
            new_action: enforcement.final_action,
            reviewer_id: request.reviewer_id,
            reviewer_role: request.reviewer_role,
            reason: request.reason,
            created_at: now,
        };

        let entry = self.trail.record_override(&override_record, &original)?;

        if let Some(escalation_id) = &request.escalation_id {
            // The override entry above is the durable record of the review;
            // a failed resolution entry is reported, not propagated.
            if let Err(err) = self.trail.record_escalation(
                escalation_id,
                &original,
                EscalationStatus::Resolved,
                format!("resolved by override {}", override_record.override_id),
                now,
            ) {
                tracing::error!(
                    escalation_id = %escalation_id,
                    error = %err,
                    "escalation resolution entry failed after override commit"
                );
            }
        }

        tracing::info!(
            decision_id = %original.decision_id,
            override_id = %override_record.override_id,
            kind = %override_record.kind,
            new_action = %override_record.new_action,
            "human override recorded"
        );

        Ok(ReviewOutcome {
            override_record,
            enforcement,
            entry,
        })
    }

    fn original_decision(&self, decision_id: &DecisionId) -> RootResult<Decision> {
        let entry = self
            .trail
            .decision_by_id(decision_id)?
            .ok_or_else(|| RootError::Review(format!("unknown decision {}", decision_id)))?;

        match entry.payload {
            AuditPayload::Decision { decision, .. } => Ok(decision),
            _ => Err(RootError::Internal(format!(
                "index row for {} does not hold a decision entry",
                decision_id
            ))),
        }
    }
}
