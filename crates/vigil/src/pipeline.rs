use std::sync::Arc;

use vigil_audit::{AuditEntry, AuditTrail, EscalationStatus};
use vigil_core::{
    Action, ActionPlanner, AggregatedSignal, Authority, DecidedBy, Decision, DecisionId,
    EscalationId, Event, Timestamp, Verdict,
};
use vigil_gate::gate;
use vigil_policy::{enforce, ActionRateTracker, Enforcement, PolicyContext, PolicyEngine};
use vigil_signal::SignalAggregator;

use crate::error::{RootError, RootResult};

/// Everything one evaluation produced. The decision is committed — the
/// audit entry id in `entry` is the caller's proof of record.
#[derive(Debug, Clone)]
pub struct EvaluationOutcome {
    pub decision: Decision,
    pub verdict: Verdict,
    pub signal: AggregatedSignal,
    pub enforcement: Enforcement,
    pub entry: AuditEntry,
    pub escalation_id: Option<EscalationId>,
    pub rationale: Option<String>,
}

/// The decision pipeline: aggregate → gate → plan → enforce → commit.
///
/// Stages run in strict sequence for one event; evaluations for different
/// events are independent and only serialize at the audit-trail boundary.
/// The policy snapshot is taken once at the start, so a concurrent reload
/// never changes an evaluation in flight.
pub struct DecisionPipeline {
    aggregator: SignalAggregator,
    planner: Arc<dyn ActionPlanner>,
    policy: Arc<PolicyEngine>,
    trail: Arc<AuditTrail>,
    tracker: Arc<ActionRateTracker>,
}

impl DecisionPipeline {
    pub fn new(
        aggregator: SignalAggregator,
        planner: Arc<dyn ActionPlanner>,
        policy: Arc<PolicyEngine>,
        trail: Arc<AuditTrail>,
        tracker: Arc<ActionRateTracker>,
    ) -> Self {
        Self {
            aggregator,
            planner,
            policy,
            trail,
            tracker,
        }
    }

    pub fn policy(&self) -> &Arc<PolicyEngine> {
        &self.policy
    }

    pub fn trail(&self) -> &Arc<AuditTrail> {
        &self.trail
    }

    /// Evaluate one event end to end.
    ///
    /// Returns a committed decision or an explicit error; there is no
    /// "decision returned but not logged" outcome. Signal degradation and
    /// policy violations are absorbed into the decision itself — the only
    /// fatal failure here is the audit commit.
    pub async fn evaluate(&self, event: &Event) -> RootResult<EvaluationOutcome> {
        let policy = self.policy.snapshot();
        let signal = self.aggregator.evaluate(event).await;
        let verdict = gate(&signal, &policy.gate);
        let now = Timestamp::now();

        // Action selection. The planner is only consulted when automation
        // holds the authority; everything else escalates to a human.
        let (proposed, rationale) = match verdict.authority {
            Authority::AiAllowed => match self.planner.propose(event, &signal) {
                Ok(proposal) => (proposal.action, Some(proposal.rationale)),
                Err(err) => {
                    tracing::warn!(
                        event_id = %event.event_id,
                        error = %err,
                        "action planner failed, escalating"
                    );
                    (Action::Escalate, None)
                }
            },
            Authority::HumanRequired => (Action::Escalate, None),
        };

        let ctx = PolicyContext {
            decided_by: DecidedBy::Ai,
            confidence: verdict.confidence,
            disagreement: signal.disagreement,
            risk_score: signal.mean_score,
            recent_automated_actions: self.tracker.recent_count(&event.subject_id, now),
            evaluated_at: now,
        };
        let enforcement = enforce(&policy, proposed, &ctx);

        // A rewrite is the policy engine exercising its own authority over
        // the proposal, and the record says so.
        let decided_by = if enforcement.was_rewritten() {
            DecidedBy::Policy
        } else {
            DecidedBy::Ai
        };

        let decision = Decision {
            decision_id: DecisionId::generate(),
            event_id: event.event_id.clone(),
            subject_id: event.subject_id.clone(),
            session_id: event.session_id.clone(),
            action: enforcement.final_action,
            decided_by,
            confidence: verdict.confidence,
            policy_version: policy.version,
            override_ref: None,
            decided_at: now,
        };

        // The audit commit must run to completion or explicit failure; it
        // is deliberately outside the evaluation deadline. A failed log
        // write fails the whole request closed.
        let entry = {
            let trail = self.trail.clone();
            let to_commit = decision.clone();
            let violations = enforcement.violations.clone();
            tokio::task::spawn_blocking(move || trail.record_decision(&to_commit, &violations))
                .await
                .map_err(|e| RootError::Internal(format!("audit commit task aborted: {}", e)))??
        };

        let escalation_id = if decision.action == Action::Escalate {
            Some(self.raise_escalation(&decision, &verdict, &enforcement).await)
        } else {
            None
        };

        if decision.action.is_automated_intervention() {
            self.tracker.record(&event.subject_id, now);
        }

        tracing::info!(
            event_id = %event.event_id,
            action = %decision.action,
            authority = %verdict.authority,
            confidence = verdict.confidence,
            entry_id = %entry.entry_id,
            "decision committed"
        );

        Ok(EvaluationOutcome {
            decision,
            verdict,
            signal,
            enforcement,
            entry,
            escalation_id,
            rationale,
        })
    }

    /// Append the escalation-raised lifecycle entry.
    ///
    /// The decision entry is already durable at this point; it is the
    /// at-least-one record the contract requires. If this additional entry
    /// fails, the committed decision still stands and the failure is
    /// surfaced in the log stream instead of the caller's result.
    async fn raise_escalation(
        &self,
        decision: &Decision,
        verdict: &Verdict,
        enforcement: &Enforcement,
    ) -> EscalationId {
        let escalation_id = EscalationId::generate();
        let reason = enforcement
            .violations
            .first()
            .map(|v| v.kind.to_string())
            .unwrap_or_else(|| verdict.reason.to_string());

        let trail = self.trail.clone();
        let for_entry = decision.clone();
        let id = escalation_id.clone();
        let result = tokio::task::spawn_blocking(move || {
            trail.record_escalation(
                &id,
                &for_entry,
                EscalationStatus::Raised,
                reason,
                for_entry.decided_at,
            )
        })
        .await;

        match result {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => tracing::error!(
                decision_id = %decision.decision_id,
                error = %err,
                "escalation entry failed after decision commit"
            ),
            Err(err) => tracing::error!(
                decision_id = %decision.decision_id,
                error = %err,
                "escalation entry task aborted after decision commit"
            ),
        }

        escalation_id
    }
}
