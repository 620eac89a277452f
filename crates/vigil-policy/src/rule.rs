use vigil_core::{Action, DecidedBy};

use crate::types::{
    PolicyContext, PolicyRule, PolicySet, PolicyViolation, RuleEffect, RuleKind, Severity,
    ViolationKind,
};

/// Evaluate a single configured rule against the current working action.
///
/// Rules constrain automation only: proposals decided by a human are
/// NotApplicable for every kind. Thresholds compare with >= / < so that
/// exact boundary values trigger the rule (ties escalate).
pub fn evaluate_rule(rule: &PolicyRule, action: Action, ctx: &PolicyContext) -> RuleEffect {
    if !rule.enabled {
        return RuleEffect::NotApplicable;
    }
    if ctx.decided_by != DecidedBy::Ai {
        return RuleEffect::NotApplicable;
    }

    match &rule.kind {
        RuleKind::ConfidenceFloor { min_confidence } => {
            // Escalations are never blocked for being unsure.
            if action == Action::Escalate {
                return RuleEffect::NotApplicable;
            }
            if ctx.confidence < *min_confidence {
                RuleEffect::Escalate {
                    violation: PolicyViolation::new(
                        &rule.rule_id,
                        ViolationKind::ConfidenceTooLow,
                        format!("{:.2}", ctx.confidence),
                        format!("{:.2}", min_confidence),
                        Severity::HardStop,
                        format!(
                            "confidence {:.2} is below the autonomous action floor {:.2}",
                            ctx.confidence, min_confidence
                        ),
                    ),
                }
            } else {
                RuleEffect::Pass
            }
        }
        RuleKind::DisagreementCeiling { max_disagreement } => {
            if ctx.disagreement >= *max_disagreement {
                RuleEffect::Escalate {
                    violation: PolicyViolation::new(
                        &rule.rule_id,
                        ViolationKind::DisagreementTooHigh,
                        format!("{:.2}", ctx.disagreement),
                        format!("{:.2}", max_disagreement),
                        Severity::HardStop,
                        format!(
                            "source disagreement {:.2} reached the ceiling {:.2}",
                            ctx.disagreement, max_disagreement
                        ),
                    ),
                }
            } else {
                RuleEffect::Pass
            }
        }
        RuleKind::RiskCeiling { max_risk } => match ctx.risk_score {
            Some(risk) if risk >= *max_risk => RuleEffect::Escalate {
                violation: PolicyViolation::new(
                    &rule.rule_id,
                    ViolationKind::CriticalRisk,
                    format!("{:.2}", risk),
                    format!("{:.2}", max_risk),
                    Severity::HardStop,
                    format!(
                        "risk score {:.2} is at the critical level {:.2}; escalation is mandatory",
                        risk, max_risk
                    ),
                ),
            },
            Some(_) => RuleEffect::Pass,
            None => RuleEffect::NotApplicable,
        },
        RuleKind::RateLimit {
            max_automated_actions,
        } => {
            if !action.is_automated_intervention() {
                return RuleEffect::NotApplicable;
            }
            if ctx.recent_automated_actions >= *max_automated_actions {
                RuleEffect::Escalate {
                    violation: PolicyViolation::new(
                        &rule.rule_id,
                        ViolationKind::RateLimitExceeded,
                        ctx.recent_automated_actions.to_string(),
                        max_automated_actions.to_string(),
                        Severity::HardStop,
                        format!(
                            "subject reached {} automated interventions in the rolling window (cap {})",
                            ctx.recent_automated_actions, max_automated_actions
                        ),
                    ),
                }
            } else {
                RuleEffect::Pass
            }
        }
        RuleKind::HumanOnlyActions { actions } => {
            if actions.contains(&action) {
                RuleEffect::Escalate {
                    violation: human_only_violation(&rule.rule_id, action),
                }
            } else {
                RuleEffect::Pass
            }
        }
        RuleKind::Downgrade {
            from,
            to,
            below_confidence,
        } => {
            if action != *from || ctx.confidence >= *below_confidence {
                return RuleEffect::NotApplicable;
            }
            // Validation rejects relaxing downgrades; guard anyway.
            if !to.at_least_as_strict_as(*from) {
                return RuleEffect::NotApplicable;
            }
            RuleEffect::Downgrade {
                to: *to,
                violation: PolicyViolation::new(
                    &rule.rule_id,
                    ViolationKind::ActionDowngraded,
                    action.to_string(),
                    to.to_string(),
                    Severity::Warning,
                    format!(
                        "{} tightened to {} at confidence {:.2} (bound {:.2})",
                        action, to, ctx.confidence, below_confidence
                    ),
                ),
            }
        }
    }
}

pub fn human_only_violation(rule_id: &str, action: Action) -> PolicyViolation {
    PolicyViolation::new(
        rule_id,
        ViolationKind::HumanOnlyAction,
        action.to_string(),
        "human approval".to_string(),
        Severity::HardStop,
        format!("action {} requires human approval; automation cannot execute it", action),
    )
}

/// Validate a PolicySet for structural integrity.
///
/// Checks:
/// - Schema version is supported (currently only 1)
/// - Policy version is >= 1
/// - Rule ids are unique, non-empty, and within length bounds
/// - Thresholds lie in [0, 1]
/// - Downgrade targets are strictly stricter than their source
/// - Gate thresholds are coherent
pub fn validate_policy_set(policy: &PolicySet) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if policy.schema_version != 1 {
        errors.push(format!(
            "unsupported schema version: {} (only version 1 is supported)",
            policy.schema_version
        ));
    }

    if policy.version.0 < 1 {
        errors.push("policy version must be >= 1".to_string());
    }

    if !(0.0..=1.0).contains(&policy.disagreement_ceiling) {
        errors.push(format!(
            "disagreement_ceiling {} must lie in [0, 1]",
            policy.disagreement_ceiling
        ));
    }

    if let Err(gate_err) = policy.gate.validate() {
        errors.push(gate_err);
    }

    if policy.overrides.allowed_kinds.is_empty() {
        errors.push("overrides.allowed_kinds must not be empty".to_string());
    }

    let mut seen_ids = std::collections::HashSet::new();
    for rule in &policy.rules {
        if rule.rule_id.is_empty() {
            errors.push("rule id must not be empty".to_string());
        } else if rule.rule_id.len() > 128 {
            errors.push(format!("rule id '{}…' exceeds 128 bytes", &rule.rule_id[..20]));
        } else if !seen_ids.insert(rule.rule_id.clone()) {
            errors.push(format!("duplicate rule id '{}'", rule.rule_id));
        }

        match &rule.kind {
            RuleKind::ConfidenceFloor { min_confidence } => {
                if !(0.0..=1.0).contains(min_confidence) {
                    errors.push(format!(
                        "rule '{}': min_confidence {} must lie in [0, 1]",
                        rule.rule_id, min_confidence
                    ));
                }
            }
            RuleKind::DisagreementCeiling { max_disagreement } => {
                if !(0.0..=1.0).contains(max_disagreement) {
                    errors.push(format!(
                        "rule '{}': max_disagreement {} must lie in [0, 1]",
                        rule.rule_id, max_disagreement
                    ));
                }
            }
            RuleKind::RiskCeiling { max_risk } => {
                if !(0.0..=1.0).contains(max_risk) {
                    errors.push(format!(
                        "rule '{}': max_risk {} must lie in [0, 1]",
                        rule.rule_id, max_risk
                    ));
                }
            }
            RuleKind::RateLimit { .. } => {}
            RuleKind::HumanOnlyActions { actions } => {
                if actions.is_empty() {
                    errors.push(format!("rule '{}': action list must not be empty", rule.rule_id));
                }
            }
            RuleKind::Downgrade {
                from,
                to,
                below_confidence,
            } => {
                if !(0.0..=1.0).contains(below_confidence) {
                    errors.push(format!(
                        "rule '{}': below_confidence {} must lie in [0, 1]",
                        rule.rule_id, below_confidence
                    ));
                }
                if !(to.at_least_as_strict_as(*from) && to != from) {
                    errors.push(format!(
                        "rule '{}': downgrade {} -> {} would relax; only tightening is automatic",
                        rule.rule_id, from, to
                    ));
                }
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::{PolicyVersion, Timestamp};

    fn ctx(confidence: f64, disagreement: f64) -> PolicyContext {
        PolicyContext {
            decided_by: DecidedBy::Ai,
            confidence,
            disagreement,
            risk_score: Some(0.5),
            recent_automated_actions: 0,
            evaluated_at: Timestamp::from_seconds(1_700_000_000),
        }
    }

    fn rule(id: &str, kind: RuleKind) -> PolicyRule {
        PolicyRule {
            rule_id: id.into(),
            kind,
            enabled: true,
        }
    }

    #[test]
    fn test_disabled_rule_not_applicable() {
        let mut r = rule(
            "floor",
            RuleKind::ConfidenceFloor {
                min_confidence: 0.9,
            },
        );
        r.enabled = false;
        assert_eq!(
            evaluate_rule(&r, Action::Block, &ctx(0.1, 0.0)),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_rules_do_not_apply_to_human_decisions() {
        let r = rule(
            "floor",
            RuleKind::ConfidenceFloor {
                min_confidence: 0.9,
            },
        );
        let mut human_ctx = ctx(0.1, 0.0);
        human_ctx.decided_by = DecidedBy::Human;
        assert_eq!(
            evaluate_rule(&r, Action::Block, &human_ctx),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_confidence_floor_escalates() {
        let r = rule(
            "floor",
            RuleKind::ConfidenceFloor {
                min_confidence: 0.75,
            },
        );
        match evaluate_rule(&r, Action::Block, &ctx(0.5, 0.0)) {
            RuleEffect::Escalate { violation } => {
                assert_eq!(violation.kind, ViolationKind::ConfidenceTooLow);
                assert_eq!(violation.severity, Severity::HardStop);
            }
            other => panic!("expected Escalate, got {:?}", other),
        }
    }

    #[test]
    fn test_confidence_floor_passes_escalations_through() {
        let r = rule(
            "floor",
            RuleKind::ConfidenceFloor {
                min_confidence: 0.75,
            },
        );
        assert_eq!(
            evaluate_rule(&r, Action::Escalate, &ctx(0.1, 0.0)),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_disagreement_ceiling_boundary_escalates() {
        let r = rule(
            "ceiling",
            RuleKind::DisagreementCeiling {
                max_disagreement: 0.30,
            },
        );
        assert!(matches!(
            evaluate_rule(&r, Action::Allow, &ctx(0.9, 0.30)),
            RuleEffect::Escalate { .. }
        ));
        assert_eq!(
            evaluate_rule(&r, Action::Allow, &ctx(0.9, 0.29)),
            RuleEffect::Pass
        );
    }

    #[test]
    fn test_risk_ceiling_without_score_not_applicable() {
        let r = rule("critical", RuleKind::RiskCeiling { max_risk: 0.95 });
        let mut no_score = ctx(0.9, 0.0);
        no_score.risk_score = None;
        assert_eq!(
            evaluate_rule(&r, Action::Block, &no_score),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_rate_limit_only_counts_interventions() {
        let r = rule(
            "daily-cap",
            RuleKind::RateLimit {
                max_automated_actions: 3,
            },
        );
        let mut at_cap = ctx(0.9, 0.0);
        at_cap.recent_automated_actions = 3;

        assert!(matches!(
            evaluate_rule(&r, Action::Block, &at_cap),
            RuleEffect::Escalate { .. }
        ));
        // ALLOW is not an intervention, the cap does not apply.
        assert_eq!(
            evaluate_rule(&r, Action::Allow, &at_cap),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_human_only_actions_rule() {
        let r = rule(
            "no-termination",
            RuleKind::HumanOnlyActions {
                actions: vec![Action::Block],
            },
        );
        assert!(matches!(
            evaluate_rule(&r, Action::Block, &ctx(0.99, 0.0)),
            RuleEffect::Escalate { .. }
        ));
        assert_eq!(
            evaluate_rule(&r, Action::Challenge, &ctx(0.99, 0.0)),
            RuleEffect::Pass
        );
    }

    #[test]
    fn test_downgrade_tightens_below_bound() {
        let r = rule(
            "soften-block",
            RuleKind::Downgrade {
                from: Action::Block,
                to: Action::Escalate,
                below_confidence: 0.85,
            },
        );
        match evaluate_rule(&r, Action::Block, &ctx(0.80, 0.0)) {
            RuleEffect::Downgrade { to, violation } => {
                assert_eq!(to, Action::Escalate);
                assert_eq!(violation.kind, ViolationKind::ActionDowngraded);
                assert_eq!(violation.severity, Severity::Warning);
            }
            other => panic!("expected Downgrade, got {:?}", other),
        }
        assert_eq!(
            evaluate_rule(&r, Action::Block, &ctx(0.90, 0.0)),
            RuleEffect::NotApplicable
        );
    }

    #[test]
    fn test_validate_baseline_is_ok() {
        let policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        assert!(validate_policy_set(&policy).is_ok());
    }

    #[test]
    fn test_validate_rejects_duplicate_rule_ids() {
        let mut policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        policy.rules.push(rule("r1", RuleKind::RiskCeiling { max_risk: 0.9 }));
        policy.rules.push(rule("r1", RuleKind::RiskCeiling { max_risk: 0.95 }));
        let errors = validate_policy_set(&policy).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("duplicate rule id")));
    }

    #[test]
    fn test_validate_rejects_relaxing_downgrade() {
        let mut policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        policy.rules.push(rule(
            "relax",
            RuleKind::Downgrade {
                from: Action::Block,
                to: Action::Challenge,
                below_confidence: 0.5,
            },
        ));
        let errors = validate_policy_set(&policy).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("would relax")));
    }

    #[test]
    fn test_validate_rejects_out_of_range_thresholds() {
        let mut policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        policy.rules.push(rule(
            "floor",
            RuleKind::ConfidenceFloor {
                min_confidence: 1.2,
            },
        ));
        assert!(validate_policy_set(&policy).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_schema_version() {
        let mut policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        policy.schema_version = 2;
        assert!(validate_policy_set(&policy).is_err());
    }

    #[test]
    fn test_validate_rejects_zero_version() {
        let mut policy = PolicySet::baseline(Timestamp::from_seconds(1_700_000_000));
        policy.version = PolicyVersion(0);
        assert!(validate_policy_set(&policy).is_err());
    }
}
