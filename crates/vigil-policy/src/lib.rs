//! Deterministic safety policy over proposed actions.
//!
//! The engine is the authoritative mapping from (proposed action, context,
//! policy version) to the action the system is actually allowed to take.
//! Configured rules are versioned, ordered, and may only tighten; three hard
//! invariants bind regardless of configuration. Violations are data, not
//! errors: they are absorbed into the final action and recorded for audit.

pub mod engine;
pub mod error;
pub mod rule;
pub mod tracker;
pub mod types;

pub use engine::{enforce, PolicyEngine};
pub use error::{PolicyError, PolicyResult};
pub use rule::{evaluate_rule, validate_policy_set};
pub use tracker::ActionRateTracker;
pub use types::{
    Enforcement, OverrideRules, PolicyContext, PolicyRule, PolicySet, PolicyViolation, RuleEffect,
    RuleKind, Severity, ViolationKind,
};
