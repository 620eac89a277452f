//! Confidence gate: decides whether automation may act on an aggregated
//! signal.
//!
//! The gate is a pure function — identical inputs always yield identical
//! verdicts, which is what makes decisions replayable against the audit
//! trail. It is conservative by construction: every tie and every band of
//! uncertainty resolves to HUMAN_REQUIRED. Escalation here is restraint,
//! not failure.

use serde::{Deserialize, Serialize};
use vigil_core::{AggregatedSignal, Authority, GateReason, Verdict};

/// Tunable thresholds. The rule shape is fixed; only the numbers move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GateConfig {
    /// Confidence at or above this may act autonomously.
    pub allow_threshold: f64,
    /// Confidence below this is critically low. Must not exceed
    /// `allow_threshold`; the band between the two also escalates.
    pub escalate_threshold: f64,
    /// Disagreement at or above this forces human review (ties escalate).
    pub disagreement_ceiling: f64,
    /// Confidence penalty weight applied per unit of missing ratio.
    pub missing_penalty: f64,
    /// Extra penalty weight applied once disagreement crosses the ceiling.
    pub disagreement_penalty: f64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            allow_threshold: 0.75,
            escalate_threshold: 0.40,
            disagreement_ceiling: 0.30,
            missing_penalty: 0.20,
            disagreement_penalty: 0.25,
        }
    }
}

impl GateConfig {
    pub fn validate(&self) -> Result<(), String> {
        let in_unit = |v: f64| (0.0..=1.0).contains(&v);
        if !in_unit(self.allow_threshold)
            || !in_unit(self.escalate_threshold)
            || !in_unit(self.disagreement_ceiling)
            || !in_unit(self.missing_penalty)
            || !in_unit(self.disagreement_penalty)
        {
            return Err("gate thresholds must lie in [0, 1]".to_string());
        }
        if self.escalate_threshold > self.allow_threshold {
            return Err(format!(
                "escalate_threshold {} exceeds allow_threshold {}",
                self.escalate_threshold, self.allow_threshold
            ));
        }
        Ok(())
    }
}

/// Compute the authority verdict for one aggregated signal.
///
/// Confidence starts at `1 - disagreement` and is penalized for missing
/// reports and for disagreement beyond the ceiling, clamped to [0, 1].
/// AI_ALLOWED requires confidence at or above the allow threshold AND
/// disagreement strictly below the ceiling AND sufficient signal; anything
/// else is HUMAN_REQUIRED.
pub fn gate(signal: &AggregatedSignal, config: &GateConfig) -> Verdict {
    let confidence = confidence_for(signal, config);

    if signal.is_insufficient() {
        return Verdict {
            authority: Authority::HumanRequired,
            confidence,
            reason: GateReason::InsufficientSignal,
        };
    }

    if signal.disagreement >= config.disagreement_ceiling {
        return Verdict {
            authority: Authority::HumanRequired,
            confidence,
            reason: GateReason::HighDisagreement,
        };
    }

    if confidence < config.allow_threshold {
        return Verdict {
            authority: Authority::HumanRequired,
            confidence,
            reason: GateReason::LowConfidence,
        };
    }

    Verdict {
        authority: Authority::AiAllowed,
        confidence,
        reason: GateReason::ConfidentAgreement,
    }
}

fn confidence_for(signal: &AggregatedSignal, config: &GateConfig) -> f64 {
    let mut confidence = 1.0 - signal.disagreement;

    confidence -= config.missing_penalty * signal.missing_ratio;

    if signal.disagreement >= config.disagreement_ceiling {
        confidence -= config.disagreement_penalty * signal.disagreement;
    }

    confidence.clamp(0.0, 1.0)
}
