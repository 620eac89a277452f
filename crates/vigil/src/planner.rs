use vigil_core::{
    ActionPlanner, Action, AggregatedSignal, Event, ProposedAction, VigilError, VigilResult,
};

/// Default action/explanation collaborator: maps the combined risk score
/// onto risk bands and produces a short rationale.
///
/// Only consulted when the gate granted AI_ALLOWED, so it may assume a
/// usable mean score exists; a missing one is an internal inconsistency,
/// not a policy matter.
#[derive(Debug, Clone, Copy)]
pub struct RiskBandPlanner {
    /// At or above this, propose BLOCK.
    pub block_threshold: f64,
    /// At or above this (and below the block band), propose CHALLENGE.
    pub challenge_threshold: f64,
}

impl Default for RiskBandPlanner {
    fn default() -> Self {
        Self {
            block_threshold: 0.70,
            challenge_threshold: 0.40,
        }
    }
}

impl ActionPlanner for RiskBandPlanner {
    fn propose(&self, event: &Event, signal: &AggregatedSignal) -> VigilResult<ProposedAction> {
        let risk = signal.mean_score.ok_or_else(|| {
            VigilError::Internal(format!(
                "planner invoked without a usable score for event {}",
                event.event_id
            ))
        })?;

        let ok_sources = signal.ok_scores().len();
        let (action, band) = if risk >= self.block_threshold {
            (Action::Block, "high")
        } else if risk >= self.challenge_threshold {
            (Action::Challenge, "elevated")
        } else {
            (Action::Allow, "low")
        };

        Ok(ProposedAction {
            action,
            rationale: format!(
                "combined risk {:.2} across {} sources falls in the {} band; proposing {}",
                risk, ok_sources, band, action
            ),
        })
    }
}
