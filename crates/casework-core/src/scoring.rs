//! Confidence and reasoning-quality scores
//!
//! Recomputed from the full snapshot on every committed change; the values
//! only order the triage queue and never gate a transition.

use crate::types::{WorkspaceReasoning, WorkspaceSnapshot};
use serde::Serialize;

const FACT_WEIGHT: f64 = 0.2;
const CONTEXT_WEIGHT: f64 = 0.2;
const OBLIGATION_WEIGHT: f64 = 0.3;
const RISK_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Scores {
    pub confidence_score: f64,
    pub uncertainty_level: f64,
    pub reasoning_quality: f64,
}

impl Scores {
    pub fn apply_to(self, workspace: &mut WorkspaceReasoning) {
        workspace.confidence_score = self.confidence_score;
        workspace.uncertainty_level = self.uncertainty_level;
        workspace.reasoning_quality = self.reasoning_quality;
    }
}

#[must_use]
pub fn score(snapshot: &WorkspaceSnapshot) -> Scores {
    let confidences: Vec<f64> = snapshot
        .facts
        .iter()
        .map(|f| f.confidence)
        .chain(snapshot.contexts.iter().map(|c| c.certainty_level))
        .collect();
    let confidence_score = mean(&confidences).clamp(0.0, 1.0);

    Scores {
        confidence_score,
        uncertainty_level: 1.0 - confidence_score,
        reasoning_quality: reasoning_quality(snapshot),
    }
}

fn reasoning_quality(snapshot: &WorkspaceSnapshot) -> f64 {
    let present = |non_empty: bool| if non_empty { 1.0 } else { 0.0 };

    // Share of context hypotheses that produced at least one obligation.
    let obligation_coverage = if snapshot.contexts.is_empty() {
        0.0
    } else {
        let covered = snapshot
            .contexts
            .iter()
            .filter(|c| snapshot.obligations.iter().any(|o| o.context_id == c.id))
            .count();
        ratio(covered, snapshot.contexts.len())
    };

    let quality = FACT_WEIGHT * present(!snapshot.facts.is_empty())
        + CONTEXT_WEIGHT * present(!snapshot.contexts.is_empty())
        + OBLIGATION_WEIGHT * obligation_coverage
        + RISK_WEIGHT * present(!snapshot.risks.is_empty());
    quality.clamp(0.0, 1.0)
}

#[allow(clippy::cast_precision_loss)]
fn ratio(part: usize, whole: usize) -> f64 {
    part as f64 / whole as f64
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / ratio(values.len(), 1)
    }
}
