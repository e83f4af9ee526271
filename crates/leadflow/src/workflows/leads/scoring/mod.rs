mod config;
mod rules;

pub use config::{
    ResolvedWeights, ScoringConfiguration, WeightTable, DEFAULT_LOW_SCORE_THRESHOLD, MAX_WEIGHT,
};

use super::domain::QualificationAttributes;
use serde::{Deserialize, Serialize};

/// Stateless calculator applying a weight table to qualification answers.
///
/// Scoring never fails: omitted weights use the documented defaults and unrecognized
/// lead values contribute nothing.
#[derive(Debug, Clone, Default)]
pub struct ScoreCalculator {
    weights: ResolvedWeights,
}

impl ScoreCalculator {
    pub fn new(weights: ResolvedWeights) -> Self {
        Self { weights }
    }

    pub fn for_config(config: &ScoringConfiguration) -> Self {
        Self::new(config.weights.resolve())
    }

    pub fn weights(&self) -> &ResolvedWeights {
        &self.weights
    }

    pub fn calculate(&self, attributes: &QualificationAttributes) -> ScoreOutcome {
        let breakdown = rules::score_attributes(attributes, &self.weights);
        let total_score = breakdown
            .iter()
            .fold(0i32, |total, component| total.saturating_add(component.points));

        ScoreOutcome {
            total_score,
            breakdown,
        }
    }
}

/// Scored lead field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Phone,
    Email,
    Company,
    JobTitle,
    Temperature,
    InterestLevel,
    Budget,
    DecisionMaker,
    PainPoint,
}

/// Discrete contribution to a lead score, kept for audits and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreComponent {
    pub field: ScoreField,
    pub points: i32,
    pub notes: String,
}

/// Total score plus the per-field trail that sums to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreOutcome {
    pub total_score: i32,
    pub breakdown: Vec<ScoreComponent>,
}

impl ScoreOutcome {
    pub fn points_for(&self, field: ScoreField) -> i32 {
        self.breakdown
            .iter()
            .filter(|component| component.field == field)
            .map(|component| component.points)
            .sum()
    }
}
