use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::super::domain::{CloserId, InterestLevel, OrganizationId, ScoringConfigId, Temperature};

pub const DEFAULT_PHONE_WEIGHT: i32 = 10;
pub const DEFAULT_EMAIL_WEIGHT: i32 = 10;
pub const DEFAULT_COMPANY_WEIGHT: i32 = 15;
pub const DEFAULT_JOB_TITLE_WEIGHT: i32 = 15;
pub const DEFAULT_BUDGET_WEIGHT: i32 = 20;
pub const DEFAULT_DECISION_MAKER_WEIGHT: i32 = 25;
pub const DEFAULT_PAIN_POINT_WEIGHT: i32 = 15;
pub const DEFAULT_LOW_SCORE_THRESHOLD: i32 = 60;

/// Upper bound for any single configured weight.
pub const MAX_WEIGHT: i32 = 10_000;

const DEFAULT_TEMPERATURE_WEIGHTS: [(Temperature, i32); 3] = [
    (Temperature::Hot, 40),
    (Temperature::Warm, 30),
    (Temperature::Cold, 10),
];

const DEFAULT_INTEREST_WEIGHTS: [(InterestLevel, i32); 3] = [
    (InterestLevel::High, 25),
    (InterestLevel::Medium, 15),
    (InterestLevel::Low, 5),
];

/// Weights as entered by an organization admin. Omitted entries resolve to the defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightTable {
    pub phone: Option<i32>,
    pub email: Option<i32>,
    pub company: Option<i32>,
    pub job_title: Option<i32>,
    pub temperature: BTreeMap<String, i32>,
    pub interest: BTreeMap<String, i32>,
    pub budget: Option<i32>,
    pub decision_maker: Option<i32>,
    pub pain_point: Option<i32>,
}

impl WeightTable {
    /// Fill every omitted entry with its default. Tier keys that match no known tier are
    /// dropped so a stale admin entry cannot break scoring.
    pub fn resolve(&self) -> ResolvedWeights {
        let mut temperature: BTreeMap<Temperature, i32> =
            DEFAULT_TEMPERATURE_WEIGHTS.into_iter().collect();
        for (key, weight) in &self.temperature {
            match Temperature::parse(key) {
                Some(tier) => {
                    temperature.insert(tier, *weight);
                }
                None => tracing::debug!(key = %key, "ignoring unknown temperature weight"),
            }
        }

        let mut interest: BTreeMap<InterestLevel, i32> =
            DEFAULT_INTEREST_WEIGHTS.into_iter().collect();
        for (key, weight) in &self.interest {
            match InterestLevel::parse(key) {
                Some(tier) => {
                    interest.insert(tier, *weight);
                }
                None => tracing::debug!(key = %key, "ignoring unknown interest weight"),
            }
        }

        ResolvedWeights {
            phone: self.phone.unwrap_or(DEFAULT_PHONE_WEIGHT),
            email: self.email.unwrap_or(DEFAULT_EMAIL_WEIGHT),
            company: self.company.unwrap_or(DEFAULT_COMPANY_WEIGHT),
            job_title: self.job_title.unwrap_or(DEFAULT_JOB_TITLE_WEIGHT),
            temperature,
            interest,
            budget: self.budget.unwrap_or(DEFAULT_BUDGET_WEIGHT),
            decision_maker: self.decision_maker.unwrap_or(DEFAULT_DECISION_MAKER_WEIGHT),
            pain_point: self.pain_point.unwrap_or(DEFAULT_PAIN_POINT_WEIGHT),
        }
    }

    /// Every configured weight, including tier entries, for validation.
    pub(crate) fn all_weights(&self) -> impl Iterator<Item = (String, i32)> + '_ {
        let scalars = [
            ("phone", self.phone),
            ("email", self.email),
            ("company", self.company),
            ("job_title", self.job_title),
            ("budget", self.budget),
            ("decision_maker", self.decision_maker),
            ("pain_point", self.pain_point),
        ]
        .into_iter()
        .filter_map(|(name, weight)| weight.map(|weight| (name.to_string(), weight)));

        let tiers = self
            .temperature
            .iter()
            .map(|(key, weight)| (format!("temperature.{key}"), *weight))
            .chain(
                self.interest
                    .iter()
                    .map(|(key, weight)| (format!("interest.{key}"), *weight)),
            );

        scalars.chain(tiers)
    }
}

/// Concrete weights consumed by the calculator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedWeights {
    pub phone: i32,
    pub email: i32,
    pub company: i32,
    pub job_title: i32,
    pub temperature: BTreeMap<Temperature, i32>,
    pub interest: BTreeMap<InterestLevel, i32>,
    pub budget: i32,
    pub decision_maker: i32,
    pub pain_point: i32,
}

impl Default for ResolvedWeights {
    fn default() -> Self {
        WeightTable::default().resolve()
    }
}

/// Organization-scoped weights, threshold, and closer pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfiguration {
    pub id: ScoringConfigId,
    pub organization_id: OrganizationId,
    pub name: String,
    pub is_active: bool,
    pub weights: WeightTable,
    pub low_score_threshold: Option<i32>,
    pub high_score_closer_id: Option<CloserId>,
    pub low_score_closer_id: Option<CloserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ScoringConfiguration {
    /// Default rule set used when an organization has no active configuration.
    pub fn fallback(organization_id: OrganizationId) -> Self {
        let now = Utc::now();
        Self {
            id: ScoringConfigId::new("default"),
            organization_id,
            name: "Default scoring".to_string(),
            is_active: false,
            weights: WeightTable::default(),
            low_score_threshold: None,
            high_score_closer_id: None,
            low_score_closer_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn threshold(&self) -> i32 {
        self.low_score_threshold.unwrap_or(DEFAULT_LOW_SCORE_THRESHOLD)
    }
}
