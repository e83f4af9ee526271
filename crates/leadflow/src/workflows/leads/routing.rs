use serde::{Deserialize, Serialize};

use super::domain::{CloserId, OrganizationId, Tier};

/// Closer slot in a routing pool as seen at routing time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMember {
    pub closer_id: CloserId,
    pub active: bool,
}

impl PoolMember {
    pub fn active(closer_id: CloserId) -> Self {
        Self {
            closer_id,
            active: true,
        }
    }
}

/// High/low handlers configured for an organization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloserPool {
    pub high: Option<PoolMember>,
    pub low: Option<PoolMember>,
}

impl CloserPool {
    pub fn member(&self, tier: Tier) -> Option<&PoolMember> {
        match tier {
            Tier::High => self.high.as_ref(),
            Tier::Low => self.low.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentReason {
    ScoreAtOrAboveThreshold,
    ScoreBelowThreshold,
    NoCloserConfigured,
}

impl AssignmentReason {
    pub const fn label(self) -> &'static str {
        match self {
            AssignmentReason::ScoreAtOrAboveThreshold => "score_at_or_above_threshold",
            AssignmentReason::ScoreBelowThreshold => "score_below_threshold",
            AssignmentReason::NoCloserConfigured => "no_closer_configured",
        }
    }
}

/// Routing decision. A `None` closer keeps the lead visible as unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub closer_id: Option<CloserId>,
    pub tier: Tier,
    pub reason: AssignmentReason,
    pub score: i32,
    pub threshold: i32,
}

impl Assignment {
    pub fn is_assigned(&self) -> bool {
        self.closer_id.is_some()
    }
}

/// Routing rule: `score >= threshold` goes to the high pool, anything else to the low pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct AssignmentRouter;

impl AssignmentRouter {
    pub fn tier_for(score: i32, threshold: i32) -> Tier {
        if score >= threshold {
            Tier::High
        } else {
            Tier::Low
        }
    }

    pub fn assign(score: i32, threshold: i32, pool: &CloserPool) -> Assignment {
        let tier = Self::tier_for(score, threshold);

        let (closer_id, reason) = match pool.member(tier) {
            Some(member) if member.active => {
                let reason = match tier {
                    Tier::High => AssignmentReason::ScoreAtOrAboveThreshold,
                    Tier::Low => AssignmentReason::ScoreBelowThreshold,
                };
                (Some(member.closer_id.clone()), reason)
            }
            _ => (None, AssignmentReason::NoCloserConfigured),
        };

        Assignment {
            closer_id,
            tier,
            reason,
            score,
            threshold,
        }
    }
}

/// Non-fatal configuration problems found while routing. They degrade the lead to
/// unassigned and are reported alongside the created lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConfigurationError {
    #[error("organization {organization_id} has no active scoring configuration; defaults applied")]
    NoActiveConfiguration { organization_id: OrganizationId },
    #[error("no closer configured for the {} tier", .tier.label())]
    NoCloserForTier { tier: Tier },
    #[error("closer {closer_id} configured for the {} tier does not exist", .tier.label())]
    UnknownCloser { closer_id: CloserId, tier: Tier },
    #[error("closer {closer_id} configured for the {} tier belongs to another organization", .tier.label())]
    ForeignCloser { closer_id: CloserId, tier: Tier },
    #[error("closer {closer_id} configured for the {} tier is inactive", .tier.label())]
    InactiveCloser { closer_id: CloserId, tier: Tier },
    #[error("closer lookup failed: {detail}")]
    CloserLookupFailed { detail: String },
    #[error("scoring configuration lookup failed; defaults applied: {detail}")]
    ConfigurationLookupFailed { detail: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> CloserPool {
        CloserPool {
            high: Some(PoolMember::active(CloserId::new("C1"))),
            low: Some(PoolMember::active(CloserId::new("C2"))),
        }
    }

    #[test]
    fn score_at_threshold_routes_high() {
        let assignment = AssignmentRouter::assign(50, 50, &pool());
        assert_eq!(assignment.tier, Tier::High);
        assert_eq!(assignment.closer_id, Some(CloserId::new("C1")));
        assert_eq!(assignment.reason, AssignmentReason::ScoreAtOrAboveThreshold);
    }

    #[test]
    fn score_below_threshold_routes_low() {
        let assignment = AssignmentRouter::assign(49, 50, &pool());
        assert_eq!(assignment.tier, Tier::Low);
        assert_eq!(assignment.closer_id, Some(CloserId::new("C2")));
        assert_eq!(assignment.reason, AssignmentReason::ScoreBelowThreshold);
    }

    #[test]
    fn missing_or_inactive_closer_stays_unassigned() {
        let mut pool = pool();
        pool.high = None;
        let unassigned = AssignmentRouter::assign(90, 60, &pool);
        assert_eq!(unassigned.tier, Tier::High);
        assert!(unassigned.closer_id.is_none());
        assert_eq!(unassigned.reason, AssignmentReason::NoCloserConfigured);

        pool.low = Some(PoolMember {
            closer_id: CloserId::new("C2"),
            active: false,
        });
        let inactive = AssignmentRouter::assign(10, 60, &pool);
        assert_eq!(inactive.tier, Tier::Low);
        assert!(!inactive.is_assigned());
        assert_eq!(inactive.reason.label(), "no_closer_configured");
    }

    #[test]
    fn raising_a_score_never_drops_the_tier() {
        let pool = pool();
        let threshold = 60;
        let mut previous = Tier::Low;
        for score in 0..=150 {
            let tier = AssignmentRouter::assign(score, threshold, &pool).tier;
            assert!(
                !(previous == Tier::High && tier == Tier::Low),
                "score {score} moved from high back to low"
            );
            previous = tier;
        }
        assert_eq!(previous, Tier::High);
    }
}
