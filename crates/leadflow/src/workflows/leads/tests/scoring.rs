use std::collections::BTreeMap;

use super::common::*;
use crate::workflows::leads::domain::{CloserId, QualificationAttributes, Tier};
use crate::workflows::leads::routing::{AssignmentRouter, CloserPool, PoolMember};
use crate::workflows::leads::scoring::{ScoreCalculator, ScoreField, WeightTable};

fn scenario_calculator() -> ScoreCalculator {
    ScoreCalculator::new(scenario_config().weights.resolve())
}

fn scenario_pool() -> CloserPool {
    CloserPool {
        high: Some(PoolMember::active(CloserId::new("C1"))),
        low: Some(PoolMember::active(CloserId::new("C2"))),
    }
}

fn fully_qualified() -> QualificationAttributes {
    QualificationAttributes {
        full_name: Some("Rafa Lima".to_string()),
        phone: Some("+55 21 97777-0000".to_string()),
        email: Some("rafa@example.com".to_string()),
        company: Some("Lima Tech".to_string()),
        job_title: Some("CTO".to_string()),
        temperature: Some("warm".to_string()),
        interest_level: Some("high".to_string()),
        budget: Some(25_000.0),
        decision_maker: Some(true),
        pain_point: Some("manual follow-ups".to_string()),
    }
}

#[test]
fn hot_lead_with_contact_details_routes_to_high_closer() {
    let outcome = scenario_calculator().calculate(&hot_lead());
    assert_eq!(outcome.total_score, 60);

    let assignment = AssignmentRouter::assign(outcome.total_score, 50, &scenario_pool());
    assert_eq!(assignment.tier, Tier::High);
    assert_eq!(assignment.closer_id, Some(CloserId::new("C1")));
}

#[test]
fn phone_only_lead_routes_to_low_closer() {
    let outcome = scenario_calculator().calculate(&phone_only_lead());
    assert_eq!(outcome.total_score, 10);

    let assignment = AssignmentRouter::assign(outcome.total_score, 50, &scenario_pool());
    assert_eq!(assignment.tier, Tier::Low);
    assert_eq!(assignment.closer_id, Some(CloserId::new("C2")));
}

#[test]
fn total_is_the_sum_of_the_breakdown() {
    let calculators = [
        ScoreCalculator::default(),
        scenario_calculator(),
        ScoreCalculator::new(
            WeightTable {
                budget: Some(0),
                decision_maker: Some(90),
                ..WeightTable::default()
            }
            .resolve(),
        ),
    ];
    let leads = [
        QualificationAttributes::default(),
        hot_lead(),
        phone_only_lead(),
        fully_qualified(),
    ];

    for calculator in &calculators {
        for lead in &leads {
            let outcome = calculator.calculate(lead);
            let sum: i32 = outcome.breakdown.iter().map(|c| c.points).sum();
            assert_eq!(outcome.total_score, sum);
            assert_eq!(outcome.breakdown.len(), 9);
        }
    }
}

#[test]
fn scoring_is_deterministic() {
    let calculator = ScoreCalculator::default();
    let first = calculator.calculate(&fully_qualified());
    let second = calculator.calculate(&fully_qualified());
    assert_eq!(first, second);
}

#[test]
fn default_weights_apply_when_nothing_is_configured() {
    let outcome = ScoreCalculator::default().calculate(&fully_qualified());
    // 10 + 10 + 15 + 15 + 30 (warm) + 25 (high) + 20 + 25 + 15
    assert_eq!(outcome.total_score, 165);
    assert_eq!(outcome.points_for(ScoreField::Temperature), 30);
    assert_eq!(outcome.points_for(ScoreField::InterestLevel), 25);
}

#[test]
fn tier_tables_merge_over_defaults() {
    let mut temperature = BTreeMap::new();
    temperature.insert("hot".to_string(), 70);
    let weights = WeightTable {
        temperature,
        ..WeightTable::default()
    }
    .resolve();
    let calculator = ScoreCalculator::new(weights);

    let warm = QualificationAttributes {
        temperature: Some("warm".to_string()),
        ..QualificationAttributes::default()
    };
    let hot = QualificationAttributes {
        temperature: Some("HOT".to_string()),
        ..QualificationAttributes::default()
    };
    assert_eq!(calculator.calculate(&warm).total_score, 30);
    assert_eq!(calculator.calculate(&hot).total_score, 70);
}

#[test]
fn portuguese_labels_score_like_english_ones() {
    let calculator = ScoreCalculator::default();
    let lead = QualificationAttributes {
        temperature: Some("quente".to_string()),
        interest_level: Some("médio".to_string()),
        ..QualificationAttributes::default()
    };
    let outcome = calculator.calculate(&lead);
    assert_eq!(outcome.points_for(ScoreField::Temperature), 40);
    assert_eq!(outcome.points_for(ScoreField::InterestLevel), 15);
}

#[test]
fn unrecognized_or_blank_values_contribute_nothing() {
    let lead = QualificationAttributes {
        phone: Some("   ".to_string()),
        temperature: Some("lukewarm".to_string()),
        budget: Some(-10.0),
        decision_maker: Some(false),
        ..QualificationAttributes::default()
    };
    let outcome = ScoreCalculator::default().calculate(&lead);
    assert_eq!(outcome.total_score, 0);
    let temperature = outcome
        .breakdown
        .iter()
        .find(|c| c.field == ScoreField::Temperature)
        .expect("temperature component");
    assert!(temperature.notes.contains("lukewarm"));
}

#[test]
fn all_zero_weights_route_every_lead_low() {
    let weights = WeightTable {
        phone: Some(0),
        email: Some(0),
        company: Some(0),
        job_title: Some(0),
        budget: Some(0),
        decision_maker: Some(0),
        pain_point: Some(0),
        temperature: ["hot", "warm", "cold"]
            .into_iter()
            .map(|key| (key.to_string(), 0))
            .collect(),
        interest: ["high", "medium", "low"]
            .into_iter()
            .map(|key| (key.to_string(), 0))
            .collect(),
    };
    let outcome = ScoreCalculator::new(weights.resolve()).calculate(&fully_qualified());
    assert_eq!(outcome.total_score, 0);
    assert_eq!(AssignmentRouter::tier_for(outcome.total_score, 1), Tier::Low);
}

#[test]
fn routing_is_monotonic_in_score() {
    let pool = scenario_pool();
    for threshold in [1, 50, 60, 200] {
        let mut seen_high = false;
        for score in 0..=250 {
            let tier = AssignmentRouter::assign(score, threshold, &pool).tier;
            if seen_high {
                assert_eq!(tier, Tier::High, "score {score} threshold {threshold}");
            }
            seen_high |= tier == Tier::High;
        }
        assert!(seen_high);
    }
}

#[test]
fn oversized_weights_saturate_instead_of_wrapping() {
    let weights = WeightTable {
        phone: Some(i32::MAX),
        email: Some(i32::MAX),
        ..WeightTable::default()
    };
    let lead = QualificationAttributes {
        phone: Some("+55 11 90000-0000".to_string()),
        email: Some("big@example.com".to_string()),
        ..QualificationAttributes::default()
    };
    let outcome = ScoreCalculator::new(weights.resolve()).calculate(&lead);
    assert_eq!(outcome.total_score, i32::MAX);
    assert_eq!(AssignmentRouter::tier_for(outcome.total_score, 50), Tier::High);
}

#[test]
fn numeric_interest_levels_match_named_tiers() {
    let calculator = ScoreCalculator::default();
    let interest = |value: &str| {
        calculator
            .calculate(&QualificationAttributes {
                interest_level: Some(value.to_string()),
                ..QualificationAttributes::default()
            })
            .points_for(ScoreField::InterestLevel)
    };
    assert_eq!(interest("3"), 25);
    assert_eq!(interest("3"), interest("high"));
    assert_eq!(interest("2"), interest("medium"));
    assert_eq!(interest("1"), interest("low"));
    assert_eq!(interest("4"), 0);
}
