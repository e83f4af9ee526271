use super::super::domain::{is_present, InterestLevel, QualificationAttributes, Temperature};
use super::config::ResolvedWeights;
use super::{ScoreComponent, ScoreField};

fn presence(field: ScoreField, present: bool, weight: i32, label: &str) -> ScoreComponent {
    if present {
        ScoreComponent {
            field,
            points: weight,
            notes: format!("{label} provided"),
        }
    } else {
        ScoreComponent {
            field,
            points: 0,
            notes: format!("{label} missing"),
        }
    }
}

pub(crate) fn score_attributes(
    attributes: &QualificationAttributes,
    weights: &ResolvedWeights,
) -> Vec<ScoreComponent> {
    let mut components = Vec::with_capacity(9);

    components.push(presence(
        ScoreField::Phone,
        is_present(&attributes.phone),
        weights.phone,
        "phone",
    ));
    components.push(presence(
        ScoreField::Email,
        is_present(&attributes.email),
        weights.email,
        "email",
    ));
    components.push(presence(
        ScoreField::Company,
        is_present(&attributes.company),
        weights.company,
        "company",
    ));
    components.push(presence(
        ScoreField::JobTitle,
        is_present(&attributes.job_title),
        weights.job_title,
        "job title",
    ));

    let temperature = attributes
        .temperature
        .as_deref()
        .map(|raw| (raw, Temperature::parse(raw)));
    components.push(match temperature {
        Some((_, Some(tier))) => {
            let points = weights.temperature.get(&tier).copied().unwrap_or(0);
            ScoreComponent {
                field: ScoreField::Temperature,
                points,
                notes: format!("temperature {}", tier.label()),
            }
        }
        Some((raw, None)) => ScoreComponent {
            field: ScoreField::Temperature,
            points: 0,
            notes: format!("unrecognized temperature '{raw}'"),
        },
        None => ScoreComponent {
            field: ScoreField::Temperature,
            points: 0,
            notes: "temperature missing".to_string(),
        },
    });

    let interest = attributes
        .interest_level
        .as_deref()
        .map(|raw| (raw, InterestLevel::parse(raw)));
    components.push(match interest {
        Some((_, Some(tier))) => {
            let points = weights.interest.get(&tier).copied().unwrap_or(0);
            ScoreComponent {
                field: ScoreField::InterestLevel,
                points,
                notes: format!("interest {}", tier.label()),
            }
        }
        Some((raw, None)) => ScoreComponent {
            field: ScoreField::InterestLevel,
            points: 0,
            notes: format!("unrecognized interest level '{raw}'"),
        },
        None => ScoreComponent {
            field: ScoreField::InterestLevel,
            points: 0,
            notes: "interest level missing".to_string(),
        },
    });

    let has_budget = attributes
        .budget
        .map(|amount| amount.is_finite() && amount > 0.0)
        .unwrap_or(false);
    components.push(presence(ScoreField::Budget, has_budget, weights.budget, "budget"));

    let decision_maker = attributes.decision_maker.unwrap_or(false);
    components.push(if decision_maker {
        ScoreComponent {
            field: ScoreField::DecisionMaker,
            points: weights.decision_maker,
            notes: "lead is the decision maker".to_string(),
        }
    } else {
        ScoreComponent {
            field: ScoreField::DecisionMaker,
            points: 0,
            notes: "lead is not the decision maker".to_string(),
        }
    });

    components.push(presence(
        ScoreField::PainPoint,
        is_present(&attributes.pain_point),
        weights.pain_point,
        "pain point",
    ));

    components
}
