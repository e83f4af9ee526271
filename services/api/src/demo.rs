use crate::infra::read_json;
use chrono::{Duration, Local, NaiveDate, NaiveTime};
use clap::Args;
use leadflow::error::AppError;
use leadflow::workflows::leads::scoring::DEFAULT_LOW_SCORE_THRESHOLD;
use leadflow::workflows::leads::{
    Appointment, AppointmentType, AssignmentRouter, AutoSchedule, BlockKind, BlockRequest,
    Closer, CloserId, FixedClock, InMemoryStore, LeadId, LeadIntakeService, LeadSubmission,
    OrganizationId, PoolTag, QualificationAttributes, QualificationError, RescheduleRequest,
    ScheduleRequest, SchedulerSettings, ScoreCalculator, ScoreOutcome, ScoringConfigDraft,
    Tier, WeeklySchedule, WeightTable,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

const DEMO_ORG: &str = "org-demo";
const DEMO_ACTOR: &str = "demo";

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Date the demo treats as today (YYYY-MM-DD). Defaults to today.
    #[arg(long, value_parser = crate::infra::parse_date)]
    pub(crate) date: Option<NaiveDate>,
}

#[derive(Args, Debug)]
pub(crate) struct ScoreArgs {
    /// JSON file with the lead's qualification answers
    #[arg(long)]
    pub(crate) lead: PathBuf,
    /// JSON file with `weights` and `low_score_threshold`; defaults apply when omitted
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,
}

/// Offline scoring input: the weight table and threshold of a configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ScoreFile {
    pub(crate) weights: WeightTable,
    pub(crate) low_score_threshold: Option<i32>,
}

#[derive(Debug)]
pub(crate) struct ScoreReport {
    pub(crate) outcome: ScoreOutcome,
    pub(crate) threshold: i32,
    pub(crate) tier: Tier,
}

pub(crate) fn run_score(args: ScoreArgs) -> Result<(), AppError> {
    let attributes: QualificationAttributes = read_json(&args.lead)?;
    let file = match &args.config {
        Some(path) => read_json(path)?,
        None => ScoreFile::default(),
    };

    let report = score_report(&attributes, file)?;
    println!("Lead score: {}", report.outcome.total_score);
    for component in &report.outcome.breakdown {
        println!(
            "  {:<16} {:>4}  {}",
            format!("{:?}", component.field),
            component.points,
            component.notes
        );
    }
    println!(
        "Tier: {} (threshold {})",
        report.tier.label(),
        report.threshold
    );
    Ok(())
}

pub(crate) fn score_report(
    attributes: &QualificationAttributes,
    file: ScoreFile,
) -> Result<ScoreReport, QualificationError> {
    let draft = ScoringConfigDraft {
        id: None,
        organization_id: OrganizationId::new("offline"),
        name: "score file".to_string(),
        is_active: false,
        weights: file.weights,
        low_score_threshold: file.low_score_threshold,
        high_score_closer_id: None,
        low_score_closer_id: None,
    };
    draft.validate()?;

    let threshold = draft
        .low_score_threshold
        .unwrap_or(DEFAULT_LOW_SCORE_THRESHOLD);
    let outcome = ScoreCalculator::new(draft.weights.resolve()).calculate(attributes);
    let tier = AssignmentRouter::tier_for(outcome.total_score, threshold);
    Ok(ScoreReport {
        outcome,
        threshold,
        tier,
    })
}

pub(crate) fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let today = args.date.unwrap_or_else(|| Local::now().date_naive());
    let store = Arc::new(InMemoryStore::new());
    let service = LeadIntakeService::with_clock(
        Arc::clone(&store),
        store,
        SchedulerSettings::default(),
        Arc::new(FixedClock(today.and_time(clock_time(8, 0)))),
    );
    let scheduler = service.scheduler();

    println!("Lead routing demo ({today}, 08:00)");

    let senior =
        scheduler.upsert_closer(demo_closer("closer-ana", "Ana Lima", PoolTag::HighScore))?;
    let junior =
        scheduler.upsert_closer(demo_closer("closer-bruno", "Bruno Dias", PoolTag::LowScore))?;
    scheduler.add_block(
        &senior.id,
        BlockRequest {
            date: today,
            start_time: clock_time(12, 0),
            end_time: clock_time(13, 0),
            kind: BlockKind::Lunch,
            reason: Some("team lunch".to_string()),
        },
    )?;
    println!(
        "Closers: {} (high score), {} (low score)",
        senior.full_name, junior.full_name
    );

    let config = service.create_config(demo_config(&senior.id, &junior.id))?;
    println!(
        "Scoring configuration '{}' active with threshold {}",
        config.name,
        config.threshold()
    );

    println!("\nQualifying a hot lead with auto-scheduling");
    let hot = service.qualify(LeadSubmission {
        auto_schedule: true,
        ..demo_submission(hot_attributes())
    })?;
    print_qualification(
        &hot.lead.id,
        hot.score.total_score,
        hot.assignment.tier,
        hot.assignment.closer_id.as_ref(),
    );
    let hot_appointment = match &hot.scheduling {
        Some(AutoSchedule::Scheduled { appointment_id }) => {
            println!("  Auto-scheduled appointment {appointment_id}");
            Some(appointment_id.clone())
        }
        Some(AutoSchedule::Failed { error, .. }) => {
            println!("  Auto-scheduling failed: {error}");
            None
        }
        None => None,
    };

    println!("\nQualifying a phone-only lead");
    let cold = service.qualify(demo_submission(QualificationAttributes {
        full_name: Some("Caio Prado".to_string()),
        phone: Some("+55 21 97777-0000".to_string()),
        ..QualificationAttributes::default()
    }))?;
    print_qualification(
        &cold.lead.id,
        cold.score.total_score,
        cold.assignment.tier,
        cold.assignment.closer_id.as_ref(),
    );

    if let Some(closer_id) = cold.assignment.closer_id.clone() {
        let booked = scheduler.schedule(ScheduleRequest {
            lead_id: cold.lead.id.clone(),
            closer_id: closer_id.clone(),
            kind: AppointmentType::Call,
            preferred_date: None,
            preferred_time: None,
            notes: Some("first contact".to_string()),
            actor: Some(DEMO_ACTOR.to_string()),
        })?;
        print_appointment("Booked", &booked);

        let next_day = booked.date + Duration::days(1);
        let later = scheduler.next_slot(&closer_id, Some(next_day))?;
        let moved = scheduler.reschedule(
            &booked.id,
            RescheduleRequest {
                preferred_date: Some(later.date),
                preferred_time: Some(later.start_time),
                actor: Some(DEMO_ACTOR.to_string()),
            },
        )?;
        print_appointment("Rescheduled", &moved);
    }

    if let Some(appointment_id) = hot_appointment {
        let cancelled = scheduler.cancel(
            &appointment_id,
            Some("lead asked to call back next week".to_string()),
            Some(DEMO_ACTOR.to_string()),
        )?;
        print_appointment("Cancelled", &cancelled);
    }

    let next = scheduler.next_slot(&senior.id, None)?;
    let grid = scheduler.availability(&senior.id, next.date)?;
    println!(
        "\n{} on {}: {} open of {} slots",
        senior.full_name,
        grid.date,
        grid.slots.iter().filter(|slot| slot.available).count(),
        grid.slots.len()
    );

    for lead_id in [&hot.lead.id, &cold.lead.id] {
        println!("\nHistory for {lead_id}");
        for event in service.history(lead_id)? {
            println!(
                "  {} {:<22} by {:<12} {}",
                event.created_at.format("%H:%M:%S"),
                event.action.label(),
                event.actor,
                format_details(&event.details)
            );
        }
    }

    Ok(())
}

fn print_qualification(lead_id: &LeadId, score: i32, tier: Tier, closer: Option<&CloserId>) {
    let closer = closer
        .map(|id| id.to_string())
        .unwrap_or_else(|| "unassigned".to_string());
    println!(
        "  Lead {lead_id}: score {score}, tier {}, closer {closer}",
        tier.label()
    );
}

fn print_appointment(verb: &str, appointment: &Appointment) {
    println!(
        "  {verb} {} with {} on {} {}-{} ({})",
        appointment.kind.label(),
        appointment.closer_id,
        appointment.date,
        appointment.start_time.format("%H:%M"),
        appointment.end_time.format("%H:%M"),
        appointment.status.label()
    );
}

fn format_details(details: &BTreeMap<String, String>) -> String {
    details
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(" ")
}

fn clock_time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

fn demo_closer(id: &str, name: &str, pool: PoolTag) -> Closer {
    Closer {
        id: CloserId::new(id),
        organization_id: OrganizationId::new(DEMO_ORG),
        full_name: name.to_string(),
        email: Some(format!("{id}@demo.test")),
        active: true,
        pool: Some(pool),
        schedule: WeeklySchedule::weekdays(clock_time(9, 0), clock_time(17, 0)),
    }
}

fn demo_config(high: &CloserId, low: &CloserId) -> ScoringConfigDraft {
    let mut temperature = BTreeMap::new();
    temperature.insert("hot".to_string(), 40);
    temperature.insert("warm".to_string(), 20);
    ScoringConfigDraft {
        id: None,
        organization_id: OrganizationId::new(DEMO_ORG),
        name: "Inbound demo".to_string(),
        is_active: true,
        weights: WeightTable {
            phone: Some(10),
            email: Some(10),
            temperature,
            ..WeightTable::default()
        },
        low_score_threshold: Some(50),
        high_score_closer_id: Some(high.clone()),
        low_score_closer_id: Some(low.clone()),
    }
}

fn demo_submission(attributes: QualificationAttributes) -> LeadSubmission {
    LeadSubmission {
        organization_id: OrganizationId::new(DEMO_ORG),
        lead_id: None,
        attributes,
        auto_schedule: false,
        appointment_type: AppointmentType::default(),
        actor: Some(DEMO_ACTOR.to_string()),
    }
}

fn hot_attributes() -> QualificationAttributes {
    QualificationAttributes {
        full_name: Some("Dana Souza".to_string()),
        phone: Some("+55 11 99999-0000".to_string()),
        email: Some("dana@example.com".to_string()),
        company: Some("Acme".to_string()),
        temperature: Some("quente".to_string()),
        ..QualificationAttributes::default()
    }
}
