use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, Utc};
use leadflow::workflows::leads::{
    AppointmentScheduler, AppointmentStore, Closer, CloserId, FixedClock, HistoryAction,
    HistorySink, InMemoryStore, LeadId, LeadIntakeService, LeadRepository, LeadStatus, LeadStore,
    LeadSubmission, OrganizationId, QualificationAttributes, RescheduleRequest, ScheduleRequest,
    SchedulerSettings, SchedulingError, ScoringConfigDraft, ScoringUpdate, SqliteStore, Tier,
    WeeklySchedule, WeightTable,
};

const THREADS: usize = 8;

fn now() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 6, 9)
        .and_then(|date| date.and_hms_opt(8, 0, 0))
        .expect("valid timestamp")
}

fn org() -> OrganizationId {
    OrganizationId::new("org-pipeline")
}

fn closer(id: &str) -> Closer {
    Closer {
        id: CloserId::new(id),
        organization_id: org(),
        full_name: format!("Closer {id}"),
        email: None,
        active: true,
        pool: None,
        schedule: WeeklySchedule::weekdays(
            NaiveTime::from_hms_opt(9, 0, 0).expect("time"),
            NaiveTime::from_hms_opt(17, 0, 0).expect("time"),
        ),
    }
}

fn intake<S>(store: Arc<S>) -> LeadIntakeService<S, S>
where
    S: LeadStore + 'static,
{
    let service = LeadIntakeService::with_clock(
        Arc::clone(&store),
        store,
        SchedulerSettings::default(),
        Arc::new(FixedClock(now())),
    );
    service
        .scheduler()
        .upsert_closer(closer("C1"))
        .expect("C1 saved");
    service
        .scheduler()
        .upsert_closer(closer("C2"))
        .expect("C2 saved");

    let mut temperature = BTreeMap::new();
    temperature.insert("hot".to_string(), 40);
    service
        .create_config(ScoringConfigDraft {
            id: None,
            organization_id: org(),
            name: "Pipeline".to_string(),
            is_active: true,
            weights: WeightTable {
                phone: Some(10),
                email: Some(10),
                temperature,
                ..WeightTable::default()
            },
            low_score_threshold: Some(50),
            high_score_closer_id: Some(CloserId::new("C1")),
            low_score_closer_id: Some(CloserId::new("C2")),
        })
        .expect("config saved");
    service
}

fn new_lead<S, H>(service: &LeadIntakeService<S, H>) -> LeadId
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    service
        .qualify(LeadSubmission {
            organization_id: org(),
            lead_id: None,
            attributes: QualificationAttributes {
                phone: Some("+1 555 0100".to_string()),
                email: Some("lead@example.com".to_string()),
                temperature: Some("hot".to_string()),
                ..QualificationAttributes::default()
            },
            auto_schedule: false,
            appointment_type: Default::default(),
            actor: None,
        })
        .expect("lead qualified")
        .lead
        .id
}

fn request(lead_id: &LeadId) -> ScheduleRequest {
    ScheduleRequest {
        lead_id: lead_id.clone(),
        closer_id: CloserId::new("C1"),
        kind: Default::default(),
        preferred_date: None,
        preferred_time: None,
        notes: None,
        actor: None,
    }
}

fn scheduler<S>(store: Arc<S>) -> AppointmentScheduler<S>
where
    S: LeadStore + 'static,
{
    AppointmentScheduler::with_clock(store, SchedulerSettings::default(), Arc::new(FixedClock(now())))
}

/// Races every scheduler in `schedulers` for the same lead and checks a single winner.
fn assert_single_booking<S>(schedulers: &[AppointmentScheduler<S>], lead_id: &LeadId)
where
    S: LeadStore + 'static,
{
    let results: Vec<Result<_, SchedulingError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..THREADS)
            .map(|index| {
                let scheduler = &schedulers[index % schedulers.len()];
                scope.spawn(move || scheduler.schedule(request(lead_id)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread finished"))
            .collect()
    });

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one booking wins: {results:?}");
    let winner = winners[0];

    for result in &results {
        match result {
            Ok(appointment) => assert_eq!(appointment.id, winner.id),
            Err(SchedulingError::AlreadyScheduled {
                lead_id: rejected,
                appointment_id,
            }) => {
                assert_eq!(rejected, lead_id);
                assert_eq!(appointment_id, &winner.id);
            }
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
}

fn assert_no_overlaps(appointments: &[leadflow::workflows::leads::Appointment]) {
    let active: Vec<_> = appointments.iter().filter(|a| a.is_active()).collect();
    for (index, left) in active.iter().enumerate() {
        for right in &active[index + 1..] {
            assert!(
                !(left.closer_id == right.closer_id
                    && left.date == right.date
                    && left.range().overlaps(&right.range())),
                "{} overlaps {}",
                left.id,
                right.id
            );
        }
        let same_lead = active.iter().filter(|a| a.lead_id == left.lead_id).count();
        assert_eq!(same_lead, 1, "lead {} has several active bookings", left.lead_id);
    }
}

fn race_many_leads<S>(schedulers: &[AppointmentScheduler<S>], leads: &[LeadId])
where
    S: LeadStore + 'static,
{
    let results: Vec<Result<_, SchedulingError>> = std::thread::scope(|scope| {
        let handles: Vec<_> = leads
            .iter()
            .enumerate()
            .map(|(index, lead_id)| {
                let scheduler = &schedulers[index % schedulers.len()];
                scope.spawn(move || scheduler.schedule(request(lead_id)))
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("thread finished"))
            .collect()
    });

    for result in &results {
        match result {
            Ok(_) | Err(SchedulingError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error {other:?}"),
        }
    }
    assert!(results.iter().any(Result::is_ok));
}

#[test]
fn concurrent_bookings_for_one_lead_persist_one_appointment_in_memory() {
    let store = Arc::new(InMemoryStore::new());
    let service = intake(Arc::clone(&store));
    let lead_id = new_lead(&service);

    let schedulers = vec![scheduler(Arc::clone(&store)); 2];
    assert_single_booking(&schedulers, &lead_id);

    let appointments = store.appointments().expect("appointments");
    assert_eq!(appointments.len(), 1);
    let history = store.history_for(&lead_id).expect("history");
    assert_eq!(
        history
            .iter()
            .filter(|event| event.action == HistoryAction::AppointmentScheduled)
            .count(),
        1
    );
}

#[test]
fn concurrent_bookings_for_one_closer_never_overlap_in_memory() {
    let store = Arc::new(InMemoryStore::new());
    let service = intake(Arc::clone(&store));
    let leads: Vec<LeadId> = (0..THREADS).map(|_| new_lead(&service)).collect();

    let schedulers = vec![scheduler(Arc::clone(&store))];
    race_many_leads(&schedulers, &leads);
    assert_no_overlaps(&store.appointments().expect("appointments"));
}

#[test]
fn concurrent_bookings_across_sqlite_connections() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("leadflow.db");

    let primary = Arc::new(SqliteStore::open(&path).expect("primary opens"));
    let secondary = Arc::new(SqliteStore::open(&path).expect("secondary opens"));
    let service = intake(Arc::clone(&primary));
    let contested = new_lead(&service);
    let leads: Vec<LeadId> = (0..THREADS).map(|_| new_lead(&service)).collect();

    let schedulers = vec![scheduler(Arc::clone(&primary)), scheduler(Arc::clone(&secondary))];
    assert_single_booking(&schedulers, &contested);
    race_many_leads(&schedulers, &leads);

    let appointments = primary
        .appointments_for_closer(
            &CloserId::new("C1"),
            NaiveDate::from_ymd_opt(2025, 6, 1).expect("date"),
            NaiveDate::from_ymd_opt(2025, 7, 31).expect("date"),
            true,
        )
        .expect("appointments");
    assert!(!appointments.is_empty());
    assert_no_overlaps(&appointments);
}

#[test]
fn sqlite_store_survives_reopen() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("leadflow.db");

    let lead_id = {
        let store = Arc::new(SqliteStore::open(&path).expect("opens"));
        let service = intake(Arc::clone(&store));
        let lead_id = new_lead(&service);
        service
            .scheduler()
            .schedule(request(&lead_id))
            .expect("booked");
        lead_id
    };

    let store = Arc::new(SqliteStore::open(&path).expect("reopens"));
    let service = LeadIntakeService::with_clock(
        Arc::clone(&store),
        Arc::clone(&store),
        SchedulerSettings::default(),
        Arc::new(FixedClock(now())),
    );
    let lead = service.get(&lead_id).expect("lead persisted");
    assert_eq!(lead.lead_score, 60);
    assert_eq!(lead.assigned_closer_id, Some(CloserId::new("C1")));

    let actions: Vec<HistoryAction> = service
        .history(&lead_id)
        .expect("history")
        .into_iter()
        .map(|event| event.action)
        .collect();
    assert_eq!(
        actions,
        vec![
            HistoryAction::LeadScored,
            HistoryAction::LeadAssigned,
            HistoryAction::AppointmentScheduled
        ]
    );
    assert!(store
        .active_for_lead(&lead_id)
        .expect("lookup")
        .is_some());
}

#[test]
fn sqlite_scoring_write_keeps_a_booking_from_another_connection() {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("leadflow.db");

    let primary = Arc::new(SqliteStore::open(&path).expect("primary opens"));
    let secondary = Arc::new(SqliteStore::open(&path).expect("secondary opens"));
    let service = intake(Arc::clone(&primary));
    let lead_id = new_lead(&service);
    let stale = primary
        .fetch_lead(&lead_id)
        .expect("fetch")
        .expect("lead stored");

    let appointment = scheduler(Arc::clone(&secondary))
        .schedule(request(&lead_id))
        .expect("booked");

    let written = primary
        .apply_scoring(
            &lead_id,
            &ScoringUpdate {
                lead_score: stale.lead_score,
                score_breakdown: stale.score_breakdown.clone(),
                tier: Tier::High,
                assigned_closer_id: stale.assigned_closer_id.clone(),
                touched_at: Utc::now(),
            },
        )
        .expect("scoring applied");
    assert_eq!(written.status, LeadStatus::Scheduled);
    assert_eq!(written.next_followup_date, Some(appointment.date));

    let deactivation = service
        .scheduler()
        .deactivate_closer(&CloserId::new("C1"), None)
        .expect("deactivated");
    assert_eq!(deactivation.flagged.len(), 1);
    let err = scheduler(Arc::clone(&secondary))
        .reschedule(&appointment.id, RescheduleRequest::default())
        .expect_err("closer inactive");
    assert!(matches!(err, SchedulingError::CloserInactive { .. }));
    let stored = primary
        .fetch_appointment(&appointment.id)
        .expect("fetch")
        .expect("appointment kept");
    assert!(stored.needs_reassignment);
    assert_eq!(stored.start_time, appointment.start_time);
}
