use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::to_bytes;
use axum::response::Response;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use crate::workflows::leads::domain::{
    Closer, CloserId, HistoryEvent, LeadId, OrganizationId, QualificationAttributes,
    WeeklySchedule,
};
use crate::workflows::leads::repository::{HistorySink, RepositoryError};
use crate::workflows::leads::scoring::WeightTable;
use crate::workflows::leads::{
    FixedClock, InMemoryStore, LeadIntakeService, LeadSubmission, SchedulerSettings,
    ScoringConfigDraft,
};

pub(super) const ORG: &str = "org-acme";

pub(super) fn org() -> OrganizationId {
    OrganizationId::new(ORG)
}

pub(super) fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

pub(super) fn time(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
}

/// Monday 2025-06-09, 08:00.
pub(super) fn monday_morning() -> NaiveDateTime {
    date(2025, 6, 9).and_time(time(8, 0))
}

pub(super) fn closer(id: &str) -> Closer {
    Closer {
        id: CloserId::new(id),
        organization_id: org(),
        full_name: format!("Closer {id}"),
        email: Some(format!("{}@acme.test", id.to_ascii_lowercase())),
        active: true,
        pool: None,
        schedule: WeeklySchedule::weekdays(time(9, 0), time(17, 0)),
    }
}

/// Weights `{phone: 10, email: 10, temperature: {hot: 40}}`, threshold 50, C1 high, C2 low.
pub(super) fn scenario_config() -> ScoringConfigDraft {
    let mut temperature = BTreeMap::new();
    temperature.insert("hot".to_string(), 40);
    ScoringConfigDraft {
        id: None,
        organization_id: org(),
        name: "Inbound 2025".to_string(),
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
    }
}

pub(super) fn hot_lead() -> QualificationAttributes {
    QualificationAttributes {
        full_name: Some("Dana Souza".to_string()),
        phone: Some("+55 11 99999-0000".to_string()),
        email: Some("dana@example.com".to_string()),
        temperature: Some("hot".to_string()),
        ..QualificationAttributes::default()
    }
}

pub(super) fn phone_only_lead() -> QualificationAttributes {
    QualificationAttributes {
        phone: Some("+55 11 98888-0000".to_string()),
        ..QualificationAttributes::default()
    }
}

pub(super) fn submission(attributes: QualificationAttributes) -> LeadSubmission {
    LeadSubmission {
        organization_id: org(),
        lead_id: None,
        attributes,
        auto_schedule: false,
        appointment_type: Default::default(),
        actor: Some("intake-form".to_string()),
    }
}

pub(super) type MemoryService = LeadIntakeService<InMemoryStore, InMemoryStore>;

pub(super) fn build_service(now: NaiveDateTime) -> (MemoryService, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let service = LeadIntakeService::with_clock(
        Arc::clone(&store),
        Arc::clone(&store),
        SchedulerSettings::default(),
        Arc::new(FixedClock(now)),
    );
    (service, store)
}

/// Service with closers C1 and C2 (weekdays 09:00-17:00) and the scenario configuration active.
pub(super) fn seeded_service(now: NaiveDateTime) -> (MemoryService, Arc<InMemoryStore>) {
    let (service, store) = build_service(now);
    service
        .scheduler()
        .upsert_closer(closer("C1"))
        .expect("C1 saved");
    service
        .scheduler()
        .upsert_closer(closer("C2"))
        .expect("C2 saved");
    service
        .create_config(scenario_config())
        .expect("config created");
    (service, store)
}

pub(super) fn qualified_lead(service: &MemoryService, attributes: QualificationAttributes) -> LeadId {
    service
        .qualify(submission(attributes))
        .expect("lead qualifies")
        .lead
        .id
}

/// History sink that rejects every append.
#[derive(Default)]
pub(super) struct FailingHistory;

impl HistorySink for FailingHistory {
    fn append(&self, _event: HistoryEvent) -> Result<(), RepositoryError> {
        Err(RepositoryError::Unavailable("audit log offline".to_string()))
    }

    fn history_for(&self, _lead_id: &LeadId) -> Result<Vec<HistoryEvent>, RepositoryError> {
        Ok(Vec::new())
    }
}

pub(super) async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body readable");
    serde_json::from_slice(&bytes).expect("json body")
}
