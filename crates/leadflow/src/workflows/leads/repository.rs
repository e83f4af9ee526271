use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use super::availability::Slot;
use super::domain::{
    Appointment, AppointmentId, AppointmentStatus, CalendarBlock, Closer, CloserId,
    HistoryEvent, Lead, LeadId, LeadStatus, OrganizationId, ScoringConfigId, Tier,
};
use super::scoring::{ScoreComponent, ScoringConfiguration};

/// Error enumeration for storage failures.
///
/// `LeadAlreadyScheduled` and `SlotTaken` are raised by the write itself, never by an
/// earlier read, so they are authoritative under concurrency.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("lead already has active appointment {0}")]
    LeadAlreadyScheduled(AppointmentId),
    #[error("slot overlaps active appointment {0}")]
    SlotTaken(AppointmentId),
    #[error("appointment is {} and cannot become {}", .from.label(), .to.label())]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("appointment {0} is waiting for reassignment to another closer")]
    NeedsReassignment(AppointmentId),
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

/// Lead fields written in the same unit as an appointment change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadUpdate {
    pub status: LeadStatus,
    pub next_followup_date: Option<NaiveDate>,
    pub touched_at: DateTime<Utc>,
}

impl LeadUpdate {
    pub(crate) fn apply(&self, lead: &mut Lead) {
        lead.status = self.status;
        lead.next_followup_date = self.next_followup_date;
        lead.last_interaction_at = Some(self.touched_at);
        lead.updated_at = self.touched_at;
    }
}

/// Score and routing fields rewritten by a re-score. Everything else on the lead, including
/// scheduling state written concurrently, is left as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoringUpdate {
    pub lead_score: i32,
    pub score_breakdown: Vec<ScoreComponent>,
    pub tier: Tier,
    pub assigned_closer_id: Option<CloserId>,
    pub touched_at: DateTime<Utc>,
}

impl ScoringUpdate {
    pub(crate) fn apply(&self, lead: &mut Lead) {
        lead.lead_score = self.lead_score;
        lead.score_breakdown = self.score_breakdown.clone();
        lead.tier = Some(self.tier);
        lead.assigned_closer_id = self.assigned_closer_id.clone();
        if matches!(
            lead.status,
            LeadStatus::New | LeadStatus::Assigned | LeadStatus::Unassigned
        ) {
            lead.status = if self.assigned_closer_id.is_some() {
                LeadStatus::Assigned
            } else {
                LeadStatus::Unassigned
            };
        }
        lead.updated_at = self.touched_at;
    }
}

/// Appointment insert plus its lead update and audit entry. Stores commit all three or none.
#[derive(Debug, Clone)]
pub struct Reservation {
    pub appointment: Appointment,
    pub lead_update: LeadUpdate,
    pub event: HistoryEvent,
}

/// Move an active appointment to a new slot.
#[derive(Debug, Clone)]
pub struct SlotChange {
    pub slot: Slot,
    pub lead_update: LeadUpdate,
    pub event: HistoryEvent,
}

/// Status change on an active appointment.
#[derive(Debug, Clone)]
pub struct Transition {
    pub to: AppointmentStatus,
    pub cancellation_reason: Option<String>,
    pub outcome: Option<String>,
    pub lead_update: LeadUpdate,
    pub event: HistoryEvent,
}

/// Per-organization weighted rule sets. At most one is active per organization.
pub trait ScoringConfigStore: Send + Sync {
    /// Insert; when the record is active, siblings are deactivated in the same write.
    fn insert_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError>;
    /// Replace by id; when the record is active, siblings are deactivated in the same write.
    fn update_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError>;
    fn activate_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<ScoringConfiguration, RepositoryError>;
    fn fetch_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError>;
    fn active_config(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError>;
    /// Newest first.
    fn configs_for(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<ScoringConfiguration>, RepositoryError>;
}

pub trait LeadRepository: Send + Sync {
    fn insert_lead(&self, lead: Lead) -> Result<Lead, RepositoryError>;
    /// Applies `update` to the stored lead in one atomic read-modify-write.
    fn apply_scoring(&self, id: &LeadId, update: &ScoringUpdate) -> Result<Lead, RepositoryError>;
    fn fetch_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError>;
}

pub trait CloserDirectory: Send + Sync {
    fn upsert_closer(&self, closer: Closer) -> Result<Closer, RepositoryError>;
    fn fetch_closer(&self, id: &CloserId) -> Result<Option<Closer>, RepositoryError>;
    fn insert_block(&self, block: CalendarBlock) -> Result<CalendarBlock, RepositoryError>;
    fn blocks_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<CalendarBlock>, RepositoryError>;
    /// Mark the closer inactive and flag its active appointments on or after `from` for
    /// reassignment, recording `events` for the affected leads. One atomic write.
    fn deactivate_closer(
        &self,
        id: &CloserId,
        from: NaiveDate,
        actor: &str,
    ) -> Result<Vec<Appointment>, RepositoryError>;
}

pub trait AppointmentStore: Send + Sync {
    fn active_for_lead(&self, lead_id: &LeadId) -> Result<Option<Appointment>, RepositoryError>;
    /// Active appointments of a closer on one date, ordered by start time.
    fn active_for_closer_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError>;
    fn fetch_appointment(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError>;
    fn appointments_for_closer(
        &self,
        closer_id: &CloserId,
        from: NaiveDate,
        to: NaiveDate,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, RepositoryError>;
    /// Conditional insert. Fails with `LeadAlreadyScheduled` or `SlotTaken` when the
    /// invariants would break at commit time.
    fn reserve(&self, reservation: Reservation) -> Result<Appointment, RepositoryError>;
    /// Free the old slot and hold the new one in a single write.
    fn reschedule(
        &self,
        id: &AppointmentId,
        change: SlotChange,
    ) -> Result<Appointment, RepositoryError>;
    fn transition(
        &self,
        id: &AppointmentId,
        transition: Transition,
    ) -> Result<Appointment, RepositoryError>;
}

/// Append-only audit log.
pub trait HistorySink: Send + Sync {
    fn append(&self, event: HistoryEvent) -> Result<(), RepositoryError>;
    /// Oldest first.
    fn history_for(&self, lead_id: &LeadId) -> Result<Vec<HistoryEvent>, RepositoryError>;
}

/// Everything the lead engine needs from storage.
pub trait LeadStore:
    ScoringConfigStore + LeadRepository + CloserDirectory + AppointmentStore + HistorySink
{
}

impl<T> LeadStore for T where
    T: ScoringConfigStore + LeadRepository + CloserDirectory + AppointmentStore + HistorySink
{
}
