use std::sync::Arc;

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::availability::{AvailabilityService, BusyDay, DayAvailability, Slot};
use super::domain::{
    hhmm, Appointment, AppointmentId, AppointmentStatus, AppointmentType, BlockKind,
    CalendarBlock, CalendarBlockId, Closer, CloserId, HistoryAction, HistoryEvent, Lead,
    LeadId, LeadStatus, TimeRange, SYSTEM_ACTOR,
};
use super::history::details;
use super::repository::{
    LeadStore, LeadUpdate, RepositoryError, Reservation, SlotChange, Transition,
};
use super::validation::{require_ordered, require_text, validate_schedule, ValidationError};

pub const RESERVATION_CONFLICTS_METRIC: &str = "leadflow_reservation_conflicts_total";
pub const DEFAULT_RESERVATION_ATTEMPTS: u32 = 3;

/// Wall-clock source for "now" on closer calendars.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Clock pinned to one instant; used by the demo and by tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Tuning knobs for slot search and reservation retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub lookahead_days: u32,
    pub reservation_attempts: u32,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            lookahead_days: super::availability::DEFAULT_LOOKAHEAD_DAYS,
            reservation_attempts: DEFAULT_RESERVATION_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub lead_id: LeadId,
    pub closer_id: CloserId,
    #[serde(default, rename = "type")]
    pub kind: AppointmentType,
    #[serde(default)]
    pub preferred_date: Option<NaiveDate>,
    #[serde(default, with = "hhmm::option")]
    pub preferred_time: Option<NaiveTime>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RescheduleRequest {
    #[serde(default)]
    pub preferred_date: Option<NaiveDate>,
    #[serde(default, with = "hhmm::option")]
    pub preferred_time: Option<NaiveTime>,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlockRequest {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(default = "default_block_kind")]
    pub kind: BlockKind,
    #[serde(default)]
    pub reason: Option<String>,
}

fn default_block_kind() -> BlockKind {
    BlockKind::Unavailable
}

/// Result of deactivating a closer: appointments now waiting for manual reassignment.
#[derive(Debug, Clone, Serialize)]
pub struct Deactivation {
    pub closer_id: CloserId,
    pub flagged: Vec<Appointment>,
}

/// Scheduler failures. `AlreadyScheduled` and `Conflict` carry what a client needs to
/// retry; `NotFound`, `NoAvailableSlot` and `Validation` are terminal.
#[derive(Debug, thiserror::Error)]
pub enum SchedulingError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error("closer {closer_id} has no free slot in the next {lookahead_days} days")]
    NoAvailableSlot {
        closer_id: CloserId,
        lookahead_days: u32,
    },
    #[error("lead {lead_id} already has active appointment {appointment_id}")]
    AlreadyScheduled {
        lead_id: LeadId,
        appointment_id: AppointmentId,
    },
    #[error("slot taken by a concurrent booking after {attempts} attempt(s)")]
    Conflict { attempts: u32 },
    #[error("appointment is {} and cannot become {}", .from.label(), .to.label())]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    #[error("closer {closer_id} is inactive; appointment {appointment_id} needs reassignment")]
    CloserInactive {
        closer_id: CloserId,
        appointment_id: AppointmentId,
    },
    #[error("storage failure: {0}")]
    Repository(#[from] RepositoryError),
}

impl SchedulingError {
    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether a client may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulingError::Conflict { .. })
    }
}

/// How the target slot is chosen on each attempt.
#[derive(Debug, Clone, Copy)]
enum SlotChoice {
    /// Caller-provided date and time, used verbatim.
    Exact(Slot),
    /// First free slot on or after this date.
    From(Option<NaiveDate>),
}

/// Books, moves and closes appointments on closer calendars.
///
/// Slot search is advisory; the store's conditional write decides. A losing caller
/// recomputes the slot and retries up to `reservation_attempts` times.
pub struct AppointmentScheduler<S> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    availability: AvailabilityService,
    reservation_attempts: u32,
}

impl<S> Clone for AppointmentScheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            availability: self.availability,
            reservation_attempts: self.reservation_attempts,
        }
    }
}

impl<S> AppointmentScheduler<S>
where
    S: LeadStore + 'static,
{
    pub fn new(store: Arc<S>, settings: SchedulerSettings) -> Self {
        Self::with_clock(store, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<S>, settings: SchedulerSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            availability: AvailabilityService::new(settings.lookahead_days),
            reservation_attempts: settings.reservation_attempts.max(1),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Book an appointment for a lead with a closer of the same organization.
    ///
    /// A preferred date and time are booked as given when free, but a slot that starts
    /// before the clock's current time is rejected as a validation error rather than
    /// moved forward. Without a preference the next free slot is taken.
    pub fn schedule(&self, request: ScheduleRequest) -> Result<Appointment, SchedulingError> {
        let lead = self.lead(&request.lead_id)?;
        let closer = self.closer(&request.closer_id)?;
        if lead.organization_id != closer.organization_id {
            return Err(ValidationError::invalid(
                "closer_id",
                "lead and closer belong to different organizations",
            )
            .into());
        }
        if !closer.active {
            return Err(ValidationError::invalid("closer_id", "closer is inactive").into());
        }

        if let Some(existing) = self.store.active_for_lead(&lead.id)? {
            return Err(SchedulingError::AlreadyScheduled {
                lead_id: lead.id,
                appointment_id: existing.id,
            });
        }

        let choice = self.slot_choice(&closer, request.preferred_date, request.preferred_time)?;
        let actor = request.actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string());

        for attempt in 1..=self.reservation_attempts {
            let slot = self.resolve(&closer, choice)?;
            let stamp = Utc::now();
            let appointment = Appointment {
                id: AppointmentId::generate(),
                lead_id: lead.id.clone(),
                closer_id: closer.id.clone(),
                organization_id: lead.organization_id.clone(),
                date: slot.date,
                start_time: slot.start_time,
                end_time: slot.end_time,
                kind: request.kind,
                status: AppointmentStatus::Scheduled,
                notes: request.notes.clone(),
                rescheduled_count: 0,
                previous_slot: None,
                cancellation_reason: None,
                outcome: None,
                needs_reassignment: false,
                created_at: stamp,
                updated_at: stamp,
            };
            let event = HistoryEvent::new(
                lead.id.clone(),
                HistoryAction::AppointmentScheduled,
                actor.as_str(),
                details([
                    ("appointment_id", appointment.id.to_string()),
                    ("closer_id", closer.id.to_string()),
                    ("date", slot.date.to_string()),
                    ("start_time", slot.start_time.format("%H:%M").to_string()),
                    ("end_time", slot.end_time.format("%H:%M").to_string()),
                    ("type", request.kind.label().to_string()),
                ]),
            );
            let reservation = Reservation {
                appointment,
                lead_update: LeadUpdate {
                    status: LeadStatus::Scheduled,
                    next_followup_date: Some(slot.date),
                    touched_at: stamp,
                },
                event,
            };

            match self.store.reserve(reservation) {
                Ok(appointment) => {
                    tracing::info!(
                        appointment_id = %appointment.id,
                        lead_id = %appointment.lead_id,
                        closer_id = %appointment.closer_id,
                        date = %appointment.date,
                        start = %appointment.start_time.format("%H:%M"),
                        attempt,
                        "appointment scheduled"
                    );
                    return Ok(appointment);
                }
                Err(RepositoryError::LeadAlreadyScheduled(appointment_id)) => {
                    return Err(SchedulingError::AlreadyScheduled {
                        lead_id: lead.id,
                        appointment_id,
                    });
                }
                Err(RepositoryError::SlotTaken(_) | RepositoryError::Conflict) => {
                    self.note_conflict(&closer.id, attempt, choice)?;
                }
                Err(RepositoryError::NotFound) => {
                    return Err(SchedulingError::not_found("lead", &lead.id));
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(SchedulingError::Conflict {
            attempts: self.reservation_attempts,
        })
    }

    /// Move an active appointment. The old slot is released in the same write that
    /// claims the new one. Appointments of a deactivated closer stay flagged and cannot
    /// be moved on that closer's calendar. A preferred slot in the past is rejected as in
    /// [`Self::schedule`].
    pub fn reschedule(
        &self,
        appointment_id: &AppointmentId,
        request: RescheduleRequest,
    ) -> Result<Appointment, SchedulingError> {
        let current = self.appointment(appointment_id)?;
        if !current.is_active() {
            return Err(SchedulingError::InvalidTransition {
                from: current.status,
                to: AppointmentStatus::Rescheduled,
            });
        }
        let closer = self.closer(&current.closer_id)?;
        if !closer.active || current.needs_reassignment {
            return Err(SchedulingError::CloserInactive {
                closer_id: closer.id,
                appointment_id: current.id,
            });
        }
        let choice = self.slot_choice(&closer, request.preferred_date, request.preferred_time)?;
        let actor = request.actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string());

        for attempt in 1..=self.reservation_attempts {
            let slot = self.resolve(&closer, choice)?;
            let event = HistoryEvent::new(
                current.lead_id.clone(),
                HistoryAction::AppointmentRescheduled,
                actor.as_str(),
                details([
                    ("appointment_id", current.id.to_string()),
                    ("from_date", current.date.to_string()),
                    ("from_time", current.start_time.format("%H:%M").to_string()),
                    ("to_date", slot.date.to_string()),
                    ("to_time", slot.start_time.format("%H:%M").to_string()),
                ]),
            );
            let change = SlotChange {
                slot,
                lead_update: LeadUpdate {
                    status: LeadStatus::Scheduled,
                    next_followup_date: Some(slot.date),
                    touched_at: Utc::now(),
                },
                event,
            };

            match self.store.reschedule(appointment_id, change) {
                Ok(moved) => {
                    tracing::info!(
                        appointment_id = %moved.id,
                        date = %moved.date,
                        start = %moved.start_time.format("%H:%M"),
                        count = moved.rescheduled_count,
                        "appointment rescheduled"
                    );
                    return Ok(moved);
                }
                Err(RepositoryError::SlotTaken(_) | RepositoryError::Conflict) => {
                    self.note_conflict(&closer.id, attempt, choice)?;
                }
                Err(RepositoryError::NeedsReassignment(appointment_id)) => {
                    return Err(SchedulingError::CloserInactive {
                        closer_id: closer.id,
                        appointment_id,
                    });
                }
                Err(err) => return Err(self.map_transition_error(appointment_id, err)),
            }
        }

        Err(SchedulingError::Conflict {
            attempts: self.reservation_attempts,
        })
    }

    pub fn cancel(
        &self,
        appointment_id: &AppointmentId,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let mut extra = Vec::new();
        if let Some(reason) = &reason {
            extra.push(("reason", reason.clone()));
        }
        self.close(
            appointment_id,
            AppointmentStatus::Cancelled,
            LeadStatus::Assigned,
            actor,
            extra,
            |transition| transition.cancellation_reason = reason,
        )
    }

    pub fn complete(
        &self,
        appointment_id: &AppointmentId,
        outcome: Option<String>,
        actor: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        let mut extra = Vec::new();
        if let Some(outcome) = &outcome {
            extra.push(("outcome", outcome.clone()));
        }
        self.close(
            appointment_id,
            AppointmentStatus::Completed,
            LeadStatus::Attended,
            actor,
            extra,
            |transition| transition.outcome = outcome,
        )
    }

    pub fn mark_no_show(
        &self,
        appointment_id: &AppointmentId,
        actor: Option<String>,
    ) -> Result<Appointment, SchedulingError> {
        self.close(
            appointment_id,
            AppointmentStatus::NoShow,
            LeadStatus::NoShow,
            actor,
            Vec::new(),
            |_| {},
        )
    }

    /// Earliest free slot on or after `from_date`, never earlier than now.
    pub fn next_slot(
        &self,
        closer_id: &CloserId,
        from_date: Option<NaiveDate>,
    ) -> Result<Slot, SchedulingError> {
        let closer = self.closer(closer_id)?;
        self.resolve(&closer, SlotChoice::From(from_date))
    }

    /// Working hours, free intervals and slot grid for one day.
    pub fn availability(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<DayAvailability, SchedulingError> {
        let closer = self.closer(closer_id)?;
        let busy = self.busy_day(&closer.id, date)?;
        Ok(AvailabilityService::day_availability(
            &closer.schedule,
            date,
            &busy,
            self.clock.now(),
        ))
    }

    /// Appointments of a closer between two dates (inclusive).
    pub fn closer_schedule(
        &self,
        closer_id: &CloserId,
        from: NaiveDate,
        to: NaiveDate,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, SchedulingError> {
        if to < from {
            return Err(ValidationError::invalid("to", "must not be before from").into());
        }
        self.closer(closer_id)?;
        Ok(self
            .store
            .appointments_for_closer(closer_id, from, to, include_cancelled)?)
    }

    pub fn upsert_closer(&self, closer: Closer) -> Result<Closer, SchedulingError> {
        require_text("id", closer.id.as_str())?;
        require_text("organization_id", closer.organization_id.as_str())?;
        require_text("full_name", &closer.full_name)?;
        validate_schedule(&closer.schedule)?;

        let stored = self.store.upsert_closer(closer)?;
        tracing::info!(closer_id = %stored.id, active = stored.active, "closer saved");
        Ok(stored)
    }

    pub fn add_block(
        &self,
        closer_id: &CloserId,
        request: BlockRequest,
    ) -> Result<CalendarBlock, SchedulingError> {
        let range = TimeRange::new(request.start_time, request.end_time);
        require_ordered("block", &range)?;
        self.closer(closer_id)?;

        let block = CalendarBlock {
            id: CalendarBlockId::generate(),
            closer_id: closer_id.clone(),
            date: request.date,
            range,
            kind: request.kind,
            reason: request.reason,
        };
        Ok(self.store.insert_block(block)?)
    }

    /// Take a closer out of rotation. Future active appointments are flagged for
    /// reassignment rather than cancelled.
    pub fn deactivate_closer(
        &self,
        closer_id: &CloserId,
        actor: Option<String>,
    ) -> Result<Deactivation, SchedulingError> {
        let actor = actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        let today = self.clock.now().date();
        let flagged = self
            .store
            .deactivate_closer(closer_id, today, &actor)
            .map_err(|err| match err {
                RepositoryError::NotFound => SchedulingError::not_found("closer", closer_id),
                other => other.into(),
            })?;

        if !flagged.is_empty() {
            tracing::warn!(
                closer_id = %closer_id,
                flagged = flagged.len(),
                "closer deactivated with future appointments; manual reassignment needed"
            );
        }
        Ok(Deactivation {
            closer_id: closer_id.clone(),
            flagged,
        })
    }

    fn close<F>(
        &self,
        appointment_id: &AppointmentId,
        to: AppointmentStatus,
        lead_status: LeadStatus,
        actor: Option<String>,
        extra: Vec<(&'static str, String)>,
        fill: F,
    ) -> Result<Appointment, SchedulingError>
    where
        F: FnOnce(&mut Transition),
    {
        let current = self.appointment(appointment_id)?;
        if !current.is_active() {
            return Err(SchedulingError::InvalidTransition {
                from: current.status,
                to,
            });
        }

        let action = match to {
            AppointmentStatus::Completed => HistoryAction::AppointmentCompleted,
            AppointmentStatus::NoShow => HistoryAction::AppointmentNoShow,
            _ => HistoryAction::AppointmentCancelled,
        };
        let mut entries = vec![
            ("appointment_id", current.id.to_string()),
            ("previous_status", current.status.label().to_string()),
        ];
        entries.extend(extra);

        let mut transition = Transition {
            to,
            cancellation_reason: None,
            outcome: None,
            lead_update: LeadUpdate {
                status: lead_status,
                next_followup_date: None,
                touched_at: Utc::now(),
            },
            event: HistoryEvent::new(
                current.lead_id.clone(),
                action,
                actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
                details(entries),
            ),
        };
        fill(&mut transition);

        let updated = self
            .store
            .transition(appointment_id, transition)
            .map_err(|err| self.map_transition_error(appointment_id, err))?;
        tracing::info!(
            appointment_id = %updated.id,
            status = updated.status.label(),
            "appointment closed"
        );
        Ok(updated)
    }

    fn slot_choice(
        &self,
        closer: &Closer,
        preferred_date: Option<NaiveDate>,
        preferred_time: Option<NaiveTime>,
    ) -> Result<SlotChoice, SchedulingError> {
        match (preferred_date, preferred_time) {
            (Some(date), Some(time)) => {
                let range = TimeRange::starting_at(time, closer.schedule.slot_minutes.max(1))
                    .ok_or_else(|| {
                        ValidationError::invalid("preferred_time", "slot would cross midnight")
                    })?;
                if date.and_time(time) < self.clock.now() {
                    return Err(
                        ValidationError::invalid("preferred_date", "slot is in the past").into(),
                    );
                }
                Ok(SlotChoice::Exact(Slot {
                    date,
                    start_time: range.start,
                    end_time: range.end,
                }))
            }
            (None, Some(_)) => Err(ValidationError::invalid(
                "preferred_time",
                "preferred_date is required when preferred_time is given",
            )
            .into()),
            (date, None) => Ok(SlotChoice::From(date)),
        }
    }

    fn resolve(&self, closer: &Closer, choice: SlotChoice) -> Result<Slot, SchedulingError> {
        match choice {
            SlotChoice::Exact(slot) => Ok(slot),
            SlotChoice::From(from_date) => {
                let now = self.clock.now();
                let from = match from_date {
                    Some(date) => now.max(date.and_time(NaiveTime::MIN)),
                    None => now,
                };
                self.availability
                    .next_available_slot(&closer.schedule, from, |date| {
                        self.busy_day(&closer.id, date)
                    })?
                    .ok_or_else(|| SchedulingError::NoAvailableSlot {
                        closer_id: closer.id.clone(),
                        lookahead_days: self.availability.lookahead_days(),
                    })
            }
        }
    }

    fn note_conflict(
        &self,
        closer_id: &CloserId,
        attempt: u32,
        choice: SlotChoice,
    ) -> Result<(), SchedulingError> {
        counter!(RESERVATION_CONFLICTS_METRIC).increment(1);
        tracing::warn!(closer_id = %closer_id, attempt, "slot reservation lost to a concurrent booking");
        match choice {
            SlotChoice::Exact(_) => Err(SchedulingError::Conflict { attempts: attempt }),
            SlotChoice::From(_) => Ok(()),
        }
    }

    fn map_transition_error(
        &self,
        appointment_id: &AppointmentId,
        err: RepositoryError,
    ) -> SchedulingError {
        match err {
            RepositoryError::NotFound => SchedulingError::not_found("appointment", appointment_id),
            RepositoryError::InvalidTransition { from, to } => {
                SchedulingError::InvalidTransition { from, to }
            }
            other => other.into(),
        }
    }

    fn busy_day(&self, closer_id: &CloserId, date: NaiveDate) -> Result<BusyDay, SchedulingError> {
        let appointments = self
            .store
            .active_for_closer_on(closer_id, date)?
            .iter()
            .map(Appointment::range)
            .collect();
        let blocks = self
            .store
            .blocks_on(closer_id, date)?
            .iter()
            .map(|block| block.range)
            .collect();
        Ok(BusyDay {
            appointments,
            blocks,
        })
    }

    fn lead(&self, id: &LeadId) -> Result<Lead, SchedulingError> {
        self.store
            .fetch_lead(id)?
            .ok_or_else(|| SchedulingError::not_found("lead", id))
    }

    fn closer(&self, id: &CloserId) -> Result<Closer, SchedulingError> {
        self.store
            .fetch_closer(id)?
            .ok_or_else(|| SchedulingError::not_found("closer", id))
    }

    fn appointment(&self, id: &AppointmentId) -> Result<Appointment, SchedulingError> {
        self.store
            .fetch_appointment(id)?
            .ok_or_else(|| SchedulingError::not_found("appointment", id))
    }
}
