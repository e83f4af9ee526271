use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, Utc};

use super::domain::{
    Appointment, AppointmentId, AppointmentStatus, CalendarBlock, Closer, CloserId,
    HistoryEvent, Lead, LeadId, OrganizationId, PreviousSlot, ScoringConfigId,
};
use super::history::closer_deactivated_event;
use super::repository::{
    AppointmentStore, CloserDirectory, HistorySink, LeadRepository, LeadUpdate, ScoringUpdate,
    RepositoryError, Reservation, ScoringConfigStore, SlotChange, Transition,
};
use super::scoring::ScoringConfiguration;

#[derive(Default)]
struct StoreState {
    configs: Vec<ScoringConfiguration>,
    leads: HashMap<LeadId, Lead>,
    closers: HashMap<CloserId, Closer>,
    blocks: Vec<CalendarBlock>,
    appointments: Vec<Appointment>,
    history: Vec<HistoryEvent>,
}

impl StoreState {
    fn deactivate_siblings(&mut self, keep: &ScoringConfiguration) {
        if !keep.is_active {
            return;
        }
        for config in &mut self.configs {
            if config.organization_id == keep.organization_id && config.id != keep.id {
                config.is_active = false;
            }
        }
    }

    fn appointment_index(&self, id: &AppointmentId) -> Result<usize, RepositoryError> {
        self.appointments
            .iter()
            .position(|appointment| &appointment.id == id)
            .ok_or(RepositoryError::NotFound)
    }

    fn overlapping(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
        candidate: &Appointment,
    ) -> Option<&Appointment> {
        let range = candidate.range();
        self.appointments.iter().find(|existing| {
            existing.id != candidate.id
                && &existing.closer_id == closer_id
                && existing.blocks(date, &range)
        })
    }

    fn touch_lead(&mut self, lead_id: &LeadId, update: &LeadUpdate) {
        if let Some(lead) = self.leads.get_mut(lead_id) {
            update.apply(lead);
        }
    }
}

/// Process-local store. Every write runs inside one critical section, which makes the
/// reservation checks and the insert a single atomic step.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    /// Every stored appointment, in insertion order.
    pub fn appointments(&self) -> Result<Vec<Appointment>, RepositoryError> {
        Ok(self.lock()?.appointments.clone())
    }
}

impl ScoringConfigStore for InMemoryStore {
    fn insert_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.configs.iter().any(|existing| existing.id == config.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.deactivate_siblings(&config);
        guard.configs.push(config.clone());
        Ok(config)
    }

    fn update_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut guard = self.lock()?;
        let index = guard
            .configs
            .iter()
            .position(|existing| existing.id == config.id)
            .ok_or(RepositoryError::NotFound)?;
        guard.deactivate_siblings(&config);
        guard.configs[index] = config.clone();
        Ok(config)
    }

    fn activate_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut guard = self.lock()?;
        let index = guard
            .configs
            .iter()
            .position(|existing| &existing.id == id)
            .ok_or(RepositoryError::NotFound)?;
        let now = Utc::now();
        guard.configs[index].is_active = true;
        guard.configs[index].updated_at = now;
        let activated = guard.configs[index].clone();
        guard.deactivate_siblings(&activated);
        Ok(activated)
    }

    fn fetch_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard.configs.iter().find(|config| &config.id == id).cloned())
    }

    fn active_config(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .configs
            .iter()
            .find(|config| &config.organization_id == organization_id && config.is_active)
            .cloned())
    }

    fn configs_for(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<ScoringConfiguration>, RepositoryError> {
        let guard = self.lock()?;
        let mut configs: Vec<ScoringConfiguration> = guard
            .configs
            .iter()
            .rev()
            .filter(|config| &config.organization_id == organization_id)
            .cloned()
            .collect();
        // Stable sort keeps later inserts first on timestamp ties.
        configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(configs)
    }
}

impl LeadRepository for InMemoryStore {
    fn insert_lead(&self, lead: Lead) -> Result<Lead, RepositoryError> {
        let mut guard = self.lock()?;
        if guard.leads.contains_key(&lead.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.leads.insert(lead.id.clone(), lead.clone());
        Ok(lead)
    }

    fn apply_scoring(&self, id: &LeadId, update: &ScoringUpdate) -> Result<Lead, RepositoryError> {
        let mut guard = self.lock()?;
        let lead = guard.leads.get_mut(id).ok_or(RepositoryError::NotFound)?;
        update.apply(lead);
        Ok(lead.clone())
    }

    fn fetch_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        Ok(self.lock()?.leads.get(id).cloned())
    }
}

impl CloserDirectory for InMemoryStore {
    fn upsert_closer(&self, closer: Closer) -> Result<Closer, RepositoryError> {
        let mut guard = self.lock()?;
        guard.closers.insert(closer.id.clone(), closer.clone());
        Ok(closer)
    }

    fn fetch_closer(&self, id: &CloserId) -> Result<Option<Closer>, RepositoryError> {
        Ok(self.lock()?.closers.get(id).cloned())
    }

    fn insert_block(&self, block: CalendarBlock) -> Result<CalendarBlock, RepositoryError> {
        let mut guard = self.lock()?;
        if !guard.closers.contains_key(&block.closer_id) {
            return Err(RepositoryError::NotFound);
        }
        if guard.blocks.iter().any(|existing| existing.id == block.id) {
            return Err(RepositoryError::Conflict);
        }
        guard.blocks.push(block.clone());
        Ok(block)
    }

    fn blocks_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<CalendarBlock>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .blocks
            .iter()
            .filter(|block| &block.closer_id == closer_id && block.date == date)
            .cloned()
            .collect())
    }

    fn deactivate_closer(
        &self,
        id: &CloserId,
        from: NaiveDate,
        actor: &str,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let mut guard = self.lock()?;
        let closer = guard.closers.get_mut(id).ok_or(RepositoryError::NotFound)?;
        closer.active = false;

        let now = Utc::now();
        let mut flagged = Vec::new();
        for appointment in guard.appointments.iter_mut() {
            if &appointment.closer_id == id && appointment.is_active() && appointment.date >= from
            {
                appointment.needs_reassignment = true;
                appointment.updated_at = now;
                flagged.push(appointment.clone());
            }
        }

        for appointment in &flagged {
            guard
                .history
                .push(closer_deactivated_event(appointment, actor));
        }

        Ok(flagged)
    }
}

impl AppointmentStore for InMemoryStore {
    fn active_for_lead(&self, lead_id: &LeadId) -> Result<Option<Appointment>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .appointments
            .iter()
            .find(|appointment| &appointment.lead_id == lead_id && appointment.is_active())
            .cloned())
    }

    fn active_for_closer_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let guard = self.lock()?;
        let mut appointments: Vec<Appointment> = guard
            .appointments
            .iter()
            .filter(|appointment| {
                &appointment.closer_id == closer_id
                    && appointment.date == date
                    && appointment.is_active()
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.start_time);
        Ok(appointments)
    }

    fn fetch_appointment(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .appointments
            .iter()
            .find(|appointment| &appointment.id == id)
            .cloned())
    }

    fn appointments_for_closer(
        &self,
        closer_id: &CloserId,
        from: NaiveDate,
        to: NaiveDate,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let guard = self.lock()?;
        let mut appointments: Vec<Appointment> = guard
            .appointments
            .iter()
            .filter(|appointment| {
                &appointment.closer_id == closer_id
                    && appointment.date >= from
                    && appointment.date <= to
                    && (include_cancelled || appointment.status != AppointmentStatus::Cancelled)
            })
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| (appointment.date, appointment.start_time));
        Ok(appointments)
    }

    fn reserve(&self, reservation: Reservation) -> Result<Appointment, RepositoryError> {
        let Reservation {
            appointment,
            lead_update,
            event,
        } = reservation;

        let mut guard = self.lock()?;
        if !guard.leads.contains_key(&appointment.lead_id) {
            return Err(RepositoryError::NotFound);
        }
        if let Some(existing) = guard
            .appointments
            .iter()
            .find(|existing| existing.lead_id == appointment.lead_id && existing.is_active())
        {
            return Err(RepositoryError::LeadAlreadyScheduled(existing.id.clone()));
        }
        if let Some(existing) =
            guard.overlapping(&appointment.closer_id, appointment.date, &appointment)
        {
            return Err(RepositoryError::SlotTaken(existing.id.clone()));
        }

        guard.appointments.push(appointment.clone());
        guard.touch_lead(&appointment.lead_id, &lead_update);
        guard.history.push(event);
        Ok(appointment)
    }

    fn reschedule(
        &self,
        id: &AppointmentId,
        change: SlotChange,
    ) -> Result<Appointment, RepositoryError> {
        let mut guard = self.lock()?;
        let index = guard.appointment_index(id)?;
        let current = guard.appointments[index].clone();
        if !current.is_active() {
            return Err(RepositoryError::InvalidTransition {
                from: current.status,
                to: AppointmentStatus::Rescheduled,
            });
        }
        if current.needs_reassignment {
            return Err(RepositoryError::NeedsReassignment(current.id));
        }

        let mut moved = current.clone();
        moved.previous_slot = Some(PreviousSlot {
            date: current.date,
            start_time: current.start_time,
            end_time: current.end_time,
        });
        moved.date = change.slot.date;
        moved.start_time = change.slot.start_time;
        moved.end_time = change.slot.end_time;
        moved.status = AppointmentStatus::Rescheduled;
        moved.rescheduled_count += 1;
        moved.updated_at = change.lead_update.touched_at;

        if let Some(existing) = guard.overlapping(&moved.closer_id, moved.date, &moved) {
            return Err(RepositoryError::SlotTaken(existing.id.clone()));
        }

        guard.appointments[index] = moved.clone();
        guard.touch_lead(&moved.lead_id, &change.lead_update);
        guard.history.push(change.event);
        Ok(moved)
    }

    fn transition(
        &self,
        id: &AppointmentId,
        transition: Transition,
    ) -> Result<Appointment, RepositoryError> {
        let mut guard = self.lock()?;
        let index = guard.appointment_index(id)?;
        let appointment = &mut guard.appointments[index];
        if !appointment.is_active() {
            return Err(RepositoryError::InvalidTransition {
                from: appointment.status,
                to: transition.to,
            });
        }

        appointment.status = transition.to;
        if transition.cancellation_reason.is_some() {
            appointment.cancellation_reason = transition.cancellation_reason;
        }
        if transition.outcome.is_some() {
            appointment.outcome = transition.outcome;
        }
        appointment.updated_at = transition.lead_update.touched_at;
        let updated = appointment.clone();

        guard.touch_lead(&updated.lead_id, &transition.lead_update);
        guard.history.push(transition.event);
        Ok(updated)
    }
}

impl HistorySink for InMemoryStore {
    fn append(&self, event: HistoryEvent) -> Result<(), RepositoryError> {
        self.lock()?.history.push(event);
        Ok(())
    }

    fn history_for(&self, lead_id: &LeadId) -> Result<Vec<HistoryEvent>, RepositoryError> {
        let guard = self.lock()?;
        Ok(guard
            .history
            .iter()
            .filter(|event| &event.lead_id == lead_id)
            .cloned()
            .collect())
    }
}
