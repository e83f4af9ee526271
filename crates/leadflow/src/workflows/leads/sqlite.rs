use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{NaiveDate, NaiveTime, Utc};
use rusqlite::{
    params, Connection, ErrorCode, OptionalExtension, Params, TransactionBehavior,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

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

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS scoring_configs (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS scoring_configs_one_active
    ON scoring_configs(organization_id) WHERE is_active = 1;

CREATE TABLE IF NOT EXISTS closers (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS leads (
    id TEXT PRIMARY KEY,
    organization_id TEXT NOT NULL,
    body TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS calendar_blocks (
    id TEXT PRIMARY KEY,
    closer_id TEXT NOT NULL REFERENCES closers(id),
    block_date TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS calendar_blocks_by_day
    ON calendar_blocks(closer_id, block_date);

CREATE TABLE IF NOT EXISTS appointments (
    id TEXT PRIMARY KEY,
    lead_id TEXT NOT NULL,
    closer_id TEXT NOT NULL,
    appointment_date TEXT NOT NULL,
    start_time TEXT NOT NULL,
    end_time TEXT NOT NULL,
    status TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS appointments_one_active_per_lead
    ON appointments(lead_id) WHERE status IN ('scheduled', 'rescheduled');
CREATE UNIQUE INDEX IF NOT EXISTS appointments_active_slot
    ON appointments(closer_id, appointment_date, start_time)
    WHERE status IN ('scheduled', 'rescheduled');
CREATE INDEX IF NOT EXISTS appointments_by_closer_day
    ON appointments(closer_id, appointment_date);

CREATE TABLE IF NOT EXISTS lead_history (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    lead_id TEXT NOT NULL,
    action TEXT NOT NULL,
    created_at TEXT NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS lead_history_by_lead ON lead_history(lead_id, seq);
";

const ACTIVE_STATUSES: &str = "('scheduled', 'rescheduled')";

/// SQLite-backed store.
///
/// Entities are kept as JSON bodies next to the columns that queries and constraints need.
/// Appointment writes run in `IMMEDIATE` transactions and the partial unique indexes back
/// up the one-active-appointment-per-lead and one-booking-per-slot rules, so two
/// connections on the same file cannot both win a race.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == ErrorCode::ConstraintViolation =>
            {
                RepositoryError::Conflict
            }
            _ => RepositoryError::Unavailable(err.to_string()),
        }
    }
}

impl SqliteStore {
    /// Open (or create) the database file and apply pragmas plus schema.
    pub fn open(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path).map_err(|err| {
            RepositoryError::Unavailable(format!(
                "failed to open sqlite database at {}: {err}",
                path.display()
            ))
        })?;
        Self::initialize(conn)
    }

    /// Private database that lives as long as the store.
    pub fn open_in_memory() -> Result<Self, RepositoryError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(conn: Connection) -> Result<Self, RepositoryError> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!("sqlite schema ready");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Unavailable("sqlite connection mutex poisoned".into()))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value)
        .map_err(|err| RepositoryError::Unavailable(format!("failed to encode row: {err}")))
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, RepositoryError> {
    serde_json::from_str(body)
        .map_err(|err| RepositoryError::Unavailable(format!("failed to decode row: {err}")))
}

fn time_column(time: NaiveTime) -> String {
    time.format("%H:%M:%S").to_string()
}

fn load_bodies<T, P>(conn: &Connection, sql: &str, params: P) -> Result<Vec<T>, RepositoryError>
where
    T: DeserializeOwned,
    P: Params,
{
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, |row| row.get::<_, String>(0))?;
    let mut items = Vec::new();
    for body in rows {
        items.push(decode(&body?)?);
    }
    Ok(items)
}

fn load_body<T, P>(conn: &Connection, sql: &str, params: P) -> Result<Option<T>, RepositoryError>
where
    T: DeserializeOwned,
    P: Params,
{
    let body = conn
        .query_row(sql, params, |row| row.get::<_, String>(0))
        .optional()?;
    body.map(|body| decode(&body)).transpose()
}

fn load_config(
    conn: &Connection,
    id: &ScoringConfigId,
) -> Result<Option<ScoringConfiguration>, RepositoryError> {
    let row = conn
        .query_row(
            "SELECT body, is_active FROM scoring_configs WHERE id = ?1",
            params![id.as_str()],
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?)),
        )
        .optional()?;
    row.map(|(body, is_active)| config_from_row(&body, is_active))
        .transpose()
}

/// The `is_active` column is authoritative; bodies of deactivated siblings are not rewritten.
fn config_from_row(body: &str, is_active: bool) -> Result<ScoringConfiguration, RepositoryError> {
    let mut config: ScoringConfiguration = decode(body)?;
    config.is_active = is_active;
    Ok(config)
}

fn load_appointment(
    conn: &Connection,
    id: &AppointmentId,
) -> Result<Option<Appointment>, RepositoryError> {
    load_body(
        conn,
        "SELECT body FROM appointments WHERE id = ?1",
        params![id.as_str()],
    )
}

fn active_id_for_lead(
    conn: &Connection,
    lead_id: &LeadId,
) -> Result<Option<AppointmentId>, RepositoryError> {
    let sql = format!(
        "SELECT id FROM appointments WHERE lead_id = ?1 AND status IN {ACTIVE_STATUSES} LIMIT 1"
    );
    Ok(conn
        .query_row(&sql, params![lead_id.as_str()], |row| row.get::<_, String>(0))
        .optional()?
        .map(AppointmentId))
}

fn overlapping_id(
    conn: &Connection,
    appointment: &Appointment,
) -> Result<Option<AppointmentId>, RepositoryError> {
    let sql = format!(
        "SELECT id FROM appointments
         WHERE closer_id = ?1 AND appointment_date = ?2 AND status IN {ACTIVE_STATUSES}
           AND start_time < ?4 AND end_time > ?3 AND id <> ?5
         LIMIT 1"
    );
    Ok(conn
        .query_row(
            &sql,
            params![
                appointment.closer_id.as_str(),
                appointment.date.to_string(),
                time_column(appointment.start_time),
                time_column(appointment.end_time),
                appointment.id.as_str(),
            ],
            |row| row.get::<_, String>(0),
        )
        .optional()?
        .map(AppointmentId))
}

fn insert_appointment(conn: &Connection, appointment: &Appointment) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO appointments(
            id, lead_id, closer_id, appointment_date, start_time, end_time, status, body
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            appointment.id.as_str(),
            appointment.lead_id.as_str(),
            appointment.closer_id.as_str(),
            appointment.date.to_string(),
            time_column(appointment.start_time),
            time_column(appointment.end_time),
            appointment.status.label(),
            encode(appointment)?,
        ],
    )?;
    Ok(())
}

fn update_appointment(conn: &Connection, appointment: &Appointment) -> Result<(), RepositoryError> {
    let changed = conn.execute(
        "UPDATE appointments
         SET appointment_date = ?2, start_time = ?3, end_time = ?4, status = ?5, body = ?6
         WHERE id = ?1",
        params![
            appointment.id.as_str(),
            appointment.date.to_string(),
            time_column(appointment.start_time),
            time_column(appointment.end_time),
            appointment.status.label(),
            encode(appointment)?,
        ],
    )?;
    if changed == 0 {
        return Err(RepositoryError::NotFound);
    }
    Ok(())
}

fn touch_lead(conn: &Connection, lead_id: &LeadId, update: &LeadUpdate) -> Result<(), RepositoryError> {
    let mut lead: Lead = load_body(
        conn,
        "SELECT body FROM leads WHERE id = ?1",
        params![lead_id.as_str()],
    )?
    .ok_or(RepositoryError::NotFound)?;
    update.apply(&mut lead);
    conn.execute(
        "UPDATE leads SET body = ?2 WHERE id = ?1",
        params![lead_id.as_str(), encode(&lead)?],
    )?;
    Ok(())
}

fn insert_history(conn: &Connection, event: &HistoryEvent) -> Result<(), RepositoryError> {
    conn.execute(
        "INSERT INTO lead_history(id, lead_id, action, created_at, body)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            event.id.as_str(),
            event.lead_id.as_str(),
            event.action.label(),
            event.created_at.to_rfc3339(),
            encode(event)?,
        ],
    )?;
    Ok(())
}

fn deactivate_siblings(
    conn: &Connection,
    config: &ScoringConfiguration,
) -> Result<(), RepositoryError> {
    if config.is_active {
        conn.execute(
            "UPDATE scoring_configs SET is_active = 0 WHERE organization_id = ?1 AND id <> ?2",
            params![config.organization_id.as_str(), config.id.as_str()],
        )?;
    }
    Ok(())
}

impl ScoringConfigStore for SqliteStore {
    fn insert_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        deactivate_siblings(&tx, &config)?;
        tx.execute(
            "INSERT INTO scoring_configs(id, organization_id, is_active, created_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                config.id.as_str(),
                config.organization_id.as_str(),
                config.is_active,
                config.created_at.to_rfc3339(),
                encode(&config)?,
            ],
        )?;
        tx.commit()?;
        Ok(config)
    }

    fn update_config(
        &self,
        config: ScoringConfiguration,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        deactivate_siblings(&tx, &config)?;
        let changed = tx.execute(
            "UPDATE scoring_configs SET is_active = ?2, body = ?3 WHERE id = ?1",
            params![config.id.as_str(), config.is_active, encode(&config)?],
        )?;
        if changed == 0 {
            return Err(RepositoryError::NotFound);
        }
        tx.commit()?;
        Ok(config)
    }

    fn activate_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<ScoringConfiguration, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut config = load_config(&tx, id)?.ok_or(RepositoryError::NotFound)?;
        config.is_active = true;
        config.updated_at = Utc::now();
        deactivate_siblings(&tx, &config)?;
        tx.execute(
            "UPDATE scoring_configs SET is_active = 1, body = ?2 WHERE id = ?1",
            params![id.as_str(), encode(&config)?],
        )?;
        tx.commit()?;
        Ok(config)
    }

    fn fetch_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError> {
        let conn = self.conn()?;
        load_config(&conn, id)
    }

    fn active_config(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Option<ScoringConfiguration>, RepositoryError> {
        let conn = self.conn()?;
        load_body::<ScoringConfiguration, _>(
            &conn,
            "SELECT body FROM scoring_configs WHERE organization_id = ?1 AND is_active = 1",
            params![organization_id.as_str()],
        )
        .map(|config| {
            config.map(|mut config| {
                config.is_active = true;
                config
            })
        })
    }

    fn configs_for(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<ScoringConfiguration>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT body, is_active FROM scoring_configs
             WHERE organization_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;
        let rows = stmt.query_map(params![organization_id.as_str()], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
        })?;

        let mut configs = Vec::new();
        for row in rows {
            let (body, is_active) = row?;
            configs.push(config_from_row(&body, is_active)?);
        }
        Ok(configs)
    }
}

impl LeadRepository for SqliteStore {
    fn insert_lead(&self, lead: Lead) -> Result<Lead, RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO leads(id, organization_id, body) VALUES (?1, ?2, ?3)",
            params![lead.id.as_str(), lead.organization_id.as_str(), encode(&lead)?],
        )?;
        Ok(lead)
    }

    fn apply_scoring(&self, id: &LeadId, update: &ScoringUpdate) -> Result<Lead, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut lead: Lead = load_body(
            &tx,
            "SELECT body FROM leads WHERE id = ?1",
            params![id.as_str()],
        )?
        .ok_or(RepositoryError::NotFound)?;
        update.apply(&mut lead);
        tx.execute(
            "UPDATE leads SET body = ?2 WHERE id = ?1",
            params![id.as_str(), encode(&lead)?],
        )?;
        tx.commit()?;
        Ok(lead)
    }

    fn fetch_lead(&self, id: &LeadId) -> Result<Option<Lead>, RepositoryError> {
        let conn = self.conn()?;
        load_body(
            &conn,
            "SELECT body FROM leads WHERE id = ?1",
            params![id.as_str()],
        )
    }
}

impl CloserDirectory for SqliteStore {
    fn upsert_closer(&self, closer: Closer) -> Result<Closer, RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO closers(id, organization_id, body) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET organization_id = excluded.organization_id,
                                           body = excluded.body",
            params![closer.id.as_str(), closer.organization_id.as_str(), encode(&closer)?],
        )?;
        Ok(closer)
    }

    fn fetch_closer(&self, id: &CloserId) -> Result<Option<Closer>, RepositoryError> {
        let conn = self.conn()?;
        load_body(
            &conn,
            "SELECT body FROM closers WHERE id = ?1",
            params![id.as_str()],
        )
    }

    fn insert_block(&self, block: CalendarBlock) -> Result<CalendarBlock, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let closer_exists = tx
            .query_row(
                "SELECT 1 FROM closers WHERE id = ?1",
                params![block.closer_id.as_str()],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        if !closer_exists {
            return Err(RepositoryError::NotFound);
        }
        tx.execute(
            "INSERT INTO calendar_blocks(id, closer_id, block_date, body) VALUES (?1, ?2, ?3, ?4)",
            params![
                block.id.as_str(),
                block.closer_id.as_str(),
                block.date.to_string(),
                encode(&block)?,
            ],
        )?;
        tx.commit()?;
        Ok(block)
    }

    fn blocks_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<CalendarBlock>, RepositoryError> {
        let conn = self.conn()?;
        load_bodies(
            &conn,
            "SELECT body FROM calendar_blocks WHERE closer_id = ?1 AND block_date = ?2",
            params![closer_id.as_str(), date.to_string()],
        )
    }

    fn deactivate_closer(
        &self,
        id: &CloserId,
        from: NaiveDate,
        actor: &str,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut closer: Closer = load_body(
            &tx,
            "SELECT body FROM closers WHERE id = ?1",
            params![id.as_str()],
        )?
        .ok_or(RepositoryError::NotFound)?;
        closer.active = false;
        tx.execute(
            "UPDATE closers SET body = ?2 WHERE id = ?1",
            params![id.as_str(), encode(&closer)?],
        )?;

        let sql = format!(
            "SELECT body FROM appointments
             WHERE closer_id = ?1 AND appointment_date >= ?2 AND status IN {ACTIVE_STATUSES}
             ORDER BY appointment_date, start_time"
        );
        let affected: Vec<Appointment> =
            load_bodies(&tx, &sql, params![id.as_str(), from.to_string()])?;

        let now = Utc::now();
        let mut flagged = Vec::with_capacity(affected.len());
        for mut appointment in affected {
            appointment.needs_reassignment = true;
            appointment.updated_at = now;
            update_appointment(&tx, &appointment)?;
            insert_history(&tx, &closer_deactivated_event(&appointment, actor))?;
            flagged.push(appointment);
        }

        tx.commit()?;
        Ok(flagged)
    }
}

impl AppointmentStore for SqliteStore {
    fn active_for_lead(&self, lead_id: &LeadId) -> Result<Option<Appointment>, RepositoryError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT body FROM appointments WHERE lead_id = ?1 AND status IN {ACTIVE_STATUSES}"
        );
        load_body(&conn, &sql, params![lead_id.as_str()])
    }

    fn active_for_closer_on(
        &self,
        closer_id: &CloserId,
        date: NaiveDate,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT body FROM appointments
             WHERE closer_id = ?1 AND appointment_date = ?2 AND status IN {ACTIVE_STATUSES}
             ORDER BY start_time"
        );
        load_bodies(&conn, &sql, params![closer_id.as_str(), date.to_string()])
    }

    fn fetch_appointment(
        &self,
        id: &AppointmentId,
    ) -> Result<Option<Appointment>, RepositoryError> {
        let conn = self.conn()?;
        load_appointment(&conn, id)
    }

    fn appointments_for_closer(
        &self,
        closer_id: &CloserId,
        from: NaiveDate,
        to: NaiveDate,
        include_cancelled: bool,
    ) -> Result<Vec<Appointment>, RepositoryError> {
        let conn = self.conn()?;
        load_bodies(
            &conn,
            "SELECT body FROM appointments
             WHERE closer_id = ?1 AND appointment_date BETWEEN ?2 AND ?3
               AND (?4 OR status <> 'cancelled')
             ORDER BY appointment_date, start_time",
            params![
                closer_id.as_str(),
                from.to_string(),
                to.to_string(),
                include_cancelled,
            ],
        )
    }

    fn reserve(&self, reservation: Reservation) -> Result<Appointment, RepositoryError> {
        let Reservation {
            appointment,
            lead_update,
            event,
        } = reservation;

        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        if let Some(existing) = active_id_for_lead(&tx, &appointment.lead_id)? {
            return Err(RepositoryError::LeadAlreadyScheduled(existing));
        }
        if let Some(existing) = overlapping_id(&tx, &appointment)? {
            return Err(RepositoryError::SlotTaken(existing));
        }

        touch_lead(&tx, &appointment.lead_id, &lead_update)?;
        insert_appointment(&tx, &appointment)?;
        insert_history(&tx, &event)?;
        tx.commit()?;
        Ok(appointment)
    }

    fn reschedule(
        &self,
        id: &AppointmentId,
        change: SlotChange,
    ) -> Result<Appointment, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let current = load_appointment(&tx, id)?.ok_or(RepositoryError::NotFound)?;
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

        if let Some(existing) = overlapping_id(&tx, &moved)? {
            return Err(RepositoryError::SlotTaken(existing));
        }

        update_appointment(&tx, &moved)?;
        touch_lead(&tx, &moved.lead_id, &change.lead_update)?;
        insert_history(&tx, &change.event)?;
        tx.commit()?;
        Ok(moved)
    }

    fn transition(
        &self,
        id: &AppointmentId,
        transition: Transition,
    ) -> Result<Appointment, RepositoryError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut appointment = load_appointment(&tx, id)?.ok_or(RepositoryError::NotFound)?;
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

        update_appointment(&tx, &appointment)?;
        touch_lead(&tx, &appointment.lead_id, &transition.lead_update)?;
        insert_history(&tx, &transition.event)?;
        tx.commit()?;
        Ok(appointment)
    }
}

impl HistorySink for SqliteStore {
    fn append(&self, event: HistoryEvent) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        insert_history(&conn, &event)
    }

    fn history_for(&self, lead_id: &LeadId) -> Result<Vec<HistoryEvent>, RepositoryError> {
        let conn = self.conn()?;
        load_bodies(
            &conn,
            "SELECT body FROM lead_history WHERE lead_id = ?1 ORDER BY seq",
            params![lead_id.as_str()],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::leads::domain::{
        AppointmentType, HistoryAction, LeadStatus, QualificationAttributes, WeeklySchedule,
    };
    use std::collections::BTreeMap;

    fn t(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid time")
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date")
    }

    fn lead(id: &str) -> Lead {
        let now = Utc::now();
        Lead {
            id: LeadId::new(id),
            organization_id: OrganizationId::new("org-1"),
            attributes: QualificationAttributes::default(),
            lead_score: 80,
            score_breakdown: Vec::new(),
            tier: None,
            assigned_closer_id: Some(CloserId::new("C1")),
            status: LeadStatus::Assigned,
            next_followup_date: None,
            last_interaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn appointment(id: &str, lead_id: &str, start: NaiveTime) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: AppointmentId::new(id),
            lead_id: LeadId::new(lead_id),
            closer_id: CloserId::new("C1"),
            organization_id: OrganizationId::new("org-1"),
            date: date(),
            start_time: start,
            end_time: start + chrono::Duration::minutes(30),
            kind: AppointmentType::Discovery,
            status: AppointmentStatus::Scheduled,
            notes: None,
            rescheduled_count: 0,
            previous_slot: None,
            cancellation_reason: None,
            outcome: None,
            needs_reassignment: false,
            created_at: now,
            updated_at: now,
        }
    }

    fn reservation(appointment: Appointment) -> Reservation {
        let event = HistoryEvent::new(
            appointment.lead_id.clone(),
            HistoryAction::AppointmentScheduled,
            "test",
            BTreeMap::new(),
        );
        Reservation {
            appointment,
            lead_update: LeadUpdate {
                status: LeadStatus::Scheduled,
                next_followup_date: Some(date()),
                touched_at: Utc::now(),
            },
            event,
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().expect("open store");
        store
            .upsert_closer(Closer {
                id: CloserId::new("C1"),
                organization_id: OrganizationId::new("org-1"),
                full_name: "Carla".into(),
                email: None,
                active: true,
                pool: None,
                schedule: WeeklySchedule::weekdays(t(9, 0), t(17, 0)),
            })
            .expect("closer stored");
        store.insert_lead(lead("L1")).expect("lead stored");
        store.insert_lead(lead("L2")).expect("lead stored");
        store
    }

    #[test]
    fn reserve_commits_appointment_lead_and_history_together() {
        let store = seeded();
        store
            .reserve(reservation(appointment("A1", "L1", t(9, 0))))
            .expect("reserved");

        let lead = store
            .fetch_lead(&LeadId::new("L1"))
            .expect("fetch")
            .expect("lead exists");
        assert_eq!(lead.status, LeadStatus::Scheduled);
        assert_eq!(lead.next_followup_date, Some(date()));

        let history = store.history_for(&LeadId::new("L1")).expect("history");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].action, HistoryAction::AppointmentScheduled);
    }

    #[test]
    fn reserve_rejects_second_active_appointment_and_overlaps() {
        let store = seeded();
        store
            .reserve(reservation(appointment("A1", "L1", t(9, 0))))
            .expect("reserved");

        let again = store.reserve(reservation(appointment("A2", "L1", t(11, 0))));
        assert!(matches!(
            again,
            Err(RepositoryError::LeadAlreadyScheduled(ref id)) if id.as_str() == "A1"
        ));

        let overlap = store.reserve(reservation(appointment("A3", "L2", t(9, 15))));
        assert!(matches!(overlap, Err(RepositoryError::SlotTaken(_))));

        let history = store.history_for(&LeadId::new("L2")).expect("history");
        assert!(history.is_empty(), "failed reservation must leave no trace");
    }

    #[test]
    fn only_one_configuration_stays_active() {
        let store = SqliteStore::open_in_memory().expect("open store");
        let org = OrganizationId::new("org-1");
        let mut first = ScoringConfiguration::fallback(org.clone());
        first.id = ScoringConfigId::new("cfg-1");
        first.is_active = true;
        store.insert_config(first).expect("insert first");

        let mut second = ScoringConfiguration::fallback(org.clone());
        second.id = ScoringConfigId::new("cfg-2");
        second.is_active = true;
        store.insert_config(second).expect("insert second");

        let active = store.active_config(&org).expect("lookup").expect("active");
        assert_eq!(active.id.as_str(), "cfg-2");
        let all = store.configs_for(&org).expect("list");
        assert_eq!(all.iter().filter(|config| config.is_active).count(), 1);

        store
            .activate_config(&ScoringConfigId::new("cfg-1"))
            .expect("activate");
        let active = store.active_config(&org).expect("lookup").expect("active");
        assert_eq!(active.id.as_str(), "cfg-1");
    }
}
