//! Lead intake: weighted scoring, tiered closer routing, and conflict-free scheduling
//! on closer calendars.
//!
//! Storage is reached through the traits in [`repository`]; [`memory::InMemoryStore`]
//! and [`sqlite::SqliteStore`] are the two shipped backends.

pub mod availability;
pub mod domain;
pub mod history;
pub mod memory;
pub mod repository;
pub mod router;
pub mod routing;
pub mod scheduler;
pub mod scoring;
pub mod service;
pub mod sqlite;
pub mod validation;

#[cfg(test)]
mod tests;

pub use availability::{
    AvailabilityService, BusyDay, DayAvailability, Slot, SlotView, DEFAULT_LOOKAHEAD_DAYS,
};
pub use domain::{
    Appointment, AppointmentId, AppointmentStatus, AppointmentType, BlockKind, CalendarBlock,
    Closer, CloserId, DateOverride, HistoryAction, HistoryEvent, InterestLevel, Lead, LeadId,
    LeadStatus, OrganizationId, PoolTag, QualificationAttributes, ScoringConfigId, Temperature,
    Tier, TimeRange, WeeklySchedule, WorkingWindow,
};
pub use history::{HistoryRecorder, HISTORY_FAILURES_METRIC};
pub use memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use repository::{
    AppointmentStore, CloserDirectory, HistorySink, LeadRepository, LeadStore, RepositoryError,
    ScoringConfigStore, ScoringUpdate,
};
pub use router::lead_router;
pub use routing::{Assignment, AssignmentReason, AssignmentRouter, CloserPool, ConfigurationError};
pub use scheduler::{
    AppointmentScheduler, BlockRequest, Clock, Deactivation, FixedClock, RescheduleRequest,
    ScheduleRequest, SchedulerSettings, SchedulingError, SystemClock,
    DEFAULT_RESERVATION_ATTEMPTS, RESERVATION_CONFLICTS_METRIC,
};
pub use scoring::{ScoreCalculator, ScoreOutcome, ScoringConfiguration, WeightTable};
pub use service::{
    AutoSchedule, LeadIntakeService, LeadSubmission, QualificationError, QualificationOutcome,
    ScoringConfigDraft, UNASSIGNED_METRIC,
};
pub use validation::ValidationError;
