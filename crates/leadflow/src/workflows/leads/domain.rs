use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc, Weekday};
use serde::{Deserialize, Serialize};

use super::scoring::ScoreComponent;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            pub fn generate() -> Self {
                Self(uuid::Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Tenant root that owns configurations, closers, leads, and appointments.
    OrganizationId
);
string_id!(
    /// Identifier wrapper for leads created by intake.
    LeadId
);
string_id!(
    /// Identifier wrapper for sales agents.
    CloserId
);
string_id!(ScoringConfigId);
string_id!(AppointmentId);
string_id!(CalendarBlockId);
string_id!(HistoryEventId);

/// `HH:MM` wire format for wall-clock times; seconds are accepted on input.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Result<NaiveTime, String> {
        let trimmed = raw.trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M:%S"))
            .map_err(|err| format!("failed to parse '{raw}' as HH:MM ({err})"))
    }

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&time.format("%H:%M").to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use chrono::NaiveTime;
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(time: &Option<NaiveTime>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match time {
                Some(time) => super::serialize(time, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<NaiveTime>, D::Error>
        where
            D: Deserializer<'de>,
        {
            let opt = Option::<String>::deserialize(deserializer)?;
            opt.map(|value| super::parse(&value).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}

/// Half-open `[start, end)` interval on a single calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

impl TimeRange {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// Builds `[start, start + minutes)`, or `None` when the range would cross midnight.
    pub fn starting_at(start: NaiveTime, minutes: u32) -> Option<Self> {
        let (end, wrapped) = start.overflowing_add_signed(Duration::minutes(i64::from(minutes)));
        if wrapped != 0 || end <= start {
            return None;
        }
        Some(Self { start, end })
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn minutes(&self) -> i64 {
        (self.end - self.start).num_minutes()
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Qualification answers collected by the intake form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualificationAttributes {
    pub full_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub company: Option<String>,
    pub job_title: Option<String>,
    pub temperature: Option<String>,
    pub interest_level: Option<String>,
    pub budget: Option<f64>,
    pub decision_maker: Option<bool>,
    pub pain_point: Option<String>,
}

pub(crate) fn is_present(value: &Option<String>) -> bool {
    value
        .as_deref()
        .map(|text| !text.trim().is_empty())
        .unwrap_or(false)
}

/// Lead temperature tiers. Portuguese labels from the intake forms are accepted too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Temperature {
    Hot,
    Warm,
    Cold,
}

impl Temperature {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "hot" | "quente" => Some(Self::Hot),
            "warm" | "morno" => Some(Self::Warm),
            "cold" | "frio" => Some(Self::Cold),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Temperature::Hot => "hot",
            Temperature::Warm => "warm",
            Temperature::Cold => "cold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestLevel {
    High,
    Medium,
    Low,
}

impl InterestLevel {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "high" | "alto" | "3" => Some(Self::High),
            "medium" | "medio" | "médio" | "2" => Some(Self::Medium),
            "low" | "baixo" | "1" => Some(Self::Low),
            _ => None,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            InterestLevel::High => "high",
            InterestLevel::Medium => "medium",
            InterestLevel::Low => "low",
        }
    }
}

/// Routing outcome from comparing a score to the configured threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    High,
    Low,
}

impl Tier {
    pub const fn label(self) -> &'static str {
        match self {
            Tier::High => "high",
            Tier::Low => "low",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "high" => Some(Self::High),
            "low" => Some(Self::Low),
            _ => None,
        }
    }
}

/// Lead lifecycle as far as this engine is concerned; the sales workflow owns later stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    New,
    Assigned,
    Unassigned,
    Scheduled,
    Attended,
    NoShow,
}

impl LeadStatus {
    pub const fn label(self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Assigned => "assigned",
            LeadStatus::Unassigned => "unassigned",
            LeadStatus::Scheduled => "scheduled",
            LeadStatus::Attended => "attended",
            LeadStatus::NoShow => "no_show",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "new" => Some(Self::New),
            "assigned" => Some(Self::Assigned),
            "unassigned" => Some(Self::Unassigned),
            "scheduled" => Some(Self::Scheduled),
            "attended" => Some(Self::Attended),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

/// Scored and routed lead as persisted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: LeadId,
    pub organization_id: OrganizationId,
    pub attributes: QualificationAttributes,
    pub lead_score: i32,
    pub score_breakdown: Vec<ScoreComponent>,
    pub tier: Option<Tier>,
    pub assigned_closer_id: Option<CloserId>,
    pub status: LeadStatus,
    pub next_followup_date: Option<NaiveDate>,
    pub last_interaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Which routing tier a closer normally serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolTag {
    HighScore,
    LowScore,
}

/// Recurring working window for one weekday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub weekday: Weekday,
    #[serde(with = "hhmm")]
    pub start: NaiveTime,
    #[serde(with = "hhmm")]
    pub end: NaiveTime,
}

/// Replaces the weekly windows for one date. No windows means a day off.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOverride {
    pub date: NaiveDate,
    #[serde(default)]
    pub windows: Vec<TimeRange>,
}

pub const DEFAULT_SLOT_MINUTES: u32 = 30;
pub const DEFAULT_MAX_DAILY_APPOINTMENTS: u32 = 20;

fn default_slot_minutes() -> u32 {
    DEFAULT_SLOT_MINUTES
}

fn default_max_daily() -> u32 {
    DEFAULT_MAX_DAILY_APPOINTMENTS
}

/// Closer working hours.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklySchedule {
    #[serde(default)]
    pub windows: Vec<WorkingWindow>,
    #[serde(default)]
    pub date_overrides: Vec<DateOverride>,
    #[serde(default = "default_slot_minutes")]
    pub slot_minutes: u32,
    #[serde(default)]
    pub buffer_minutes: u32,
    #[serde(default = "default_max_daily")]
    pub max_daily_appointments: u32,
}

impl Default for WeeklySchedule {
    fn default() -> Self {
        Self {
            windows: Vec::new(),
            date_overrides: Vec::new(),
            slot_minutes: DEFAULT_SLOT_MINUTES,
            buffer_minutes: 0,
            max_daily_appointments: DEFAULT_MAX_DAILY_APPOINTMENTS,
        }
    }
}

impl WeeklySchedule {
    /// Monday to Friday between `start` and `end`.
    pub fn weekdays(start: NaiveTime, end: NaiveTime) -> Self {
        let windows = [
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ]
        .into_iter()
        .map(|weekday| WorkingWindow {
            weekday,
            start,
            end,
        })
        .collect();

        Self {
            windows,
            ..Self::default()
        }
    }

    /// Every day of the week between `start` and `end`.
    pub fn every_day(start: NaiveTime, end: NaiveTime) -> Self {
        let mut schedule = Self::weekdays(start, end);
        for weekday in [Weekday::Sat, Weekday::Sun] {
            schedule.windows.push(WorkingWindow {
                weekday,
                start,
                end,
            });
        }
        schedule
    }
}

/// Sales agent who owns a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Closer {
    pub id: CloserId,
    pub organization_id: OrganizationId,
    pub full_name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(default)]
    pub pool: Option<PoolTag>,
    #[serde(default)]
    pub schedule: WeeklySchedule,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    Unavailable,
    Lunch,
    Break,
    Meeting,
    Training,
    Vacation,
    SickLeave,
    Holiday,
}

impl BlockKind {
    pub const fn label(self) -> &'static str {
        match self {
            BlockKind::Unavailable => "unavailable",
            BlockKind::Lunch => "lunch",
            BlockKind::Break => "break",
            BlockKind::Meeting => "meeting",
            BlockKind::Training => "training",
            BlockKind::Vacation => "vacation",
            BlockKind::SickLeave => "sick_leave",
            BlockKind::Holiday => "holiday",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "unavailable" => Some(Self::Unavailable),
            "lunch" => Some(Self::Lunch),
            "break" => Some(Self::Break),
            "meeting" => Some(Self::Meeting),
            "training" => Some(Self::Training),
            "vacation" => Some(Self::Vacation),
            "sick_leave" => Some(Self::SickLeave),
            "holiday" => Some(Self::Holiday),
            _ => None,
        }
    }
}

/// Time a closer has removed from their calendar outside of appointments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarBlock {
    pub id: CalendarBlockId,
    pub closer_id: CloserId,
    pub date: NaiveDate,
    pub range: TimeRange,
    pub kind: BlockKind,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentType {
    #[default]
    Discovery,
    Call,
    VideoCall,
    Meeting,
    FollowUp,
}

impl AppointmentType {
    pub const fn label(self) -> &'static str {
        match self {
            AppointmentType::Discovery => "discovery",
            AppointmentType::Call => "call",
            AppointmentType::VideoCall => "video_call",
            AppointmentType::Meeting => "meeting",
            AppointmentType::FollowUp => "follow_up",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "discovery" => Some(Self::Discovery),
            "call" => Some(Self::Call),
            "video_call" => Some(Self::VideoCall),
            "meeting" => Some(Self::Meeting),
            "follow_up" => Some(Self::FollowUp),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    Rescheduled,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub const ACTIVE: [AppointmentStatus; 2] =
        [AppointmentStatus::Scheduled, AppointmentStatus::Rescheduled];

    /// Active appointments hold their slot and count toward the per-lead limit.
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            AppointmentStatus::Scheduled | AppointmentStatus::Rescheduled
        )
    }

    pub const fn label(self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Rescheduled => "rescheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "scheduled" => Some(Self::Scheduled),
            "rescheduled" => Some(Self::Rescheduled),
            "completed" => Some(Self::Completed),
            "cancelled" => Some(Self::Cancelled),
            "no_show" => Some(Self::NoShow),
            _ => None,
        }
    }
}

/// Where an appointment sat before its latest reschedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreviousSlot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: AppointmentId,
    pub lead_id: LeadId,
    pub closer_id: CloserId,
    pub organization_id: OrganizationId,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    #[serde(with = "hhmm")]
    pub end_time: NaiveTime,
    #[serde(rename = "type")]
    pub kind: AppointmentType,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub rescheduled_count: u32,
    pub previous_slot: Option<PreviousSlot>,
    pub cancellation_reason: Option<String>,
    pub outcome: Option<String>,
    pub needs_reassignment: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn range(&self) -> TimeRange {
        TimeRange::new(self.start_time, self.end_time)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// True when this appointment is active and occupies part of `range` on `date`.
    pub fn blocks(&self, date: NaiveDate, range: &TimeRange) -> bool {
        self.is_active() && self.date == date && self.range().overlaps(range)
    }
}

/// Audited action kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    LeadScored,
    LeadAssigned,
    LeadUnassigned,
    LeadRescored,
    AppointmentScheduled,
    AppointmentRescheduled,
    AppointmentCancelled,
    AppointmentCompleted,
    AppointmentNoShow,
    CloserDeactivated,
}

impl HistoryAction {
    pub const fn label(self) -> &'static str {
        match self {
            HistoryAction::LeadScored => "lead_scored",
            HistoryAction::LeadAssigned => "lead_assigned",
            HistoryAction::LeadUnassigned => "lead_unassigned",
            HistoryAction::LeadRescored => "lead_rescored",
            HistoryAction::AppointmentScheduled => "appointment_scheduled",
            HistoryAction::AppointmentRescheduled => "appointment_rescheduled",
            HistoryAction::AppointmentCancelled => "appointment_cancelled",
            HistoryAction::AppointmentCompleted => "appointment_completed",
            HistoryAction::AppointmentNoShow => "appointment_no_show",
            HistoryAction::CloserDeactivated => "closer_deactivated",
        }
    }

    pub fn from_label(raw: &str) -> Option<Self> {
        match raw {
            "lead_scored" => Some(Self::LeadScored),
            "lead_assigned" => Some(Self::LeadAssigned),
            "lead_unassigned" => Some(Self::LeadUnassigned),
            "lead_rescored" => Some(Self::LeadRescored),
            "appointment_scheduled" => Some(Self::AppointmentScheduled),
            "appointment_rescheduled" => Some(Self::AppointmentRescheduled),
            "appointment_cancelled" => Some(Self::AppointmentCancelled),
            "appointment_completed" => Some(Self::AppointmentCompleted),
            "appointment_no_show" => Some(Self::AppointmentNoShow),
            "closer_deactivated" => Some(Self::CloserDeactivated),
            _ => None,
        }
    }
}

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEvent {
    pub id: HistoryEventId,
    pub lead_id: LeadId,
    pub action: HistoryAction,
    pub details: BTreeMap<String, String>,
    pub actor: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEvent {
    pub fn new(
        lead_id: LeadId,
        action: HistoryAction,
        actor: impl Into<String>,
        details: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id: HistoryEventId::generate(),
            lead_id,
            action,
            details,
            actor: actor.into(),
            created_at: Utc::now(),
        }
    }
}

pub const SYSTEM_ACTOR: &str = "system";
