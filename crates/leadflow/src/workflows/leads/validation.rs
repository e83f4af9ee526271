use serde::Serialize;

use super::domain::{TimeRange, WeeklySchedule};

/// Malformed input, rejected before any write happens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("{field} must not be blank")]
    Blank { field: String },
    #[error("{field} must not be negative (got {value})")]
    Negative { field: String, value: i32 },
    #[error("{field} must be between {min} and {max} (got {value})")]
    OutOfRange {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },
    #[error("{field} is invalid: {reason}")]
    Invalid { field: String, reason: String },
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Blank {
            field: field.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn require_range(
    field: &str,
    value: i64,
    min: i64,
    max: i64,
) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

pub(crate) fn require_ordered(field: &str, range: &TimeRange) -> Result<(), ValidationError> {
    if range.is_empty() {
        return Err(ValidationError::invalid(
            field,
            format!(
                "start {} must be before end {}",
                range.start.format("%H:%M"),
                range.end.format("%H:%M")
            ),
        ));
    }
    Ok(())
}

pub(crate) fn validate_schedule(schedule: &WeeklySchedule) -> Result<(), ValidationError> {
    require_range(
        "schedule.slot_minutes",
        i64::from(schedule.slot_minutes),
        5,
        480,
    )?;
    require_range(
        "schedule.buffer_minutes",
        i64::from(schedule.buffer_minutes),
        0,
        240,
    )?;
    require_range(
        "schedule.max_daily_appointments",
        i64::from(schedule.max_daily_appointments),
        0,
        200,
    )?;

    for window in &schedule.windows {
        require_ordered(
            "schedule.windows",
            &TimeRange::new(window.start, window.end),
        )?;
    }
    for entry in &schedule.date_overrides {
        for window in &entry.windows {
            require_ordered("schedule.date_overrides", window)?;
        }
    }
    Ok(())
}
