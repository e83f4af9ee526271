use std::collections::BTreeMap;
use std::sync::Arc;

use metrics::counter;

use super::domain::{Appointment, HistoryAction, HistoryEvent};
use super::repository::HistorySink;

pub const HISTORY_FAILURES_METRIC: &str = "leadflow_history_append_failures_total";

/// Best-effort writer for audit entries that follow an already committed change.
///
/// A failed append is logged and counted; it never unwinds the business operation.
pub struct HistoryRecorder<H: ?Sized> {
    sink: Arc<H>,
}

impl<H: ?Sized> Clone for HistoryRecorder<H> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
        }
    }
}

impl<H> HistoryRecorder<H>
where
    H: HistorySink + ?Sized,
{
    pub fn new(sink: Arc<H>) -> Self {
        Self { sink }
    }

    /// Returns whether the entry was stored.
    pub fn record(&self, event: HistoryEvent) -> bool {
        let lead_id = event.lead_id.clone();
        let action = event.action;
        match self.sink.append(event) {
            Ok(()) => true,
            Err(err) => {
                counter!(HISTORY_FAILURES_METRIC, "action" => action.label()).increment(1);
                tracing::error!(
                    lead_id = %lead_id,
                    action = action.label(),
                    error = %err,
                    "failed to append lead history"
                );
                false
            }
        }
    }
}

pub(crate) fn details<I, K, V>(pairs: I) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: ToString,
{
    pairs
        .into_iter()
        .map(|(key, value)| (key.into(), value.to_string()))
        .collect()
}

/// Audit entry for an appointment flagged because its closer was deactivated.
pub(crate) fn closer_deactivated_event(appointment: &Appointment, actor: &str) -> HistoryEvent {
    HistoryEvent::new(
        appointment.lead_id.clone(),
        HistoryAction::CloserDeactivated,
        actor,
        details([
            ("appointment_id", appointment.id.to_string()),
            ("closer_id", appointment.closer_id.to_string()),
            ("date", appointment.date.to_string()),
            ("start_time", appointment.start_time.format("%H:%M").to_string()),
        ]),
    )
}
