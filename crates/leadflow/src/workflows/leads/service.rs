use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use serde::{Deserialize, Serialize};

use super::domain::{
    AppointmentId, AppointmentType, CloserId, HistoryAction, HistoryEvent, Lead, LeadId,
    LeadStatus, OrganizationId, QualificationAttributes, ScoringConfigId, Tier, SYSTEM_ACTOR,
};
use super::history::{details, HistoryRecorder};
use super::repository::{HistorySink, LeadStore, RepositoryError, ScoringUpdate};
use super::routing::{Assignment, AssignmentRouter, CloserPool, ConfigurationError, PoolMember};
use super::scheduler::{
    AppointmentScheduler, Clock, ScheduleRequest, SchedulerSettings, SchedulingError,
};
use super::scoring::{
    ScoreCalculator, ScoreOutcome, ScoringConfiguration, WeightTable, MAX_WEIGHT,
};
use super::validation::{require_range, require_text, ValidationError};

pub const UNASSIGNED_METRIC: &str = "leadflow_leads_unassigned_total";

/// Intake payload: the organization plus the qualification answers.
#[derive(Debug, Clone, Deserialize)]
pub struct LeadSubmission {
    pub organization_id: OrganizationId,
    #[serde(default)]
    pub lead_id: Option<LeadId>,
    #[serde(flatten)]
    pub attributes: QualificationAttributes,
    #[serde(default)]
    pub auto_schedule: bool,
    #[serde(default)]
    pub appointment_type: AppointmentType,
    #[serde(default)]
    pub actor: Option<String>,
}

/// Admin input for creating or replacing a scoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfigDraft {
    #[serde(default)]
    pub id: Option<ScoringConfigId>,
    pub organization_id: OrganizationId,
    pub name: String,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub weights: WeightTable,
    #[serde(default)]
    pub low_score_threshold: Option<i32>,
    #[serde(default)]
    pub high_score_closer_id: Option<CloserId>,
    #[serde(default)]
    pub low_score_closer_id: Option<CloserId>,
}

/// What happened when intake tried to book the lead right away.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AutoSchedule {
    Scheduled {
        appointment_id: AppointmentId,
    },
    Failed {
        error: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        existing_appointment_id: Option<AppointmentId>,
    },
}

/// Scored, routed and persisted lead. `issues` lists the configuration problems that
/// degraded the result without aborting it.
#[derive(Debug, Clone, Serialize)]
pub struct QualificationOutcome {
    pub lead: Lead,
    pub score: ScoreOutcome,
    pub assignment: Assignment,
    pub issues: Vec<ConfigurationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scheduling: Option<AutoSchedule>,
}

/// Service composing scoring, routing, persistence and optional booking for new leads.
pub struct LeadIntakeService<S, H> {
    store: Arc<S>,
    history: HistoryRecorder<H>,
    scheduler: AppointmentScheduler<S>,
}

impl<S, H> LeadIntakeService<S, H>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    pub fn new(store: Arc<S>, history: Arc<H>, settings: SchedulerSettings) -> Self {
        let scheduler = AppointmentScheduler::new(Arc::clone(&store), settings);
        Self::with_scheduler(store, history, scheduler)
    }

    pub fn with_clock(
        store: Arc<S>,
        history: Arc<H>,
        settings: SchedulerSettings,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let scheduler = AppointmentScheduler::with_clock(Arc::clone(&store), settings, clock);
        Self::with_scheduler(store, history, scheduler)
    }

    fn with_scheduler(store: Arc<S>, history: Arc<H>, scheduler: AppointmentScheduler<S>) -> Self {
        Self {
            store,
            history: HistoryRecorder::new(history),
            scheduler,
        }
    }

    pub fn scheduler(&self) -> &AppointmentScheduler<S> {
        &self.scheduler
    }

    /// Score, route and persist a submission. Configuration problems degrade the lead to
    /// defaults or "unassigned"; only invalid input and storage failures are errors.
    pub fn qualify(
        &self,
        submission: LeadSubmission,
    ) -> Result<QualificationOutcome, QualificationError> {
        require_text("organization_id", submission.organization_id.as_str())?;
        if let Some(lead_id) = &submission.lead_id {
            require_text("lead_id", lead_id.as_str())?;
        }

        let actor = submission
            .actor
            .clone()
            .unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        let mut issues = Vec::new();
        let config = self.active_config(&submission.organization_id, &mut issues);
        let score = ScoreCalculator::for_config(&config).calculate(&submission.attributes);
        let assignment = self.route(&config, score.total_score, &mut issues);

        let now = Utc::now();
        let lead = Lead {
            id: submission.lead_id.unwrap_or_else(LeadId::generate),
            organization_id: submission.organization_id,
            attributes: submission.attributes,
            lead_score: score.total_score,
            score_breakdown: score.breakdown.clone(),
            tier: Some(assignment.tier),
            assigned_closer_id: assignment.closer_id.clone(),
            status: if assignment.is_assigned() {
                LeadStatus::Assigned
            } else {
                LeadStatus::Unassigned
            },
            next_followup_date: None,
            last_interaction_at: Some(now),
            created_at: now,
            updated_at: now,
        };
        let mut lead = self.store.insert_lead(lead)?;

        tracing::info!(
            lead_id = %lead.id,
            organization_id = %lead.organization_id,
            score = score.total_score,
            tier = assignment.tier.label(),
            assigned = assignment.is_assigned(),
            "lead qualified"
        );
        self.record_scoring(&lead, &config, &assignment, &actor);

        let scheduling = match (&assignment.closer_id, submission.auto_schedule) {
            (Some(closer_id), true) => {
                let request = ScheduleRequest {
                    lead_id: lead.id.clone(),
                    closer_id: closer_id.clone(),
                    kind: submission.appointment_type,
                    preferred_date: None,
                    preferred_time: None,
                    notes: None,
                    actor: Some(actor),
                };
                let result = self.auto_schedule(request);
                if matches!(result, AutoSchedule::Scheduled { .. }) {
                    match self.store.fetch_lead(&lead.id) {
                        Ok(Some(refreshed)) => lead = refreshed,
                        Ok(None) => {}
                        Err(err) => {
                            tracing::warn!(lead_id = %lead.id, error = %err, "failed to reload lead")
                        }
                    }
                }
                Some(result)
            }
            _ => None,
        };

        Ok(QualificationOutcome {
            lead,
            score,
            assignment,
            issues,
            scheduling,
        })
    }

    /// Administrative re-score against the organization's current configuration.
    pub fn rescore(
        &self,
        lead_id: &LeadId,
        actor: Option<String>,
    ) -> Result<QualificationOutcome, QualificationError> {
        let stored = self.get(lead_id)?;
        let actor = actor.unwrap_or_else(|| SYSTEM_ACTOR.to_string());
        let previous_score = stored.lead_score;

        let mut issues = Vec::new();
        let config = self.active_config(&stored.organization_id, &mut issues);
        let score = ScoreCalculator::for_config(&config).calculate(&stored.attributes);
        let assignment = self.route(&config, score.total_score, &mut issues);

        // Scheduling state may have changed since the read; only scoring fields are written.
        let update = ScoringUpdate {
            lead_score: score.total_score,
            score_breakdown: score.breakdown.clone(),
            tier: assignment.tier,
            assigned_closer_id: assignment.closer_id.clone(),
            touched_at: Utc::now(),
        };
        let lead = self
            .store
            .apply_scoring(lead_id, &update)
            .map_err(|err| match err {
                RepositoryError::NotFound => QualificationError::not_found("lead", lead_id),
                other => other.into(),
            })?;

        tracing::info!(
            lead_id = %lead.id,
            previous_score,
            score = score.total_score,
            tier = assignment.tier.label(),
            "lead rescored"
        );
        self.history.record(HistoryEvent::new(
            lead.id.clone(),
            HistoryAction::LeadRescored,
            actor.as_str(),
            details([
                ("previous_score", previous_score.to_string()),
                ("score", score.total_score.to_string()),
                ("config_id", config.id.to_string()),
            ]),
        ));
        self.record_assignment(&lead, &assignment, &actor);

        Ok(QualificationOutcome {
            lead,
            score,
            assignment,
            issues,
            scheduling: None,
        })
    }

    pub fn get(&self, lead_id: &LeadId) -> Result<Lead, QualificationError> {
        self.store
            .fetch_lead(lead_id)?
            .ok_or_else(|| QualificationError::not_found("lead", lead_id))
    }

    pub fn history(&self, lead_id: &LeadId) -> Result<Vec<HistoryEvent>, QualificationError> {
        self.get(lead_id)?;
        Ok(self.store.history_for(lead_id)?)
    }

    pub fn create_config(
        &self,
        draft: ScoringConfigDraft,
    ) -> Result<ScoringConfiguration, QualificationError> {
        validate_draft(&draft)?;
        let now = Utc::now();
        let config = ScoringConfiguration {
            id: draft.id.unwrap_or_else(ScoringConfigId::generate),
            organization_id: draft.organization_id,
            name: draft.name.trim().to_string(),
            is_active: draft.is_active,
            weights: draft.weights,
            low_score_threshold: draft.low_score_threshold,
            high_score_closer_id: draft.high_score_closer_id,
            low_score_closer_id: draft.low_score_closer_id,
            created_at: now,
            updated_at: now,
        };
        let stored = self.store.insert_config(config)?;
        tracing::info!(
            config_id = %stored.id,
            organization_id = %stored.organization_id,
            active = stored.is_active,
            "scoring configuration created"
        );
        Ok(stored)
    }

    pub fn update_config(
        &self,
        draft: ScoringConfigDraft,
    ) -> Result<ScoringConfiguration, QualificationError> {
        let id = draft.id.clone().ok_or_else(|| ValidationError::Blank {
            field: "id".to_string(),
        })?;
        validate_draft(&draft)?;
        let existing = self
            .store
            .fetch_config(&id)?
            .ok_or_else(|| QualificationError::not_found("scoring configuration", &id))?;
        if existing.organization_id != draft.organization_id {
            return Err(ValidationError::invalid(
                "organization_id",
                "a configuration cannot move between organizations",
            )
            .into());
        }

        let config = ScoringConfiguration {
            id,
            organization_id: existing.organization_id,
            name: draft.name.trim().to_string(),
            is_active: draft.is_active,
            weights: draft.weights,
            low_score_threshold: draft.low_score_threshold,
            high_score_closer_id: draft.high_score_closer_id,
            low_score_closer_id: draft.low_score_closer_id,
            created_at: existing.created_at,
            updated_at: Utc::now(),
        };
        Ok(self.store.update_config(config)?)
    }

    pub fn activate_config(
        &self,
        id: &ScoringConfigId,
    ) -> Result<ScoringConfiguration, QualificationError> {
        let activated = self.store.activate_config(id).map_err(|err| match err {
            RepositoryError::NotFound => QualificationError::not_found("scoring configuration", id),
            other => other.into(),
        })?;
        tracing::info!(
            config_id = %activated.id,
            organization_id = %activated.organization_id,
            "scoring configuration activated"
        );
        Ok(activated)
    }

    pub fn list_configs(
        &self,
        organization_id: &OrganizationId,
    ) -> Result<Vec<ScoringConfiguration>, QualificationError> {
        Ok(self.store.configs_for(organization_id)?)
    }

    fn active_config(
        &self,
        organization_id: &OrganizationId,
        issues: &mut Vec<ConfigurationError>,
    ) -> ScoringConfiguration {
        match self.store.active_config(organization_id) {
            Ok(Some(config)) => config,
            Ok(None) => {
                tracing::warn!(organization_id = %organization_id, "no active scoring configuration");
                issues.push(ConfigurationError::NoActiveConfiguration {
                    organization_id: organization_id.clone(),
                });
                ScoringConfiguration::fallback(organization_id.clone())
            }
            Err(err) => {
                tracing::error!(organization_id = %organization_id, error = %err, "scoring configuration lookup failed");
                issues.push(ConfigurationError::ConfigurationLookupFailed {
                    detail: err.to_string(),
                });
                ScoringConfiguration::fallback(organization_id.clone())
            }
        }
    }

    /// Route a score, checking that the chosen closer exists, belongs to the organization
    /// and is active. Problems become issues, never errors.
    fn route(
        &self,
        config: &ScoringConfiguration,
        score: i32,
        issues: &mut Vec<ConfigurationError>,
    ) -> Assignment {
        let threshold = config.threshold();
        let tier = AssignmentRouter::tier_for(score, threshold);
        let configured = match tier {
            Tier::High => config.high_score_closer_id.as_ref(),
            Tier::Low => config.low_score_closer_id.as_ref(),
        };

        let member = match configured {
            None => {
                issues.push(ConfigurationError::NoCloserForTier { tier });
                None
            }
            Some(closer_id) => match self.store.fetch_closer(closer_id) {
                Ok(Some(closer)) if closer.organization_id != config.organization_id => {
                    issues.push(ConfigurationError::ForeignCloser {
                        closer_id: closer_id.clone(),
                        tier,
                    });
                    None
                }
                Ok(Some(closer)) => {
                    if !closer.active {
                        issues.push(ConfigurationError::InactiveCloser {
                            closer_id: closer_id.clone(),
                            tier,
                        });
                    }
                    Some(PoolMember {
                        closer_id: closer.id,
                        active: closer.active,
                    })
                }
                Ok(None) => {
                    issues.push(ConfigurationError::UnknownCloser {
                        closer_id: closer_id.clone(),
                        tier,
                    });
                    None
                }
                Err(err) => {
                    issues.push(ConfigurationError::CloserLookupFailed {
                        detail: err.to_string(),
                    });
                    None
                }
            },
        };

        let pool = match tier {
            Tier::High => CloserPool {
                high: member,
                low: None,
            },
            Tier::Low => CloserPool {
                high: None,
                low: member,
            },
        };
        let assignment = AssignmentRouter::assign(score, threshold, &pool);
        if !assignment.is_assigned() {
            counter!(UNASSIGNED_METRIC, "tier" => tier.label()).increment(1);
            tracing::warn!(
                organization_id = %config.organization_id,
                tier = tier.label(),
                score,
                "lead left unassigned"
            );
        }
        assignment
    }

    fn auto_schedule(&self, request: ScheduleRequest) -> AutoSchedule {
        let lead_id = request.lead_id.clone();
        match self.scheduler.schedule(request) {
            Ok(appointment) => AutoSchedule::Scheduled {
                appointment_id: appointment.id,
            },
            Err(err) => {
                tracing::warn!(lead_id = %lead_id, error = %err, "automatic scheduling failed");
                let existing_appointment_id = match &err {
                    SchedulingError::AlreadyScheduled { appointment_id, .. } => {
                        Some(appointment_id.clone())
                    }
                    _ => None,
                };
                AutoSchedule::Failed {
                    error: err.to_string(),
                    retryable: err.is_retryable(),
                    existing_appointment_id,
                }
            }
        }
    }

    fn record_scoring(
        &self,
        lead: &Lead,
        config: &ScoringConfiguration,
        assignment: &Assignment,
        actor: &str,
    ) {
        self.history.record(HistoryEvent::new(
            lead.id.clone(),
            HistoryAction::LeadScored,
            actor,
            details([
                ("score", lead.lead_score.to_string()),
                ("threshold", assignment.threshold.to_string()),
                ("config_id", config.id.to_string()),
            ]),
        ));
        self.record_assignment(lead, assignment, actor);
    }

    fn record_assignment(&self, lead: &Lead, assignment: &Assignment, actor: &str) {
        let mut entries = vec![
            ("tier", assignment.tier.label().to_string()),
            ("reason", assignment.reason.label().to_string()),
        ];
        let action = match &assignment.closer_id {
            Some(closer_id) => {
                entries.push(("closer_id", closer_id.to_string()));
                HistoryAction::LeadAssigned
            }
            None => HistoryAction::LeadUnassigned,
        };
        self.history
            .record(HistoryEvent::new(lead.id.clone(), action, actor, details(entries)));
    }
}

impl ScoringConfigDraft {
    /// Checks applied before a draft is stored: non-blank names, non-negative weights and
    /// a threshold of at least 1.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_draft(self)
    }
}

fn validate_draft(draft: &ScoringConfigDraft) -> Result<(), ValidationError> {
    require_text("organization_id", draft.organization_id.as_str())?;
    require_text("name", &draft.name)?;
    for (field, value) in draft.weights.all_weights() {
        if value < 0 {
            return Err(ValidationError::Negative {
                field: format!("weights.{field}"),
                value,
            });
        }
        require_range(
            &format!("weights.{field}"),
            i64::from(value),
            0,
            i64::from(MAX_WEIGHT),
        )?;
    }
    if let Some(threshold) = draft.low_score_threshold {
        require_range(
            "low_score_threshold",
            i64::from(threshold),
            1,
            i64::from(i32::MAX),
        )?;
    }
    Ok(())
}

/// Error raised by the intake service.
#[derive(Debug, thiserror::Error)]
pub enum QualificationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl QualificationError {
    fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
