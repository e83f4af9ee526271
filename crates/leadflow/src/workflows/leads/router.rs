use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::json;

use super::domain::{AppointmentId, Closer, CloserId, LeadId, OrganizationId, ScoringConfigId};
use super::repository::{HistorySink, LeadStore};
use super::scheduler::{BlockRequest, RescheduleRequest, ScheduleRequest};
use super::service::{LeadIntakeService, LeadSubmission, ScoringConfigDraft};
use crate::error::AppError;

type SharedService<S, H> = Arc<LeadIntakeService<S, H>>;

/// Router builder exposing lead intake, scoring configuration, closer and appointment
/// endpoints under `/api/v1`.
pub fn lead_router<S, H>(service: SharedService<S, H>) -> Router
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    Router::new()
        .route("/api/v1/leads", post(qualify_handler::<S, H>))
        .route("/api/v1/leads/:lead_id", get(lead_handler::<S, H>))
        .route("/api/v1/leads/:lead_id/rescore", post(rescore_handler::<S, H>))
        .route("/api/v1/leads/:lead_id/history", get(history_handler::<S, H>))
        .route(
            "/api/v1/scoring-configs",
            get(list_configs_handler::<S, H>)
                .post(create_config_handler::<S, H>)
                .put(update_config_handler::<S, H>),
        )
        .route(
            "/api/v1/scoring-configs/:config_id/activate",
            post(activate_config_handler::<S, H>),
        )
        .route("/api/v1/closers", put(upsert_closer_handler::<S, H>))
        .route(
            "/api/v1/closers/:closer_id/blocks",
            post(add_block_handler::<S, H>),
        )
        .route(
            "/api/v1/closers/:closer_id/deactivate",
            post(deactivate_closer_handler::<S, H>),
        )
        .route(
            "/api/v1/closers/:closer_id/next-slot",
            get(next_slot_handler::<S, H>),
        )
        .route(
            "/api/v1/closers/:closer_id/appointments",
            get(closer_schedule_handler::<S, H>),
        )
        .route(
            "/api/v1/appointments/schedule",
            post(schedule_handler::<S, H>).get(availability_handler::<S, H>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/reschedule",
            post(reschedule_handler::<S, H>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/cancel",
            post(cancel_handler::<S, H>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/complete",
            post(complete_handler::<S, H>),
        )
        .route(
            "/api/v1/appointments/:appointment_id/no-show",
            post(no_show_handler::<S, H>),
        )
        .with_state(service)
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ActorBody {
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CancelBody {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct CompleteBody {
    #[serde(default)]
    outcome: Option<String>,
    #[serde(default)]
    actor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct OrganizationQuery {
    organization_id: OrganizationId,
}

/// `date` defaults to the scheduler clock's current day.
#[derive(Debug, Deserialize)]
pub(crate) struct AvailabilityQuery {
    closer_id: CloserId,
    #[serde(default)]
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NextSlotQuery {
    #[serde(default)]
    from_date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ScheduleRangeQuery {
    from: NaiveDate,
    to: NaiveDate,
    #[serde(default)]
    include_cancelled: bool,
}

fn body_or_default<T: Default>(body: Option<Json<T>>) -> T {
    body.map(|Json(inner)| inner).unwrap_or_default()
}

/// Store calls can wait on the connection mutex or SQLite's busy timeout, so they run on
/// the blocking pool.
async fn blocking<T, E, F>(work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<AppError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::Server(axum::Error::new(err)))?
        .map_err(Into::into)
}

pub(crate) async fn qualify_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Json(submission): Json<LeadSubmission>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let outcome = blocking(move || service.qualify(submission)).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

pub(crate) async fn lead_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(lead_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let lead = blocking(move || service.get(&LeadId(lead_id))).await?;
    Ok(Json(lead))
}

pub(crate) async fn rescore_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(lead_id): Path<String>,
    body: Option<Json<ActorBody>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let body = body_or_default(body);
    let outcome = blocking(move || service.rescore(&LeadId(lead_id), body.actor)).await?;
    Ok(Json(outcome))
}

pub(crate) async fn history_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(lead_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let lead_id = LeadId(lead_id);
    let events = blocking({
        let lead_id = lead_id.clone();
        move || service.history(&lead_id)
    })
    .await?;
    Ok(Json(json!({ "lead_id": lead_id, "events": events })))
}

pub(crate) async fn list_configs_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Query(query): Query<OrganizationQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let configs = blocking(move || service.list_configs(&query.organization_id)).await?;
    Ok(Json(configs))
}

pub(crate) async fn create_config_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Json(draft): Json<ScoringConfigDraft>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let config = blocking(move || service.create_config(draft)).await?;
    Ok((StatusCode::CREATED, Json(config)))
}

pub(crate) async fn update_config_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Json(draft): Json<ScoringConfigDraft>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let config = blocking(move || service.update_config(draft)).await?;
    Ok(Json(config))
}

pub(crate) async fn activate_config_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(config_id): Path<String>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let config =
        blocking(move || service.activate_config(&ScoringConfigId(config_id))).await?;
    Ok(Json(config))
}

pub(crate) async fn upsert_closer_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Json(closer): Json<Closer>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let closer = blocking(move || service.scheduler().upsert_closer(closer)).await?;
    Ok(Json(closer))
}

pub(crate) async fn add_block_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(closer_id): Path<String>,
    Json(request): Json<BlockRequest>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let block =
        blocking(move || service.scheduler().add_block(&CloserId(closer_id), request)).await?;
    Ok((StatusCode::CREATED, Json(block)))
}

pub(crate) async fn deactivate_closer_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(closer_id): Path<String>,
    body: Option<Json<ActorBody>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let body = body_or_default(body);
    let result = blocking(move || {
        service
            .scheduler()
            .deactivate_closer(&CloserId(closer_id), body.actor)
    })
    .await?;
    Ok(Json(result))
}

pub(crate) async fn next_slot_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(closer_id): Path<String>,
    Query(query): Query<NextSlotQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let slot = blocking(move || {
        service
            .scheduler()
            .next_slot(&CloserId(closer_id), query.from_date)
    })
    .await?;
    Ok(Json(slot))
}

pub(crate) async fn closer_schedule_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(closer_id): Path<String>,
    Query(query): Query<ScheduleRangeQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let appointments = blocking(move || {
        service.scheduler().closer_schedule(
            &CloserId(closer_id),
            query.from,
            query.to,
            query.include_cancelled,
        )
    })
    .await?;
    Ok(Json(appointments))
}

pub(crate) async fn schedule_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Json(request): Json<ScheduleRequest>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let appointment = blocking(move || service.scheduler().schedule(request)).await?;
    Ok((StatusCode::CREATED, Json(appointment)))
}

pub(crate) async fn availability_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Query(query): Query<AvailabilityQuery>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let day = blocking(move || {
        let scheduler = service.scheduler();
        let date = query.date.unwrap_or_else(|| scheduler.now().date());
        scheduler.availability(&query.closer_id, date)
    })
    .await?;
    Ok(Json(day))
}

pub(crate) async fn reschedule_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(appointment_id): Path<String>,
    body: Option<Json<RescheduleRequest>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let request = body_or_default(body);
    let appointment = blocking(move || {
        service
            .scheduler()
            .reschedule(&AppointmentId(appointment_id), request)
    })
    .await?;
    Ok(Json(appointment))
}

pub(crate) async fn cancel_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(appointment_id): Path<String>,
    body: Option<Json<CancelBody>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let body = body_or_default(body);
    let appointment = blocking(move || {
        service
            .scheduler()
            .cancel(&AppointmentId(appointment_id), body.reason, body.actor)
    })
    .await?;
    Ok(Json(appointment))
}

pub(crate) async fn complete_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(appointment_id): Path<String>,
    body: Option<Json<CompleteBody>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let body = body_or_default(body);
    let appointment = blocking(move || {
        service
            .scheduler()
            .complete(&AppointmentId(appointment_id), body.outcome, body.actor)
    })
    .await?;
    Ok(Json(appointment))
}

pub(crate) async fn no_show_handler<S, H>(
    State(service): State<SharedService<S, H>>,
    Path(appointment_id): Path<String>,
    body: Option<Json<ActorBody>>,
) -> Result<impl IntoResponse, AppError>
where
    S: LeadStore + 'static,
    H: HistorySink + 'static,
{
    let body = body_or_default(body);
    let appointment = blocking(move || {
        service
            .scheduler()
            .mark_no_show(&AppointmentId(appointment_id), body.actor)
    })
    .await?;
    Ok(Json(appointment))
}
