use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::{
    comb::Comb,
    error::AppError,
    models::{ConfigResponse, DeviceRegistration, OrganizationUpdate, PushMessage},
    push::{OrganizationSummary, RegistrationOutcome, SendSummary},
    state::AppState,
};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn config(State(state): State<AppState>) -> Json<ConfigResponse> {
    Json(ConfigResponse {
        public_key: state.engine.vapid_public_key().map(str::to_string),
    })
}

pub async fn register(
    State(state): State<AppState>,
    Json(registration): Json<DeviceRegistration>,
) -> Result<Json<RegistrationOutcome>, AppError> {
    let outcome = state
        .engine
        .create_or_update_registration(&registration)
        .await?;
    Ok(Json(outcome))
}

pub async fn unregister(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> Result<StatusCode, AppError> {
    let device_id = parse_device_id(&device_id)?;
    state.engine.delete_registration(&device_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_organization(
    State(state): State<AppState>,
    Json(update): Json<OrganizationUpdate>,
) -> Result<Json<OrganizationSummary>, AppError> {
    let summary = state
        .engine
        .add_organization(&update.device_ids, update.organization_id)
        .await?;
    Ok(Json(summary))
}

pub async fn remove_organization(
    State(state): State<AppState>,
    Json(update): Json<OrganizationUpdate>,
) -> Result<Json<OrganizationSummary>, AppError> {
    let summary = state
        .engine
        .remove_organization(&update.device_ids, update.organization_id)
        .await?;
    Ok(Json(summary))
}

pub async fn send(
    State(state): State<AppState>,
    Json(message): Json<PushMessage>,
) -> Result<Json<SendSummary>, AppError> {
    let summary = state.engine.send(&message).await?;
    info!(
        "{:?} push to {:?} {}: {} hub(s), {} web push target(s)",
        message.push_type,
        message.target,
        message.target_id,
        summary.hub_targets,
        summary.web_push_targets
    );
    Ok(Json(summary))
}

fn parse_device_id(value: &str) -> Result<Comb, AppError> {
    value
        .trim()
        .parse()
        .map_err(|_| AppError::new(StatusCode::BAD_REQUEST, "invalid device id"))
}
