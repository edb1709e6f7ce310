use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, AppResult},
    extract::{AppJson, AppQuery, parse_id},
    middleware::Identity,
    result::{ApiResponse, Pagination, message_to_api_response, success_to_api_response},
    routes::profile::{Profile, validate_pagination},
};

use super::model::{CreateRideRequest, Ride, RideListQuery, UpdateRideRequest};

#[axum::debug_handler]
pub async fn list_rides(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<RideListQuery>,
) -> AppResult<impl IntoResponse> {
    validate_pagination(query.page, query.limit)?;

    let (rides, total) = Ride::list(&state.pool, &query).await?;
    tracing::info!(count = rides.len(), "Rides fetched");

    Ok(axum::Json(
        ApiResponse::success(rides).with_pagination(Pagination::new(query.page, query.limit, total)),
    ))
}

#[axum::debug_handler]
pub async fn get_ride(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let ride = Ride::details(&state.pool, id).await?.ok_or(AppError::NotFound)?;
    Ok(success_to_api_response(ride))
}

/// 调用者以司机身份创建行程
#[axum::debug_handler]
pub async fn create_ride(
    State(state): State<AppState>,
    identity: Identity,
    AppJson(req): AppJson<CreateRideRequest>,
) -> AppResult<impl IntoResponse> {
    let fields = req.validate()?;

    let profile = Profile::find_by_user_id(&state.pool, identity.user_id)
        .await?
        .ok_or_else(|| AppError::Forbidden("A profile is required to offer a ride".into()))?;

    let ride_id = Ride::create(&state.pool, fields, profile.id).await?;
    let ride = Ride::details(&state.pool, ride_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("ride {ride_id} vanished after insert")))?;

    tracing::info!(ride_id = %ride_id, profile_id = %profile.id, "Ride created with driver");
    Ok((StatusCode::CREATED, success_to_api_response(ride)))
}

// 先判断行程是否存在，再判断调用者是否为司机
async fn ensure_driver(state: &AppState, ride_id: Uuid, identity: &Identity, action: &str) -> AppResult<()> {
    if Ride::find_by_id(&state.pool, ride_id).await?.is_none() {
        return Err(AppError::NotFound);
    }
    if !Ride::is_driver(&state.pool, ride_id, identity.user_id).await? {
        tracing::warn!(ride_id = %ride_id, user_id = %identity.user_id, "Non-driver attempted to {} ride", action);
        return Err(AppError::Forbidden(format!("Only the driver can {} this ride", action)));
    }
    Ok(())
}

#[axum::debug_handler]
pub async fn update_ride(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateRideRequest>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let fields = req.validate()?;
    ensure_driver(&state, id, &identity, "update").await?;

    if !Ride::update(&state.pool, id, fields).await? {
        return Err(AppError::NotFound);
    }
    let ride = Ride::details(&state.pool, id).await?.ok_or(AppError::NotFound)?;

    tracing::info!(ride_id = %id, "Ride updated");
    Ok(axum::Json(ApiResponse::success(ride).with_message("Ride updated")))
}

#[axum::debug_handler]
pub async fn delete_ride(
    State(state): State<AppState>,
    identity: Identity,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    ensure_driver(&state, id, &identity, "delete").await?;

    if !Ride::delete(&state.pool, id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(ride_id = %id, "Ride deleted");
    Ok(message_to_api_response("Ride deleted"))
}
