use axum::{
    extract::{Path, State},
    response::IntoResponse,
};

use crate::{
    AppState,
    error::{AppError, AppResult},
    extract::{AppJson, AppQuery, parse_id},
    middleware::Identity,
    result::{ApiResponse, Pagination, message_to_api_response, success_to_api_response},
    routes::auth::{ChangePasswordRequest, Credentials},
    utils::{hash_password, verify_password},
};

use super::model::{Profile, ProfileListQuery, UpdateProfileRequest, validate_pagination};

/// 分页列出资料，支持按认证状态和用户名过滤
#[axum::debug_handler]
pub async fn list_profiles(
    State(state): State<AppState>,
    AppQuery(query): AppQuery<ProfileListQuery>,
) -> AppResult<impl IntoResponse> {
    validate_pagination(query.page, query.limit)?;

    let (profiles, total) = Profile::list(&state.pool, &query).await?;

    Ok(axum::Json(
        ApiResponse::success(profiles).with_pagination(Pagination::new(query.page, query.limit, total)),
    ))
}

#[axum::debug_handler]
pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let id = parse_id(&id)?;
    let profile = Profile::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(success_to_api_response(profile))
}

#[axum::debug_handler]
pub async fn get_own_profile(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<impl IntoResponse> {
    let profile = Profile::find_by_user_id(&state.pool, identity.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(success_to_api_response(profile))
}

/// 认证状态字段不允许用户自行修改
#[axum::debug_handler]
pub async fn update_own_profile(
    State(state): State<AppState>,
    identity: Identity,
    AppJson(req): AppJson<UpdateProfileRequest>,
) -> AppResult<impl IntoResponse> {
    let changes = req.validate()?;
    let profile = Profile::update(&state.pool, identity.user_id, changes)
        .await?
        .ok_or(AppError::NotFound)?;

    tracing::info!(user_id = %identity.user_id, profile_id = %profile.id, "Profile updated");
    Ok(axum::Json(ApiResponse::success(profile).with_message("Profile updated")))
}

#[axum::debug_handler]
pub async fn delete_own_profile(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<impl IntoResponse> {
    if !Profile::delete_account(&state.pool, identity.user_id).await? {
        return Err(AppError::NotFound);
    }

    tracing::info!(user_id = %identity.user_id, "Account deleted");
    Ok(message_to_api_response("Account deleted"))
}

#[axum::debug_handler]
pub async fn change_password(
    State(state): State<AppState>,
    identity: Identity,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let credentials = Credentials::find_by_user_id(&state.pool, identity.user_id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !verify_password(req.current_password, credentials.password_hash).await? {
        return Err(AppError::validation("currentPassword", "is incorrect"));
    }

    let password_hash = hash_password(req.new_password).await?;
    Credentials::update_password(&state.pool, identity.user_id, &password_hash).await?;

    tracing::info!(user_id = %identity.user_id, "Password changed");
    Ok(message_to_api_response("Password changed"))
}
