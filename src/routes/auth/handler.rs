use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    AppState,
    error::{AppError, AppResult},
    extract::AppJson,
    middleware::{AuthFailure, Identity},
    result::{message_to_api_response, success_to_api_response},
    routes::profile::Profile,
    utils::{generate_session_token, hash_password, verify_password},
};

use super::model::{AuthResponse, Credentials, LoginRequest, RegisterRequest, Session, User};

fn session_cookie(state: &AppState, token: String) -> Cookie<'static> {
    Cookie::build((state.config.session_cookie_name.clone(), token))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// 注册：创建用户、账户、资料并直接登录
#[axum::debug_handler]
pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(req): AppJson<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let account = req.validate()?;

    if User::email_taken(&state.pool, &account.email).await? {
        return Err(AppError::Conflict("Email already in use".into()));
    }
    if User::username_taken(&state.pool, &account.username).await? {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let password_hash = hash_password(account.password.clone()).await?;
    let token = generate_session_token();
    let expires_at = Utc::now() + state.config.session_ttl();

    let mut tx = state.pool.begin().await?;
    let (user, profile_id) = User::create(&mut tx, &account, &password_hash).await?;
    Session::create(&mut *tx, user.id, &token, expires_at).await?;
    tx.commit().await?;

    let profile = Profile::find_by_id(&state.pool, profile_id).await?;
    tracing::info!(user_id = %user.id, "User registered");

    let jar = jar.add(session_cookie(&state, token.clone()));
    Ok((
        StatusCode::CREATED,
        jar,
        success_to_api_response(AuthResponse {
            user,
            profile,
            token,
            expires_at,
        }),
    ))
}

#[axum::debug_handler]
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    req.validate()?;

    let credentials = Credentials::find_by_email(&state.pool, &req.email)
        .await?
        .ok_or(AppError::Unauthenticated(AuthFailure::InvalidCredentials))?;

    if !verify_password(req.password, credentials.password_hash).await? {
        tracing::info!(user_id = %credentials.user_id, "Login rejected: wrong password");
        return Err(AppError::Unauthenticated(AuthFailure::InvalidCredentials));
    }

    let user = User::find_by_id(&state.pool, credentials.user_id)
        .await?
        .ok_or(AppError::Unauthenticated(AuthFailure::InvalidCredentials))?;

    let token = generate_session_token();
    let expires_at = Utc::now() + state.config.session_ttl();
    Session::create(&state.pool, user.id, &token, expires_at).await?;
    let profile = Profile::find_by_user_id(&state.pool, user.id).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    let jar = jar.add(session_cookie(&state, token.clone()));
    Ok((
        jar,
        success_to_api_response(AuthResponse {
            user,
            profile,
            token,
            expires_at,
        }),
    ))
}

/// 删除当前会话，token 缺失时返回 400
#[axum::debug_handler]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<impl IntoResponse> {
    let token = state
        .authenticator
        .extract_token(&headers)
        .ok_or_else(|| AppError::validation("token", "No session token provided"))?;

    if !Session::delete_by_token(&state.pool, &token).await? {
        return Err(AppError::NotFound);
    }

    let jar = jar.remove(Cookie::build(state.config.session_cookie_name.clone()).path("/"));
    Ok((jar, message_to_api_response("Logged out")))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: Uuid,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub user: User,
    pub session: SessionInfo,
}

#[axum::debug_handler]
pub async fn session(
    State(state): State<AppState>,
    identity: Identity,
) -> AppResult<impl IntoResponse> {
    // 会话存在但用户已被删除
    let user = User::find_by_id(&state.pool, identity.user_id)
        .await?
        .ok_or(AppError::Unauthenticated(AuthFailure::SessionNotFound))?;

    Ok(success_to_api_response(SessionResponse {
        user,
        session: SessionInfo {
            id: identity.session_id,
            expires_at: identity.session_expires_at,
        },
    }))
}
