use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{FromRequestParts, State},
    http::{HeaderMap, Request, header, request::Parts},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::error::AppError;

/// 认证失败原因，对客户端统一返回 401
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    MissingToken,
    SessionNotFound,
    SessionExpired,
    LookupFailed,
    /// 登录时邮箱或密码错误
    InvalidCredentials,
}

/// 会话表与用户表联查得到的最小字段集
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub expires_at: DateTime<Utc>,
}

/// 当前请求的调用者身份，只在一次请求内有效
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub session_id: Uuid,
    pub session_expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, sqlx::Error>;
}

pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    async fn find_by_token(&self, token: &str) -> Result<Option<SessionRecord>, sqlx::Error> {
        sqlx::query_as::<_, SessionRecord>(
            r#"
            SELECT s.id AS session_id, u.id AS user_id, u.email, s.expires_at
            FROM sessions s
            JOIN users u ON u.id = s.user_id
            WHERE s.token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
    }
}

pub struct SessionAuthenticator {
    store: Arc<dyn SessionStore>,
    cookie_name: String,
}

impl SessionAuthenticator {
    pub fn new(store: Arc<dyn SessionStore>, cookie_name: impl Into<String>) -> Self {
        Self {
            store,
            cookie_name: cookie_name.into(),
        }
    }

    /// 优先读取 Authorization 头（无 `Bearer ` 前缀时取原值），其次读取会话 cookie
    pub fn extract_token(&self, headers: &HeaderMap) -> Option<String> {
        let from_header = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(|value| value.strip_prefix("Bearer ").unwrap_or(value).to_string());

        from_header.or_else(|| {
            CookieJar::from_headers(headers)
                .get(&self.cookie_name)
                .map(|cookie| cookie.value().to_string())
        })
    }

    pub async fn resolve(&self, headers: &HeaderMap) -> Result<Identity, AuthFailure> {
        self.resolve_at(headers, Utc::now()).await
    }

    /// 会话在 `expires_at` 当刻仍然有效
    pub async fn resolve_at(
        &self,
        headers: &HeaderMap,
        now: DateTime<Utc>,
    ) -> Result<Identity, AuthFailure> {
        let token = self
            .extract_token(headers)
            .ok_or(AuthFailure::MissingToken)?;

        let record = self
            .store
            .find_by_token(&token)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Session lookup failed");
                AuthFailure::LookupFailed
            })?
            .ok_or(AuthFailure::SessionNotFound)?;

        if record.expires_at < now {
            return Err(AuthFailure::SessionExpired);
        }

        Ok(Identity {
            user_id: record.user_id,
            email: record.email,
            session_id: record.session_id,
            session_expires_at: record.expires_at,
        })
    }
}

pub async fn require_auth(
    State(auth): State<Arc<SessionAuthenticator>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    match auth.resolve(req.headers()).await {
        Ok(identity) => {
            req.extensions_mut().insert(identity);
            Ok(next.run(req).await)
        }
        Err(reason) => {
            tracing::debug!(?reason, path = %req.uri().path(), "Rejected unauthenticated request");
            Err(AppError::Unauthenticated(reason))
        }
    }
}

impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or(AppError::Unauthenticated(AuthFailure::MissingToken))
    }
}
