use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, FieldError};
use crate::utils::validation;

/// 列表与公开详情使用的字段
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub profile_image_url: Option<String>,
    pub is_verified: bool,
    pub is_driver_verified: bool,
    pub email: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub phone_number: String,
    pub profile_image_url: Option<String>,
    pub experience: Option<String>,
    pub biography: Option<String>,
    pub favorite_music: Option<String>,
    pub birth_date: DateTime<Utc>,
    pub is_verified: bool,
    pub is_driver_verified: bool,
    pub email: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    /// -1 表示不分页
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub is_verified: Option<bool>,
    pub is_driver_verified: Option<bool>,
    pub username: Option<String>,
}

pub fn default_page() -> i64 {
    1
}

pub fn default_limit() -> i64 {
    50
}

pub fn validate_pagination(page: i64, limit: i64) -> Result<(), AppError> {
    let mut errors = Vec::new();
    if page < 1 {
        errors.push(FieldError::new("page", "must be at least 1"));
    }
    if limit < -1 || limit == 0 {
        errors.push(FieldError::new("limit", "must be positive or -1"));
    }
    if errors.is_empty() { Ok(()) } else { Err(AppError::Validation(errors)) }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub firstname: Option<String>,
    pub lastname: Option<String>,
    pub username: Option<String>,
    pub phone_number: Option<String>,
    pub profile_image_url: Option<String>,
    pub experience: Option<String>,
    pub biography: Option<String>,
    pub favorite_music: Option<String>,
    pub birth_date: Option<String>,
}

/// 校验后的更新字段
pub struct ProfileChanges {
    pub request: UpdateProfileRequest,
    pub birth_date: Option<DateTime<Utc>>,
}

impl UpdateProfileRequest {
    pub fn validate(self) -> Result<ProfileChanges, AppError> {
        let mut errors = Vec::new();

        if let Some(v) = &self.firstname {
            validation::length(&mut errors, "firstname", v, 1, 100);
        }
        if let Some(v) = &self.lastname {
            validation::length(&mut errors, "lastname", v, 1, 100);
        }
        if let Some(v) = &self.username {
            validation::length(&mut errors, "username", v, 3, 50);
        }
        if let Some(v) = &self.phone_number {
            if !validation::is_phone_number(v) {
                errors.push(FieldError::new("phoneNumber", "invalid phone number"));
            }
        }
        if let Some(v) = &self.profile_image_url {
            if !(v.starts_with("https://") || v.starts_with("http://")) {
                errors.push(FieldError::new("profileImageUrl", "must be a URL"));
            }
        }
        if let Some(v) = &self.experience {
            validation::max_length(&mut errors, "experience", v, 500);
        }
        if let Some(v) = &self.biography {
            validation::max_length(&mut errors, "biography", v, 1000);
        }
        if let Some(v) = &self.favorite_music {
            validation::max_length(&mut errors, "favoriteMusic", v, 200);
        }
        let birth_date = self
            .birth_date
            .as_deref()
            .and_then(|v| validation::parse_datetime(&mut errors, "birthDate", v));

        if errors.is_empty() {
            Ok(ProfileChanges {
                request: self,
                birth_date,
            })
        } else {
            Err(AppError::Validation(errors))
        }
    }
}

const SUMMARY_COLUMNS: &str = r#"
    p.id, p.user_id, p.firstname, p.lastname, p.username, p.profile_image_url,
    p.is_verified, p.is_driver_verified, u.email, u.email_verified, p.created_at
"#;

const PROFILE_COLUMNS: &str = r#"
    p.id, p.user_id, p.firstname, p.lastname, p.username, p.phone_number,
    p.profile_image_url, p.experience, p.biography, p.favorite_music, p.birth_date,
    p.is_verified, p.is_driver_verified, u.email, u.email_verified, p.created_at, p.updated_at
"#;

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &ProfileListQuery) {
    builder.push(" WHERE TRUE");
    if let Some(v) = query.is_verified {
        builder.push(" AND p.is_verified = ").push_bind(v);
    }
    if let Some(v) = query.is_driver_verified {
        builder.push(" AND p.is_driver_verified = ").push_bind(v);
    }
    if let Some(username) = &query.username {
        builder
            .push(" AND p.username ILIKE ")
            .push_bind(format!("%{}%", username));
    }
}

impl Profile {
    pub async fn list(
        pool: &PgPool,
        query: &ProfileListQuery,
    ) -> Result<(Vec<ProfileSummary>, i64), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(format!(
            "SELECT {} FROM profiles p JOIN users u ON u.id = p.user_id",
            SUMMARY_COLUMNS
        ));
        push_filters(&mut builder, query);
        builder.push(" ORDER BY p.created_at DESC");
        if query.limit != -1 {
            builder
                .push(" LIMIT ")
                .push_bind(query.limit)
                .push(" OFFSET ")
                .push_bind((query.page - 1) * query.limit);
        }
        let profiles = builder
            .build_query_as::<ProfileSummary>()
            .fetch_all(pool)
            .await?;

        // limit = -1 时结果即全部
        let total = if query.limit == -1 {
            profiles.len() as i64
        } else {
            let mut count = QueryBuilder::<Postgres>::new(
                "SELECT COUNT(*) FROM profiles p JOIN users u ON u.id = p.user_id",
            );
            push_filters(&mut count, query);
            count.build_query_scalar::<i64>().fetch_one(pool).await?
        };

        Ok((profiles, total))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles p JOIN users u ON u.id = p.user_id WHERE p.id = $1",
            PROFILE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Profile>(&format!(
            "SELECT {} FROM profiles p JOIN users u ON u.id = p.user_id WHERE p.user_id = $1",
            PROFILE_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn update(
        pool: &PgPool,
        user_id: Uuid,
        changes: ProfileChanges,
    ) -> Result<Option<Self>, sqlx::Error> {
        let req = changes.request;
        let updated = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE profiles SET
                firstname = COALESCE($2, firstname),
                lastname = COALESCE($3, lastname),
                username = COALESCE($4, username),
                phone_number = COALESCE($5, phone_number),
                profile_image_url = COALESCE($6, profile_image_url),
                experience = COALESCE($7, experience),
                biography = COALESCE($8, biography),
                favorite_music = COALESCE($9, favorite_music),
                birth_date = COALESCE($10, birth_date),
                updated_at = NOW()
            WHERE user_id = $1
            RETURNING id
            "#,
        )
        .bind(user_id)
        .bind(req.firstname)
        .bind(req.lastname)
        .bind(req.username)
        .bind(req.phone_number)
        .bind(req.profile_image_url)
        .bind(req.experience)
        .bind(req.biography)
        .bind(req.favorite_music)
        .bind(changes.birth_date)
        .fetch_optional(pool)
        .await?;

        match updated {
            Some(id) => Self::find_by_id(pool, id).await,
            None => Ok(None),
        }
    }

    /// 删除账户，资料、会话与行程关系级联删除
    pub async fn delete_account(pool: &PgPool, user_id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(user_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
