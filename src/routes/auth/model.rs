use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{AppError, FieldError};
use crate::routes::profile::Profile;
use crate::utils::validation;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub phone_number: String,
    pub birth_date: String,
}

/// 校验通过的注册信息
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub phone_number: String,
    pub birth_date: DateTime<Utc>,
}

impl RegisterRequest {
    pub fn validate(self) -> Result<NewAccount, AppError> {
        let mut errors = Vec::new();

        if !validation::is_email(&self.email) {
            errors.push(FieldError::new("email", "invalid email"));
        }
        validation::length(&mut errors, "password", &self.password, 8, 128);
        if !validation::is_strong_password(&self.password) {
            errors.push(FieldError::new(
                "password",
                "must contain lowercase, uppercase, digit and one of @$!%*?&",
            ));
        }
        validation::length(&mut errors, "firstname", &self.firstname, 1, 100);
        validation::length(&mut errors, "lastname", &self.lastname, 1, 100);
        validation::length(&mut errors, "username", &self.username, 3, 50);
        if !validation::is_phone_number(&self.phone_number) {
            errors.push(FieldError::new("phoneNumber", "invalid phone number"));
        }
        let birth_date = validation::parse_datetime(&mut errors, "birthDate", &self.birth_date);

        match birth_date {
            Some(birth_date) if errors.is_empty() => Ok(NewAccount {
                email: self.email.to_lowercase(),
                password: self.password,
                firstname: self.firstname,
                lastname: self.lastname,
                username: self.username,
                phone_number: self.phone_number,
                birth_date,
            }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

impl LoginRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if !validation::is_email(&self.email) {
            errors.push(FieldError::new("email", "invalid email"));
        }
        if self.password.chars().count() < 8 {
            errors.push(FieldError::new("password", "must be at least 8 characters"));
        }
        if errors.is_empty() { Ok(()) } else { Err(AppError::Validation(errors)) }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

impl ChangePasswordRequest {
    pub fn validate(&self) -> Result<(), AppError> {
        let mut errors = Vec::new();
        if self.current_password.chars().count() < 8 {
            errors.push(FieldError::new("currentPassword", "must be at least 8 characters"));
        }
        validation::length(&mut errors, "newPassword", &self.new_password, 8, 128);
        if errors.is_empty() { Ok(()) } else { Err(AppError::Validation(errors)) }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub user: User,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<Profile>,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// 登录校验需要的账户字段
#[derive(Debug, Clone, FromRow)]
pub struct Credentials {
    pub user_id: Uuid,
    pub password_hash: String,
}

impl User {
    pub async fn email_taken(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM users WHERE email = $1)")
            .bind(email)
            .fetch_one(pool)
            .await
    }

    pub async fn username_taken(pool: &PgPool, username: &str) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM profiles WHERE username = $1)")
            .bind(username)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            "SELECT id, email, name, email_verified, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// 用户、账户与资料在同一事务内创建，返回新用户与资料 ID
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        account: &NewAccount,
        password_hash: &str,
    ) -> Result<(User, Uuid), sqlx::Error> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (id, email, name)
            VALUES ($1, $2, $3)
            RETURNING id, email, name, email_verified, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&account.email)
        .bind(format!("{} {}", account.firstname, account.lastname))
        .fetch_one(&mut **tx)
        .await?;

        sqlx::query("INSERT INTO accounts (id, user_id, password_hash) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(user.id)
            .bind(password_hash)
            .execute(&mut **tx)
            .await?;

        let profile_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO profiles (id, user_id, firstname, lastname, username, phone_number, birth_date)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user.id)
        .bind(&account.firstname)
        .bind(&account.lastname)
        .bind(&account.username)
        .bind(&account.phone_number)
        .bind(account.birth_date)
        .fetch_one(&mut **tx)
        .await?;

        Ok((user, profile_id))
    }
}

impl Credentials {
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Credentials>(
            r#"
            SELECT a.user_id, a.password_hash
            FROM accounts a
            JOIN users u ON u.id = a.user_id
            WHERE u.email = $1
            "#,
        )
        .bind(email.to_lowercase())
        .fetch_optional(pool)
        .await
    }

    pub async fn find_by_user_id(pool: &PgPool, user_id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Credentials>(
            "SELECT user_id, password_hash FROM accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(pool)
        .await
    }

    pub async fn update_password(
        pool: &PgPool,
        user_id: Uuid,
        password_hash: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE accounts SET password_hash = $2, updated_at = NOW() WHERE user_id = $1")
            .bind(user_id)
            .bind(password_hash)
            .execute(pool)
            .await?;
        Ok(())
    }
}

impl Session {
    pub async fn create<'e, E>(
        executor: E,
        user_id: Uuid,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<Self, sqlx::Error>
    where
        E: sqlx::Executor<'e, Database = Postgres>,
    {
        sqlx::query_as::<_, Session>(
            r#"
            INSERT INTO sessions (id, user_id, token, expires_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, user_id, token, expires_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(token)
        .bind(expires_at)
        .fetch_one(executor)
        .await
    }

    /// 返回是否确实删除了会话
    pub async fn delete_by_token(pool: &PgPool, token: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM sessions WHERE token = $1")
            .bind(token)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
