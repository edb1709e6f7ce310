use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use crate::error::{AppError, FieldError};
use crate::routes::profile::{default_limit, default_page};
use crate::utils::validation;

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Ride {
    pub id: Uuid,
    pub starting_address: String,
    pub arrival_address: String,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_datetime: DateTime<Utc>,
    pub arrival_datetime: DateTime<Utc>,
    pub price: f64,
    pub available_seats: i32,
    pub vehicle_id: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 行程参与者及其公开资料
#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    #[serde(skip)]
    pub ride_id: Uuid,
    pub profile_id: Uuid,
    pub driver: bool,
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub profile_image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RideDetails {
    #[serde(flatten)]
    pub ride: Ride,
    pub participants: Vec<Participant>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RideListQuery {
    #[serde(default = "default_page")]
    pub page: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRideRequest {
    pub starting_address: String,
    pub arrival_address: String,
    pub departure_city: String,
    pub arrival_city: String,
    pub departure_datetime: String,
    pub arrival_datetime: String,
    pub price: f64,
    pub available_seats: i32,
    pub vehicle_id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateRideRequest {
    pub starting_address: Option<String>,
    pub arrival_address: Option<String>,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub departure_datetime: Option<String>,
    pub arrival_datetime: Option<String>,
    pub price: Option<f64>,
    pub available_seats: Option<i32>,
    pub vehicle_id: Option<String>,
}

/// 校验后的行程字段，更新时未提供的字段为 None
#[derive(Debug, Clone, Default)]
pub struct RideFields {
    pub starting_address: Option<String>,
    pub arrival_address: Option<String>,
    pub departure_city: Option<String>,
    pub arrival_city: Option<String>,
    pub departure_datetime: Option<DateTime<Utc>>,
    pub arrival_datetime: Option<DateTime<Utc>>,
    pub price: Option<f64>,
    pub available_seats: Option<i32>,
    pub vehicle_id: Option<String>,
}

impl UpdateRideRequest {
    pub fn validate(self) -> Result<RideFields, AppError> {
        let mut errors = Vec::new();

        for (field, value) in [
            ("startingAddress", &self.starting_address),
            ("arrivalAddress", &self.arrival_address),
            ("departureCity", &self.departure_city),
            ("arrivalCity", &self.arrival_city),
            ("vehicleId", &self.vehicle_id),
        ] {
            if matches!(value, Some(v) if v.trim().is_empty()) {
                errors.push(FieldError::new(field, "must not be empty"));
            }
        }
        let departure_datetime = self
            .departure_datetime
            .as_deref()
            .and_then(|v| validation::parse_datetime(&mut errors, "departureDatetime", v));
        let arrival_datetime = self
            .arrival_datetime
            .as_deref()
            .and_then(|v| validation::parse_datetime(&mut errors, "arrivalDatetime", v));
        if matches!(self.price, Some(p) if !(p > 0.0 && p.is_finite())) {
            errors.push(FieldError::new("price", "must be positive"));
        }
        if matches!(self.available_seats, Some(s) if s <= 0) {
            errors.push(FieldError::new("availableSeats", "must be a positive integer"));
        }

        if !errors.is_empty() {
            return Err(AppError::Validation(errors));
        }
        Ok(RideFields {
            starting_address: self.starting_address,
            arrival_address: self.arrival_address,
            departure_city: self.departure_city,
            arrival_city: self.arrival_city,
            departure_datetime,
            arrival_datetime,
            price: self.price,
            available_seats: self.available_seats,
            vehicle_id: self.vehicle_id,
        })
    }
}

impl CreateRideRequest {
    /// 创建时全部字段必填，复用更新的校验规则
    pub fn validate(self) -> Result<RideFields, AppError> {
        UpdateRideRequest {
            starting_address: Some(self.starting_address),
            arrival_address: Some(self.arrival_address),
            departure_city: Some(self.departure_city),
            arrival_city: Some(self.arrival_city),
            departure_datetime: Some(self.departure_datetime),
            arrival_datetime: Some(self.arrival_datetime),
            price: Some(self.price),
            available_seats: Some(self.available_seats),
            vehicle_id: Some(self.vehicle_id),
        }
        .validate()
    }
}

const RIDE_COLUMNS: &str = r#"
    id, starting_address, arrival_address, departure_city, arrival_city,
    departure_datetime, arrival_datetime, price, available_seats, vehicle_id,
    status, created_at, updated_at
"#;

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &RideListQuery) {
    builder.push(" WHERE TRUE");
    if let Some(city) = &query.departure_city {
        builder
            .push(" AND departure_city ILIKE ")
            .push_bind(format!("%{}%", city));
    }
    if let Some(city) = &query.arrival_city {
        builder
            .push(" AND arrival_city ILIKE ")
            .push_bind(format!("%{}%", city));
    }
}

impl Ride {
    pub async fn list(
        pool: &PgPool,
        query: &RideListQuery,
    ) -> Result<(Vec<RideDetails>, i64), sqlx::Error> {
        let mut builder = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM rides", RIDE_COLUMNS));
        push_filters(&mut builder, query);
        builder.push(" ORDER BY departure_datetime ASC");
        if query.limit != -1 {
            builder
                .push(" LIMIT ")
                .push_bind(query.limit)
                .push(" OFFSET ")
                .push_bind((query.page - 1) * query.limit);
        }
        let rides = builder.build_query_as::<Ride>().fetch_all(pool).await?;

        let total = if query.limit == -1 {
            rides.len() as i64
        } else {
            let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM rides");
            push_filters(&mut count, query);
            count.build_query_scalar::<i64>().fetch_one(pool).await?
        };

        let ids: Vec<Uuid> = rides.iter().map(|r| r.id).collect();
        let mut participants = Participant::for_rides(pool, &ids).await?;
        let details = rides
            .into_iter()
            .map(|ride| RideDetails {
                participants: participants.remove(&ride.id).unwrap_or_default(),
                ride,
            })
            .collect();

        Ok((details, total))
    }

    pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, Ride>(&format!("SELECT {} FROM rides WHERE id = $1", RIDE_COLUMNS))
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn details(pool: &PgPool, id: Uuid) -> Result<Option<RideDetails>, sqlx::Error> {
        let Some(ride) = Self::find_by_id(pool, id).await? else {
            return Ok(None);
        };
        let participants = Participant::for_rides(pool, &[id])
            .await?
            .remove(&id)
            .unwrap_or_default();
        Ok(Some(RideDetails { ride, participants }))
    }

    /// 新行程状态为 pending，创建者作为司机加入
    pub async fn create(
        pool: &PgPool,
        fields: RideFields,
        driver_profile_id: Uuid,
    ) -> Result<Uuid, sqlx::Error> {
        let mut tx = pool.begin().await?;

        let ride_id = sqlx::query_scalar::<_, Uuid>(
            r#"
            INSERT INTO rides (
                id, starting_address, arrival_address, departure_city, arrival_city,
                departure_datetime, arrival_datetime, price, available_seats, vehicle_id, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'pending')
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(fields.starting_address)
        .bind(fields.arrival_address)
        .bind(fields.departure_city)
        .bind(fields.arrival_city)
        .bind(fields.departure_datetime)
        .bind(fields.arrival_datetime)
        .bind(fields.price)
        .bind(fields.available_seats)
        .bind(fields.vehicle_id)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("INSERT INTO user_rides (id, ride_id, profile_id, driver) VALUES ($1, $2, $3, TRUE)")
            .bind(Uuid::new_v4())
            .bind(ride_id)
            .bind(driver_profile_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ride_id)
    }

    pub async fn update(pool: &PgPool, id: Uuid, fields: RideFields) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE rides SET
                starting_address = COALESCE($2, starting_address),
                arrival_address = COALESCE($3, arrival_address),
                departure_city = COALESCE($4, departure_city),
                arrival_city = COALESCE($5, arrival_city),
                departure_datetime = COALESCE($6, departure_datetime),
                arrival_datetime = COALESCE($7, arrival_datetime),
                price = COALESCE($8, price),
                available_seats = COALESCE($9, available_seats),
                vehicle_id = COALESCE($10, vehicle_id),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(fields.starting_address)
        .bind(fields.arrival_address)
        .bind(fields.departure_city)
        .bind(fields.arrival_city)
        .bind(fields.departure_datetime)
        .bind(fields.arrival_datetime)
        .bind(fields.price)
        .bind(fields.available_seats)
        .bind(fields.vehicle_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM rides WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn is_driver(pool: &PgPool, ride_id: Uuid, user_id: Uuid) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM user_rides ur
                JOIN profiles p ON p.id = ur.profile_id
                WHERE ur.ride_id = $1 AND p.user_id = $2 AND ur.driver
            )
            "#,
        )
        .bind(ride_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
    }
}

impl Participant {
    /// 按行程 ID 分组，司机排在前面
    pub async fn for_rides(
        pool: &PgPool,
        ride_ids: &[Uuid],
    ) -> Result<HashMap<Uuid, Vec<Participant>>, sqlx::Error> {
        if ride_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query_as::<_, Participant>(
            r#"
            SELECT ur.ride_id, ur.profile_id, ur.driver,
                   p.firstname, p.lastname, p.username, p.profile_image_url
            FROM user_rides ur
            JOIN profiles p ON p.id = ur.profile_id
            WHERE ur.ride_id = ANY($1)
            ORDER BY ur.driver DESC, p.username ASC
            "#,
        )
        .bind(ride_ids)
        .fetch_all(pool)
        .await?;

        let mut grouped: HashMap<Uuid, Vec<Participant>> = HashMap::new();
        for row in rows {
            grouped.entry(row.ride_id).or_default().push(row);
        }
        Ok(grouped)
    }
}
