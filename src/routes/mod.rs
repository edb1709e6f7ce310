pub mod auth;
pub mod profile;
pub mod ride;
pub mod test;

use axum::Json;
use serde_json::{Value, json};

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "message": "Rideshare API" }))
}
