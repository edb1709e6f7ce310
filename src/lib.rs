use std::sync::Arc;

use config::Config;
use middleware::SessionAuthenticator;
use sqlx::PgPool;

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod result;
pub mod router;
pub mod routes;
pub mod utils;

pub use router::{Pipeline, build_router};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    pub authenticator: Arc<SessionAuthenticator>,
}
