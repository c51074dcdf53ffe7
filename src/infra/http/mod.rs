mod forms;
mod middleware;
mod public;

pub use middleware::{RequestContext, Viewer};
pub use public::{HttpState, build_router};

use async_trait::async_trait;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use sqlx::Error as SqlxError;

use crate::application::error::ErrorReport;
use crate::infra::db::PostgresRepositories;

/// Readiness probe for the backing store.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), SqlxError>;
}

#[async_trait]
impl HealthCheck for PostgresRepositories {
    async fn health_check(&self) -> Result<(), SqlxError> {
        PostgresRepositories::health_check(self).await
    }
}

fn db_health_response(result: Result<(), SqlxError>) -> Response {
    match result {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => {
            let mut response = StatusCode::SERVICE_UNAVAILABLE.into_response();
            ErrorReport::from_error(
                "infra::http::db_health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}
