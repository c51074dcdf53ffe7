use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::{
        accounts::AccountsError, authoring::AuthoringError, feed::FeedError, repos::RepoError,
    },
    domain::error::DomainError,
    infra::error::InfraError,
};

/// Diagnostic attached to failed responses and logged by the response middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        let report = ErrorReport::from_error(source, status, error);
        Self {
            status,
            public_message,
            report,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Map a repository error to a consistent HTTP error response.
pub fn repo_error_to_http(source: &'static str, err: RepoError) -> HttpError {
    match err {
        RepoError::Duplicate { constraint } => {
            HttpError::new(source, StatusCode::CONFLICT, "Duplicate record", constraint)
        }
        RepoError::NotFound => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "Resource not found",
            "resource not found",
        ),
        RepoError::InvalidInput { message } => {
            HttpError::new(source, StatusCode::BAD_REQUEST, "Invalid input", message)
        }
        RepoError::Integrity { message } => HttpError::new(
            source,
            StatusCode::CONFLICT,
            "Integrity constraint violated",
            message,
        ),
        RepoError::Timeout => HttpError::new(
            source,
            StatusCode::SERVICE_UNAVAILABLE,
            "Database timeout",
            "Database timeout",
        ),
        RepoError::Persistence(message) => HttpError::new(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Persistence error",
            message,
        ),
    }
}

fn domain_error_to_http(source: &'static str, err: DomainError) -> HttpError {
    match err {
        DomainError::NotFound { entity } => HttpError::new(
            source,
            StatusCode::NOT_FOUND,
            "Resource not found",
            format!("{entity} not found"),
        ),
        err @ DomainError::Validation { .. } => HttpError::from_error(
            source,
            StatusCode::BAD_REQUEST,
            "Request could not be processed",
            &err,
        ),
        err @ DomainError::Forbidden { .. } => {
            HttpError::from_error(source, StatusCode::FORBIDDEN, "Forbidden", &err)
        }
    }
}

impl From<FeedError> for HttpError {
    fn from(error: FeedError) -> Self {
        const SOURCE: &str = "application::error::feed_error_to_http_error";
        match error {
            FeedError::Domain(err) => domain_error_to_http(SOURCE, err),
            FeedError::Repo(err) => repo_error_to_http(SOURCE, err),
        }
    }
}

impl From<AuthoringError> for HttpError {
    fn from(error: AuthoringError) -> Self {
        const SOURCE: &str = "application::error::authoring_error_to_http_error";
        match error {
            AuthoringError::Domain(err) => domain_error_to_http(SOURCE, err),
            AuthoringError::Repo(err) => repo_error_to_http(SOURCE, err),
            err @ AuthoringError::Storage(_) => HttpError::from_error(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to store uploaded image",
                &err,
            ),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Accounts(#[from] AccountsError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_collects_error_chain() {
        let err = AppError::from(InfraError::from(std::io::Error::other("disk gone")));
        let report = ErrorReport::from_error("tests", StatusCode::INTERNAL_SERVER_ERROR, &err);
        assert_eq!(report.messages.first().map(String::as_str), Some("io error: disk gone"));
    }

    #[test]
    fn feed_not_found_maps_to_404() {
        let err = HttpError::from(FeedError::Domain(DomainError::not_found("group")));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn forbidden_maps_to_403() {
        let err = HttpError::from(AuthoringError::Domain(DomainError::forbidden(
            "leo",
            "edit this post",
        )));
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn duplicate_maps_to_conflict() {
        let err = repo_error_to_http(
            "tests",
            RepoError::Duplicate {
                constraint: "follows_user_author_key".to_string(),
            },
        );
        assert_eq!(err.status(), StatusCode::CONFLICT);
    }
}
