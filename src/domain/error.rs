use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain entity `{entity}` not found")]
    NotFound { entity: &'static str },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("`{actor}` may not {action}")]
    Forbidden {
        actor: String,
        action: &'static str,
    },
}

impl DomainError {
    pub fn not_found(entity: &'static str) -> Self {
        Self::NotFound { entity }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn forbidden(actor: impl Into<String>, action: &'static str) -> Self {
        Self::Forbidden {
            actor: actor.into(),
            action,
        }
    }
}
