//! Group slug derivation and validation.
//!
//! Titles are transliterated by the `slug` crate, so Cyrillic titles such as
//! “Лев Толстой” become `lev-tolstoi`. Uniqueness is delegated to a caller
//! supplied predicate so the helpers stay independent of persistence.

use std::future::Future;

use slug::slugify;
use thiserror::Error;

/// Longest slug a group may carry.
pub const MAX_SLUG_LENGTH: usize = 50;

const MAX_SUFFIX_ATTEMPTS: usize = 32;

/// Errors that can occur while generating or validating a slug.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlugError {
    #[error("slug source text is empty")]
    EmptyInput,
    #[error("failed to derive slug from `{input}`")]
    Unrepresentable { input: String },
    #[error("slug `{slug}` may only contain letters, numbers, underscores or hyphens")]
    InvalidCharacters { slug: String },
    #[error("slug `{slug}` is longer than {MAX_SLUG_LENGTH} characters")]
    TooLong { slug: String },
    #[error("exhausted attempts to find a unique slug for `{base}`")]
    Exhausted { base: String },
}

/// Errors that can occur while generating a slug via an async uniqueness check.
#[derive(Debug, Error)]
pub enum SlugAsyncError<E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Predicate(E),
}

/// Derive a base slug from the provided human-readable text.
pub fn derive_slug(input: &str) -> Result<String, SlugError> {
    if input.trim().is_empty() {
        return Err(SlugError::EmptyInput);
    }

    let candidate = truncate(slugify(input));
    if candidate.is_empty() {
        return Err(SlugError::Unrepresentable {
            input: input.to_string(),
        });
    }

    Ok(candidate)
}

/// Check an operator supplied slug.
pub fn validate_slug(slug: &str) -> Result<(), SlugError> {
    if slug.is_empty() {
        return Err(SlugError::EmptyInput);
    }
    if slug.chars().count() > MAX_SLUG_LENGTH {
        return Err(SlugError::TooLong {
            slug: slug.to_string(),
        });
    }
    let valid = slug
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_');
    if !valid {
        return Err(SlugError::InvalidCharacters {
            slug: slug.to_string(),
        });
    }
    Ok(())
}

/// Produce a slug that the async predicate reports as unused.
///
/// Collisions are retried with a monotonic suffix (`-2`, `-3`, …) while
/// keeping the result within [`MAX_SLUG_LENGTH`].
pub async fn generate_unique_slug_async<F, Fut, E>(
    input: &str,
    mut is_unique: F,
) -> Result<String, SlugAsyncError<E>>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = Result<bool, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    let base = derive_slug(input)?;

    if is_unique(&base).await.map_err(SlugAsyncError::Predicate)? {
        return Ok(base);
    }

    for attempt in 2..=MAX_SUFFIX_ATTEMPTS + 1 {
        let suffix = format!("-{attempt}");
        let room = MAX_SLUG_LENGTH - suffix.len();
        let stem: String = base.chars().take(room).collect();
        let candidate = format!("{}{suffix}", stem.trim_end_matches('-'));
        if is_unique(&candidate)
            .await
            .map_err(SlugAsyncError::Predicate)?
        {
            return Ok(candidate);
        }
    }

    Err(SlugAsyncError::Slug(SlugError::Exhausted { base }))
}

fn truncate(slug: String) -> String {
    if slug.chars().count() <= MAX_SLUG_LENGTH {
        return slug;
    }
    let cut: String = slug.chars().take(MAX_SLUG_LENGTH).collect();
    cut.trim_end_matches('-').to_string()
}
