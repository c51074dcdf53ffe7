//! Provisioning of users and groups from the command line.

use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::application::repos::{
    CreateGroupParams, CreateUserParams, GroupsRepo, RepoError, UsersRepo,
};
use crate::domain::entities::{GroupRecord, UserRecord};
use crate::domain::slug::{SlugAsyncError, SlugError, generate_unique_slug_async, validate_slug};

const MAX_USERNAME_LENGTH: usize = 150;
const MAX_GROUP_TITLE_LENGTH: usize = 200;

#[derive(Debug, Error)]
pub enum AccountsError {
    #[error("{0}")]
    Invalid(String),
    #[error("username `{0}` is already taken")]
    UsernameTaken(String),
    #[error("group slug `{0}` is already taken")]
    SlugTaken(String),
    #[error(transparent)]
    Slug(#[from] SlugError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<SlugAsyncError<RepoError>> for AccountsError {
    fn from(err: SlugAsyncError<RepoError>) -> Self {
        match err {
            SlugAsyncError::Slug(err) => Self::Slug(err),
            SlugAsyncError::Predicate(err) => Self::Repo(err),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub title: String,
    /// Derived from the title when absent.
    pub slug: Option<String>,
    pub description: String,
}

#[derive(Clone)]
pub struct AccountsService {
    users: Arc<dyn UsersRepo>,
    groups: Arc<dyn GroupsRepo>,
}

impl AccountsService {
    pub fn new(users: Arc<dyn UsersRepo>, groups: Arc<dyn GroupsRepo>) -> Self {
        Self { users, groups }
    }

    pub async fn create_user(&self, input: NewUser) -> Result<UserRecord, AccountsError> {
        let username = input.username.trim().to_string();
        validate_username(&username)?;

        if self.users.find_by_username(&username).await?.is_some() {
            return Err(AccountsError::UsernameTaken(username));
        }

        let user = self
            .users
            .create_user(CreateUserParams {
                username,
                first_name: input.first_name.trim().to_string(),
                last_name: input.last_name.trim().to_string(),
            })
            .await
            .map_err(|err| match err {
                RepoError::Duplicate { .. } => AccountsError::UsernameTaken(input.username),
                other => other.into(),
            })?;

        info!(user_id = user.id, username = %user.username, "user created");
        Ok(user)
    }

    pub async fn create_group(&self, input: NewGroup) -> Result<GroupRecord, AccountsError> {
        let title = input.title.trim().to_string();
        if title.is_empty() {
            return Err(AccountsError::Invalid("group title is required".to_string()));
        }
        if title.chars().count() > MAX_GROUP_TITLE_LENGTH {
            return Err(AccountsError::Invalid(format!(
                "group title must be at most {MAX_GROUP_TITLE_LENGTH} characters"
            )));
        }

        let slug = match input.slug.map(|slug| slug.trim().to_string()) {
            Some(slug) if !slug.is_empty() => {
                validate_slug(&slug)?;
                if self.groups.find_by_slug(&slug).await?.is_some() {
                    return Err(AccountsError::SlugTaken(slug));
                }
                slug
            }
            _ => {
                let groups = self.groups.clone();
                generate_unique_slug_async(&title, move |candidate| {
                    let groups = groups.clone();
                    let candidate = candidate.to_string();
                    async move {
                        let existing = groups.find_by_slug(&candidate).await?;
                        Ok::<_, RepoError>(existing.is_none())
                    }
                })
                .await?
            }
        };

        let group = self
            .groups
            .create_group(CreateGroupParams {
                slug,
                title,
                description: input.description.trim().to_string(),
            })
            .await?;

        info!(group_id = group.id, slug = %group.slug, "group created");
        Ok(group)
    }
}

fn validate_username(username: &str) -> Result<(), AccountsError> {
    if username.is_empty() {
        return Err(AccountsError::Invalid("username is required".to_string()));
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AccountsError::Invalid(format!(
            "username must be at most {MAX_USERNAME_LENGTH} characters"
        )));
    }
    let allowed = |ch: char| ch.is_alphanumeric() || matches!(ch, '@' | '.' | '+' | '-' | '_');
    if !username.chars().all(allowed) {
        return Err(AccountsError::Invalid(
            "username may contain only letters, digits and @/./+/-/_".to_string(),
        ));
    }
    Ok(())
}
