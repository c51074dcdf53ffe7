//! Write side of the site: posts, comments and follow relations.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::forms::{
    CommentForm, DUPLICATE_FOLLOW_MESSAGE, FollowForm, FormErrors, ImageUpload, PostForm,
};
use crate::application::repos::{
    CommentsRepo, CreateCommentParams, CreatePostParams, FollowsRepo, GroupsRepo, PostsRepo,
    PostsWriteRepo, RepoError, UpdatePostParams, UsersRepo,
};
use crate::domain::entities::{CommentRecord, FollowRecord, GroupRecord, PostRecord, UserRecord};
use crate::domain::error::DomainError;
use crate::infra::uploads::{StoredUpload, UploadStorage, UploadStorageError};
use crate::presentation::views::{PostFormContext, PostFormView};

#[derive(Debug, Error)]
pub enum AuthoringError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("failed to store uploaded image")]
    Storage(#[from] UploadStorageError),
}

/// What a post form request resolved to.
#[derive(Debug, Clone, PartialEq)]
pub enum PostFormOutcome {
    /// Show the form, either blank, pre-populated or with errors attached.
    Render(PostFormContext),
    Saved(PostRecord),
    /// The viewer is not the author of the post.
    Denied { post_id: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FollowOutcome {
    Followed(FollowRecord),
    Rejected(FormErrors),
}

#[derive(Clone)]
pub struct AuthoringService {
    users: Arc<dyn UsersRepo>,
    groups: Arc<dyn GroupsRepo>,
    posts: Arc<dyn PostsRepo>,
    writer: Arc<dyn PostsWriteRepo>,
    comments: Arc<dyn CommentsRepo>,
    follows: Arc<dyn FollowsRepo>,
    uploads: Arc<UploadStorage>,
}

impl AuthoringService {
    pub fn new(
        users: Arc<dyn UsersRepo>,
        groups: Arc<dyn GroupsRepo>,
        posts: Arc<dyn PostsRepo>,
        writer: Arc<dyn PostsWriteRepo>,
        comments: Arc<dyn CommentsRepo>,
        follows: Arc<dyn FollowsRepo>,
        uploads: Arc<UploadStorage>,
    ) -> Self {
        Self {
            users,
            groups,
            posts,
            writer,
            comments,
            follows,
            uploads,
        }
    }

    pub async fn create_form(&self) -> Result<PostFormContext, AuthoringError> {
        let groups = self.groups.list_groups().await?;
        Ok(form_context(
            &PostForm::default(),
            &groups,
            None,
            FormErrors::new(),
        ))
    }

    pub async fn edit_form(
        &self,
        post_id: i64,
        viewer: &UserRecord,
    ) -> Result<PostFormOutcome, AuthoringError> {
        let post = self.load_post(post_id).await?;
        if post.author.id != viewer.id {
            return Ok(PostFormOutcome::Denied { post_id });
        }

        let groups = self.groups.list_groups().await?;
        Ok(PostFormOutcome::Render(form_context(
            &PostForm::from_post(&post),
            &groups,
            Some(&post),
            FormErrors::new(),
        )))
    }

    pub async fn create_post(
        &self,
        viewer: &UserRecord,
        form: PostForm,
    ) -> Result<PostFormOutcome, AuthoringError> {
        let groups = self.groups.list_groups().await?;
        let cleaned = match form.validate(&groups) {
            Ok(cleaned) => cleaned,
            Err(errors) => {
                debug!(author = %viewer.username, "rejected invalid post submission");
                return Ok(PostFormOutcome::Render(form_context(
                    &form, &groups, None, errors,
                )));
            }
        };

        let stored = match cleaned.image.as_ref() {
            Some(upload) => Some(self.store_image(upload).await?),
            None => None,
        };

        let created = self
            .writer
            .create_post(CreatePostParams {
                author_id: viewer.id,
                text: cleaned.text,
                group_id: cleaned.group_id,
                image: stored.as_ref().map(|stored| stored.stored_path.clone()),
            })
            .await;
        let post = match created {
            Ok(post) => post,
            Err(err) => {
                self.discard_upload(stored.as_ref()).await;
                return Err(err.into());
            }
        };

        info!(post_id = post.id, author = %viewer.username, "post created");
        Ok(PostFormOutcome::Saved(post))
    }

    /// The stored image is kept unless a new one is uploaded or clearing is requested.
    pub async fn edit_post(
        &self,
        post_id: i64,
        viewer: &UserRecord,
        form: PostForm,
    ) -> Result<PostFormOutcome, AuthoringError> {
        let post = self.load_post(post_id).await?;
        if post.author.id != viewer.id {
            return Ok(PostFormOutcome::Denied { post_id });
        }

        let groups = self.groups.list_groups().await?;
        let cleaned = match form.validate(&groups) {
            Ok(cleaned) => cleaned,
            Err(errors) => {
                return Ok(PostFormOutcome::Render(form_context(
                    &form,
                    &groups,
                    Some(&post),
                    errors,
                )));
            }
        };

        let stored = match cleaned.image.as_ref() {
            Some(upload) => Some(self.store_image(upload).await?),
            None => None,
        };
        let image = match (stored.as_ref(), cleaned.clear_image) {
            (Some(stored), _) => Some(stored.stored_path.clone()),
            (None, true) => None,
            (None, false) => post.image.clone(),
        };

        let result = self
            .writer
            .update_post(UpdatePostParams {
                id: post.id,
                text: cleaned.text,
                group_id: cleaned.group_id,
                image,
            })
            .await;
        let updated = match result {
            Ok(updated) => updated,
            Err(err) => {
                self.discard_upload(stored.as_ref()).await;
                return Err(err.into());
            }
        };

        info!(post_id = updated.id, author = %viewer.username, "post updated");
        Ok(PostFormOutcome::Saved(updated))
    }

    /// Delete a post owned by the viewer and return what was removed.
    pub async fn delete_post(
        &self,
        post_id: i64,
        viewer: &UserRecord,
    ) -> Result<PostRecord, AuthoringError> {
        let post = self.load_post(post_id).await?;
        if post.author.id != viewer.id {
            return Err(DomainError::forbidden(viewer.username.clone(), "delete this post").into());
        }

        self.writer.delete_post(post.id).await?;
        info!(post_id = post.id, author = %viewer.username, "post deleted");
        Ok(post)
    }

    /// Persist a comment; an invalid submission stores nothing and yields `None`.
    pub async fn add_comment(
        &self,
        post_id: i64,
        viewer: &UserRecord,
        form: CommentForm,
    ) -> Result<Option<CommentRecord>, AuthoringError> {
        let post = self.load_post(post_id).await?;
        let text = match form.validate() {
            Ok(text) => text,
            Err(_) => return Ok(None),
        };

        let comment = self
            .comments
            .create_comment(CreateCommentParams {
                post_id: post.id,
                author_id: viewer.id,
                text,
            })
            .await?;
        Ok(Some(comment))
    }

    pub async fn follow(
        &self,
        viewer: &UserRecord,
        username: &str,
    ) -> Result<FollowOutcome, AuthoringError> {
        let author = self.load_user(username).await?;
        let form = FollowForm::new(viewer.id, author.id);

        let (user_id, author_id) = match form.validate() {
            Ok(pair) => pair,
            Err(errors) => return Ok(FollowOutcome::Rejected(errors)),
        };
        let existing = self.follows.find_follow(user_id, author_id).await?;
        if let Err(errors) = form.validate_unique(existing.as_ref()) {
            return Ok(FollowOutcome::Rejected(errors));
        }

        match self.follows.create_follow(user_id, author_id).await {
            Ok(record) => {
                info!(user = %viewer.username, author = %author.username, "follow created");
                Ok(FollowOutcome::Followed(record))
            }
            // Lost a race with a concurrent identical request.
            Err(RepoError::Duplicate { .. }) => {
                let mut errors = FormErrors::new();
                errors.add("author", DUPLICATE_FOLLOW_MESSAGE);
                Ok(FollowOutcome::Rejected(errors))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Returns whether a relation existed.
    pub async fn unfollow(
        &self,
        viewer: &UserRecord,
        username: &str,
    ) -> Result<bool, AuthoringError> {
        let author = self.load_user(username).await?;
        let removed = self.follows.delete_follow(viewer.id, author.id).await?;
        if removed {
            info!(user = %viewer.username, author = %author.username, "follow removed");
        }
        Ok(removed)
    }

    async fn load_post(&self, post_id: i64) -> Result<PostRecord, AuthoringError> {
        self.posts
            .find_by_id(post_id)
            .await?
            .ok_or_else(|| DomainError::not_found("post").into())
    }

    async fn load_user(&self, username: &str) -> Result<UserRecord, AuthoringError> {
        self.users
            .find_by_username(username)
            .await?
            .ok_or_else(|| DomainError::not_found("user").into())
    }

    async fn store_image(&self, upload: &ImageUpload) -> Result<StoredUpload, AuthoringError> {
        Ok(self
            .uploads
            .store_image(&upload.filename, &upload.bytes)
            .await?)
    }

    /// Remove an image written for a post that was never saved. Files that
    /// were already on disk may belong to another post and stay.
    async fn discard_upload(&self, stored: Option<&StoredUpload>) {
        let Some(stored) = stored.filter(|stored| stored.newly_stored) else {
            return;
        };
        if let Err(err) = self.uploads.delete(&stored.stored_path).await {
            warn!(
                stored_path = %stored.stored_path,
                error = %err,
                "failed to remove image of unsaved post"
            );
        }
    }
}

fn form_context(
    form: &PostForm,
    groups: &[GroupRecord],
    post: Option<&PostRecord>,
    errors: FormErrors,
) -> PostFormContext {
    PostFormContext {
        form: PostFormView::new(
            form.text.clone(),
            form.group.clone(),
            groups,
            post.and_then(|post| post.image.as_deref()),
            errors,
        ),
        is_edit: post.is_some(),
        post_id: post.map(|post| post.id),
    }
}
