//! Validation of submitted post, comment and follow forms.
//!
//! Each form keeps the raw submitted values so an invalid submission can be
//! rendered again with its input intact. Validation collects every field
//! error into [`FormErrors`] instead of stopping at the first one.

use std::collections::BTreeMap;

use bytes::Bytes;
use thiserror::Error;

use crate::domain::entities::{FollowRecord, GroupRecord, PostRecord};
use crate::domain::posts::has_content;

pub const REQUIRED_MESSAGE: &str = "This field is required.";
pub const EMPTY_TEXT_MESSAGE: &str = "Post text must not be empty.";
pub const INVALID_GROUP_MESSAGE: &str =
    "Select a valid choice. That choice is not one of the available choices.";
pub const INVALID_IMAGE_MESSAGE: &str =
    "Upload a valid image. The file you uploaded was either not an image or a corrupted image.";
pub const SELF_FOLLOW_MESSAGE: &str = "You cannot follow yourself.";
pub const DUPLICATE_FOLLOW_MESSAGE: &str = "You already follow this author.";

/// A single field-level validation failure.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ValidationError {
    pub message: &'static str,
}

impl ValidationError {
    pub const fn new(message: &'static str) -> Self {
        Self { message }
    }
}

/// Field-level errors keyed by field name, in a stable order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormErrors {
    fields: BTreeMap<&'static str, Vec<String>>,
}

impl FormErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.fields.entry(field).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn has(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn get(&self, field: &str) -> &[String] {
        self.fields.get(field).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &[String])> + '_ {
        self.fields
            .iter()
            .map(|(field, messages)| (*field, messages.as_slice()))
    }

    fn into_result<T>(self, value: T) -> Result<T, FormErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

/// An uploaded file as received from a multipart submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub filename: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Raw post form submission: fields `text`, `group`, `image`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PostForm {
    pub text: String,
    /// Selected group id as submitted; empty means "no group".
    pub group: Option<String>,
    pub image: Option<ImageUpload>,
    /// Drop the currently attached image when no new one is uploaded.
    pub clear_image: bool,
}

/// Post form values after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanedPost {
    pub text: String,
    pub group_id: Option<i64>,
    pub image: Option<ImageUpload>,
    pub clear_image: bool,
}

impl PostForm {
    /// Form pre-populated from an existing post, as shown on the edit page.
    pub fn from_post(post: &PostRecord) -> Self {
        Self {
            text: post.text.clone(),
            group: post.group.as_ref().map(|group| group.id.to_string()),
            image: None,
            clear_image: false,
        }
    }

    /// Reject text that is empty once trimmed and lowercased.
    pub fn clean_text(text: &str) -> Result<String, ValidationError> {
        if !has_content(text) {
            return Err(ValidationError::new(EMPTY_TEXT_MESSAGE));
        }
        Ok(text.to_string())
    }

    /// Resolve the submitted group choice against the known groups.
    pub fn clean_group(
        raw: Option<&str>,
        groups: &[GroupRecord],
    ) -> Result<Option<i64>, ValidationError> {
        let Some(raw) = raw.map(str::trim).filter(|value| !value.is_empty()) else {
            return Ok(None);
        };

        let id = raw
            .parse::<i64>()
            .map_err(|_| ValidationError::new(INVALID_GROUP_MESSAGE))?;
        if groups.iter().any(|group| group.id == id) {
            Ok(Some(id))
        } else {
            Err(ValidationError::new(INVALID_GROUP_MESSAGE))
        }
    }

    /// Accept only payloads that decode as an image; an empty upload counts as none.
    pub fn clean_image(
        upload: Option<&ImageUpload>,
    ) -> Result<Option<ImageUpload>, ValidationError> {
        let Some(upload) = upload.filter(|upload| !upload.bytes.is_empty()) else {
            return Ok(None);
        };

        match imagesize::blob_size(&upload.bytes) {
            Ok(size) if size.width > 0 && size.height > 0 => Ok(Some(upload.clone())),
            _ => Err(ValidationError::new(INVALID_IMAGE_MESSAGE)),
        }
    }

    pub fn validate(&self, groups: &[GroupRecord]) -> Result<CleanedPost, FormErrors> {
        let mut errors = FormErrors::new();

        let text = Self::clean_text(&self.text)
            .map_err(|err| errors.add("text", err.message))
            .ok();
        let group_id = Self::clean_group(self.group.as_deref(), groups)
            .map_err(|err| errors.add("group", err.message))
            .ok()
            .flatten();
        let image = Self::clean_image(self.image.as_ref())
            .map_err(|err| errors.add("image", err.message))
            .ok()
            .flatten();

        errors.into_result(CleanedPost {
            text: text.unwrap_or_default(),
            group_id,
            image,
            clear_image: self.clear_image,
        })
    }
}

/// Raw comment submission: field `text`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommentForm {
    pub text: String,
}

impl CommentForm {
    pub fn validate(&self) -> Result<String, FormErrors> {
        let mut errors = FormErrors::new();
        if self.text.trim().is_empty() {
            errors.add("text", REQUIRED_MESSAGE);
        }
        errors.into_result(self.text.trim().to_string())
    }
}

/// Follow request: fields `user` (follower) and `author` (followed).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FollowForm {
    pub user: Option<i64>,
    pub author: Option<i64>,
}

impl FollowForm {
    pub fn new(user: i64, author: i64) -> Self {
        Self {
            user: Some(user),
            author: Some(author),
        }
    }

    /// Field checks: both ends present and distinct.
    pub fn validate(&self) -> Result<(i64, i64), FormErrors> {
        let mut errors = FormErrors::new();
        if self.user.is_none() {
            errors.add("user", REQUIRED_MESSAGE);
        }
        if self.author.is_none() {
            errors.add("author", REQUIRED_MESSAGE);
        }

        match (self.user, self.author) {
            (Some(user), Some(author)) if user == author => {
                errors.add("author", SELF_FOLLOW_MESSAGE);
                Err(errors)
            }
            (Some(user), Some(author)) => errors.into_result((user, author)),
            _ => Err(errors),
        }
    }

    /// Uniqueness of the (user, author) pair given the stored relation, if any.
    pub fn validate_unique(&self, existing: Option<&FollowRecord>) -> Result<(), FormErrors> {
        let mut errors = FormErrors::new();
        if existing.is_some() {
            errors.add("author", DUPLICATE_FOLLOW_MESSAGE);
        }
        errors.into_result(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1x1 GIF.
    const SMALL_GIF: &[u8] = &[
        0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x02, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
        0x00, 0xFF, 0xFF, 0xFF, 0x21, 0xF9, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x2C, 0x00, 0x00,
        0x00, 0x00, 0x02, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x0C, 0x0A, 0x00, 0x3B,
    ];

    fn group(id: i64) -> GroupRecord {
        GroupRecord {
            id,
            slug: format!("group-{id}"),
            title: format!("Group {id}"),
            description: String::new(),
        }
    }

    fn upload(bytes: &'static [u8]) -> ImageUpload {
        ImageUpload {
            filename: "small.gif".to_string(),
            content_type: "image/gif".to_string(),
            bytes: Bytes::from_static(bytes),
        }
    }

    #[test]
    fn clean_text_rejects_blank_input_only() {
        for blank in ["", " ", "\n\t  "] {
            assert_eq!(
                PostForm::clean_text(blank),
                Err(ValidationError::new(EMPTY_TEXT_MESSAGE)),
                "{blank:?} should be rejected"
            );
        }
        for text in ["a", "  padded  ", "Тестовый текст"] {
            assert_eq!(PostForm::clean_text(text).as_deref(), Ok(text));
        }
    }

    #[test]
    fn clean_group_accepts_known_ids_and_blank() {
        let groups = [group(1), group(2)];
        assert_eq!(PostForm::clean_group(None, &groups), Ok(None));
        assert_eq!(PostForm::clean_group(Some(""), &groups), Ok(None));
        assert_eq!(PostForm::clean_group(Some("2"), &groups), Ok(Some(2)));
        assert!(PostForm::clean_group(Some("3"), &groups).is_err());
        assert!(PostForm::clean_group(Some("two"), &groups).is_err());
    }

    #[test]
    fn clean_image_validates_payload() {
        assert_eq!(
            PostForm::clean_image(Some(&upload(SMALL_GIF))),
            Ok(Some(upload(SMALL_GIF)))
        );
        assert_eq!(PostForm::clean_image(Some(&upload(b""))), Ok(None));
        assert_eq!(
            PostForm::clean_image(Some(&upload(b"definitely not an image"))),
            Err(ValidationError::new(INVALID_IMAGE_MESSAGE))
        );
    }

    #[test]
    fn validate_collects_every_field_error() {
        let form = PostForm {
            text: "   ".to_string(),
            group: Some("42".to_string()),
            image: Some(upload(b"junk")),
            clear_image: false,
        };

        let errors = form.validate(&[group(1)]).expect_err("invalid form");
        assert_eq!(errors.get("text"), [EMPTY_TEXT_MESSAGE.to_string()]);
        assert_eq!(errors.get("group"), [INVALID_GROUP_MESSAGE.to_string()]);
        assert_eq!(errors.get("image"), [INVALID_IMAGE_MESSAGE.to_string()]);
    }

    #[test]
    fn validate_returns_cleaned_values() {
        let form = PostForm {
            text: "hello".to_string(),
            group: Some("1".to_string()),
            image: Some(upload(SMALL_GIF)),
            clear_image: false,
        };

        let cleaned = form.validate(&[group(1)]).expect("valid form");
        assert_eq!(cleaned.text, "hello");
        assert_eq!(cleaned.group_id, Some(1));
        assert!(cleaned.image.is_some());
    }

    #[test]
    fn comment_form_requires_text() {
        let errors = CommentForm {
            text: "  ".to_string(),
        }
        .validate()
        .expect_err("blank comment");
        assert!(errors.has("text"));

        let text = CommentForm {
            text: " nice post ".to_string(),
        }
        .validate()
        .expect("valid comment");
        assert_eq!(text, "nice post");
    }

    #[test]
    fn follow_form_rejects_self_and_missing_fields() {
        assert_eq!(FollowForm::new(1, 2).validate(), Ok((1, 2)));

        let errors = FollowForm::new(3, 3).validate().expect_err("self follow");
        assert_eq!(errors.get("author"), [SELF_FOLLOW_MESSAGE.to_string()]);

        let errors = FollowForm::default().validate().expect_err("empty form");
        assert!(errors.has("user"));
        assert!(errors.has("author"));
    }

    #[test]
    fn follow_form_rejects_duplicates() {
        let form = FollowForm::new(1, 2);
        let existing = FollowRecord {
            id: 7,
            user_id: 1,
            author_id: 2,
        };
        assert!(form.validate_unique(None).is_ok());
        let errors = form
            .validate_unique(Some(&existing))
            .expect_err("duplicate follow");
        assert_eq!(errors.get("author"), [DUPLICATE_FOLLOW_MESSAGE.to_string()]);
    }
}
