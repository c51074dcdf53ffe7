//! Decoding of submitted HTML forms into application form values.

use axum::http::StatusCode;
use axum_extra::extract::Multipart;
use serde::Deserialize;
use tracing::error;

use crate::application::error::HttpError;
use crate::application::forms::{CommentForm, ImageUpload, PostForm};

const SOURCE: &str = "infra::http::forms::read_post_form";

/// Read the `text`, `group`, `image` and `image-clear` fields of a post form.
///
/// Unknown fields are ignored; a file input left empty yields no upload.
pub(super) async fn read_post_form(multipart: &mut Multipart) -> Result<PostForm, HttpError> {
    let mut form = PostForm::default();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                let status = err.status();
                error!(
                    target = SOURCE,
                    status = status.as_u16(),
                    error = %err,
                    "failed to read multipart payload"
                );
                let public_message = match status {
                    StatusCode::PAYLOAD_TOO_LARGE => "Uploaded file is too large",
                    _ => "Invalid form submission",
                };
                return Err(HttpError::new(
                    SOURCE,
                    status,
                    public_message,
                    err.to_string(),
                ));
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => form.text = read_text(field).await?,
            "group" => {
                let value = read_text(field).await?;
                form.group = Some(value).filter(|value| !value.trim().is_empty());
            }
            "image-clear" => {
                let value = read_text(field).await?.trim().to_ascii_lowercase();
                form.clear_image = matches!(value.as_str(), "on" | "true" | "1" | "yes");
            }
            "image" => {
                let filename = field
                    .file_name()
                    .map(|value| value.to_string())
                    .filter(|value| !value.trim().is_empty());
                let content_type = field
                    .content_type()
                    .map(|mime| mime.to_string())
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                let bytes = field.bytes().await.map_err(|err| {
                    HttpError::new(
                        SOURCE,
                        err.status(),
                        "Invalid form submission",
                        err.to_string(),
                    )
                })?;

                form.image = match filename {
                    Some(filename) if !bytes.is_empty() => Some(ImageUpload {
                        filename,
                        content_type,
                        bytes,
                    }),
                    _ => None,
                };
            }
            _ => {}
        }
    }

    Ok(form)
}

async fn read_text(field: axum_extra::extract::multipart::Field) -> Result<String, HttpError> {
    field.text().await.map_err(|err| {
        HttpError::new(
            SOURCE,
            err.status(),
            "Invalid form submission",
            err.to_string(),
        )
    })
}

/// URL-encoded comment submission.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct CommentInput {
    text: String,
}

impl From<CommentInput> for CommentForm {
    fn from(input: CommentInput) -> Self {
        CommentForm { text: input.text }
    }
}
