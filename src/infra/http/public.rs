use std::{io::ErrorKind, sync::Arc};

use axum::{
    Extension, Form, Router,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderName, HeaderValue, StatusCode, Uri,
        header::{CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    },
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::Multipart;
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, error};
use url::form_urlencoded;

use crate::{
    application::{
        authoring::{AuthoringError, AuthoringService, FollowOutcome, PostFormOutcome},
        error::HttpError,
        feed::{FeedError, FeedService},
        repos::UsersRepo,
    },
    domain::{entities::UserRecord, error::DomainError},
    infra::{
        cache::PageCache,
        uploads::{UploadStorage, UploadStorageError},
    },
    presentation::views::{ViewContext, render_not_found_response},
};

use super::{
    HealthCheck, db_health_response,
    forms::{CommentInput, read_post_form},
    middleware::{
        Viewer, log_responses, page_cache_layer, require_viewer, resolve_viewer,
        set_request_context,
    },
};

pub const LOGIN_URL: &str = "/auth/login/";

#[derive(Clone)]
pub struct HttpState {
    pub feed: Arc<FeedService>,
    pub authoring: Arc<AuthoringService>,
    pub users: Arc<dyn UsersRepo>,
    pub db: Arc<dyn HealthCheck>,
    pub upload_storage: Arc<UploadStorage>,
    pub cache: Option<PageCache>,
    pub user_header: HeaderName,
    pub upload_limit_bytes: usize,
}

pub fn build_router(state: HttpState) -> Router {
    let index_route = Router::new().route("/", get(index));
    let index_route = match state.cache.clone() {
        Some(cache) => {
            index_route.route_layer(middleware::from_fn_with_state(cache, page_cache_layer))
        }
        None => index_route,
    };

    let authoring_routes = Router::new()
        .route("/create/", get(post_create_form).post(post_create))
        .route("/posts/{post_id}/edit/", get(post_edit_form).post(post_edit))
        .layer(DefaultBodyLimit::max(state.upload_limit_bytes));

    // Anonymous requests are redirected before any body is read.
    let login_routes = Router::new()
        .merge(authoring_routes)
        .route("/profile/{username}/follow/", post(profile_follow))
        .route("/profile/{username}/unfollow/", post(profile_unfollow))
        .route("/posts/{post_id}/comment/", post(add_comment))
        .route("/posts/{post_id}/delete/", post(post_delete))
        .route("/follow/", get(follow_index))
        .route_layer(middleware::from_fn(require_viewer));

    let routes = Router::new()
        .route("/group/{slug}/", get(group_posts))
        .route("/profile/{username}/", get(profile))
        .route("/posts/{post_id}/", get(post_detail))
        .route("/media/{*path}", get(serve_media))
        .route("/_health/db", get(public_health));

    index_route
        .merge(login_routes)
        .merge(routes)
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), resolve_viewer))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PageQuery {
    page: Option<String>,
}

async fn index(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.feed.index(query.page.as_deref()).await {
        Ok(content) => ViewContext::Index(content).render(viewer.0),
        Err(err) => feed_error_to_response(err, viewer),
    }
}

async fn group_posts(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    Path(slug): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.feed.group_posts(&slug, query.page.as_deref()).await {
        Ok(content) => ViewContext::Group(content).render(viewer.0),
        Err(err) => feed_error_to_response(err, viewer),
    }
}

async fn profile(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    Path(username): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state
        .feed
        .profile(&username, query.page.as_deref(), viewer.user())
        .await
    {
        Ok(content) => ViewContext::Profile(content).render(viewer.0),
        Err(err) => feed_error_to_response(err, viewer),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    Path(post_id): Path<String>,
) -> Response {
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(viewer.0);
    };

    match state.feed.post_detail(post_id, viewer.user()).await {
        Ok(content) => ViewContext::PostDetail(content).render(viewer.0),
        Err(err) => feed_error_to_response(err, viewer),
    }
}

async fn follow_index(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Query(query): Query<PageQuery>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    match state.feed.follow_index(user, query.page.as_deref()).await {
        Ok(content) => ViewContext::Follow(content).render(viewer.0),
        Err(err) => feed_error_to_response(err, viewer),
    }
}

async fn post_create_form(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
) -> Response {
    if let Err(redirect) = require_login(&viewer, &uri) {
        return redirect;
    }

    match state.authoring.create_form().await {
        Ok(content) => ViewContext::PostForm(content).render(viewer.0),
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn post_create(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    mut multipart: Multipart,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    let form = match read_post_form(&mut multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };

    match state.authoring.create_post(user, form).await {
        Ok(outcome) => post_form_outcome(&state, outcome, viewer, FormMode::Create).await,
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn post_edit_form(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(post_id): Path<String>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(viewer.0);
    };

    match state.authoring.edit_form(post_id, user).await {
        Ok(outcome) => post_form_outcome(&state, outcome, viewer, FormMode::Edit).await,
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn post_edit(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(post_id): Path<String>,
    mut multipart: Multipart,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(viewer.0);
    };

    let form = match read_post_form(&mut multipart).await {
        Ok(form) => form,
        Err(err) => return err.into_response(),
    };

    match state.authoring.edit_post(post_id, user, form).await {
        Ok(outcome) => post_form_outcome(&state, outcome, viewer, FormMode::Edit).await,
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

/// Creations land on the author's profile, edits on the post itself.
async fn post_form_outcome(
    state: &HttpState,
    outcome: PostFormOutcome,
    viewer: Viewer,
    mode: FormMode,
) -> Response {
    match outcome {
        PostFormOutcome::Render(content) => ViewContext::PostForm(content).render(viewer.0),
        PostFormOutcome::Denied { post_id } => found(&post_path(post_id)),
        PostFormOutcome::Saved(post) => {
            clear_page_cache(state).await;
            match mode {
                FormMode::Create => found(&profile_path(&post.author.username)),
                FormMode::Edit => found(&post_path(post.id)),
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum FormMode {
    Create,
    Edit,
}

async fn post_delete(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(post_id): Path<String>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(viewer.0);
    };

    match state.authoring.delete_post(post_id, user).await {
        Ok(post) => {
            clear_page_cache(&state).await;
            found(&profile_path(&post.author.username))
        }
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn add_comment(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(post_id): Path<String>,
    Form(input): Form<CommentInput>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };
    let Some(post_id) = parse_post_id(&post_id) else {
        return render_not_found_response(viewer.0);
    };

    match state.authoring.add_comment(post_id, user, input.into()).await {
        Ok(comment) => {
            if comment.is_none() {
                debug!(post_id, "discarded invalid comment submission");
            }
            found(&post_path(post_id))
        }
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn profile_follow(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(username): Path<String>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    match state.authoring.follow(user, &username).await {
        Ok(FollowOutcome::Followed(_)) => found(&profile_path(&username)),
        Ok(FollowOutcome::Rejected(errors)) => {
            debug!(
                user = %user.username,
                author = %username,
                errors = ?errors,
                "follow request rejected"
            );
            found(&profile_path(&username))
        }
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn profile_unfollow(
    State(state): State<HttpState>,
    Extension(viewer): Extension<Viewer>,
    uri: Uri,
    Path(username): Path<String>,
) -> Response {
    let user = match require_login(&viewer, &uri) {
        Ok(user) => user,
        Err(redirect) => return redirect,
    };

    match state.authoring.unfollow(user, &username).await {
        Ok(_) => found(&profile_path(&username)),
        Err(err) => authoring_error_to_response(err, viewer),
    }
}

async fn serve_media(State(state): State<HttpState>, Path(path): Path<String>) -> Response {
    const SOURCE: &str = "infra::http::public::serve_media";

    match state.upload_storage.read(&path).await {
        Ok(bytes) => build_media_response(&path, bytes),
        Err(UploadStorageError::InvalidPath) => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "File not found",
            "The requested file is not available",
        )
        .into_response(),
        Err(UploadStorageError::Io(err)) if err.kind() == ErrorKind::NotFound => HttpError::new(
            SOURCE,
            StatusCode::NOT_FOUND,
            "File not found",
            "The requested file is not available",
        )
        .into_response(),
        Err(err) => {
            error!(
                target = SOURCE,
                path = %path,
                error = %err,
                "failed to read stored file"
            );
            HttpError::new(
                SOURCE,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to read stored file",
                err.to_string(),
            )
            .into_response()
        }
    }
}

fn build_media_response(path: &str, bytes: Bytes) -> Response {
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    let length = bytes.len();

    let mut response = Response::new(axum::body::Body::from(bytes));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
        headers.insert(CONTENT_TYPE, value);
    }
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=86400"),
    );
    response
}

async fn public_health(State(state): State<HttpState>) -> Response {
    db_health_response(state.db.health_check().await)
}

async fn fallback(Extension(viewer): Extension<Viewer>) -> Response {
    render_not_found_response(viewer.0)
}

fn feed_error_to_response(err: FeedError, viewer: Viewer) -> Response {
    match err {
        FeedError::Domain(DomainError::NotFound { .. }) => render_not_found_response(viewer.0),
        err => HttpError::from(err).into_response(),
    }
}

fn authoring_error_to_response(err: AuthoringError, viewer: Viewer) -> Response {
    match err {
        AuthoringError::Domain(DomainError::NotFound { .. }) => {
            render_not_found_response(viewer.0)
        }
        err => HttpError::from(err).into_response(),
    }
}

async fn clear_page_cache(state: &HttpState) {
    if let Some(cache) = state.cache.as_ref() {
        cache.clear().await;
    }
}

/// The signed-in user, or a redirect to the login page carrying `next`.
fn require_login<'a>(viewer: &'a Viewer, uri: &Uri) -> Result<&'a UserRecord, Response> {
    viewer.user().ok_or_else(|| login_redirect(uri))
}

pub(super) fn login_redirect(uri: &Uri) -> Response {
    let next = uri
        .path_and_query()
        .map(|value| value.as_str())
        .unwrap_or_else(|| uri.path());
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("next", next)
        .finish();
    found(&format!("{LOGIN_URL}?{query}"))
}

/// A `302 Found` redirect.
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::FOUND, [(LOCATION, value)]).into_response(),
        Err(err) => HttpError::from_error(
            "infra::http::public::found",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to build redirect",
            &err,
        )
        .into_response(),
    }
}

fn parse_post_id(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().filter(|id| *id > 0)
}

fn post_path(post_id: i64) -> String {
    format!("/posts/{post_id}/")
}

fn profile_path(username: &str) -> String {
    let encoded: String = form_urlencoded::byte_serialize(username.as_bytes()).collect();
    format!("/profile/{encoded}/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_redirect_carries_next() {
        let uri: Uri = "/posts/3/edit/".parse().expect("uri");
        let response = require_login(&Viewer::default(), &uri).expect_err("anonymous");
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get(LOCATION).and_then(|v| v.to_str().ok()),
            Some("/auth/login/?next=%2Fposts%2F3%2Fedit%2F")
        );
    }

    #[test]
    fn profile_paths_are_percent_encoded() {
        assert_eq!(profile_path("leo"), "/profile/leo/");
        assert_eq!(profile_path("лев"), "/profile/%D0%BB%D0%B5%D0%B2/");
        assert_eq!(profile_path("a+b@c"), "/profile/a%2Bb%40c/");
    }

    #[test]
    fn post_ids_must_be_positive_integers() {
        assert_eq!(parse_post_id("12"), Some(12));
        assert_eq!(parse_post_id("0"), None);
        assert_eq!(parse_post_id("abc"), None);
    }
}
