use std::time::Instant;

use axum::{
    body::Body,
    extract::State,
    http::{Method, Request, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use metrics::histogram;
use tracing::{debug, error, warn};
use url::form_urlencoded;
use uuid::Uuid;

use crate::application::error::{ErrorReport, repo_error_to_http};
use crate::domain::entities::UserRecord;
use crate::infra::cache::{PageCache, should_store_response};

use super::public::{HttpState, login_redirect};

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

/// The signed-in user for the current request, if any.
#[derive(Clone, Debug, Default)]
pub struct Viewer(pub Option<UserRecord>);

impl Viewer {
    pub fn user(&self) -> Option<&UserRecord> {
        self.0.as_ref()
    }

    pub fn username(&self) -> &str {
        self.0
            .as_ref()
            .map(|user| user.username.as_str())
            .unwrap_or("")
    }
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

/// Resolve the trusted identity header into a [`Viewer`] extension.
///
/// Unknown usernames are treated as anonymous.
pub async fn resolve_viewer(
    State(state): State<HttpState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let username = request
        .headers()
        .get(&state.user_header)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let viewer = match username {
        Some(username) => match state.users.find_by_username(&username).await {
            Ok(user) => {
                if user.is_none() {
                    debug!(username = %username, "identity header names an unknown user");
                }
                Viewer(user)
            }
            Err(err) => {
                return repo_error_to_http("infra::http::middleware::resolve_viewer", err)
                    .into_response();
            }
        },
        None => Viewer::default(),
    };

    request.extensions_mut().insert(viewer.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(viewer);
    response
}

/// Send anonymous visitors to the login page before the handler extracts anything.
pub async fn require_viewer(request: Request<Body>, next: Next) -> Response {
    let signed_in = request
        .extensions()
        .get::<Viewer>()
        .is_some_and(|viewer| viewer.user().is_some());
    if !signed_in {
        return login_redirect(request.uri());
    }

    next.run(request).await
}

/// Serve GET requests from the page cache, keyed by viewer, path and page number.
pub async fn page_cache_layer(
    State(cache): State<PageCache>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.method() != Method::GET {
        return next.run(request).await;
    }

    let viewer = request
        .extensions()
        .get::<Viewer>()
        .map(|viewer| viewer.username().to_string())
        .unwrap_or_default();
    let key = page_cache_key(&viewer, request.uri());

    if let Some(cached) = cache.get(&key).await {
        debug!(cache = "page", outcome = "hit", key = %key, "serving cached page");
        return cached;
    }

    let response = next.run(request).await;
    if !should_store_response(&response) {
        return response;
    }

    match cache.store_response(&key, response).await {
        Ok(response) => response,
        Err((response, err)) => {
            warn!(key = %key, error = %err, "failed to cache page");
            response
        }
    }
}

/// Only the `page` parameter changes what a listing renders, so other query
/// parameters are left out of the key.
fn page_cache_key(viewer: &str, uri: &Uri) -> String {
    let page = uri
        .query()
        .and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(name, _)| name == "page")
                .map(|(_, value)| value.trim().to_string())
        })
        .unwrap_or_default();
    format!("{viewer}|{}?page={page}", uri.path())
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();
    let mut response = next.run(request).await;
    let status = response.status();
    let viewer = response
        .extensions()
        .get::<Viewer>()
        .map(|viewer| viewer.username().to_string())
        .unwrap_or_default();
    let elapsed_ms = start.elapsed().as_millis();
    histogram!(
        "yatube_http_request_ms",
        "status" => status_class(status.as_u16())
    )
    .record(elapsed_ms as f64);

    if status.is_client_error() || status.is_server_error() {
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "yatube::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                viewer = viewer,
                "request failed",
            );
        } else {
            warn!(
                target = "yatube::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                viewer = viewer,
                "client request error",
            );
        }
    }

    response
}

fn status_class(status: u16) -> &'static str {
    match status {
        100..=199 => "1xx",
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}
