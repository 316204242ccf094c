use axum::{
    Json, Router,
    extract::{FromRequestParts, Path, Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderValue, StatusCode, header, request::Parts},
    response::{AppendHeaders, IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{ConnectionError, ConnectionResult};
use crate::models::{CallbackQuery, ConnectionStatus, DisconnectResponse, ProviderSummary};
use crate::repository::ConnectionRepository;
use crate::service::ConnectionService;
use crate::state::STATE_COOKIE_NAME;

/// Profile id of the signed-in caller.
///
/// Inserted into request extensions by the app's session middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedProfile(pub String);

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedProfile {
    type Rejection = ConnectionError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedProfile>()
            .filter(|profile| !profile.0.is_empty())
            .cloned()
            .ok_or(ConnectionError::NotAuthenticated)
    }
}

/// Attributes of the state cookie.
#[derive(Debug, Clone)]
pub struct CookieSettings {
    /// Public path the router is mounted under, e.g. `/api/auth`.
    pub path_prefix: String,
    pub secure: bool,
}

impl CookieSettings {
    pub fn new(path_prefix: impl Into<String>, secure: bool) -> Self {
        Self {
            path_prefix: path_prefix.into().trim_end_matches('/').to_string(),
            secure,
        }
    }

    fn callback_path(&self, provider: &str) -> String {
        format!("{}/{}/callback", self.path_prefix, provider)
    }

    fn state_cookie(&self, provider: &str, value: &str, max_age: i64) -> String {
        let secure_flag = if self.secure { " Secure;" } else { "" };
        format!(
            "{}={}; HttpOnly;{} SameSite=Lax; Path={}; Max-Age={}",
            STATE_COOKIE_NAME,
            value,
            secure_flag,
            self.callback_path(provider),
            max_age
        )
    }
}

struct HandlerState<R: ConnectionRepository> {
    service: ConnectionService<R>,
    cookies: CookieSettings,
}

type SharedState<R> = Arc<HandlerState<R>>;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartQuery {
    #[serde(alias = "target_platform")]
    pub target_platform: Option<String>,
}

/// Connection routes, meant to be nested under the cookie path prefix.
///
/// Everything except the callback expects an [`AuthenticatedProfile`].
pub fn router<R: ConnectionRepository + 'static>(
    service: ConnectionService<R>,
    cookies: CookieSettings,
) -> Router {
    let state = Arc::new(HandlerState { service, cookies });

    Router::new()
        .route("/providers", get(list_providers::<R>))
        .route("/connections", get(list_connections::<R>))
        .route("/{provider}/start", get(start::<R>))
        .route("/{provider}/callback", get(callback::<R>))
        .route("/{provider}/status", get(status::<R>))
        .route(
            "/{provider}/disconnect",
            post(disconnect::<R>).delete(disconnect::<R>),
        )
        .route("/{provider}/refresh", post(refresh::<R>))
        .with_state(state)
}

async fn list_providers<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
) -> Json<Vec<ProviderSummary>> {
    Json(state.service.list_providers())
}

async fn list_connections<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    profile: AuthenticatedProfile,
) -> ConnectionResult<Json<Vec<ConnectionStatus>>> {
    Ok(Json(state.service.list_connections(&profile.0).await?))
}

/// Redirect to the provider's consent page and pin the state cookie.
async fn start<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    Path(provider): Path<String>,
    profile: AuthenticatedProfile,
    Query(query): Query<StartQuery>,
) -> ConnectionResult<Response> {
    let flow = state
        .service
        .start_oauth(&provider, &profile.0, query.target_platform.as_deref())
        .await?;

    let max_age = state.service.states().ttl().num_seconds();
    let cookie = state
        .cookies
        .state_cookie(&provider, &flow.state.token, max_age);

    Ok((
        AppendHeaders([
            (header::SET_COOKIE, header_value(&cookie)?),
            (header::LOCATION, header_value(&flow.auth_url)?),
            (header::CACHE_CONTROL, HeaderValue::from_static("no-store")),
        ]),
        StatusCode::FOUND,
    )
        .into_response())
}

/// Provider redirect target. Always answers with a redirect; the state
/// cookie is cleared for registered providers only.
async fn callback<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    query: Result<Query<CallbackQuery>, QueryRejection>,
) -> ConnectionResult<Response> {
    let outcome = match query {
        Ok(Query(query)) => {
            let cookie_state = headers
                .get(header::COOKIE)
                .and_then(|v| v.to_str().ok())
                .and_then(|cookies| extract_cookie_value(cookies, STATE_COOKIE_NAME));

            state
                .service
                .handle_callback(&provider, query, cookie_state.as_deref())
                .await
        }
        Err(rejection) => state
            .service
            .reject_malformed_callback(&provider, &rejection.body_text()),
    };

    let mut response_headers = HeaderMap::new();
    if state.service.registry().is_registered(&provider) {
        let cleared = state.cookies.state_cookie(&provider, "", 0);
        response_headers.insert(header::SET_COOKIE, header_value(&cleared)?);
    }
    response_headers.insert(header::LOCATION, header_value(&outcome.redirect_url)?);
    response_headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));

    Ok((StatusCode::FOUND, response_headers).into_response())
}

async fn status<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    Path(provider): Path<String>,
    profile: AuthenticatedProfile,
) -> ConnectionResult<Json<ConnectionStatus>> {
    Ok(Json(
        state
            .service
            .get_connection_status(&provider, &profile.0)
            .await?,
    ))
}

async fn disconnect<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    Path(provider): Path<String>,
    profile: AuthenticatedProfile,
) -> ConnectionResult<Json<DisconnectResponse>> {
    state
        .service
        .disconnect_provider(&provider, &profile.0)
        .await?;

    Ok(Json(DisconnectResponse {
        success: true,
        provider,
    }))
}

async fn refresh<R: ConnectionRepository>(
    State(state): State<SharedState<R>>,
    Path(provider): Path<String>,
    profile: AuthenticatedProfile,
) -> ConnectionResult<Json<ConnectionStatus>> {
    Ok(Json(
        state
            .service
            .refresh_connection(&provider, &profile.0)
            .await?,
    ))
}

fn header_value(value: &str) -> ConnectionResult<HeaderValue> {
    HeaderValue::from_str(value)
        .map_err(|e| ConnectionError::Internal(format!("Invalid header value: {}", e)))
}

fn extract_cookie_value(cookies: &str, name: &str) -> Option<String> {
    cookies.split(';').find_map(|cookie| {
        let (key, value) = cookie.trim().split_once('=')?;
        (key == name && !value.is_empty()).then(|| value.to_string())
    })
}
