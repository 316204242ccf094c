//! Handler tests for the connections router.
//!
//! The router is exercised directly with `oneshot`; the session middleware
//! is replaced by inserting `AuthenticatedProfile` into request extensions.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use axum::response::Response;
use common::{FakeProvider, harness};
use domain_connections::*;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

async fn json_body(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn app(h: &common::Harness) -> axum::Router {
    handlers::router(h.service.clone(), CookieSettings::new("/api/auth", true))
}

fn authed(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(AuthenticatedProfile("u1".to_string()))
        .body(Body::empty())
        .unwrap()
}

fn header_str<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
    response.headers().get(name).unwrap().to_str().unwrap()
}

#[tokio::test]
async fn start_requires_a_session() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let request = Request::builder()
        .uri("/fake/start")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(response).await["error"]["type"], "NOT_AUTHENTICATED");
}

#[tokio::test]
async fn start_redirects_and_pins_state_cookie() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let response = app(&h).oneshot(authed("GET", "/fake/start")).await.unwrap();
    assert_eq!(response.status(), StatusCode::FOUND);

    let location = header_str(&response, header::LOCATION);
    let cookie = header_str(&response, header::SET_COOKIE);
    assert!(location.starts_with("https://fake.test/authorize?"));

    let token = cookie
        .strip_prefix("oauth_state=")
        .and_then(|rest| rest.split(';').next())
        .unwrap();
    assert!(location.ends_with(&format!("state={}", token)));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("Secure"));
    assert!(cookie.contains("SameSite=Lax"));
    assert!(cookie.contains("Path=/api/auth/fake/callback"));
    assert!(cookie.contains("Max-Age=600"));
}

#[tokio::test]
async fn start_rejects_unknown_target_platform() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let response = app(&h)
        .oneshot(authed("GET", "/fake/start?targetPlatform=instagram"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"]["type"],
        "INVALID_TARGET_PLATFORM"
    );
}

#[tokio::test]
async fn callback_with_cookie_connects_and_clears_cookie() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);
    let flow = h.service.start_oauth("fake", "u1", None).await.unwrap();

    let request = Request::builder()
        .uri(format!("/fake/callback?code=abc123&state={}", flow.state.token))
        .header(header::COOKIE, format!("theme=dark; oauth_state={}", flow.state.token))
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header_str(&response, header::LOCATION),
        "https://app.test/settings/connections?provider=fake&connected=true"
    );
    assert!(header_str(&response, header::SET_COOKIE).contains("Max-Age=0"));
    assert_eq!(h.repository.len().await, 1);
}

#[tokio::test]
async fn callback_without_cookie_redirects_with_invalid_state() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);
    let flow = h.service.start_oauth("fake", "u1", None).await.unwrap();

    let request = Request::builder()
        .uri(format!("/fake/callback?code=abc123&state={}", flow.state.token))
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(header_str(&response, header::LOCATION).ends_with("error=INVALID_STATE"));
    assert_eq!(h.calls.exchange(), 0);
    assert!(h.repository.is_empty().await);
}

#[tokio::test]
async fn callback_with_provider_error_redirects_with_code() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let request = Request::builder()
        .uri("/fake/callback?error=access_denied&error_description=User+said+no")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    let location = header_str(&response, header::LOCATION);
    assert!(location.contains("error=ACCESS_DENIED"));
    assert!(!location.contains("User"));
}

#[tokio::test]
async fn callback_for_unknown_provider_sets_no_cookie() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let request = Request::builder()
        .uri("/x%3B%20Domain%3Devil.test/callback?error=access_denied")
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
    assert!(header_str(&response, header::LOCATION).contains("error=ACCESS_DENIED"));
}

#[tokio::test]
async fn unparseable_callback_query_still_redirects() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);
    let flow = h.service.start_oauth("fake", "u1", None).await.unwrap();

    let request = Request::builder()
        .uri(format!(
            "/fake/callback?code=abc123&state={0}&state={0}",
            flow.state.token
        ))
        .header(header::COOKIE, format!("oauth_state={}", flow.state.token))
        .body(Body::empty())
        .unwrap();
    let response = app(&h).oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::FOUND);
    assert_eq!(
        header_str(&response, header::LOCATION),
        "https://app.test/settings/connections?provider=fake&error=INVALID_STATE"
    );
    assert!(header_str(&response, header::SET_COOKIE).contains("Max-Age=0"));
    assert_eq!(h.calls.exchange(), 0);
    assert!(h.repository.is_empty().await);
}

#[tokio::test]
async fn status_reports_connection_details() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let before = json_body(app(&h).oneshot(authed("GET", "/fake/status")).await.unwrap()).await;
    assert_eq!(before["connected"], false);
    assert!(before.get("providerAccountId").is_none());

    let (query, cookie) = common::callback_for(&h.service, "fake", "u1", "abc").await;
    assert!(h.service.handle_callback("fake", query, Some(&cookie)).await.success);

    let after = json_body(app(&h).oneshot(authed("GET", "/fake/status")).await.unwrap()).await;
    assert_eq!(after["connected"], true);
    assert_eq!(after["providerAccountId"], "fake-account");
    assert_eq!(after["displayName"], "Jane Fake");
    assert_eq!(after["scopes"], serde_json::json!(["read", "write"]));
    assert!(after["expiresAt"].is_string());
}

#[tokio::test]
async fn unknown_provider_lists_supported_ones() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let response = app(&h)
        .oneshot(authed("GET", "/myspace/status"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = json_body(response).await;
    assert_eq!(body["error"]["type"], "UNKNOWN_PROVIDER");
    assert_eq!(body["error"]["supportedProviders"], serde_json::json!(["fake"]));
}

#[tokio::test]
async fn disconnect_is_idempotent_over_http() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    for method in ["POST", "DELETE"] {
        let response = app(&h)
            .oneshot(authed(method, "/fake/disconnect"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["provider"], "fake");
    }
}

#[tokio::test]
async fn refresh_without_support_requires_reconnect() {
    let h = harness(FakeProvider::new("fake", false), ExpiredConnectionPolicy::RowExists);

    let response = app(&h)
        .oneshot(authed("POST", "/fake/refresh"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["type"], "REFRESH_NOT_SUPPORTED");
}

#[tokio::test]
async fn providers_and_connections_are_listed() {
    let h = harness(FakeProvider::new("fake", true), ExpiredConnectionPolicy::RowExists);
    let (query, cookie) = common::callback_for(&h.service, "fake", "u1", "abc").await;
    assert!(h.service.handle_callback("fake", query, Some(&cookie)).await.success);

    let providers = json_body(app(&h).oneshot(authed("GET", "/providers")).await.unwrap()).await;
    assert_eq!(providers[0]["id"], "fake");
    assert_eq!(providers[0]["supportsRefresh"], true);

    let connections =
        json_body(app(&h).oneshot(authed("GET", "/connections")).await.unwrap()).await;
    assert_eq!(connections.as_array().unwrap().len(), 1);
    assert_eq!(connections[0]["provider"], "fake");
}
