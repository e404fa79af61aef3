use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;
use crate::{auth, contacts};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .nest(
            "/api/v1",
            Router::new()
                .merge(auth::router())
                .merge(contacts::router())
                .route("/health", get(|| async { "ok" })),
        )
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::notify::testing::RecordingMailer;

    async fn call(
        app: &Router,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(t) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {t}"));
        }
        let req = match body {
            Some(b) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(b.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    /// Registers, verifies and logs in; returns the bearer token.
    async fn signed_in(app: &Router, mailer: &RecordingMailer, email: &str) -> String {
        let (status, _) = call(
            app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": email, "password": "pw123456", "name": "Alice"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let token = mailer.last_verification_token().unwrap();
        let (status, _) = call(
            app,
            "POST",
            "/api/v1/auth/verify",
            None,
            Some(json!({"token": token})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(
            app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": email, "password": "pw123456"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body["token"].as_str().unwrap().to_string()
    }

    fn app_with_mailer() -> (Router, Arc<RecordingMailer>) {
        let mailer = Arc::new(RecordingMailer::default());
        let app = build_app(AppState::with_mailer(mailer.clone()));
        (app, mailer)
    }

    #[tokio::test]
    async fn health_is_public() {
        let (app, _) = app_with_mailer();
        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_before_verification_is_forbidden() {
        let (app, _) = app_with_mailer();
        call(
            &app,
            "POST",
            "/api/v1/auth/register",
            None,
            Some(json!({"email": "bob@example.com", "password": "pw123456"})),
        )
        .await;
        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": "bob@example.com", "password": "pw123456"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["message"], "Email not verified");
    }

    #[tokio::test]
    async fn contacts_require_a_bearer_token() {
        let (app, _) = app_with_mailer();
        let (status, _) = call(&app, "GET", "/api/v1/contacts", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = call(&app, "GET", "/api/v1/contacts", Some("not-a-jwt"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_the_signed_in_user() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, body) = call(&app, "GET", "/api/v1/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "alice@example.com");
        assert_eq!(body["emailVerified"], true);
        assert!(body.get("passwordHash").is_none());
    }

    #[tokio::test]
    async fn contact_crud_over_http() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, created) = call(
            &app,
            "POST",
            "/api/v1/contacts",
            Some(&token),
            Some(json!({"name": "Ann", "email": "ann@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["timezone"], "UTC");
        let id = created["id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/contacts",
            Some(&token),
            Some(json!({"name": "Ann 2", "email": "ann@x.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, updated) = call(
            &app,
            "PUT",
            &format!("/api/v1/contacts/{id}"),
            Some(&token),
            Some(json!({"name": "Ann B", "email": "ann@x.com", "timezone": "Asia/Tokyo"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["timezone"], "Asia/Tokyo");

        let (status, listed) = call(
            &app,
            "GET",
            "/api/v1/contacts?sortBy=name&sortOrder=asc&pageSize=5",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed["contacts"].as_array().unwrap().len(), 1);
        assert_eq!(listed["pagination"]["pageSize"], 5);
        assert_eq!(listed["pagination"]["totalPages"], 1);

        let (status, _) = call(
            &app,
            "DELETE",
            &format!("/api/v1/contacts/{id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "DELETE",
            &format!("/api/v1/contacts/{id}"),
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn batch_reports_only_created_contacts() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        call(
            &app,
            "POST",
            "/api/v1/contacts",
            Some(&token),
            Some(json!({"name": "Old", "email": "old@x.com"})),
        )
        .await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/contacts/batch",
            Some(&token),
            Some(json!({"contacts": [
                {"name": "Old renamed", "email": "old@x.com"},
                {"name": "New", "email": "new@x.com"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Batch processing completed");
        let created = body["createdContacts"].as_array().unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0]["email"], "new@x.com");

        let (_, listed) = call(&app, "GET", "/api/v1/contacts?name=renamed", Some(&token), None).await;
        assert_eq!(listed["pagination"]["total"], 1);
    }

    #[tokio::test]
    async fn invalid_batch_is_rejected_whole() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/contacts/batch",
            Some(&token),
            Some(json!({"contacts": [
                {"name": "Fine", "email": "fine@x.com"},
                {"name": "", "email": "broken"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].is_array());

        let (_, listed) = call(&app, "GET", "/api/v1/contacts", Some(&token), None).await;
        assert_eq!(listed["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn malformed_batch_body_is_a_json_validation_error() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, body) = call(
            &app,
            "POST",
            "/api/v1/contacts/batch",
            Some(&token),
            Some(json!({"contacts": [
                {"name": "A", "email": "a@x.com"},
                {"name": "B"}
            ]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "Validation error");
        let detail = body["details"][0].as_str().unwrap();
        assert!(detail.contains("contacts[1]"), "{detail}");
        assert!(detail.contains("email"), "{detail}");

        let (_, listed) = call(&app, "GET", "/api/v1/contacts", Some(&token), None).await;
        assert_eq!(listed["pagination"]["total"], 0);
    }

    #[tokio::test]
    async fn bad_query_and_path_values_are_json_validation_errors() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, body) = call(&app, "GET", "/api/v1/contacts?page=abc", Some(&token), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].is_array());

        let (status, body) = call(
            &app,
            "DELETE",
            "/api/v1/contacts/not-a-uuid",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["details"].is_array());
    }

    #[tokio::test]
    async fn huge_page_number_is_rejected() {
        let (app, mailer) = app_with_mailer();
        let token = signed_in(&app, &mailer, "alice@example.com").await;

        let (status, body) = call(
            &app,
            "GET",
            "/api/v1/contacts?page=9223372036854775807&pageSize=100",
            Some(&token),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"][0], "page is out of range");
    }

    #[tokio::test]
    async fn password_reset_over_http() {
        let (app, mailer) = app_with_mailer();
        signed_in(&app, &mailer, "alice@example.com").await;

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/reset-password-request",
            None,
            Some(json!({"email": "alice@example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let code = mailer.last_reset_code().unwrap();

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/reset-password",
            None,
            Some(json!({"email": "alice@example.com", "code": code, "newPassword": "newpass99"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, _) = call(
            &app,
            "POST",
            "/api/v1/auth/login",
            None,
            Some(json!({"email": "alice@example.com", "password": "newpass99"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
}
