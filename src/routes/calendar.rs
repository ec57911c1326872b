/// Calendar Routes
/// HTTP surface for the Google Calendar OAuth flow, integrations, and
/// appointments. Every endpoint requires an authenticated caller except the
/// OAuth callback, which Google reaches by browser navigation and which must
/// therefore always end in a redirect, never a JSON error.
use crate::error::{AppError, AppResult};
use crate::models::{
    AppointmentStatus, CalendarIntegrationResponse, CreateAppointmentRequest, UpdateStatusRequest,
};
use crate::services::calendar::NewAppointment;
use crate::services::OAuthStateData;
use crate::utils::auth::AuthenticatedUser;
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};
use validator::Validate;

pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/google/auth-url", get(google_auth_url))
        .route("/google/callback", get(google_callback))
        .route("/appointments", post(create_appointment))
        .route("/appointments/upcoming", get(upcoming_appointments))
        .route("/appointments/:id/status", patch(update_appointment_status))
        .route("/status", get(integration_status))
        .route("/integrations", get(list_integrations))
        .route("/integrations/:id", delete(delete_integration))
}

#[derive(Debug, Deserialize)]
struct AuthUrlQuery {
    return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UpcomingQuery {
    limit: Option<i64>,
}

async fn google_auth_url(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<AuthUrlQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let auth_url = state.calendar.auth_url(user.user_id, query.return_to)?;

    Ok(Json(json!({ "authUrl": auth_url })))
}

/// 302 redirect helper for the browser-facing callback
fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

async fn google_callback(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    // Pull the return path out of the state parameter even when the rest of
    // the request is unusable, so the browser never dead-ends here
    let default_return = {
        let config = state.config.read().await;
        config.default_return_path.clone()
    };
    let return_to = query
        .state
        .as_deref()
        .and_then(OAuthStateData::decode)
        .and_then(|s| s.return_to)
        .unwrap_or(default_return);

    let (code, oauth_state) = match (query.code, query.state) {
        (Some(code), Some(oauth_state)) => (code, oauth_state),
        _ => {
            warn!("OAuth callback missing code or state parameter");
            return found(format!("{}?error=true", return_to));
        }
    };

    match state.calendar.process_callback(&code, &oauth_state).await {
        Ok((user_id, email)) => {
            tracing::info!(
                "Calendar connected via OAuth callback for user {} ({})",
                user_id,
                email
            );
            found(format!("{}?success=true", return_to))
        }
        Err(e) => {
            error!("Error processing OAuth callback: {}", e);
            found(format!("{}?error=true", return_to))
        }
    }
}

async fn create_appointment(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(body): Json<serde_json::Value>,
) -> AppResult<(StatusCode, Json<serde_json::Value>)> {
    let payload: CreateAppointmentRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid input: {}", e)))?;

    payload
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    if payload.end_time <= payload.start_time {
        return Err(AppError::Validation(
            "startTime must be before endTime".to_string(),
        ));
    }

    let appointment_id = state
        .calendar
        .create_appointment(
            user.user_id,
            NewAppointment {
                agent_id: payload.agent_id,
                calendar_integration_id: payload.calendar_integration_id,
                title: payload.title,
                description: payload.description,
                start_time: payload.start_time,
                end_time: payload.end_time,
                lead_id: payload.lead_id,
                attendees: payload.attendees.unwrap_or_default(),
                location: payload.location,
                meeting_link: payload.meeting_link,
                notes: payload.notes,
                call_sid: payload.call_sid,
            },
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "appointmentId": appointment_id })),
    ))
}

async fn upcoming_appointments(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Query(query): Query<UpcomingQuery>,
) -> AppResult<Json<serde_json::Value>> {
    let limit = query.limit.unwrap_or(10).max(1);
    let appointments = state
        .calendar
        .upcoming_appointments(user.user_id, limit)
        .await?;

    Ok(Json(json!({ "appointments": appointments })))
}

async fn update_appointment_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(appointment_id): Path<i64>,
    Json(body): Json<serde_json::Value>,
) -> AppResult<Json<serde_json::Value>> {
    let payload: UpdateStatusRequest = serde_json::from_value(body)
        .map_err(|e| AppError::BadRequest(format!("Invalid input: {}", e)))?;

    let status = AppointmentStatus::parse(&payload.status)
        .ok_or_else(|| AppError::BadRequest("Invalid status".to_string()))?;

    state
        .calendar
        .update_appointment_status(appointment_id, user.user_id, status)
        .await?;

    Ok(Json(json!({ "success": true })))
}

async fn integration_status(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> AppResult<Json<serde_json::Value>> {
    let has_integration = state.calendar.has_integration(user.user_id).await?;

    Ok(Json(json!({ "hasIntegration": has_integration })))
}

async fn list_integrations(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> AppResult<Json<serde_json::Value>> {
    let integrations = state.calendar.list_integrations(user.user_id).await?;

    // Tokens stay inside the service boundary
    let safe: Vec<CalendarIntegrationResponse> = integrations
        .into_iter()
        .map(CalendarIntegrationResponse::from)
        .collect();

    Ok(Json(json!({ "integrations": safe })))
}

async fn delete_integration(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Path(integration_id): Path<i64>,
) -> AppResult<Json<serde_json::Value>> {
    let success = state
        .calendar
        .deactivate_integration(integration_id, user.user_id)
        .await?;

    Ok(Json(json!({ "success": success })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::create_app;
    use crate::db::Database;
    use crate::services::google::GoogleConfig;
    use crate::services::{CalendarService, GoogleCalendarClient};
    use crate::utils::auth::create_jwt;
    use axum::body::Body;
    use axum::http::Request;
    use libsql::params;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_SECRET: &str = "test-secret";

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".to_string(),
            port: 0,
            database_url: ":memory:".to_string(),
            public_base_url: "http://localhost:8080".to_string(),
            jwt_secret: TEST_SECRET.to_string(),
            session_expiry_seconds: 3600,
            google_client_id: "client-id".to_string(),
            google_client_secret: "client-secret".to_string(),
            default_return_path: "/settings/calendar".to_string(),
        }
    }

    fn google_config(base: &str) -> GoogleConfig {
        GoogleConfig {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            redirect_uri: "http://localhost:8080/api/calendar/google/callback".to_string(),
            authorize_url: format!("{}/auth", base),
            token_url: format!("{}/token", base),
            userinfo_url: format!("{}/userinfo", base),
            calendar_api_base: format!("{}/calendar/v3", base),
            scopes: vec!["https://www.googleapis.com/auth/calendar".to_string()],
        }
    }

    async fn test_state(google_base: &str) -> Arc<AppState> {
        let db = Database::new(":memory:").await.unwrap();
        db.run_migrations().await.unwrap();
        let google = GoogleCalendarClient::new(google_config(google_base), reqwest::Client::new());
        let calendar = Arc::new(CalendarService::new(db.clone(), google));

        Arc::new(AppState {
            db,
            config: Arc::new(RwLock::new(test_config())),
            calendar,
        })
    }

    async fn seed_user(state: &AppState, email: &str) -> i64 {
        let conn = state.db.pool();
        let conn = conn.lock().await;
        conn.execute(
            "INSERT INTO users (name, email, created_at, updated_at) VALUES (?, ?, 0, 0)",
            params!["Test User", email],
        )
        .await
        .unwrap();
        conn.last_insert_rowid()
    }

    async fn seed_integration(state: &AppState, user_id: i64, token_expiry: i64) -> i64 {
        let conn = state.db.pool();
        let conn = conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO calendar_integration (
                user_id, provider, access_token, refresh_token, token_expiry,
                calendar_id, email, display_name, is_active, created_at, updated_at
            )
            VALUES (?, 'google', 'good-token', 'r1', ?, 'primary-cal', 'cal@example.com',
                    'Work', 1, 0, 0)
            "#,
            params![user_id, token_expiry],
        )
        .await
        .unwrap();
        conn.last_insert_rowid()
    }

    fn bearer(user_id: i64) -> String {
        format!(
            "Bearer {}",
            create_jwt(user_id, TEST_SECRET, 3600).unwrap()
        )
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn future_expiry() -> i64 {
        crate::utils::time::current_timestamp_seconds() + 3600
    }

    #[tokio::test]
    async fn test_endpoints_require_authentication() {
        let state = test_state("http://127.0.0.1:1").await;
        let app = create_app(state);

        for uri in [
            "/api/calendar/google/auth-url",
            "/api/calendar/appointments/upcoming",
            "/api/calendar/status",
            "/api/calendar/integrations",
        ] {
            let response = app
                .clone()
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_auth_url_embeds_user_state() {
        let state = test_state("http://127.0.0.1:1").await;
        let user_id = seed_user(&state, "a@example.com").await;
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/google/auth-url?return_to=/dashboard")
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let auth_url = body["authUrl"].as_str().unwrap();
        assert!(auth_url.contains("access_type=offline"));
        assert!(auth_url.contains("prompt=consent"));
        assert!(auth_url.contains(&format!("%22userId%22%3A{}", user_id)));
        assert!(auth_url.contains("returnTo"));
    }

    #[tokio::test]
    async fn test_callback_redirects_on_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "access-1",
                "refresh_token": "refresh-1",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/calendar/v3/users/me/calendarList"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "items": [{"id": "primary-cal", "summary": "My Calendar", "primary": true}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/userinfo"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"email": "cal@example.com"})),
            )
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let user_id = seed_user(&state, "a@example.com").await;
        let calendar = state.calendar.clone();
        let app = create_app(state);

        let oauth_state = json!({"userId": user_id}).to_string();
        let uri = format!(
            "/api/calendar/google/callback?code=c1&state={}",
            urlencoding::encode(&oauth_state)
        );

        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/settings/calendar?success=true"
        );

        let integrations = calendar.list_integrations(user_id).await.unwrap();
        assert_eq!(integrations.len(), 1);
        assert!(integrations[0].is_active);
    }

    #[tokio::test]
    async fn test_callback_redirects_on_failure_with_return_path() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "boom"})))
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let user_id = seed_user(&state, "a@example.com").await;
        let app = create_app(state);

        let oauth_state = json!({"userId": user_id, "returnTo": "/dashboard"}).to_string();
        let uri = format!(
            "/api/calendar/google/callback?code=c1&state={}",
            urlencoding::encode(&oauth_state)
        );

        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/dashboard?error=true"
        );
    }

    #[tokio::test]
    async fn test_callback_missing_params_still_redirects() {
        let state = test_state("http://127.0.0.1:1").await;
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/google/callback")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers().get("location").unwrap(),
            "/settings/calendar?error=true"
        );
    }

    #[tokio::test]
    async fn test_create_appointment_then_listed_upcoming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary-cal/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "evt_123"})))
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let user_id = seed_user(&state, "a@example.com").await;
        let integration_id = seed_integration(&state, user_id, future_expiry()).await;
        let app = create_app(state);

        let payload = json!({
            "agentId": 1,
            "calendarIntegrationId": integration_id,
            "title": "Demo call",
            "startTime": "2025-01-01T10:00:00Z",
            "endTime": "2025-01-01T10:30:00Z",
            "attendees": ["a@x.com"]
        });

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/calendar/appointments")
                    .header("authorization", bearer(user_id))
                    .header("content-type", "application/json")
                    .body(Body::from(payload.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let body = body_json(response).await;
        let appointment_id = body["appointmentId"].as_i64().unwrap();
        assert!(appointment_id > 0);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/appointments/upcoming")
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let appointments = body["appointments"].as_array().unwrap();
        assert_eq!(appointments.len(), 1);
        assert_eq!(appointments[0]["id"].as_i64().unwrap(), appointment_id);
        assert_eq!(appointments[0]["status"], "scheduled");
        assert_eq!(appointments[0]["calendar_event_id"], "evt_123");
    }

    #[tokio::test]
    async fn test_create_appointment_rejects_invalid_input() {
        let state = test_state("http://127.0.0.1:1").await;
        let user_id = seed_user(&state, "a@example.com").await;
        let integration_id = seed_integration(&state, user_id, future_expiry()).await;
        let app = create_app(state);

        let cases = [
            // end before start
            json!({
                "agentId": 1,
                "calendarIntegrationId": integration_id,
                "title": "Demo call",
                "startTime": "2025-01-01T10:30:00Z",
                "endTime": "2025-01-01T10:00:00Z"
            }),
            // invalid attendee email
            json!({
                "agentId": 1,
                "calendarIntegrationId": integration_id,
                "title": "Demo call",
                "startTime": "2025-01-01T10:00:00Z",
                "endTime": "2025-01-01T10:30:00Z",
                "attendees": ["not-an-email"]
            }),
            // missing required field
            json!({
                "calendarIntegrationId": integration_id,
                "title": "Demo call",
                "startTime": "2025-01-01T10:00:00Z",
                "endTime": "2025-01-01T10:30:00Z"
            }),
        ];

        for payload in cases {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("POST")
                        .uri("/api/calendar/appointments")
                        .header("authorization", bearer(user_id))
                        .header("content-type", "application/json")
                        .body(Body::from(payload.to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        }
    }

    #[tokio::test]
    async fn test_status_update_rejects_unknown_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/calendar/v3/calendars/primary-cal/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "evt"})))
            .mount(&server)
            .await;

        let state = test_state(&server.uri()).await;
        let user_id = seed_user(&state, "a@example.com").await;
        let integration_id = seed_integration(&state, user_id, future_expiry()).await;
        let calendar = state.calendar.clone();
        let app = create_app(state);

        let appointment_id = calendar
            .create_appointment(
                user_id,
                crate::services::calendar::NewAppointment {
                    agent_id: 1,
                    calendar_integration_id: integration_id,
                    title: "Demo call".to_string(),
                    description: None,
                    start_time: chrono::Utc::now(),
                    end_time: chrono::Utc::now() + chrono::Duration::minutes(30),
                    lead_id: None,
                    attendees: vec![],
                    location: None,
                    meeting_link: None,
                    notes: None,
                    call_sid: None,
                },
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/calendar/appointments/{}/status", appointment_id))
                    .header("authorization", bearer(user_id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"status": "pending"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        // Row untouched: still listed as scheduled
        let appointments = calendar.upcoming_appointments(user_id, 10).await.unwrap();
        assert_eq!(appointments.len(), 1);

        let response = app
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri(format!("/api/calendar/appointments/{}/status", appointment_id))
                    .header("authorization", bearer(user_id))
                    .header("content-type", "application/json")
                    .body(Body::from(json!({"status": "completed"}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["success"], true);

        let appointments = calendar.upcoming_appointments(user_id, 10).await.unwrap();
        assert!(appointments.is_empty());
    }

    #[tokio::test]
    async fn test_integrations_listing_strips_secrets() {
        let state = test_state("http://127.0.0.1:1").await;
        let user_id = seed_user(&state, "a@example.com").await;
        seed_integration(&state, user_id, future_expiry()).await;
        let app = create_app(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/integrations")
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        let integrations = body["integrations"].as_array().unwrap();
        assert_eq!(integrations.len(), 1);
        assert_eq!(integrations[0]["email"], "cal@example.com");
        assert!(integrations[0].get("access_token").is_none());
        assert!(integrations[0].get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn test_status_and_delete_integration() {
        let state = test_state("http://127.0.0.1:1").await;
        let user_id = seed_user(&state, "a@example.com").await;
        let integration_id = seed_integration(&state, user_id, future_expiry()).await;
        let app = create_app(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/status")
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["hasIntegration"], true);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/calendar/integrations/{}", integration_id))
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["success"], true);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/calendar/status")
                    .header("authorization", bearer(user_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(body_json(response).await["hasIntegration"], false);
    }
}
