/// Google Calendar Provider
/// Handles the OAuth 2.0 token exchange and the Calendar v3 REST calls the
/// calendar service needs. Endpoints are carried in the config so tests can
/// point the client at a stub server.
use crate::error::{AppError, AppResult};
use crate::models::Attendee;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// OAuth scopes requested for calendar access. Includes the userinfo email
/// scope so the callback can identify the connected account.
const SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/calendar.events",
    "https://www.googleapis.com/auth/userinfo.email",
];

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    pub calendar_api_base: String,
    pub scopes: Vec<String>,
}

impl GoogleConfig {
    pub fn new(client_id: String, client_secret: String, redirect_uri: String) -> Self {
        GoogleConfig {
            client_id,
            client_secret,
            redirect_uri,
            authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo".to_string(),
            calendar_api_base: "https://www.googleapis.com/calendar/v3".to_string(),
            scopes: SCOPES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Token response from the provider, validated to carry an access token
#[derive(Debug, Clone)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawTokenResponse {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CalendarListEntry {
    pub id: String,
    pub summary: Option<String>,
    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Deserialize)]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Debug, Deserialize)]
struct UserInfoResponse {
    email: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDateTime {
    pub date_time: String,
    pub time_zone: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventReminders {
    pub use_default: bool,
}

/// Calendar v3 event payload for inserts
#[derive(Debug, Serialize)]
pub struct CalendarEvent {
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: EventDateTime,
    pub end: EventDateTime,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attendees: Vec<Attendee>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub reminders: EventReminders,
}

#[derive(Debug, Deserialize)]
struct EventResponse {
    id: Option<String>,
}

pub struct GoogleCalendarClient {
    config: GoogleConfig,
    client: Client,
}

impl GoogleCalendarClient {
    pub fn new(config: GoogleConfig, client: Client) -> Self {
        Self { config, client }
    }

    /// Build the browser authorization URL. Offline access plus a forced
    /// consent prompt so Google always issues a refresh token, at the cost
    /// of a fresh consent screen on reauthorization.
    pub fn authorization_url(&self, state: &str) -> AppResult<String> {
        let scope_str = self.config.scopes.join(" ");
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("response_type", "code"),
            ("access_type", "offline"),
            ("prompt", "consent"),
            ("scope", scope_str.as_str()),
            ("state", state),
        ];

        let url = reqwest::Url::parse_with_params(&self.config.authorize_url, &params)
            .map_err(|e| AppError::InternalServerError(format!("Failed to build auth URL: {}", e)))?;

        Ok(url.to_string())
    }

    /// Exchange a one-time authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> AppResult<GoogleTokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        debug!("Exchanging authorization code for tokens");
        let raw = self.post_token_request(&params).await?;
        self.require_access_token(raw)
    }

    /// Exchange a refresh token for a fresh access token
    pub async fn refresh_access_token(&self, refresh_token: &str) -> AppResult<GoogleTokens> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
        ];

        debug!("Refreshing access token");
        let raw = self.post_token_request(&params).await?;
        self.require_access_token(raw)
    }

    async fn post_token_request(&self, params: &[(&str, &str)]) -> AppResult<RawTokenResponse> {
        let response = self
            .client
            .post(&self.config.token_url)
            .form(params)
            .send()
            .await
            .map_err(|e| {
                error!("Token request failed: {}", e);
                AppError::ExternalServiceError(format!("Token request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Token request failed: {} - {}", status, error_text);
            return Err(AppError::ExternalServiceError(format!(
                "Token request failed: {} - {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            error!("Failed to parse token response: {}", e);
            AppError::ExternalServiceError(format!("Failed to parse token response: {}", e))
        })
    }

    fn require_access_token(&self, raw: RawTokenResponse) -> AppResult<GoogleTokens> {
        let access_token = raw.access_token.ok_or_else(|| {
            AppError::ExternalServiceError("Failed to retrieve access token".to_string())
        })?;

        Ok(GoogleTokens {
            access_token,
            refresh_token: raw.refresh_token,
            expires_in: raw.expires_in,
        })
    }

    /// Find the user's primary calendar, if any
    pub async fn primary_calendar(&self, access_token: &str) -> AppResult<Option<CalendarListEntry>> {
        let url = format!("{}/users/me/calendarList", self.config.calendar_api_base);

        let response: CalendarListResponse = self.get_json(&url, access_token).await?;
        Ok(response.items.into_iter().find(|c| c.primary))
    }

    /// Fetch the email of the authorized account
    pub async fn user_email(&self, access_token: &str) -> AppResult<Option<String>> {
        let response: UserInfoResponse = self
            .get_json(&self.config.userinfo_url, access_token)
            .await?;
        Ok(response.email)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
    ) -> AppResult<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| {
                error!("Google API request failed: {}", e);
                AppError::ExternalServiceError(format!("Google API request failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Google API request failed: {} - {}", status, error_text);
            return Err(AppError::ExternalServiceError(format!(
                "Google API request failed: {} - {}",
                status, error_text
            )));
        }

        response.json().await.map_err(|e| {
            error!("Failed to parse Google API response: {}", e);
            AppError::ExternalServiceError(format!("Failed to parse Google API response: {}", e))
        })
    }

    /// Insert an event into the given calendar and return its provider-side
    /// id. Attendees are notified by email (sendUpdates=all).
    pub async fn insert_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &CalendarEvent,
    ) -> AppResult<String> {
        let url = format!(
            "{}/calendars/{}/events?sendUpdates=all",
            self.config.calendar_api_base,
            urlencoding::encode(calendar_id)
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(access_token)
            .json(event)
            .send()
            .await
            .map_err(|e| {
                error!("Event creation failed: {}", e);
                AppError::ExternalServiceError(format!("Event creation failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            error!("Event creation failed: {} - {}", status, error_text);
            return Err(AppError::ExternalServiceError(format!(
                "Event creation failed: {} - {}",
                status, error_text
            )));
        }

        let event_response: EventResponse = response.json().await.map_err(|e| {
            error!("Failed to parse event response: {}", e);
            AppError::ExternalServiceError(format!("Failed to parse event response: {}", e))
        })?;

        event_response.id.ok_or_else(|| {
            AppError::ExternalServiceError("Event response missing event id".to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> GoogleCalendarClient {
        let config = GoogleConfig::new(
            "client-id".to_string(),
            "client-secret".to_string(),
            "http://localhost:8080/api/calendar/google/callback".to_string(),
        );
        GoogleCalendarClient::new(config, Client::new())
    }

    #[test]
    fn test_authorization_url_requests_offline_consent() {
        let client = test_client();
        let url = client.authorization_url("{\"userId\":7}").unwrap();

        assert!(url.starts_with("https://accounts.google.com/o/oauth2/v2/auth?"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("prompt=consent"));
        assert!(url.contains("client_id=client-id"));
        assert!(url.contains("response_type=code"));
        // state survives URL encoding
        assert!(url.contains("state=%7B%22userId%22%3A7%7D"));
    }

    #[test]
    fn test_authorization_url_includes_calendar_scopes() {
        let client = test_client();
        let url = client.authorization_url("s").unwrap();
        assert!(url.contains("auth%2Fcalendar+"));
        assert!(url.contains("calendar.events"));
        assert!(url.contains("userinfo.email"));
    }

    #[test]
    fn test_event_payload_shape() {
        let event = CalendarEvent {
            summary: "Demo".to_string(),
            description: None,
            start: EventDateTime {
                date_time: "2025-01-01T10:00:00+00:00".to_string(),
                time_zone: "UTC".to_string(),
            },
            end: EventDateTime {
                date_time: "2025-01-01T10:30:00+00:00".to_string(),
                time_zone: "UTC".to_string(),
            },
            attendees: vec![Attendee {
                email: "a@x.com".to_string(),
            }],
            location: None,
            reminders: EventReminders { use_default: true },
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["start"]["dateTime"], "2025-01-01T10:00:00+00:00");
        assert_eq!(value["start"]["timeZone"], "UTC");
        assert_eq!(value["attendees"][0]["email"], "a@x.com");
        assert_eq!(value["reminders"]["useDefault"], true);
        assert!(value.get("description").is_none());
    }
}
