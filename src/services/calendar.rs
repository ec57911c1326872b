/// Calendar Integration Service
/// Owns the OAuth token lifecycle for per-user Google Calendar connections
/// and mediates creation/retrieval of appointments, keeping a local record
/// synchronized with the remote calendar event.
use crate::db::Database;
use crate::error::{AppError, AppResult};
use crate::models::calendar_integration::PROVIDER_GOOGLE;
use crate::models::{Appointment, AppointmentStatus, Attendee, CalendarIntegration};
use crate::services::google::{
    CalendarEvent, EventDateTime, EventReminders, GoogleCalendarClient,
};
use crate::utils::time::current_timestamp_seconds;
use chrono::{DateTime, Utc};
use libsql::params;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Payload serialized into the OAuth `state` parameter. The callback is
/// unauthenticated, so the state must self-identify the user; it also
/// carries the browser return path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthStateData {
    pub user_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
}

impl OAuthStateData {
    pub fn encode(&self) -> AppResult<String> {
        serde_json::to_string(self)
            .map_err(|e| AppError::InternalServerError(format!("Failed to encode state: {}", e)))
    }

    /// Tolerant decode: the raw query value first, then a percent-decoded
    /// fallback for clients that double-encode.
    pub fn decode(state: &str) -> Option<Self> {
        if let Ok(data) = serde_json::from_str(state) {
            return Some(data);
        }
        let decoded = urlencoding::decode(state).ok()?;
        serde_json::from_str(&decoded).ok()
    }
}

/// Inputs for a new appointment, already validated at the route layer
#[derive(Debug, Clone)]
pub struct NewAppointment {
    pub agent_id: i64,
    pub calendar_integration_id: i64,
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub lead_id: Option<i64>,
    pub attendees: Vec<String>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    pub call_sid: Option<String>,
}

pub struct CalendarService {
    db: Database,
    google: GoogleCalendarClient,
}

impl CalendarService {
    pub fn new(db: Database, google: GoogleCalendarClient) -> Self {
        Self { db, google }
    }

    /// Build the Google authorization URL for a user
    pub fn auth_url(&self, user_id: i64, return_to: Option<String>) -> AppResult<String> {
        let state = OAuthStateData { user_id, return_to }.encode()?;
        self.google.authorization_url(&state)
    }

    /// Exchange the callback code, resolve the primary calendar and account
    /// email, and store the integration. Reauthorization deactivates any
    /// previous active row first, so at most one active integration exists
    /// per (user, provider).
    pub async fn process_callback(&self, code: &str, state: &str) -> AppResult<(i64, String)> {
        let state_data = OAuthStateData::decode(state)
            .ok_or_else(|| AppError::BadRequest("Invalid state parameter".to_string()))?;
        let user_id = state_data.user_id;

        let tokens = self.google.exchange_code(code).await?;

        let primary = self
            .google
            .primary_calendar(&tokens.access_token)
            .await?
            .ok_or_else(|| {
                AppError::ExternalServiceError("Could not find primary calendar".to_string())
            })?;

        let email = self
            .google
            .user_email(&tokens.access_token)
            .await?
            .ok_or_else(|| {
                AppError::ExternalServiceError("Could not retrieve user email".to_string())
            })?;

        let now = current_timestamp_seconds();
        let token_expiry = tokens.expires_in.map(|s| now + s);
        let display_name = primary
            .summary
            .unwrap_or_else(|| "Google Calendar".to_string());

        let conn = self.db.pool();
        let conn = conn.lock().await;

        conn.execute(
            r#"
            UPDATE calendar_integration
            SET is_active = 0, updated_at = ?
            WHERE user_id = ? AND provider = ? AND is_active = 1
            "#,
            params![now, user_id, PROVIDER_GOOGLE],
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        conn.execute(
            r#"
            INSERT INTO calendar_integration (
                user_id, provider, access_token, refresh_token, token_expiry,
                calendar_id, email, display_name, is_active, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
            "#,
            params![
                user_id,
                PROVIDER_GOOGLE,
                tokens.access_token,
                tokens.refresh_token,
                token_expiry,
                primary.id,
                email.clone(),
                display_name,
                now,
                now
            ],
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        info!(
            "Connected Google Calendar for user {} ({})",
            user_id, email
        );

        Ok((user_id, email))
    }

    /// Load the user's active integration and return a usable access token,
    /// refreshing it first when expired. Absence and refresh failure both
    /// resolve to None: calendar features are optional and callers must
    /// handle a disconnected state, not crash.
    pub async fn authorized_access_token(
        &self,
        user_id: i64,
    ) -> AppResult<Option<(CalendarIntegration, String)>> {
        let integration = match self.active_integration(user_id).await? {
            Some(integration) => integration,
            None => return Ok(None),
        };

        let now = current_timestamp_seconds();
        let expired = integration.token_expiry.map(|t| t < now).unwrap_or(false);

        if !expired {
            let token = integration.access_token.clone();
            return Ok(Some((integration, token)));
        }

        let refresh_token = match integration.refresh_token.clone() {
            Some(token) => token,
            None => {
                warn!(
                    "Integration {} has an expired token and no refresh token",
                    integration.id
                );
                return Ok(None);
            }
        };

        match self.google.refresh_access_token(&refresh_token).await {
            Ok(tokens) => {
                let token_expiry = tokens.expires_in.map(|s| now + s);

                let conn = self.db.pool();
                let conn = conn.lock().await;
                conn.execute(
                    r#"
                    UPDATE calendar_integration
                    SET access_token = ?, token_expiry = ?, updated_at = ?
                    WHERE id = ?
                    "#,
                    params![
                        tokens.access_token.clone(),
                        token_expiry,
                        now,
                        integration.id
                    ],
                )
                .await
                .map_err(|e| AppError::Database(e.to_string()))?;

                info!("Refreshed access token for integration {}", integration.id);

                let mut refreshed = integration;
                refreshed.access_token = tokens.access_token.clone();
                refreshed.token_expiry = token_expiry;
                Ok(Some((refreshed, tokens.access_token)))
            }
            Err(e) => {
                error!(
                    "Error refreshing token for integration {}: {}",
                    integration.id, e
                );
                Ok(None)
            }
        }
    }

    /// Two-phase appointment creation: the remote calendar event is created
    /// first, and the local row is only written once the provider returns an
    /// event id. A phase-1 failure propagates with no local state; a crash
    /// between phases can orphan a remote event (accepted, unmitigated).
    pub async fn create_appointment(
        &self,
        user_id: i64,
        input: NewAppointment,
    ) -> AppResult<i64> {
        let (_, access_token) = self
            .authorized_access_token(user_id)
            .await?
            .ok_or_else(|| {
                AppError::BadRequest("User is not authorized with Google Calendar".to_string())
            })?;

        let integration = self
            .integration_by_id(input.calendar_integration_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Calendar integration not found".to_string()))?;

        let attendees: Vec<Attendee> = input
            .attendees
            .iter()
            .map(|email| Attendee {
                email: email.clone(),
            })
            .collect();

        let event = CalendarEvent {
            summary: input.title.clone(),
            description: input.description.clone(),
            start: EventDateTime {
                date_time: input.start_time.to_rfc3339(),
                time_zone: "UTC".to_string(),
            },
            end: EventDateTime {
                date_time: input.end_time.to_rfc3339(),
                time_zone: "UTC".to_string(),
            },
            attendees: attendees.clone(),
            location: input.location.clone(),
            reminders: EventReminders { use_default: true },
        };

        // Phase 1: remote event. Any failure here aborts with no local row.
        let event_id = self
            .google
            .insert_event(&access_token, &integration.calendar_id, &event)
            .await?;

        // Phase 2: local record referencing the confirmed remote event.
        let now = current_timestamp_seconds();
        let attendees_json = serde_json::to_string(&attendees)
            .map_err(|e| AppError::InternalServerError(e.to_string()))?;

        let conn = self.db.pool();
        let conn = conn.lock().await;
        conn.execute(
            r#"
            INSERT INTO scheduled_appointment (
                user_id, agent_id, calendar_integration_id, lead_id, title,
                description, start_time, end_time, status, calendar_event_id,
                meeting_link, location, attendees, notes,
                created_during_call_sid, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                user_id,
                input.agent_id,
                input.calendar_integration_id,
                input.lead_id,
                input.title,
                input.description,
                input.start_time.timestamp(),
                input.end_time.timestamp(),
                AppointmentStatus::Scheduled.as_str(),
                event_id.clone(),
                input.meeting_link,
                input.location,
                attendees_json,
                input.notes,
                input.call_sid,
                now,
                now
            ],
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        let appointment_id = conn.last_insert_rowid();

        conn.execute(
            "UPDATE calendar_integration SET last_synced = ? WHERE id = ?",
            params![now, integration.id],
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        info!(
            "Created appointment {} for user {} (event {})",
            appointment_id, user_id, event_id
        );

        Ok(appointment_id)
    }

    /// Scheduled appointments for a user, soonest first
    pub async fn upcoming_appointments(
        &self,
        user_id: i64,
        limit: i64,
    ) -> AppResult<Vec<Appointment>> {
        let conn = self.db.pool();
        let conn = conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {}
                    FROM scheduled_appointment
                    WHERE user_id = ? AND status = ?
                    ORDER BY start_time ASC
                    LIMIT ?
                    "#,
                    APPOINTMENT_COLUMNS
                ),
                params![user_id, AppointmentStatus::Scheduled.as_str(), limit],
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut appointments = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            appointments.push(appointment_from_row(&row)?);
        }

        Ok(appointments)
    }

    /// Overwrite the status of an appointment owned by the user. Not-found
    /// and not-yours are indistinguishable: the WHERE clause simply matches
    /// nothing.
    pub async fn update_appointment_status(
        &self,
        appointment_id: i64,
        user_id: i64,
        status: AppointmentStatus,
    ) -> AppResult<()> {
        let now = current_timestamp_seconds();
        let conn = self.db.pool();
        let conn = conn.lock().await;
        conn.execute(
            r#"
            UPDATE scheduled_appointment
            SET status = ?, updated_at = ?
            WHERE id = ? AND user_id = ?
            "#,
            params![status.as_str(), now, appointment_id, user_id],
        )
        .await
        .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(())
    }

    /// Whether the user has any active integration, used to gate
    /// calendar-dependent UI
    pub async fn has_integration(&self, user_id: i64) -> AppResult<bool> {
        Ok(self.active_integration(user_id).await?.is_some())
    }

    /// All integration rows for a user, active and inactive
    pub async fn list_integrations(&self, user_id: i64) -> AppResult<Vec<CalendarIntegration>> {
        let conn = self.db.pool();
        let conn = conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM calendar_integration WHERE user_id = ? ORDER BY id",
                    INTEGRATION_COLUMNS
                ),
                params![user_id],
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        let mut integrations = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            integrations.push(integration_from_row(&row)?);
        }

        Ok(integrations)
    }

    /// Soft delete, scoped by (id, user). The provider token is not revoked
    /// and existing appointments keep referencing the inactive row.
    pub async fn deactivate_integration(
        &self,
        integration_id: i64,
        user_id: i64,
    ) -> AppResult<bool> {
        let now = current_timestamp_seconds();
        let conn = self.db.pool();
        let conn = conn.lock().await;
        let affected = conn
            .execute(
                r#"
                UPDATE calendar_integration
                SET is_active = 0, updated_at = ?
                WHERE id = ? AND user_id = ?
                "#,
                params![now, integration_id, user_id],
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        Ok(affected > 0)
    }

    async fn active_integration(&self, user_id: i64) -> AppResult<Option<CalendarIntegration>> {
        let conn = self.db.pool();
        let conn = conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    r#"
                    SELECT {}
                    FROM calendar_integration
                    WHERE user_id = ? AND provider = ? AND is_active = 1
                    LIMIT 1
                    "#,
                    INTEGRATION_COLUMNS
                ),
                params![user_id, PROVIDER_GOOGLE],
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => Ok(Some(integration_from_row(&row)?)),
            None => Ok(None),
        }
    }

    async fn integration_by_id(&self, id: i64) -> AppResult<Option<CalendarIntegration>> {
        let conn = self.db.pool();
        let conn = conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {} FROM calendar_integration WHERE id = ?",
                    INTEGRATION_COLUMNS
                ),
                params![id],
            )
            .await
            .map_err(|e| AppError::Database(e.to_string()))?;

        match rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
        {
            Some(row) => Ok(Some(integration_from_row(&row)?)),
            None => Ok(None),
        }
    }
}

const INTEGRATION_COLUMNS: &str = "id, user_id, provider, access_token, refresh_token, \
    token_expiry, calendar_id, email, display_name, is_active, last_synced, \
    created_at, updated_at";

const APPOINTMENT_COLUMNS: &str = "id, user_id, agent_id, calendar_integration_id, lead_id, \
    title, description, start_time, end_time, status, calendar_event_id, meeting_link, \
    location, attendees, notes, created_during_call_sid, created_at, updated_at";

fn integration_from_row(row: &libsql::Row) -> AppResult<CalendarIntegration> {
    Ok(CalendarIntegration {
        id: row.get(0).map_err(db_err)?,
        user_id: row.get(1).map_err(db_err)?,
        provider: row.get(2).map_err(db_err)?,
        access_token: row.get(3).map_err(db_err)?,
        refresh_token: row.get(4).map_err(db_err)?,
        token_expiry: row.get(5).map_err(db_err)?,
        calendar_id: row.get(6).map_err(db_err)?,
        email: row.get(7).map_err(db_err)?,
        display_name: row.get(8).map_err(db_err)?,
        is_active: row.get::<i64>(9).map_err(db_err)? != 0,
        last_synced: row.get(10).map_err(db_err)?,
        created_at: row.get(11).map_err(db_err)?,
        updated_at: row.get(12).map_err(db_err)?,
    })
}

fn appointment_from_row(row: &libsql::Row) -> AppResult<Appointment> {
    let status_raw: String = row.get(9).map_err(db_err)?;
    let status = AppointmentStatus::parse(&status_raw)
        .ok_or_else(|| AppError::Database(format!("Unknown appointment status: {}", status_raw)))?;

    let attendees_raw: String = row.get(13).map_err(db_err)?;
    let attendees: Vec<Attendee> = serde_json::from_str(&attendees_raw).unwrap_or_default();

    Ok(Appointment {
        id: row.get(0).map_err(db_err)?,
        user_id: row.get(1).map_err(db_err)?,
        agent_id: row.get(2).map_err(db_err)?,
        calendar_integration_id: row.get(3).map_err(db_err)?,
        lead_id: row.get(4).map_err(db_err)?,
        title: row.get(5).map_err(db_err)?,
        description: row.get(6).map_err(db_err)?,
        start_time: row.get(7).map_err(db_err)?,
        end_time: row.get(8).map_err(db_err)?,
        status,
        calendar_event_id: row.get(10).map_err(db_err)?,
        meeting_link: row.get(11).map_err(db_err)?,
        location: row.get(12).map_err(db_err)?,
        attendees,
        notes: row.get(14).map_err(db_err)?,
        created_during_call_sid: row.get(15).map_err(db_err)?,
        created_at: row.get(16).map_err(db_err)?,
        updated_at: row.get(17).map_err(db_err)?,
    })
}

fn db_err(e: libsql::Error) -> AppError {
    AppError::Database(e.to_string())
}
