use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidateEmail, ValidationError};

/// Lifecycle status of an appointment. Stored as lowercase TEXT; the status
/// field is a single authoritative value with no history kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Completed,
    Cancelled,
    Rescheduled,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Rescheduled => "rescheduled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "scheduled" => Some(AppointmentStatus::Scheduled),
            "completed" => Some(AppointmentStatus::Completed),
            "cancelled" => Some(AppointmentStatus::Cancelled),
            "rescheduled" => Some(AppointmentStatus::Rescheduled),
            _ => None,
        }
    }
}

/// Email-addressed participant on an appointment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attendee {
    pub email: String,
}

/// A locally tracked meeting record mirrored to a provider calendar event.
/// calendar_event_id holds the provider-side identifier returned at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: i64,
    pub user_id: i64,
    pub agent_id: i64,
    pub calendar_integration_id: i64,
    pub lead_id: Option<i64>,
    pub title: String,
    pub description: Option<String>,
    pub start_time: i64, // Unix timestamp
    pub end_time: i64,   // Unix timestamp
    pub status: AppointmentStatus,
    pub calendar_event_id: Option<String>,
    pub meeting_link: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<Attendee>,
    pub notes: Option<String>,
    pub created_during_call_sid: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Request body for POST /api/calendar/appointments
#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateAppointmentRequest {
    pub agent_id: i64,
    pub calendar_integration_id: i64,
    #[validate(length(min = 1, message = "title must not be empty"))]
    pub title: String,
    pub description: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub lead_id: Option<i64>,
    #[validate(custom(function = validate_attendee_emails))]
    pub attendees: Option<Vec<String>>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub notes: Option<String>,
    pub call_sid: Option<String>,
}

fn validate_attendee_emails(attendees: &Vec<String>) -> Result<(), ValidationError> {
    for email in attendees {
        if !email.validate_email() {
            return Err(ValidationError::new("email"));
        }
    }
    Ok(())
}

/// Request body for PATCH /api/calendar/appointments/:id/status
#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_round_trip() {
        for status in [
            AppointmentStatus::Scheduled,
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Rescheduled,
        ] {
            assert_eq!(AppointmentStatus::parse(status.as_str()), Some(status));
        }

        assert_eq!(AppointmentStatus::parse("pending"), None);
        assert_eq!(AppointmentStatus::parse("SCHEDULED"), None);
        assert_eq!(AppointmentStatus::parse(""), None);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let value = serde_json::to_value(AppointmentStatus::Rescheduled).unwrap();
        assert_eq!(value, serde_json::json!("rescheduled"));
    }

    #[test]
    fn test_create_request_parses_iso_timestamps() {
        let body = serde_json::json!({
            "agentId": 3,
            "calendarIntegrationId": 5,
            "title": "Demo call",
            "startTime": "2025-01-01T10:00:00Z",
            "endTime": "2025-01-01T10:30:00Z",
            "attendees": ["a@x.com"]
        });

        let request: CreateAppointmentRequest = serde_json::from_value(body).unwrap();
        assert_eq!(request.start_time.timestamp(), 1_735_725_600);
        assert!(request.end_time > request.start_time);
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_create_request_rejects_bad_attendee_email() {
        let body = serde_json::json!({
            "agentId": 3,
            "calendarIntegrationId": 5,
            "title": "Demo call",
            "startTime": "2025-01-01T10:00:00Z",
            "endTime": "2025-01-01T10:30:00Z",
            "attendees": ["not-an-email"]
        });

        let request: CreateAppointmentRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_err());
    }

    #[test]
    fn test_create_request_rejects_empty_title() {
        let body = serde_json::json!({
            "agentId": 3,
            "calendarIntegrationId": 5,
            "title": "",
            "startTime": "2025-01-01T10:00:00Z",
            "endTime": "2025-01-01T10:30:00Z"
        });

        let request: CreateAppointmentRequest = serde_json::from_value(body).unwrap();
        assert!(request.validate().is_err());
    }
}
