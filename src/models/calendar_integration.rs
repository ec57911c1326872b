use serde::{Deserialize, Serialize};

/// Supported calendar provider tag. Only Google is wired up today; the
/// column is TEXT so more can be added without a migration.
pub const PROVIDER_GOOGLE: &str = "google";

/// Calendar Integration - one stored OAuth credential set binding a user to
/// an external calendar account. Soft-deleted via is_active; never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarIntegration {
    pub id: i64,
    pub user_id: i64,
    pub provider: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expiry: Option<i64>, // Unix timestamp
    pub calendar_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub last_synced: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Integration shape returned to clients - tokens never leave the service
/// boundary.
#[derive(Debug, Serialize, Deserialize)]
pub struct CalendarIntegrationResponse {
    pub id: i64,
    pub provider: String,
    pub email: String,
    pub display_name: Option<String>,
    pub is_active: bool,
    pub last_synced: Option<i64>,
    pub created_at: i64,
}

impl From<CalendarIntegration> for CalendarIntegrationResponse {
    fn from(integration: CalendarIntegration) -> Self {
        CalendarIntegrationResponse {
            id: integration.id,
            provider: integration.provider,
            email: integration.email,
            display_name: integration.display_name,
            is_active: integration.is_active,
            last_synced: integration.last_synced,
            created_at: integration.created_at,
        }
    }
}
