use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared mutable configuration handle stored in AppState
pub type MutableConfig = Arc<RwLock<Config>>;

/// Runtime configuration, loaded once from the environment at startup.
///
/// The Google OAuth client id/secret live here so the calendar service is
/// handed a constructed client instead of reading environment state per call.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_url: String,

    /// Externally reachable base URL of this backend, used to build the
    /// OAuth redirect URI for the Google callback
    pub public_base_url: String,

    /// HS256 secret for session tokens
    pub jwt_secret: String,
    pub session_expiry_seconds: i64,

    pub google_client_id: String,
    pub google_client_secret: String,

    /// Browser return path used when the OAuth state carries none
    pub default_return_path: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()?;
        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "jesko.db".to_string());
        let public_base_url = std::env::var("PUBLIC_BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{}", port));

        let jwt_secret = std::env::var("JESKO_SECRET_KEY")
            .map_err(|_| anyhow::anyhow!("JESKO_SECRET_KEY must be set"))?;
        let session_expiry_seconds = std::env::var("SESSION_EXPIRY_SECONDS")
            .unwrap_or_else(|_| "86400".to_string())
            .parse()?;

        let google_client_id = std::env::var("GOOGLE_OAUTH_CLIENT_ID").unwrap_or_default();
        let google_client_secret = std::env::var("GOOGLE_OAUTH_CLIENT_SECRET").unwrap_or_default();

        if google_client_id.is_empty() || google_client_secret.is_empty() {
            tracing::warn!(
                "GOOGLE_OAUTH_CLIENT_ID / GOOGLE_OAUTH_CLIENT_SECRET not set; calendar authorization will fail"
            );
        }

        Ok(Config {
            host,
            port,
            database_url,
            public_base_url,
            jwt_secret,
            session_expiry_seconds,
            google_client_id,
            google_client_secret,
            default_return_path: "/settings/calendar".to_string(),
        })
    }

    /// Redirect URI registered with Google for the OAuth callback
    pub fn oauth_redirect_uri(&self) -> String {
        format!("{}/api/calendar/google/callback", self.public_base_url)
    }
}
