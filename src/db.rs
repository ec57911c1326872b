use libsql::{Builder, Connection, Database as LibsqlDatabase};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct Database {
    db: Arc<LibsqlDatabase>,
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Parse the database URL to determine if it's local or remote
        let db = if database_url.starts_with("libsql://") || database_url.starts_with("https://") {
            // Remote Turso database
            let auth_token = std::env::var("TURSO_AUTH_TOKEN").unwrap_or_else(|_| "".to_string());

            Builder::new_remote(database_url.to_string(), auth_token)
                .build()
                .await?
        } else {
            // Local SQLite database
            Builder::new_local(database_url).build().await?
        };

        let conn = db.connect()?;

        Ok(Database {
            db: Arc::new(db),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn run_migrations(&self) -> anyhow::Result<()> {
        let migrations = vec![include_str!("../migrations/sqlite/001_initial.sql")];

        for (idx, migration_sql) in migrations.iter().enumerate() {
            tracing::info!("Running migration {}", idx + 1);

            let statements = Self::parse_sql_statements(migration_sql);
            for statement in statements {
                let trimmed = statement.trim();
                if !trimmed.is_empty() && !trimmed.starts_with("--") {
                    let conn = self.conn.lock().await;
                    match conn.execute(trimmed, ()).await {
                        Ok(_) => {}
                        Err(e) => {
                            let error_msg = e.to_string();
                            if error_msg.contains("already exists") {
                                tracing::debug!(
                                    "Skipping non-fatal migration error in migration {}: {}",
                                    idx + 1,
                                    e
                                );
                            } else {
                                tracing::warn!(
                                    "Error in migration {} statement: {} - Error: {}",
                                    idx + 1,
                                    trimmed.chars().take(100).collect::<String>(),
                                    e
                                );
                            }
                        }
                    }
                }
            }
        }

        tracing::info!("All migrations completed");
        Ok(())
    }

    /// Parse SQL statements, handling SQLite-specific syntax
    fn parse_sql_statements(sql: &str) -> Vec<String> {
        let mut statements = Vec::new();
        let mut current_statement = String::new();

        for line in sql.lines() {
            let trimmed_line = line.trim();

            // Skip empty lines and comments at the start
            if current_statement.is_empty()
                && (trimmed_line.is_empty() || trimmed_line.starts_with("--"))
            {
                continue;
            }

            current_statement.push_str(line);
            current_statement.push('\n');

            if trimmed_line.ends_with(';') {
                statements.push(current_statement.clone());
                current_statement.clear();
            }
        }

        if !current_statement.trim().is_empty() {
            statements.push(current_statement);
        }

        statements
    }

    pub fn pool(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}
