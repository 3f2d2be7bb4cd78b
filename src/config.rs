use rusqlite::{params, Connection, Result as SqliteResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding the completion backend API key.
/// The key is never written to the settings table.
pub const API_KEY_ENV: &str = "CITEREPO_API_KEY";

/// Environment variable overriding the data directory (default `~/.citerepo`)
pub const DATA_DIR_ENV: &str = "CITEREPO_DATA_DIR";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// OpenAI-compatible base URL; `/chat/completions` is appended
    pub api_base_url: String,

    pub model: String,

    pub max_tokens: u32,

    pub request_timeout_secs: u64,

    /// Language every generated answer is written in
    pub output_language: String,

    /// Hard cap on pages read from a source PDF
    pub max_extract_pages: usize,

    /// Interval clients are expected to poll run status at
    pub poll_interval_ms: u64,

    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".to_string(),
            model: "deepseek-v3".to_string(),
            max_tokens: 4096,
            request_timeout_secs: 120,
            output_language: "Chinese".to_string(),
            max_extract_pages: 50,
            poll_interval_ms: 2000,
            server_port: 3737,
        }
    }
}

impl AppConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Settings persisted in a single-row `settings` table.
/// Read once at startup; changes apply on the next start.
pub struct ConfigManager {
    db_path: PathBuf,
}

impl ConfigManager {
    pub fn new(db_path: PathBuf) -> SqliteResult<Self> {
        let manager = Self { db_path };

        manager.init_table()?;

        Ok(manager)
    }

    fn get_connection(&self) -> SqliteResult<Connection> {
        Connection::open(&self.db_path)
    }

    fn init_table(&self) -> SqliteResult<()> {
        let conn = self.get_connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                api_base_url TEXT NOT NULL,
                model TEXT NOT NULL,
                max_tokens INTEGER NOT NULL,
                request_timeout_secs INTEGER NOT NULL,
                output_language TEXT NOT NULL,
                max_extract_pages INTEGER NOT NULL,
                poll_interval_ms INTEGER NOT NULL,
                server_port INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    /// Load settings from database, writing defaults on first use
    pub fn load(&self) -> SqliteResult<AppConfig> {
        let conn = self.get_connection()?;

        let result = conn.query_row(
            "SELECT api_base_url, model, max_tokens, request_timeout_secs, output_language,
                    max_extract_pages, poll_interval_ms, server_port
             FROM settings WHERE id = 1",
            [],
            |row| {
                Ok(AppConfig {
                    api_base_url: row.get(0)?,
                    model: row.get(1)?,
                    max_tokens: row.get::<_, i64>(2)? as u32,
                    request_timeout_secs: row.get::<_, i64>(3)? as u64,
                    output_language: row.get(4)?,
                    max_extract_pages: row.get::<_, i64>(5)? as usize,
                    poll_interval_ms: row.get::<_, i64>(6)? as u64,
                    server_port: row.get::<_, i64>(7)? as u16,
                })
            },
        );

        match result {
            Ok(config) => Ok(config),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                let default_config = AppConfig::default();
                self.save(&default_config)?;
                Ok(default_config)
            }
            Err(e) => Err(e),
        }
    }

    /// Save settings to database
    pub fn save(&self, config: &AppConfig) -> SqliteResult<()> {
        let conn = self.get_connection()?;
        let now = chrono::Utc::now().timestamp();

        let updated = conn.execute(
            "UPDATE settings SET
                api_base_url = ?1,
                model = ?2,
                max_tokens = ?3,
                request_timeout_secs = ?4,
                output_language = ?5,
                max_extract_pages = ?6,
                poll_interval_ms = ?7,
                server_port = ?8,
                updated_at = ?9
            WHERE id = 1",
            params![
                &config.api_base_url,
                &config.model,
                config.max_tokens as i64,
                config.request_timeout_secs as i64,
                &config.output_language,
                config.max_extract_pages as i64,
                config.poll_interval_ms as i64,
                config.server_port as i64,
                now,
            ],
        )?;

        if updated == 0 {
            conn.execute(
                "INSERT INTO settings (id, api_base_url, model, max_tokens, request_timeout_secs,
                    output_language, max_extract_pages, poll_interval_ms, server_port,
                    created_at, updated_at)
                VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    &config.api_base_url,
                    &config.model,
                    config.max_tokens as i64,
                    config.request_timeout_secs as i64,
                    &config.output_language,
                    config.max_extract_pages as i64,
                    config.poll_interval_ms as i64,
                    config.server_port as i64,
                    now,
                    now,
                ],
            )?;
        }

        Ok(())
    }
}
