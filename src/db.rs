use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Language {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct Translation {
    pub id: i64,
    pub language_id: i64,
    pub key: String,
    pub value: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A translation together with its language and full tag set
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranslationDetails {
    #[serde(flatten)]
    pub translation: Translation,
    pub language: Language,
    pub tags: Vec<Tag>,
}

/// Schema statements, applied in order on every connect
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS languages (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        code TEXT NOT NULL UNIQUE,
        name TEXT NOT NULL,
        is_active INTEGER NOT NULL DEFAULT 1,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS translations (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        language_id INTEGER NOT NULL REFERENCES languages(id) ON DELETE CASCADE,
        key TEXT NOT NULL,
        value TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        UNIQUE (language_id, key)
    )",
    "CREATE INDEX IF NOT EXISTS idx_translations_key ON translations (key)",
    "CREATE TABLE IF NOT EXISTS translation_tag (
        translation_id INTEGER NOT NULL REFERENCES translations(id) ON DELETE CASCADE,
        tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
        PRIMARY KEY (translation_id, tag_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_translation_tag_tag ON translation_tag (tag_id)",
];

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Connect to the database at `url` and create tables
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .context(format!("Invalid database URL {}", url))?;
        Self::connect_with(options, max_connections).await
    }

    /// Open (or create) a database file at `path`
    pub async fn open(path: &Path, max_connections: u32) -> Result<Self> {
        Self::connect_with(SqliteConnectOptions::new().filename(path), max_connections).await
    }

    async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let options = options
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options)
            .await
            .context("Failed to open database")?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context("Failed to create schema")?;
        }

        info!(max_connections, "Database ready");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Cheap liveness check
    pub async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_database_creation() {
        let (db, _temp_dir) = create_test_db().await;

        assert!(db.ping().await);
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM translations")
            .fetch_one(db.pool())
            .await
            .expect("Should count");
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_database_reopening() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        {
            let db = Database::open(&db_path, 1).await.expect("Failed to create database");
            add_language(&db, "en", "English", true).await;
        }

        let db = Database::open(&db_path, 1).await.expect("Failed to reopen database");
        let languages = db.list_languages().await.expect("Should list");
        assert_eq!(languages.len(), 1, "Language should persist");
    }

    #[tokio::test]
    async fn test_connect_with_url() {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let url = format!("sqlite://{}", temp_dir.path().join("url.db").display());

        let db = Database::connect(&url, 2).await.expect("Should connect");
        assert!(db.ping().await);
    }

    #[tokio::test]
    async fn test_invalid_database_path() {
        let result = Database::open(Path::new("/non/existent/path/db.db"), 1).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_translation_details_serializes_flat() {
        let now = Utc::now();
        let details = TranslationDetails {
            translation: Translation {
                id: 1,
                language_id: 2,
                key: "menu.home".to_string(),
                value: "Home".to_string(),
                created_at: now,
                updated_at: now,
            },
            language: Language {
                id: 2,
                code: "en".to_string(),
                name: "English".to_string(),
                is_active: true,
                created_at: now,
                updated_at: now,
            },
            tags: vec![],
        };

        let json = serde_json::to_value(&details).expect("Should serialize");
        assert_eq!(json["key"], "menu.home");
        assert_eq!(json["language_id"], 2);
        assert_eq!(json["language"]["code"], "en");
        assert!(json["tags"].as_array().unwrap().is_empty());
    }
}
