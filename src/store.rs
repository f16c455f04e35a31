//! Translation rows.
//!
//! Every write runs the row mutation and its tag mutation in one transaction;
//! the export cache is invalidated only after the commit.

use chrono::Utc;
use regex::Regex;
use serde::Deserialize;
use sqlx::SqliteConnection;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};

use crate::cache::ExportCache;
use crate::db::{Database, Translation, TranslationDetails};
use crate::error::{ServiceError, ServiceResult};
use crate::export;
use crate::tags::{self, TagNames};

const MAX_KEY_LEN: usize = 255;
const DUPLICATE_KEY: &str = "Translation key already exists for this language";

#[derive(Debug, Clone, Deserialize)]
pub struct NewTranslation {
    pub language_id: i64,
    pub key: String,
    pub value: String,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TranslationUpdate {
    pub value: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// Dotted segments, none of them empty
fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[^.]+(\.[^.]+)*$").expect("valid key pattern"))
}

pub fn validate_key(key: &str) -> ServiceResult<()> {
    if key.is_empty() {
        return Err(ServiceError::validation("key", "The key field is required."));
    }
    if key.chars().count() > MAX_KEY_LEN {
        return Err(ServiceError::validation(
            "key",
            format!("The key may not be greater than {} characters.", MAX_KEY_LEN),
        ));
    }
    if !key_pattern().is_match(key) {
        return Err(ServiceError::validation(
            "key",
            "The key must be dot-separated segments without empty parts.",
        ));
    }
    Ok(())
}

/// Find a key of the same language that is a dotted prefix of `key`, or that
/// has `key` as its dotted prefix. Either would make the nested export
/// ambiguous.
async fn nesting_clash(
    conn: &mut SqliteConnection,
    language_id: i64,
    translation_id: i64,
    key: &str,
) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        "SELECT key FROM translations
         WHERE language_id = ?1 AND id != ?2
           AND (substr(key, 1, length(?3) + 1) = ?3 || '.'
                OR substr(?3, 1, length(key) + 1) = key || '.')
         LIMIT 1",
    )
    .bind(language_id)
    .bind(translation_id)
    .bind(key)
    .fetch_optional(&mut *conn)
    .await
}

impl Database {
    pub(crate) async fn translation_row(&self, id: i64) -> ServiceResult<Translation> {
        sqlx::query_as::<_, Translation>(
            "SELECT id, language_id, key, value, created_at, updated_at
             FROM translations WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Translation not found".to_string()))
    }

    async fn translation_exists(&self, language_id: i64, key: &str) -> ServiceResult<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM translations WHERE language_id = ?1 AND key = ?2",
        )
        .bind(language_id)
        .bind(key)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }
}

#[derive(Clone)]
pub struct TranslationStore {
    db: Database,
    cache: Arc<dyn ExportCache>,
}

impl TranslationStore {
    pub fn new(db: Database, cache: Arc<dyn ExportCache>) -> Self {
        Self { db, cache }
    }

    pub async fn get(&self, id: i64) -> ServiceResult<TranslationDetails> {
        self.db.translation_details(id).await
    }

    /// Create a translation, optionally with tags.
    ///
    /// The pre-flight lookup gives a cheap Conflict; the UNIQUE constraint
    /// decides races between concurrent writers of the same pair.
    pub async fn create(&self, new: NewTranslation) -> ServiceResult<TranslationDetails> {
        validate_key(&new.key)?;
        let tag_names = new.tags.map(TagNames::parse).transpose()?;

        match self.db.get_language(new.language_id).await {
            Ok(_) => {}
            Err(ServiceError::NotFound(_)) => {
                return Err(ServiceError::validation(
                    "language_id",
                    "The selected language id is invalid.",
                ))
            }
            Err(e) => return Err(e),
        }

        if self.db.translation_exists(new.language_id, &new.key).await? {
            return Err(ServiceError::Conflict(DUPLICATE_KEY.to_string()));
        }

        let mut tx = self.db.pool().begin().await?;

        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO translations (language_id, key, value, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING id",
        )
        .bind(new.language_id)
        .bind(&new.key)
        .bind(&new.value)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| ServiceError::from_write(e, DUPLICATE_KEY))?;

        if let Some(existing) = nesting_clash(&mut *tx, new.language_id, id, &new.key)
            .await
            .map_err(ServiceError::Transaction)?
        {
            return Err(ServiceError::Conflict(format!(
                "Translation key '{}' conflicts with existing key '{}'",
                new.key, existing
            )));
        }

        if let Some(names) = &tag_names {
            tags::sync(&mut *tx, id, names)
                .await
                .map_err(|e| ServiceError::from_write(e, DUPLICATE_KEY))?;
        }

        tx.commit().await.map_err(ServiceError::Transaction)?;
        info!(id, language_id = new.language_id, key = %new.key, "Translation created");

        self.invalidate_exports().await;
        self.get(id).await
    }

    /// Partial update: only the fields present change
    pub async fn update(&self, id: i64, update: TranslationUpdate) -> ServiceResult<TranslationDetails> {
        let tag_names = update.tags.map(TagNames::parse).transpose()?;
        self.db.translation_row(id).await?;

        let mut tx = self.db.pool().begin().await?;

        if let Some(value) = &update.value {
            let result = sqlx::query(
                "UPDATE translations SET value = ?2, updated_at = ?3 WHERE id = ?1",
            )
            .bind(id)
            .bind(value)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::Transaction)?;

            if result.rows_affected() == 0 {
                return Err(ServiceError::NotFound("Translation not found".to_string()));
            }
        }

        if let Some(names) = &tag_names {
            tags::sync(&mut *tx, id, names)
                .await
                .map_err(ServiceError::Transaction)?;
        }

        tx.commit().await.map_err(ServiceError::Transaction)?;
        info!(
            id,
            value_changed = update.value.is_some(),
            tags_synced = tag_names.is_some(),
            "Translation updated"
        );

        self.invalidate_exports().await;
        self.get(id).await
    }

    /// Delete a translation together with its tag links
    pub async fn delete(&self, id: i64) -> ServiceResult<()> {
        let mut tx = self.db.pool().begin().await?;

        let detached = tags::detach_all(&mut *tx, id)
            .await
            .map_err(ServiceError::Transaction)?;

        let result = sqlx::query("DELETE FROM translations WHERE id = ?1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(ServiceError::Transaction)?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("Translation not found".to_string()));
        }

        tx.commit().await.map_err(ServiceError::Transaction)?;
        info!(id, detached, "Translation deleted");

        self.invalidate_exports().await;
        Ok(())
    }

    async fn invalidate_exports(&self) {
        if let Err(e) = export::invalidate_exports(&self.db, self.cache.as_ref()).await {
            warn!(error = %e, "Failed to invalidate export cache, entries expire on their own");
        }
    }
}
