//! Language catalogue.
//!
//! Languages are referenced by translations and looked up by code on export;
//! the management operations here are deliberately thin.

use chrono::Utc;
use serde::Deserialize;
use tracing::info;

use crate::db::{Database, Language};
use crate::error::{ServiceError, ServiceResult};

const MAX_CODE_LEN: usize = 10;
const MAX_NAME_LEN: usize = 50;

const LANGUAGE_COLUMNS: &str = "id, code, name, is_active, created_at, updated_at";

#[derive(Debug, Clone, Deserialize)]
pub struct NewLanguage {
    pub code: String,
    pub name: String,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LanguageUpdate {
    pub name: Option<String>,
    pub is_active: Option<bool>,
}

fn validate_name(name: &str) -> ServiceResult<()> {
    if name.trim().is_empty() {
        return Err(ServiceError::validation("name", "The name field is required."));
    }
    if name.chars().count() > MAX_NAME_LEN {
        return Err(ServiceError::validation(
            "name",
            format!("The name may not be greater than {} characters.", MAX_NAME_LEN),
        ));
    }
    Ok(())
}

impl NewLanguage {
    fn validate(&self) -> ServiceResult<()> {
        if self.code.trim().is_empty() {
            return Err(ServiceError::validation("code", "The code field is required."));
        }
        if self.code.chars().count() > MAX_CODE_LEN {
            return Err(ServiceError::validation(
                "code",
                format!("The code may not be greater than {} characters.", MAX_CODE_LEN),
            ));
        }
        validate_name(&self.name)
    }
}

impl Database {
    pub async fn list_languages(&self) -> ServiceResult<Vec<Language>> {
        let languages = sqlx::query_as::<_, Language>(&format!(
            "SELECT {} FROM languages ORDER BY id",
            LANGUAGE_COLUMNS
        ))
        .fetch_all(self.pool())
        .await?;
        Ok(languages)
    }

    pub async fn get_language(&self, id: i64) -> ServiceResult<Language> {
        sqlx::query_as::<_, Language>(&format!(
            "SELECT {} FROM languages WHERE id = ?1",
            LANGUAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Language not found".to_string()))
    }

    /// Look up a language by code, regardless of its active flag
    pub async fn find_language_by_code(&self, code: &str) -> ServiceResult<Option<Language>> {
        let language = sqlx::query_as::<_, Language>(&format!(
            "SELECT {} FROM languages WHERE code = ?1",
            LANGUAGE_COLUMNS
        ))
        .bind(code)
        .fetch_optional(self.pool())
        .await?;
        Ok(language)
    }

    /// Look up a language by code, only if it is active
    pub async fn find_active_language(&self, code: &str) -> ServiceResult<Option<Language>> {
        Ok(self
            .find_language_by_code(code)
            .await?
            .filter(|language| language.is_active))
    }

    pub async fn language_codes(&self) -> ServiceResult<Vec<String>> {
        let codes = sqlx::query_scalar::<_, String>("SELECT code FROM languages ORDER BY id")
            .fetch_all(self.pool())
            .await?;
        Ok(codes)
    }

    pub async fn create_language(&self, new: NewLanguage) -> ServiceResult<Language> {
        new.validate()?;
        let now = Utc::now();

        let language = sqlx::query_as::<_, Language>(&format!(
            "INSERT INTO languages (code, name, is_active, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?4)
             RETURNING {}",
            LANGUAGE_COLUMNS
        ))
        .bind(new.code.trim())
        .bind(new.name.trim())
        .bind(new.is_active.unwrap_or(true))
        .bind(now)
        .fetch_one(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                ServiceError::Conflict("The code has already been taken.".to_string())
            }
            other => ServiceError::Database(other),
        })?;

        info!(code = %language.code, id = language.id, "Language created");
        Ok(language)
    }

    pub async fn update_language(&self, id: i64, update: LanguageUpdate) -> ServiceResult<Language> {
        if let Some(name) = &update.name {
            validate_name(name)?;
        }

        let language = sqlx::query_as::<_, Language>(&format!(
            "UPDATE languages
             SET name = COALESCE(?2, name),
                 is_active = COALESCE(?3, is_active),
                 updated_at = ?4
             WHERE id = ?1
             RETURNING {}",
            LANGUAGE_COLUMNS
        ))
        .bind(id)
        .bind(update.name.as_deref().map(str::trim))
        .bind(update.is_active)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Language not found".to_string()))?;

        info!(code = %language.code, is_active = language.is_active, "Language updated");
        Ok(language)
    }

    /// Delete a language; its translations go with it
    pub async fn delete_language(&self, id: i64) -> ServiceResult<Language> {
        let language = sqlx::query_as::<_, Language>(&format!(
            "DELETE FROM languages WHERE id = ?1 RETURNING {}",
            LANGUAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Language not found".to_string()))?;

        info!(code = %language.code, "Language deleted");
        Ok(language)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::*;

    fn new_language(code: &str, name: &str) -> NewLanguage {
        NewLanguage {
            code: code.to_string(),
            name: name.to_string(),
            is_active: None,
        }
    }

    #[tokio::test]
    async fn test_create_language_defaults_to_active() {
        let (db, _temp_dir) = create_test_db().await;

        let language = db.create_language(new_language("en", "English")).await.unwrap();
        assert_eq!(language.code, "en");
        assert!(language.is_active);
    }

    #[tokio::test]
    async fn test_duplicate_code_conflicts() {
        let (db, _temp_dir) = create_test_db().await;

        db.create_language(new_language("en", "English")).await.unwrap();
        let err = db.create_language(new_language("en", "Other")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_code_and_name_limits() {
        let (db, _temp_dir) = create_test_db().await;

        let err = db
            .create_language(new_language("abcdefghijk", "Too long"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "code"));

        let err = db
            .create_language(new_language("xx", &"n".repeat(51)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "name"));

        // Exactly at the limits is fine
        db.create_language(new_language("abcdefghij", &"n".repeat(50)))
            .await
            .expect("Limits are inclusive");
    }

    #[tokio::test]
    async fn test_find_active_language_hides_inactive() {
        let (db, _temp_dir) = create_test_db().await;
        add_language(&db, "en", "English", true).await;
        add_language(&db, "fr", "French", false).await;

        assert!(db.find_active_language("en").await.unwrap().is_some());
        assert!(db.find_active_language("fr").await.unwrap().is_none());
        assert!(db.find_language_by_code("fr").await.unwrap().is_some());
        assert!(db.find_active_language("xx").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_partial_update() {
        let (db, _temp_dir) = create_test_db().await;
        let language = add_language(&db, "en", "English", true).await;

        let updated = db
            .update_language(
                language.id,
                LanguageUpdate {
                    name: None,
                    is_active: Some(false),
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.name, "English");
        assert!(!updated.is_active);

        let err = db
            .update_language(999, LanguageUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_delete_language() {
        let (db, _temp_dir) = create_test_db().await;
        let language = add_language(&db, "en", "English", true).await;

        db.delete_language(language.id).await.unwrap();
        assert!(db.list_languages().await.unwrap().is_empty());
        assert!(matches!(
            db.delete_language(language.id).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_language_codes_in_id_order() {
        let (db, _temp_dir) = create_test_db().await;
        add_language(&db, "en", "English", true).await;
        add_language(&db, "fr", "French", false).await;

        assert_eq!(db.language_codes().await.unwrap(), vec!["en", "fr"]);
    }
}
