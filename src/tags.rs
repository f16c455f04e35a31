//! Tags and the translation↔tag association.
//!
//! Associations are only ever replaced wholesale through [`sync`], which runs
//! on the caller's connection so it can share a transaction with the
//! translation write that triggered it.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

use crate::db::{Database, Tag};
use crate::error::{ServiceError, ServiceResult};

const TAG_COLUMNS: &str = "id, name, created_at, updated_at";

/// Validated, de-duplicated tag names in their original order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagNames(Vec<String>);

impl TagNames {
    pub fn parse(names: Vec<String>) -> ServiceResult<Self> {
        let mut seen = HashSet::new();
        let mut unique = Vec::with_capacity(names.len());

        for name in names {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(ServiceError::validation("tags", "Tag names must not be empty."));
            }
            if seen.insert(name.clone()) {
                unique.push(name);
            }
        }

        Ok(Self(unique))
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, FromRow)]
pub struct TagWithCount {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub tag: Tag,
    pub translations_count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagInput {
    pub name: String,
}

#[derive(FromRow)]
struct TaggedRow {
    translation_id: i64,
    #[sqlx(flatten)]
    tag: Tag,
}

/// Find or create one tag by name.
///
/// The insert is a no-op when the name exists, so concurrent callers race on
/// the UNIQUE constraint rather than on a read-then-write gap.
async fn upsert_tag(conn: &mut SqliteConnection, name: &str) -> Result<Tag, sqlx::Error> {
    let now = Utc::now();
    sqlx::query(
        "INSERT INTO tags (name, created_at, updated_at) VALUES (?1, ?2, ?2)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(name)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    sqlx::query_as::<_, Tag>(&format!("SELECT {} FROM tags WHERE name = ?1", TAG_COLUMNS))
        .bind(name)
        .fetch_one(&mut *conn)
        .await
}

/// Replace a translation's tag set with exactly `names`.
///
/// Links outside the target set are removed, missing ones added, and the
/// overlap is left untouched. Returns the tags in input order.
pub async fn sync(
    conn: &mut SqliteConnection,
    translation_id: i64,
    names: &TagNames,
) -> Result<Vec<Tag>, sqlx::Error> {
    let mut tags = Vec::with_capacity(names.len());
    for name in names.iter() {
        tags.push(upsert_tag(conn, name).await?);
    }

    let mut delete = QueryBuilder::<Sqlite>::new(
        "DELETE FROM translation_tag WHERE translation_id = ",
    );
    delete.push_bind(translation_id);
    if !tags.is_empty() {
        delete.push(" AND tag_id NOT IN (");
        let mut ids = delete.separated(", ");
        for tag in &tags {
            ids.push_bind(tag.id);
        }
        ids.push_unseparated(")");
    }
    let removed = delete.build().execute(&mut *conn).await?.rows_affected();

    let mut added = 0;
    for tag in &tags {
        added += sqlx::query(
            "INSERT INTO translation_tag (translation_id, tag_id) VALUES (?1, ?2)
             ON CONFLICT DO NOTHING",
        )
        .bind(translation_id)
        .bind(tag.id)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    }

    debug!(translation_id, added, removed, "Tags synced");
    Ok(tags)
}

/// Remove every tag link of a translation
pub async fn detach_all(conn: &mut SqliteConnection, translation_id: i64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM translation_tag WHERE translation_id = ?1")
        .bind(translation_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Load the tags of many translations in one query
pub async fn tags_for(
    pool: &SqlitePool,
    translation_ids: &[i64],
) -> Result<HashMap<i64, Vec<Tag>>, sqlx::Error> {
    let mut by_translation: HashMap<i64, Vec<Tag>> = HashMap::new();
    if translation_ids.is_empty() {
        return Ok(by_translation);
    }

    let mut query = QueryBuilder::<Sqlite>::new(
        "SELECT tt.translation_id, g.id, g.name, g.created_at, g.updated_at
         FROM translation_tag tt
         JOIN tags g ON g.id = tt.tag_id
         WHERE tt.translation_id IN (",
    );
    let mut ids = query.separated(", ");
    for id in translation_ids {
        ids.push_bind(*id);
    }
    ids.push_unseparated(") ORDER BY g.id");

    let rows = query.build_query_as::<TaggedRow>().fetch_all(pool).await?;
    for row in rows {
        by_translation.entry(row.translation_id).or_default().push(row.tag);
    }
    Ok(by_translation)
}

fn tag_conflict() -> ServiceError {
    ServiceError::Conflict("The name has already been taken.".to_string())
}

fn validate_tag_name(name: &str) -> ServiceResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::validation("name", "The name field is required."));
    }
    Ok(name)
}

impl Database {
    /// Replace a translation's tags in a transaction of its own
    pub async fn sync_tags(&self, translation_id: i64, names: Vec<String>) -> ServiceResult<Vec<Tag>> {
        let names = TagNames::parse(names)?;
        self.translation_row(translation_id).await?;

        let mut tx = self.pool().begin().await?;
        let tags = sync(&mut *tx, translation_id, &names)
            .await
            .map_err(|e| ServiceError::from_write(e, "Tag already exists"))?;
        tx.commit().await.map_err(ServiceError::Transaction)?;

        Ok(tags)
    }

    pub async fn list_tags(&self) -> ServiceResult<Vec<TagWithCount>> {
        let tags = sqlx::query_as::<_, TagWithCount>(
            "SELECT g.id, g.name, g.created_at, g.updated_at,
                    COUNT(tt.translation_id) AS translations_count
             FROM tags g
             LEFT JOIN translation_tag tt ON tt.tag_id = g.id
             GROUP BY g.id
             ORDER BY g.id",
        )
        .fetch_all(self.pool())
        .await?;
        Ok(tags)
    }

    pub async fn get_tag(&self, id: i64) -> ServiceResult<TagWithCount> {
        sqlx::query_as::<_, TagWithCount>(
            "SELECT g.id, g.name, g.created_at, g.updated_at,
                    (SELECT COUNT(*) FROM translation_tag tt WHERE tt.tag_id = g.id)
                        AS translations_count
             FROM tags g
             WHERE g.id = ?1",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await?
        .ok_or_else(|| ServiceError::NotFound("Tag not found".to_string()))
    }

    pub async fn create_tag(&self, input: TagInput) -> ServiceResult<Tag> {
        let name = validate_tag_name(&input.name)?;

        let tag = sqlx::query_as::<_, Tag>(&format!(
            "INSERT INTO tags (name, created_at, updated_at) VALUES (?1, ?2, ?2) RETURNING {}",
            TAG_COLUMNS
        ))
        .bind(name)
        .bind(Utc::now())
        .fetch_one(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => tag_conflict(),
            other => ServiceError::Database(other),
        })?;

        info!(name = %tag.name, id = tag.id, "Tag created");
        Ok(tag)
    }

    pub async fn rename_tag(&self, id: i64, input: TagInput) -> ServiceResult<Tag> {
        let name = validate_tag_name(&input.name)?;

        sqlx::query_as::<_, Tag>(&format!(
            "UPDATE tags SET name = ?2, updated_at = ?3 WHERE id = ?1 RETURNING {}",
            TAG_COLUMNS
        ))
        .bind(id)
        .bind(name)
        .bind(Utc::now())
        .fetch_optional(self.pool())
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => tag_conflict(),
            other => ServiceError::Database(other),
        })?
        .ok_or_else(|| ServiceError::NotFound("Tag not found".to_string()))
    }

    /// Delete a tag; its associations go with it
    pub async fn delete_tag(&self, id: i64) -> ServiceResult<()> {
        let result = sqlx::query("DELETE FROM tags WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServiceError::NotFound("Tag not found".to_string()));
        }
        info!(id, "Tag deleted");
        Ok(())
    }
}
