//! Filtered, paginated reads over translations.
//!
//! Each page costs three queries regardless of its size: the count, the page
//! rows joined with their language, and the tags of every row on the page.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::db::{Database, Language, Translation, TranslationDetails};
use crate::error::{ServiceError, ServiceResult};
use crate::tags::tags_for;

pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 100;
pub const MIN_SEARCH_LEN: usize = 2;

/// Optional filters, combined with AND
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranslationFilters {
    /// Substring of the key
    pub key: Option<String>,
    /// Substring of the value
    pub value: Option<String>,
    /// Exact language code
    pub language: Option<String>,
    /// At least one of these tag names
    pub tags: Vec<String>,
    /// Substring of either key or value
    pub text: Option<String>,
}

impl TranslationFilters {
    /// Parse the comma-separated `tags` parameter, dropping blanks
    pub fn parse_tags(raw: &str) -> Vec<String> {
        raw.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl PageRequest {
    pub fn new(page: Option<u32>, per_page: Option<u32>) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            per_page: per_page.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE),
        }
    }

    fn offset(&self) -> i64 {
        (self.page as i64 - 1) * self.per_page as i64
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(None, None)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub current_page: u32,
    pub per_page: u32,
    pub total: i64,
    pub last_page: u32,
    pub from: Option<i64>,
    pub to: Option<i64>,
    pub data: Vec<T>,
}

impl<T> Page<T> {
    fn new(data: Vec<T>, request: PageRequest, total: i64) -> Self {
        let per_page = request.per_page as i64;
        let last_page = ((total + per_page - 1) / per_page).max(1) as u32;
        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            let from = request.offset() + 1;
            (Some(from), Some(from + data.len() as i64 - 1))
        };

        Self {
            current_page: request.page,
            per_page: request.per_page,
            total,
            last_page,
            from,
            to,
            data,
        }
    }
}

/// A translation row joined with its language
#[derive(FromRow)]
struct JoinedRow {
    id: i64,
    language_id: i64,
    key: String,
    value: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    language_code: String,
    language_name: String,
    language_is_active: bool,
    language_created_at: DateTime<Utc>,
    language_updated_at: DateTime<Utc>,
}

impl JoinedRow {
    fn split(self) -> (Translation, Language) {
        (
            Translation {
                id: self.id,
                language_id: self.language_id,
                key: self.key,
                value: self.value,
                created_at: self.created_at,
                updated_at: self.updated_at,
            },
            Language {
                id: self.language_id,
                code: self.language_code,
                name: self.language_name,
                is_active: self.language_is_active,
                created_at: self.language_created_at,
                updated_at: self.language_updated_at,
            },
        )
    }
}

const JOINED_SELECT: &str = "SELECT t.id, t.language_id, t.key, t.value, t.created_at, t.updated_at,
        l.code AS language_code, l.name AS language_name, l.is_active AS language_is_active,
        l.created_at AS language_created_at, l.updated_at AS language_updated_at
 FROM translations t
 JOIN languages l ON l.id = t.language_id
 WHERE 1 = 1";

const COUNT_SELECT: &str = "SELECT COUNT(*)
 FROM translations t
 JOIN languages l ON l.id = t.language_id
 WHERE 1 = 1";

/// `LIKE` pattern matching `needle` anywhere, with wildcards in it escaped
fn contains_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

fn push_filters(query: &mut QueryBuilder<'_, Sqlite>, filters: &TranslationFilters) {
    if let Some(key) = &filters.key {
        query.push(" AND t.key LIKE ");
        query.push_bind(contains_pattern(key));
        query.push(" ESCAPE '\\'");
    }

    if let Some(value) = &filters.value {
        query.push(" AND t.value LIKE ");
        query.push_bind(contains_pattern(value));
        query.push(" ESCAPE '\\'");
    }

    if let Some(text) = &filters.text {
        let pattern = contains_pattern(text);
        query.push(" AND (t.key LIKE ");
        query.push_bind(pattern.clone());
        query.push(" ESCAPE '\\' OR t.value LIKE ");
        query.push_bind(pattern);
        query.push(" ESCAPE '\\')");
    }

    if let Some(code) = &filters.language {
        query.push(" AND l.code = ");
        query.push_bind(code.clone());
    }

    if !filters.tags.is_empty() {
        query.push(
            " AND EXISTS (SELECT 1 FROM translation_tag tt
                          JOIN tags g ON g.id = tt.tag_id
                          WHERE tt.translation_id = t.id AND g.name IN (",
        );
        let mut names = query.separated(", ");
        for name in &filters.tags {
            names.push_bind(name.clone());
        }
        names.push_unseparated("))");
    }
}

impl Database {
    /// Attach the tag sets of `rows` with a single query
    async fn with_tags(&self, rows: Vec<JoinedRow>) -> ServiceResult<Vec<TranslationDetails>> {
        let ids: Vec<i64> = rows.iter().map(|row| row.id).collect();
        let mut tags = tags_for(self.pool(), &ids).await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let (translation, language) = row.split();
                let tags = tags.remove(&translation.id).unwrap_or_default();
                TranslationDetails {
                    translation,
                    language,
                    tags,
                }
            })
            .collect())
    }

    pub async fn translation_details(&self, id: i64) -> ServiceResult<TranslationDetails> {
        let mut query = QueryBuilder::<Sqlite>::new(JOINED_SELECT);
        query.push(" AND t.id = ");
        query.push_bind(id);

        let row = query
            .build_query_as::<JoinedRow>()
            .fetch_optional(self.pool())
            .await?
            .ok_or_else(|| ServiceError::NotFound("Translation not found".to_string()))?;

        let mut details = self.with_tags(vec![row]).await?;
        details
            .pop()
            .ok_or_else(|| ServiceError::NotFound("Translation not found".to_string()))
    }

    pub async fn list_translations(
        &self,
        filters: &TranslationFilters,
        page: PageRequest,
    ) -> ServiceResult<Page<TranslationDetails>> {
        let mut count = QueryBuilder::<Sqlite>::new(COUNT_SELECT);
        push_filters(&mut count, filters);
        let total = count
            .build_query_scalar::<i64>()
            .fetch_one(self.pool())
            .await?;

        let mut query = QueryBuilder::<Sqlite>::new(JOINED_SELECT);
        push_filters(&mut query, filters);
        query.push(" ORDER BY t.id LIMIT ");
        query.push_bind(page.per_page as i64);
        query.push(" OFFSET ");
        query.push_bind(page.offset());

        let rows = query
            .build_query_as::<JoinedRow>()
            .fetch_all(self.pool())
            .await?;

        let data = self.with_tags(rows).await?;
        Ok(Page::new(data, page, total))
    }

    /// Free-text search over keys and values
    pub async fn search_translations(
        &self,
        text: &str,
        language: Option<&str>,
        page: PageRequest,
    ) -> ServiceResult<Page<TranslationDetails>> {
        if text.chars().count() < MIN_SEARCH_LEN {
            return Err(ServiceError::validation(
                "query",
                format!("The query must be at least {} characters.", MIN_SEARCH_LEN),
            ));
        }

        if let Some(code) = language {
            if self.find_language_by_code(code).await?.is_none() {
                return Err(ServiceError::validation(
                    "language",
                    "The selected language is invalid.",
                ));
            }
        }

        let filters = TranslationFilters {
            text: Some(text.to_string()),
            language: language.map(str::to_string),
            ..Default::default()
        };
        self.list_translations(&filters, page).await
    }
}
