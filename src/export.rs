//! Per-language exports for front-end consumption.
//!
//! Both shapes are served from the [`ExportCache`]; the multi-language export
//! reuses the flat snapshot of each language so the two never diverge.

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::cache::{flat_key, nested_key, CachedExport, ExportCache, KeyValue, TAGS_KEY};
use crate::db::{Database, Language};
use crate::error::{ServiceError, ServiceResult};

const LANGUAGE_UNAVAILABLE: &str = "Language not found or inactive";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportedLanguage {
    pub code: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlatExport {
    pub language: ExportedLanguage,
    pub translations: Arc<Vec<KeyValue>>,
}

/// Language code to `[key, value]` pairs
pub type MultiExport = BTreeMap<String, Vec<(String, String)>>;

/// Build a tree from dotted keys.
///
/// A key that is both a leaf and a prefix of another key cannot be
/// represented, so the whole build fails with `Conflict`.
pub fn nest<I>(entries: I) -> ServiceResult<Map<String, Value>>
where
    I: IntoIterator<Item = KeyValue>,
{
    let mut root = Map::new();

    for KeyValue { key, value } in entries {
        let mut segments = key.split('.').peekable();
        let mut node = &mut root;

        while let Some(segment) = segments.next() {
            if segments.peek().is_none() {
                if node.contains_key(segment) {
                    return Err(nesting_conflict(&key));
                }
                node.insert(segment.to_string(), Value::String(value));
                break;
            }

            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match child {
                Value::Object(map) => map,
                _ => return Err(nesting_conflict(&key)),
            };
        }
    }

    Ok(root)
}

fn nesting_conflict(key: &str) -> ServiceError {
    ServiceError::Conflict(format!(
        "Key '{}' collides with another key when nested",
        key
    ))
}

/// Drop every cached export of every language.
///
/// The tag listing goes too, since its counts follow translation writes.
pub async fn invalidate_exports(db: &Database, cache: &dyn ExportCache) -> ServiceResult<()> {
    cache.invalidate(TAGS_KEY);
    let codes = db.language_codes().await?;
    for code in &codes {
        cache.invalidate(&flat_key(code));
        cache.invalidate(&nested_key(code));
    }
    debug!(languages = codes.len(), "Export cache invalidated");
    Ok(())
}

#[derive(Clone)]
pub struct ExportService {
    db: Database,
    cache: Arc<dyn ExportCache>,
}

impl ExportService {
    pub fn new(db: Database, cache: Arc<dyn ExportCache>) -> Self {
        Self { db, cache }
    }

    async fn active_language(&self, code: &str) -> ServiceResult<Language> {
        self.db
            .find_active_language(code)
            .await?
            .ok_or_else(|| ServiceError::NotFound(LANGUAGE_UNAVAILABLE.to_string()))
    }

    async fn load_pairs(&self, language_id: i64) -> ServiceResult<Vec<KeyValue>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM translations WHERE language_id = ? ORDER BY id",
        )
        .bind(language_id)
        .fetch_all(self.db.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|(key, value)| KeyValue { key, value })
            .collect())
    }

    async fn flat_pairs(&self, language: &Language) -> ServiceResult<Arc<Vec<KeyValue>>> {
        let key = flat_key(&language.code);
        if let Some(CachedExport::Flat(pairs)) = self.cache.get(&key) {
            return Ok(pairs);
        }

        let pairs = Arc::new(self.load_pairs(language.id).await?);
        self.cache.set(&key, CachedExport::Flat(pairs.clone()));
        info!(language = %language.code, count = pairs.len(), "Flat export built");
        Ok(pairs)
    }

    pub async fn export_flat(&self, code: &str) -> ServiceResult<FlatExport> {
        let language = self.active_language(code).await?;
        let translations = self.flat_pairs(&language).await?;

        Ok(FlatExport {
            language: ExportedLanguage {
                code: language.code,
                name: language.name,
            },
            translations,
        })
    }

    pub async fn export_nested(&self, code: &str) -> ServiceResult<Arc<Map<String, Value>>> {
        let language = self.active_language(code).await?;
        let key = nested_key(&language.code);
        if let Some(CachedExport::Nested(tree)) = self.cache.get(&key) {
            return Ok(tree);
        }

        let tree = Arc::new(nest(self.load_pairs(language.id).await?)?);
        self.cache.set(&key, CachedExport::Nested(tree.clone()));
        info!(language = %language.code, "Nested export built");
        Ok(tree)
    }

    /// Export several languages at once; unknown or inactive codes are skipped
    pub async fn export_multi(&self, codes: Option<&str>) -> ServiceResult<MultiExport> {
        let codes: Vec<&str> = codes
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .collect();

        if codes.is_empty() {
            return Err(ServiceError::validation(
                "languages",
                "The languages field is required.",
            ));
        }

        let mut result = MultiExport::new();
        for code in codes {
            let Some(language) = self.db.find_active_language(code).await? else {
                debug!(code, "Skipping unavailable language in multi export");
                continue;
            };

            let pairs = self.flat_pairs(&language).await?;
            result.insert(
                language.code,
                pairs
                    .iter()
                    .map(|kv| (kv.key.clone(), kv.value.clone()))
                    .collect(),
            );
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{NoopCache, TtlCache};
    use crate::db::test_support::*;
    use crate::store::{NewTranslation, TranslationStore};
    use proptest::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    fn kv(key: &str, value: &str) -> KeyValue {
        KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        }
    }

    fn flatten(tree: &Map<String, Value>) -> Vec<(String, String)> {
        fn walk(prefix: &str, node: &Map<String, Value>, out: &mut Vec<(String, String)>) {
            for (segment, child) in node {
                let key = if prefix.is_empty() {
                    segment.clone()
                } else {
                    format!("{}.{}", prefix, segment)
                };
                match child {
                    Value::Object(map) => walk(&key, map, out),
                    Value::String(s) => out.push((key, s.clone())),
                    other => panic!("unexpected node {other:?}"),
                }
            }
        }

        let mut out = Vec::new();
        walk("", tree, &mut out);
        out.sort();
        out
    }

    async fn insert(store: &TranslationStore, language_id: i64, key: &str, value: &str) {
        store
            .create(NewTranslation {
                language_id,
                key: key.to_string(),
                value: value.to_string(),
                tags: None,
            })
            .await
            .unwrap();
    }

    #[test]
    fn test_nest_builds_tree() {
        let tree = nest(vec![
            kv("menu.home.title", "Home"),
            kv("menu.home.subtitle", "Welcome"),
            kv("footer", "Bye"),
        ])
        .unwrap();

        assert_eq!(
            Value::Object(tree),
            json!({
                "menu": { "home": { "title": "Home", "subtitle": "Welcome" } },
                "footer": "Bye"
            })
        );
    }

    #[test]
    fn test_nest_rejects_leaf_prefix_collision() {
        let leaf_first = nest(vec![kv("a.b", "1"), kv("a.b.c", "2")]);
        assert!(matches!(leaf_first, Err(ServiceError::Conflict(_))));

        let branch_first = nest(vec![kv("a.b.c", "2"), kv("a.b", "1")]);
        assert!(matches!(branch_first, Err(ServiceError::Conflict(_))));
    }

    #[test]
    fn test_nest_empty() {
        assert!(nest(Vec::<KeyValue>::new()).unwrap().is_empty());
    }

    fn collision_free_keys() -> impl Strategy<Value = Vec<(String, String)>> {
        // Fixed depth keys can never be a prefix of one another
        prop::collection::btree_map("[a-z]{1,3}\\.[a-z]{1,3}\\.[a-z]{1,3}", "[ -~]{0,8}", 0..40)
            .prop_map(|map| map.into_iter().collect())
    }

    proptest! {
        #[test]
        fn prop_flattening_nested_restores_flat(pairs in collision_free_keys()) {
            let tree = nest(pairs.iter().map(|(k, v)| kv(k, v))).unwrap();
            let mut expected = pairs.clone();
            expected.sort();
            prop_assert_eq!(flatten(&tree), expected);
        }
    }

    #[tokio::test]
    async fn test_export_flat_and_nested_agree() {
        let (db, _temp_dir) = create_test_db().await;
        let en = add_language(&db, "en", "English", true).await;
        let store = TranslationStore::new(db.clone(), Arc::new(NoopCache));
        insert(&store, en.id, "menu.home.title", "Home").await;
        insert(&store, en.id, "menu.home.subtitle", "Welcome").await;

        let exporter = ExportService::new(db, Arc::new(NoopCache));
        let flat = exporter.export_flat("en").await.unwrap();
        assert_eq!(flat.language, ExportedLanguage { code: "en".into(), name: "English".into() });
        assert_eq!(
            *flat.translations,
            vec![kv("menu.home.title", "Home"), kv("menu.home.subtitle", "Welcome")]
        );

        let nested = exporter.export_nested("en").await.unwrap();
        assert_eq!(
            Value::Object((*nested).clone()),
            json!({ "menu": { "home": { "title": "Home", "subtitle": "Welcome" } } })
        );

        let mut from_flat: Vec<(String, String)> = flat
            .translations
            .iter()
            .map(|kv| (kv.key.clone(), kv.value.clone()))
            .collect();
        from_flat.sort();
        assert_eq!(flatten(&nested), from_flat);
    }

    #[tokio::test]
    async fn test_unknown_or_inactive_language_not_found() {
        let (db, _temp_dir) = create_test_db().await;
        add_language(&db, "de", "German", false).await;
        let exporter = ExportService::new(db, Arc::new(NoopCache));

        assert!(matches!(exporter.export_flat("xx").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(exporter.export_flat("de").await, Err(ServiceError::NotFound(_))));
        assert!(matches!(exporter.export_nested("xx").await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_nested_export_surfaces_rows_written_behind_the_api() {
        let (db, _temp_dir) = create_test_db().await;
        let en = add_language(&db, "en", "English", true).await;
        for key in ["a.b", "a.b.c"] {
            sqlx::query("INSERT INTO translations (language_id, key, value, created_at, updated_at) VALUES (?, ?, 'x', datetime('now'), datetime('now'))")
                .bind(en.id)
                .bind(key)
                .execute(db.pool())
                .await
                .unwrap();
        }

        let exporter = ExportService::new(db, Arc::new(NoopCache));
        assert!(matches!(exporter.export_nested("en").await, Err(ServiceError::Conflict(_))));
        assert_eq!(exporter.export_flat("en").await.unwrap().translations.len(), 2);
    }

    #[tokio::test]
    async fn test_export_multi() {
        let (db, _temp_dir) = create_test_db().await;
        let en = add_language(&db, "en", "English", true).await;
        let fr = add_language(&db, "fr", "French", true).await;
        add_language(&db, "de", "German", false).await;
        let store = TranslationStore::new(db.clone(), Arc::new(NoopCache));
        insert(&store, en.id, "welcome.message", "Welcome").await;
        insert(&store, fr.id, "welcome.message", "Bienvenue").await;

        let exporter = ExportService::new(db, Arc::new(NoopCache));
        let result = exporter.export_multi(Some("en, fr,de,xx")).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(result["en"], vec![("welcome.message".to_string(), "Welcome".to_string())]);
        assert_eq!(result["fr"], vec![("welcome.message".to_string(), "Bienvenue".to_string())]);

        for missing in [None, Some(""), Some(" , ")] {
            let err = exporter.export_multi(missing).await.unwrap_err();
            assert!(matches!(err, ServiceError::Validation { ref field, .. } if field == "languages"));
        }
    }

    #[tokio::test]
    async fn test_cached_snapshot_served_until_ttl_expires() {
        let (db, _temp_dir) = create_test_db().await;
        let en = add_language(&db, "en", "English", true).await;
        let store = TranslationStore::new(db.clone(), Arc::new(NoopCache));
        insert(&store, en.id, "greeting", "Hello").await;

        let cache = Arc::new(TtlCache::new(Duration::from_millis(200)));
        let exporter = ExportService::new(db.clone(), cache.clone());
        assert_eq!(exporter.export_flat("en").await.unwrap().translations[0].value, "Hello");

        // This store does not share the exporter's cache, so nothing is invalidated
        let row = db.translation_details(1).await.unwrap();
        store
            .update(
                row.translation.id,
                crate::store::TranslationUpdate {
                    value: Some("Hi".to_string()),
                    tags: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(exporter.export_flat("en").await.unwrap().translations[0].value, "Hello");
        let multi = exporter.export_multi(Some("en")).await.unwrap();
        assert_eq!(multi["en"][0].1, "Hello", "Multi export shares the flat snapshot");

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(exporter.export_flat("en").await.unwrap().translations[0].value, "Hi");
        assert!(cache.stats().hits >= 2);
    }

    #[tokio::test]
    async fn test_invalidate_exports_clears_every_language() {
        let (db, _temp_dir) = create_test_db().await;
        add_language(&db, "en", "English", true).await;
        add_language(&db, "fr", "French", true).await;
        let cache = TtlCache::new(Duration::from_secs(60));
        for code in ["en", "fr"] {
            cache.set(&flat_key(code), CachedExport::Flat(Arc::new(vec![])));
            cache.set(&nested_key(code), CachedExport::Nested(Arc::new(Map::new())));
        }
        cache.set(TAGS_KEY, CachedExport::Tags(Arc::new(vec![])));

        invalidate_exports(&db, &cache).await.unwrap();

        assert_eq!(cache.stats().entries, 0);
        assert_eq!(cache.stats().invalidations, 5);
    }
}
