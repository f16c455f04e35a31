//! Bulk seed data for load testing exports and searches.
//!
//! Keys look like `prefix.section_N.item_M`. Every key gets one row per
//! language, with the value taken from a small table of real UI strings.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::cache::ExportCache;
use crate::db::{Database, Language, Tag};
use crate::error::{ServiceError, ServiceResult};
use crate::export;
use crate::languages::NewLanguage;
use crate::tags::TagInput;

/// Rows per multi-row INSERT statement
const ROWS_PER_STATEMENT: usize = 100;
/// Upper bound on the number of translations that get tags
const MAX_TAGGED: usize = 20_000;

pub const DEFAULT_LANGUAGES: &[(&str, &str)] = &[
    ("en", "English"),
    ("fr", "French"),
    ("es", "Spanish"),
    ("de", "German"),
    ("it", "Italian"),
    ("zh", "Chinese"),
];

pub const DEFAULT_TAGS: &[&str] = &[
    "mobile",
    "desktop",
    "web",
    "admin",
    "user",
    "error",
    "success",
    "notification",
    "button",
    "form",
];

/// Translations of one UI string, keyed by language code
type SampleSet = &'static [(&'static str, &'static str)];

struct SampleGroup {
    prefix: &'static str,
    sets: &'static [SampleSet],
}

const SAMPLE_VALUES: &[SampleGroup] = &[
    SampleGroup {
        prefix: "common",
        sets: &[
            &[("en", "Save changes"), ("fr", "Enregistrer les modifications"), ("es", "Guardar cambios"), ("de", "Änderungen speichern"), ("it", "Salva modifiche"), ("zh", "保存更改")],
            &[("en", "Cancel"), ("fr", "Annuler"), ("es", "Cancelar"), ("de", "Abbrechen"), ("it", "Annulla"), ("zh", "取消")],
            &[("en", "Delete"), ("fr", "Supprimer"), ("es", "Eliminar"), ("de", "Löschen"), ("it", "Elimina"), ("zh", "删除")],
            &[("en", "Are you sure?"), ("fr", "Êtes-vous sûr ?"), ("es", "¿Está seguro?"), ("de", "Sind Sie sicher?"), ("it", "Sei sicuro?"), ("zh", "您确定吗？")],
            &[("en", "Yes"), ("fr", "Oui"), ("es", "Sí"), ("de", "Ja"), ("it", "Sì"), ("zh", "是")],
            &[("en", "No"), ("fr", "Non"), ("es", "No"), ("de", "Nein"), ("it", "No"), ("zh", "否")],
            &[("en", "Success!"), ("fr", "Succès !"), ("es", "¡Éxito!"), ("de", "Erfolg!"), ("it", "Successo!"), ("zh", "成功！")],
            &[("en", "Error occurred"), ("fr", "Une erreur est survenue"), ("es", "Ha ocurrido un error"), ("de", "Fehler aufgetreten"), ("it", "Si è verificato un errore"), ("zh", "发生错误")],
        ],
    },
    SampleGroup {
        prefix: "auth",
        sets: &[
            &[("en", "Please sign in"), ("fr", "Veuillez vous connecter"), ("es", "Por favor, inicie sesión"), ("de", "Bitte anmelden"), ("it", "Accedi"), ("zh", "请登录")],
            &[("en", "Forgot password?"), ("fr", "Mot de passe oublié ?"), ("es", "¿Olvidó su contraseña?"), ("de", "Passwort vergessen?"), ("it", "Password dimenticata?"), ("zh", "忘记密码？")],
            &[("en", "Register now"), ("fr", "Inscrivez-vous maintenant"), ("es", "Regístrese ahora"), ("de", "Jetzt registrieren"), ("it", "Registrati ora"), ("zh", "立即注册")],
            &[("en", "Invalid credentials"), ("fr", "Identifiants invalides"), ("es", "Credenciales inválidas"), ("de", "Ungültige Anmeldedaten"), ("it", "Credenziali non valide"), ("zh", "无效的凭据")],
            &[("en", "Welcome back"), ("fr", "Bon retour"), ("es", "Bienvenido de nuevo"), ("de", "Willkommen zurück"), ("it", "Bentornato"), ("zh", "欢迎回来")],
        ],
    },
    SampleGroup {
        prefix: "errors",
        sets: &[
            &[("en", "Page not found"), ("fr", "Page non trouvée"), ("es", "Página no encontrada"), ("de", "Seite nicht gefunden"), ("it", "Pagina non trovata"), ("zh", "找不到页面")],
            &[("en", "Server error"), ("fr", "Erreur serveur"), ("es", "Error del servidor"), ("de", "Serverfehler"), ("it", "Errore del server"), ("zh", "服务器错误")],
            &[("en", "Access denied"), ("fr", "Accès refusé"), ("es", "Acceso denegado"), ("de", "Zugriff verweigert"), ("it", "Accesso negato"), ("zh", "访问被拒绝")],
            &[("en", "Invalid input"), ("fr", "Entrée invalide"), ("es", "Entrada inválida"), ("de", "Ungültige Eingabe"), ("it", "Input non valido"), ("zh", "输入无效")],
            &[("en", "Please try again"), ("fr", "Veuillez réessayer"), ("es", "Por favor, inténtelo de nuevo"), ("de", "Bitte versuchen Sie es erneut"), ("it", "Per favore riprova"), ("zh", "请重试")],
        ],
    },
];

/// Value of `set` for `code`, falling back to English
fn sample_value(set: SampleSet, code: &str) -> &'static str {
    set.iter()
        .find(|(lang, _)| *lang == code)
        .or_else(|| set.iter().find(|(lang, _)| *lang == "en"))
        .map(|(_, value)| *value)
        .unwrap_or_default()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorOptions {
    /// `section_N` ranges over `1..=sections`
    pub sections: u32,
    /// `item_M` ranges over `1..=items`
    pub items: u32,
    /// Fixed seed for reproducible runs
    pub seed: Option<u64>,
    /// Rows per transaction
    pub batch_size: usize,
}

impl Default for GeneratorOptions {
    fn default() -> Self {
        Self {
            sections: 20,
            items: 100,
            seed: None,
            batch_size: 1000,
        }
    }
}

impl GeneratorOptions {
    /// Number of distinct keys these options can produce
    pub fn capacity(&self) -> usize {
        SAMPLE_VALUES.len() * self.sections as usize * self.items as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationPhase {
    Translations,
    Tags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationProgress {
    pub phase: GenerationPhase,
    pub done: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationReport {
    pub keys: usize,
    pub languages: usize,
    /// Rows actually written; existing pairs are skipped
    pub translations_inserted: u64,
    /// Rows dropped because an existing key nests above or below them
    pub skipped_clashes: usize,
    pub tagged_translations: usize,
    pub tag_links: u64,
    pub elapsed: Duration,
}

/// Stored keys of one language, with every dotted prefix of them
#[derive(Debug, Default)]
struct KeyIndex {
    keys: HashSet<String>,
    prefixes: HashSet<String>,
}

impl KeyIndex {
    fn insert(&mut self, key: &str) {
        for (at, _) in key.match_indices('.') {
            self.prefixes.insert(key[..at].to_string());
        }
        self.keys.insert(key.to_string());
    }

    /// True when `key` would be a parent or child of a stored leaf
    fn clashes(&self, key: &str) -> bool {
        self.prefixes.contains(key)
            || key
                .match_indices('.')
                .any(|(at, _)| self.keys.contains(&key[..at]))
    }
}

struct SeedRow {
    language_id: i64,
    key: String,
    value: &'static str,
}

pub struct BulkGenerator {
    db: Database,
    cache: Arc<dyn ExportCache>,
    options: GeneratorOptions,
}

impl BulkGenerator {
    pub fn new(db: Database, cache: Arc<dyn ExportCache>, options: GeneratorOptions) -> Self {
        Self { db, cache, options }
    }

    fn rng(&self) -> StdRng {
        match self.options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        }
    }

    /// Draw `count` distinct keys by rejection sampling
    fn draw_keys(&self, rng: &mut StdRng, count: usize) -> Vec<(String, SampleSet)> {
        let mut used = HashSet::with_capacity(count);
        let mut keys = Vec::with_capacity(count);

        while keys.len() < count {
            let group = &SAMPLE_VALUES[rng.random_range(0..SAMPLE_VALUES.len())];
            let key = format!(
                "{}.section_{}.item_{}",
                group.prefix,
                rng.random_range(1..=self.options.sections),
                rng.random_range(1..=self.options.items)
            );
            if !used.insert(key.clone()) {
                continue;
            }
            let set = group.sets[rng.random_range(0..group.sets.len())];
            keys.push((key, set));
        }

        keys
    }

    fn validate(&self, count: usize, languages: &[Language]) -> ServiceResult<()> {
        if count == 0 {
            return Err(ServiceError::validation("count", "The count must be at least 1."));
        }
        if self.options.sections == 0 || self.options.items == 0 {
            return Err(ServiceError::validation(
                "count",
                "Sections and items must be at least 1.",
            ));
        }
        if count > self.options.capacity() {
            return Err(ServiceError::validation(
                "count",
                format!(
                    "Only {} distinct keys can be generated with {} sections of {} items.",
                    self.options.capacity(),
                    self.options.sections,
                    self.options.items
                ),
            ));
        }
        if languages.is_empty() {
            return Err(ServiceError::validation(
                "languages",
                "At least one language is required.",
            ));
        }
        Ok(())
    }

    pub async fn generate(
        &self,
        count: usize,
        languages: &[Language],
        tags: &[Tag],
        progress: Option<&UnboundedSender<GenerationProgress>>,
    ) -> ServiceResult<GenerationReport> {
        self.validate(count, languages)?;
        let started = Instant::now();
        let mut rng = self.rng();

        let keys = self.draw_keys(&mut rng, count);
        let existing = self.existing_keys(languages).await?;
        let mut skipped_clashes = 0;
        let rows: Vec<SeedRow> = keys
            .iter()
            .flat_map(|(key, set)| {
                languages.iter().map(move |language| SeedRow {
                    language_id: language.id,
                    key: key.clone(),
                    value: sample_value(*set, &language.code),
                })
            })
            .filter(|row| {
                let clash = existing
                    .get(&row.language_id)
                    .is_some_and(|index| index.clashes(&row.key));
                if clash {
                    skipped_clashes += 1;
                }
                !clash
            })
            .collect();
        if skipped_clashes > 0 {
            warn!(skipped = skipped_clashes, "Skipping generated keys that nest with stored keys");
        }

        info!(keys = count, rows = rows.len(), "Generating translations");
        let translations_inserted = self.insert_translations(&rows, progress).await?;

        let (tagged_translations, tag_links) = if tags.is_empty() {
            (0, 0)
        } else {
            self.attach_random_tags(&mut rng, count, tags, progress).await?
        };

        if let Err(e) = export::invalidate_exports(&self.db, self.cache.as_ref()).await {
            warn!(error = %e, "Failed to invalidate export cache after generation");
        }

        let report = GenerationReport {
            keys: count,
            languages: languages.len(),
            translations_inserted,
            skipped_clashes,
            tagged_translations,
            tag_links,
            elapsed: started.elapsed(),
        };
        info!(
            inserted = report.translations_inserted,
            tag_links = report.tag_links,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Generation complete"
        );
        Ok(report)
    }

    async fn existing_keys(&self, languages: &[Language]) -> ServiceResult<HashMap<i64, KeyIndex>> {
        let mut query = QueryBuilder::<Sqlite>::new(
            "SELECT language_id, key FROM translations WHERE language_id IN (",
        );
        let mut ids = query.separated(", ");
        for language in languages {
            ids.push_bind(language.id);
        }
        query.push(")");

        let rows: Vec<(i64, String)> = query.build_query_as().fetch_all(self.db.pool()).await?;
        let mut index: HashMap<i64, KeyIndex> = HashMap::new();
        for (language_id, key) in rows {
            index.entry(language_id).or_default().insert(&key);
        }
        Ok(index)
    }

    async fn insert_translations(
        &self,
        rows: &[SeedRow],
        progress: Option<&UnboundedSender<GenerationProgress>>,
    ) -> ServiceResult<u64> {
        let now = Utc::now();
        let mut inserted = 0;
        let mut done = 0;

        for batch in rows.chunks(self.options.batch_size.max(1)) {
            let mut tx = self.db.pool().begin().await?;
            for chunk in batch.chunks(ROWS_PER_STATEMENT) {
                let mut query = QueryBuilder::<Sqlite>::new(
                    "INSERT OR IGNORE INTO translations (language_id, key, value, created_at, updated_at) ",
                );
                query.push_values(chunk, |mut row, seed| {
                    row.push_bind(seed.language_id)
                        .push_bind(seed.key.clone())
                        .push_bind(seed.value)
                        .push_bind(now)
                        .push_bind(now);
                });
                inserted += query
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(ServiceError::Transaction)?
                    .rows_affected();
            }
            tx.commit().await.map_err(ServiceError::Transaction)?;

            done += batch.len();
            report_progress(progress, GenerationPhase::Translations, done, rows.len());
        }

        Ok(inserted)
    }

    async fn attach_random_tags(
        &self,
        rng: &mut StdRng,
        count: usize,
        tags: &[Tag],
        progress: Option<&UnboundedSender<GenerationProgress>>,
    ) -> ServiceResult<(usize, u64)> {
        let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM translations ORDER BY id")
            .fetch_all(self.db.pool())
            .await?;

        let sample_size = (count / 5).min(MAX_TAGGED).min(ids.len());
        let links: Vec<(i64, i64)> = ids
            .choose_multiple(rng, sample_size)
            .flat_map(|&translation_id| {
                let per_row = rng.random_range(1..=3).min(tags.len());
                tags.choose_multiple(rng, per_row)
                    .map(move |tag| (translation_id, tag.id))
                    .collect::<Vec<_>>()
            })
            .collect();
        debug!(sample_size, links = links.len(), "Attaching random tags");

        let mut attached = 0;
        let mut done = 0;
        for batch in links.chunks(self.options.batch_size.max(1)) {
            let mut tx = self.db.pool().begin().await?;
            for chunk in batch.chunks(ROWS_PER_STATEMENT) {
                let mut query = QueryBuilder::<Sqlite>::new(
                    "INSERT OR IGNORE INTO translation_tag (translation_id, tag_id) ",
                );
                query.push_values(chunk, |mut row, (translation_id, tag_id)| {
                    row.push_bind(*translation_id).push_bind(*tag_id);
                });
                attached += query
                    .build()
                    .execute(&mut *tx)
                    .await
                    .map_err(ServiceError::Transaction)?
                    .rows_affected();
            }
            tx.commit().await.map_err(ServiceError::Transaction)?;

            done += batch.len();
            report_progress(progress, GenerationPhase::Tags, done, links.len());
        }

        Ok((sample_size, attached))
    }
}

fn report_progress(
    progress: Option<&UnboundedSender<GenerationProgress>>,
    phase: GenerationPhase,
    done: usize,
    total: usize,
) {
    if let Some(sender) = progress {
        // A dropped receiver only means nobody is watching
        let _ = sender.send(GenerationProgress { phase, done, total });
    }
}

impl Database {
    /// Create the default languages when none exist
    pub async fn ensure_default_languages(&self) -> ServiceResult<Vec<Language>> {
        let existing = self.list_languages().await?;
        if !existing.is_empty() {
            return Ok(existing);
        }

        info!("Creating default languages");
        let mut created = Vec::with_capacity(DEFAULT_LANGUAGES.len());
        for (code, name) in DEFAULT_LANGUAGES {
            created.push(
                self.create_language(NewLanguage {
                    code: code.to_string(),
                    name: name.to_string(),
                    is_active: Some(true),
                })
                .await?,
            );
        }
        Ok(created)
    }

    /// Create the default tags when none exist
    pub async fn ensure_default_tags(&self) -> ServiceResult<Vec<Tag>> {
        let existing = self.list_tags().await?;
        if !existing.is_empty() {
            return Ok(existing.into_iter().map(|t| t.tag).collect());
        }

        info!("Creating default tags");
        let mut created = Vec::with_capacity(DEFAULT_TAGS.len());
        for name in DEFAULT_TAGS {
            created.push(
                self.create_tag(TagInput {
                    name: name.to_string(),
                })
                .await?,
            );
        }
        Ok(created)
    }

    pub async fn translation_count(&self) -> ServiceResult<i64> {
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM translations")
            .fetch_one(self.pool())
            .await?)
    }
}
