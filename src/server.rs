//! HTTP surface.
//!
//! Management routes sit behind a bearer token; exports and `/health` are
//! public so front ends can fetch them directly.

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::cache::{flat_key, nested_key, CachedExport, ExportCache, LANGUAGES_KEY, TAGS_KEY};
use crate::config::Config;
use crate::db::{Database, Language};
use crate::error::{ServiceError, ServiceResult};
use crate::export::{self, ExportService};
use crate::extract::{page_number, PathParam, Payload, QueryParams};
use crate::languages::{LanguageUpdate, NewLanguage};
use crate::query::{PageRequest, TranslationFilters};
use crate::security::is_authorized;
use crate::store::{NewTranslation, TranslationStore, TranslationUpdate};
use crate::tags::{TagInput, TagWithCount};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub store: TranslationStore,
    pub exporter: ExportService,
    pub cache: Arc<dyn ExportCache>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db: Database, cache: Arc<dyn ExportCache>, config: Config) -> Self {
        Self {
            store: TranslationStore::new(db.clone(), cache.clone()),
            exporter: ExportService::new(db.clone(), cache.clone()),
            db,
            cache,
            config: Arc::new(config),
        }
    }

    async fn languages(&self) -> ServiceResult<Arc<Vec<Language>>> {
        if let Some(CachedExport::Languages(languages)) = self.cache.get(LANGUAGES_KEY) {
            return Ok(languages);
        }
        let languages = Arc::new(self.db.list_languages().await?);
        self.cache
            .set(LANGUAGES_KEY, CachedExport::Languages(languages.clone()));
        Ok(languages)
    }

    async fn tags(&self) -> ServiceResult<Arc<Vec<TagWithCount>>> {
        if let Some(CachedExport::Tags(tags)) = self.cache.get(TAGS_KEY) {
            return Ok(tags);
        }
        let tags = Arc::new(self.db.list_tags().await?);
        self.cache.set(TAGS_KEY, CachedExport::Tags(tags.clone()));
        Ok(tags)
    }

    async fn invalidate_exports(&self) {
        if let Err(e) = export::invalidate_exports(&self.db, self.cache.as_ref()).await {
            warn!(error = %e, "Failed to invalidate export cache, entries expire on their own");
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/translations", get(list_translations).post(create_translation))
        .route("/translations/search", get(search_translations))
        .route(
            "/translations/:id",
            get(show_translation)
                .put(update_translation)
                .delete(delete_translation),
        )
        .route("/languages", get(list_languages).post(create_language))
        .route(
            "/languages/:id",
            get(show_language).put(update_language).delete(delete_language),
        )
        .route("/tags", get(list_tags).post(create_tag))
        .route("/tags/:id", get(show_tag).put(rename_tag).delete(delete_tag))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let public = Router::new()
        .route("/export", get(export_multi))
        .route("/export/:language", get(export_flat))
        .route("/export/:language/nested", get(export_nested))
        .route("/health", get(health));

    public
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until Ctrl-C
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let addr = listener.local_addr().context("Failed to read listener address")?;
    info!("Listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await
        .context("Server error")
}

async fn require_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ServiceError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    if !is_authorized(header, &state.config.api_token) {
        warn!(path = %request.uri().path(), "Rejected request without a valid token");
        return Err(ServiceError::Unauthenticated);
    }

    Ok(next.run(request).await)
}

// ==================== Translations ====================

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    key: Option<String>,
    value: Option<String>,
    language: Option<String>,
    tags: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    query: Option<String>,
    language: Option<String>,
    page: Option<String>,
    per_page: Option<String>,
}

/// Blank query parameters count as absent
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn page_request(page: Option<&str>, per_page: Option<&str>) -> ServiceResult<PageRequest> {
    Ok(PageRequest::new(
        page_number("page", page)?,
        page_number("per_page", per_page)?,
    ))
}

async fn list_translations(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<ListParams>,
) -> ServiceResult<impl IntoResponse> {
    let filters = TranslationFilters {
        key: present(params.key),
        value: present(params.value),
        language: present(params.language),
        tags: params
            .tags
            .as_deref()
            .map(TranslationFilters::parse_tags)
            .unwrap_or_default(),
        text: None,
    };
    let page = page_request(params.page.as_deref(), params.per_page.as_deref())?;

    Ok(Json(state.db.list_translations(&filters, page).await?))
}

async fn search_translations(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<SearchParams>,
) -> ServiceResult<impl IntoResponse> {
    let text = params.query.unwrap_or_default();
    let language = present(params.language);
    let page = page_request(params.page.as_deref(), params.per_page.as_deref())?;

    Ok(Json(
        state
            .db
            .search_translations(text.trim(), language.as_deref(), page)
            .await?,
    ))
}

async fn create_translation(
    State(state): State<AppState>,
    Payload(new): Payload<NewTranslation>,
) -> ServiceResult<impl IntoResponse> {
    let created = state.store.create(new).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn show_translation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.store.get(id).await?))
}

async fn update_translation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    Payload(update): Payload<TranslationUpdate>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.store.update(id, update).await?))
}

async fn delete_translation(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<StatusCode> {
    state.store.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Exports ====================

#[derive(Debug, Default, Deserialize)]
struct MultiExportParams {
    languages: Option<String>,
}

async fn export_flat(
    State(state): State<AppState>,
    PathParam(language): PathParam<String>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.exporter.export_flat(&language).await?))
}

async fn export_nested(
    State(state): State<AppState>,
    PathParam(language): PathParam<String>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.exporter.export_nested(&language).await?))
}

async fn export_multi(
    State(state): State<AppState>,
    QueryParams(params): QueryParams<MultiExportParams>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(
        state
            .exporter
            .export_multi(params.languages.as_deref())
            .await?,
    ))
}

// ==================== Languages ====================

async fn list_languages(State(state): State<AppState>) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.languages().await?))
}

async fn show_language(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.db.get_language(id).await?))
}

async fn create_language(
    State(state): State<AppState>,
    Payload(new): Payload<NewLanguage>,
) -> ServiceResult<impl IntoResponse> {
    let language = state.db.create_language(new).await?;
    state.cache.invalidate(LANGUAGES_KEY);
    Ok((StatusCode::CREATED, Json(language)))
}

async fn update_language(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    Payload(update): Payload<LanguageUpdate>,
) -> ServiceResult<impl IntoResponse> {
    let language = state.db.update_language(id, update).await?;
    state.cache.invalidate(LANGUAGES_KEY);
    state.invalidate_exports().await;
    Ok(Json(language))
}

async fn delete_language(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<StatusCode> {
    let language = state.db.delete_language(id).await?;
    state.cache.invalidate(LANGUAGES_KEY);
    // Its translations went with it
    state.cache.invalidate(TAGS_KEY);
    // Its code is no longer listed, so drop its entries by name
    state.cache.invalidate(&flat_key(&language.code));
    state.cache.invalidate(&nested_key(&language.code));
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Tags ====================

async fn list_tags(State(state): State<AppState>) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.tags().await?))
}

async fn show_tag(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<impl IntoResponse> {
    Ok(Json(state.db.get_tag(id).await?))
}

async fn create_tag(
    State(state): State<AppState>,
    Payload(input): Payload<TagInput>,
) -> ServiceResult<impl IntoResponse> {
    let tag = state.db.create_tag(input).await?;
    state.cache.invalidate(TAGS_KEY);
    Ok((StatusCode::CREATED, Json(tag)))
}

async fn rename_tag(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
    Payload(input): Payload<TagInput>,
) -> ServiceResult<impl IntoResponse> {
    let tag = state.db.rename_tag(id, input).await?;
    state.cache.invalidate(TAGS_KEY);
    Ok(Json(tag))
}

async fn delete_tag(
    State(state): State<AppState>,
    PathParam(id): PathParam<i64>,
) -> ServiceResult<StatusCode> {
    state.db.delete_tag(id).await?;
    state.cache.invalidate(TAGS_KEY);
    Ok(StatusCode::NO_CONTENT)
}

// ==================== Health ====================

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let database = state.db.ping().await;
    let status = if database {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if database { "ok" } else { "degraded" },
            "database": database,
            "cache": state.cache.stats(),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_drops_blank_values() {
        assert_eq!(present(None), None);
        assert_eq!(present(Some("  ".to_string())), None);
        assert_eq!(present(Some("en".to_string())), Some("en".to_string()));
    }

    #[test]
    fn test_page_request_clamps_and_rejects() {
        let page = page_request(Some("-3"), Some("500")).unwrap();
        assert_eq!(page, PageRequest::new(Some(1), Some(500)));
        assert!(page_request(Some("abc"), None).is_err());
    }
}
