//! Seed the database with generated translations
//!
//! Usage:
//!   cargo run --bin generate                          # 5000 keys, default shape
//!   cargo run --bin generate -- 2000 --seed 7         # reproducible run
//!   cargo run --bin generate -- 50000 --sections 50 --items 400
//!
//! Optional environment variables:
//! - DATABASE_URL (defaults to sqlite://translations.db)
//! - DATABASE_MAX_CONNECTIONS (defaults to 5)

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use translation_service::{
    cache::NoopCache,
    config::DatabaseConfig,
    db::Database,
    generator::{BulkGenerator, GenerationPhase, GenerationProgress, GeneratorOptions},
};

const MIN_COUNT: usize = 1000;
const DEFAULT_COUNT: usize = 5000;

struct Args {
    count: usize,
    options: GeneratorOptions,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Args> {
    let mut count = None;
    let mut options = GeneratorOptions::default();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--seed" => options.seed = Some(flag_value(&mut args, "--seed")?),
            "--sections" => options.sections = flag_value(&mut args, "--sections")?,
            "--items" => options.items = flag_value(&mut args, "--items")?,
            other if other.starts_with("--") => bail!("Unknown flag: {}", other),
            other => {
                if count.is_some() {
                    bail!("Unexpected argument: {}", other);
                }
                count = Some(other.parse::<usize>().with_context(|| format!("Invalid count: {}", other))?);
            }
        }
    }

    Ok(Args {
        count: count.unwrap_or(DEFAULT_COUNT),
        options,
    })
}

fn flag_value<T>(args: &mut impl Iterator<Item = String>, flag: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let raw = args
        .next()
        .with_context(|| format!("{} requires a value", flag))?;
    raw.parse()
        .with_context(|| format!("Invalid value for {}: {}", flag, raw))
}

/// Log each progress update; returns how many were seen
async fn report_progress(mut rx: mpsc::UnboundedReceiver<GenerationProgress>) -> usize {
    let mut seen = 0;
    while let Some(progress) = rx.recv().await {
        let label = match progress.phase {
            GenerationPhase::Translations => "translations",
            GenerationPhase::Tags => "tag links",
        };
        info!("{}/{} {}", progress.done, progress.total, label);
        seen += 1;
    }
    seen
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("translation_service=info".parse()?)
                .add_directive("generate=info".parse()?),
        )
        .init();

    let args = parse_args(std::env::args().skip(1))?;
    if args.count < MIN_COUNT {
        bail!(
            "Please generate at least {} records for meaningful testing",
            MIN_COUNT
        );
    }

    let database = DatabaseConfig::from_env();
    let db = Database::connect(&database.url, database.max_connections)
        .await
        .context("Failed to open database")?;

    let existing = db.translation_count().await?;
    if existing > 0 {
        warn!(existing, "Translations already exist, generated rows are added alongside them");
    }

    let languages = db.ensure_default_languages().await?;
    let tags = db.ensure_default_tags().await?;
    info!(
        count = args.count,
        languages = languages.len(),
        tags = tags.len(),
        "Generating translation data"
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let reporter = tokio::spawn(report_progress(rx));

    // The server owns the export cache; a restart or TTL expiry picks up the new rows
    let generator = BulkGenerator::new(db, Arc::new(NoopCache), args.options);
    let report = generator
        .generate(args.count, &languages, &tags, Some(&tx))
        .await?;
    drop(tx);
    let _ = reporter.await;

    info!(
        "Generated {} keys: {} translations inserted ({} skipped as nesting clashes), {} tagged with {} links in {:.1}s",
        report.keys,
        report.translations_inserted,
        report.skipped_clashes,
        report.tagged_translations,
        report.tag_links,
        report.elapsed.as_secs_f64()
    );
    Ok(())
}
