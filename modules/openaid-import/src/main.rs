use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::Value;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use ai_client::ClaudeJudge;
use openaid_common::{Config, CostTracker};
use openaid_import::publisher::{HttpPublisher, PipelinePublisher, PgResourceSink, Publisher};
use openaid_import::store::PgImportStore;
use openaid_import::{mapper, sources, ImportOptions, ImportOrchestrator};
use openaid_verify::agent::VerificationAgent;
use openaid_verify::crossref::{CivicDirectorySource, GooglePlacesSource};
use openaid_verify::flush::CostLogFlusher;
use openaid_verify::geocode::GoogleGeocoder;
use openaid_verify::log::PgVerificationLog;
use openaid_verify::probe::HttpProbe;
use openaid_verify::traits::{CrossReference, Geocoder};

/// Rough per-record wall time used for dry-run estimates: probes, a
/// geocode, cross-reference lookups, and usually one LLM call.
const EST_SECONDS_PER_RECORD: f64 = 3.0;

/// Pending cost-log batches before enqueueing applies backpressure.
const COST_FLUSH_QUEUE_DEPTH: usize = 64;

#[derive(Parser)]
#[command(name = "openaid-import", about = "Batch import driver for social-service resource feeds")]
struct Cli {
    /// Source mapping registry key (see `sources::available_sources`)
    #[arg(long)]
    source: String,

    /// Path to a JSON array of raw records. Required unless resuming.
    #[arg(long)]
    input: Option<PathBuf>,

    /// Only import records whose state matches this code
    #[arg(long)]
    state: Option<String>,

    #[arg(long, default_value_t = 50)]
    batch_size: usize,

    #[arg(long)]
    skip_geocoding: bool,

    /// Report record/batch counts and a time estimate without importing
    #[arg(long)]
    dry_run: bool,

    /// Resume a paused job from its checkpoint instead of starting fresh
    #[arg(long)]
    resume: Option<Uuid>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mapping = sources::mapping_for(&cli.source).ok_or_else(|| {
        anyhow!(
            "unknown source {:?}; available: {}",
            cli.source,
            sources::available_sources().join(", ")
        )
    })?;

    let records = match &cli.input {
        Some(path) => Some(load_records(path, cli.state.as_deref(), &mapping)?),
        None if cli.resume.is_none() => {
            return Err(anyhow!("--input is required unless resuming a job"));
        }
        None => None,
    };

    if cli.dry_run {
        let records = records.ok_or_else(|| anyhow!("--dry-run needs --input"))?;
        let batches = records.len().div_ceil(cli.batch_size.max(1));
        let est_minutes = records.len() as f64 * EST_SECONDS_PER_RECORD / 60.0;
        println!("Dry run for source {:?}:", mapping.source_name);
        println!("  Records:         {}", records.len());
        println!("  Batch size:      {}", cli.batch_size);
        println!("  Batches:         {batches}");
        println!("  Estimated time:  {est_minutes:.0} min");
        return Ok(());
    }

    let config = Config::from_env();
    config.log_redacted();

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .context("connecting to Postgres")?;

    openaid_import::store::migrate(&pool).await?;
    openaid_import::publisher::migrate_sink(&pool).await?;
    openaid_verify::log::migrate(&pool).await?;

    let costs = Arc::new(CostTracker::with_budget_usd(
        config.run_budget_cents as f64 / 100.0,
    ));

    let geocoder: Arc<dyn Geocoder> = Arc::new(GoogleGeocoder::new(&config.google_maps_api_key));

    let mut cost_flusher: Option<CostLogFlusher> = None;
    let publisher: Arc<dyn Publisher> = match &config.publication_url {
        Some(url) => Arc::new(HttpPublisher::new(url, config.publication_api_key.clone())),
        None => {
            let mut cross_refs: Vec<Arc<dyn CrossReference>> = vec![Arc::new(
                GooglePlacesSource::new(&config.google_maps_api_key),
            )];
            if let Some(url) = &config.civic_directory_url {
                cross_refs.push(Arc::new(CivicDirectorySource::new(url)));
            }

            let agent = VerificationAgent::new(
                Arc::new(HttpProbe::new()),
                geocoder.clone(),
                Arc::new(ClaudeJudge::new(
                    &config.anthropic_api_key,
                    &config.judge_model,
                )),
                cross_refs,
                costs.clone(),
            );
            let log = Arc::new(PgVerificationLog::new(pool.clone()));
            let flusher = CostLogFlusher::start(log.clone(), COST_FLUSH_QUEUE_DEPTH);
            let queue = flusher.handle();
            cost_flusher = Some(flusher);
            Arc::new(
                PipelinePublisher::new(
                    agent,
                    Arc::new(PgResourceSink::new(pool.clone())),
                    log,
                    costs.clone(),
                )
                .with_cost_queue(queue),
            )
        }
    };

    let store = Arc::new(PgImportStore::new(pool));
    let options = ImportOptions {
        batch_size: cli.batch_size,
        skip_geocoding: cli.skip_geocoding,
        ..Default::default()
    };

    let outcome = match cli.resume {
        Some(job_id) => {
            let mut orchestrator = ImportOrchestrator::resume(
                store,
                publisher,
                Some(geocoder),
                costs,
                mapping,
                options,
                job_id,
            )
            .await?;
            orchestrator.run_resumed(records.as_deref()).await
        }
        None => {
            let records = records.expect("checked above");
            let mut orchestrator = ImportOrchestrator::create(
                store,
                publisher,
                Some(geocoder),
                costs,
                mapping,
                options,
                records.len() as u32,
            )
            .await?;
            info!(job_id = %orchestrator.job_id(), "Starting import");
            orchestrator.run(records).await
        }
    };

    // Drain queued cost entries whether the run succeeded or not.
    if let Some(flusher) = cost_flusher {
        flusher.stop().await?;
    }

    let stats = outcome?;
    println!("{stats}");
    Ok(())
}

/// Read a JSON array of raw records, optionally keeping only one state.
fn load_records(
    path: &PathBuf,
    state: Option<&str>,
    mapping: &mapper::SourceMapping,
) -> Result<Vec<Value>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let records: Vec<Value> =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;

    let Some(state) = state else {
        return Ok(records);
    };

    let before = records.len();
    let filtered: Vec<Value> = records
        .into_iter()
        .filter(|raw| {
            mapper::raw_field(raw, mapping, "state")
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case(state))
        })
        .collect();
    info!(
        state,
        kept = filtered.len(),
        dropped = before - filtered.len(),
        "Filtered records by state"
    );
    Ok(filtered)
}
