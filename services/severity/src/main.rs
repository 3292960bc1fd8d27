use anyhow::{bail, Context, Result};
use fire_severity::{
    connect_pool, publish_job, Config, GdalCogTranscoder, JobService, PgItemTable, Publisher,
    S3BlobStore,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use ulid::Ulid;

#[tokio::main]
async fn main() -> Result<()> {
    let job_id = parse_job_id(std::env::args().skip(1))?;

    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        job_id = %job_id,
        "Starting fire severity publisher"
    );

    // Initialize components; any unavailable backend stops here
    let pool = connect_pool(&config.metadata_store)
        .await
        .context("Failed to connect to metadata store")?;

    let jobs_table = PgItemTable::new(pool, config.metadata_store.jobs_table.clone())?;
    if config.metadata_store.create_tables {
        jobs_table
            .create_if_missing()
            .await
            .context("Failed to provision jobs table")?;
    }

    let jobs = JobService::new(jobs_table)
        .await
        .context("Failed to initialize job service")?;

    let blob_store = S3BlobStore::connect(&config.s3)
        .await
        .context("Failed to initialize blob store")?;

    let publisher = Publisher::new(
        blob_store,
        GdalCogTranscoder::new(config.publish.transcoder.clone()),
        config.publish.clone(),
    );

    if let Some(marker) = jobs.status_marker(job_id).await? {
        info!(job_id = %job_id, status = %marker, "Job was already marked; publishing again");
    }

    let report = publish_job(&jobs, &publisher, job_id)
        .await
        .with_context(|| format!("Failed to publish job {job_id}"))?;

    for published in &report.published {
        info!(
            analysis_id = %published.analysis_id,
            aoi_id = ?published.aoi_id,
            raster_url = %published.urls.raster_url,
            vector_url = %published.urls.vector_url,
            "Published"
        );
    }

    info!(
        published = report.published.len(),
        total = report.total(),
        "Publishing finished"
    );

    if !report.is_success() {
        for failed in &report.failed {
            error!(analysis_id = %failed.analysis_id, error = %failed.error, "Not published");
        }
        bail!(
            "{} of {} analyses failed to publish",
            report.failed.len(),
            report.total()
        );
    }

    Ok(())
}

fn parse_job_id(mut args: impl Iterator<Item = String>) -> Result<Ulid> {
    let (Some(raw), None) = (args.next(), args.next()) else {
        bail!("usage: fire-severity <job-id>");
    };

    Ulid::from_string(&raw).with_context(|| format!("Invalid job id '{raw}'"))
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}
