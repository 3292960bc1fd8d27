//! Publishing every analysis of a stored job.

use crate::blob_store::BlobStore;
use crate::error::{Precondition, Result, SeverityError};
use crate::job_service::JobService;
use crate::metadata_store::ItemBackend;
use crate::publisher::{PublishedUrls, Publisher};
use crate::raster::RasterTranscoder;
use tracing::{error, info, instrument};
use ulid::Ulid;

/// Job-level marker written once every analysis has been published
pub const PUBLISHED_MARKER: &str = "PUBLISHED";

#[derive(Debug, Clone, PartialEq)]
pub struct PublishedAnalysis {
    pub analysis_id: Ulid,
    pub aoi_id: Option<String>,
    pub urls: PublishedUrls,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedAnalysis {
    pub analysis_id: Ulid,
    pub aoi_id: Option<String>,
    pub error: String,
}

/// Outcome of publishing one job
#[derive(Debug, Clone, PartialEq)]
pub struct JobPublishReport {
    pub job_id: Ulid,
    pub published: Vec<PublishedAnalysis>,
    pub failed: Vec<FailedAnalysis>,
}

impl JobPublishReport {
    pub fn total(&self) -> usize {
        self.published.len() + self.failed.len()
    }

    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Publish every analysis of job `job_id` and re-store the job.
///
/// Refuses to start unless every analysis is COMPLETED. Analyses are
/// published one at a time; a failure is recorded in the report and the
/// remaining analyses are still attempted.
#[instrument(skip(jobs, publisher))]
pub async fn publish_job<B, S, T>(
    jobs: &JobService<B>,
    publisher: &Publisher<S, T>,
    job_id: Ulid,
) -> Result<JobPublishReport>
where
    B: ItemBackend,
    S: BlobStore,
    T: RasterTranscoder,
{
    let mut job = jobs
        .get(job_id)
        .await?
        .ok_or_else(|| SeverityError::NotFound(format!("job {job_id}")))?;

    if !job.is_complete() {
        return Err(SeverityError::PreconditionFailed {
            analysis_id: job_id.to_string(),
            precondition: Precondition::JobIncomplete {
                completed: job.completed().len(),
                total: job.analysis_count(),
            },
        });
    }

    info!(analysis_count = job.analysis_count(), "Publishing job");

    let mut report = JobPublishReport {
        job_id,
        published: Vec::new(),
        failed: Vec::new(),
    };

    for analysis in job.analyses_mut() {
        let aoi_id = analysis.aoi_id().map(str::to_string);
        match publisher.publish(analysis).await {
            Ok(urls) => report.published.push(PublishedAnalysis {
                analysis_id: analysis.id(),
                aoi_id,
                urls,
            }),
            Err(e) => {
                error!(analysis_id = %analysis.id(), aoi_id = ?aoi_id, error = %e, "Failed to publish analysis");
                report.failed.push(FailedAnalysis {
                    analysis_id: analysis.id(),
                    aoi_id,
                    error: e.to_string(),
                });
            }
        }
    }

    jobs.store(&job).await?;
    if report.is_success() {
        jobs.update_status(job_id, PUBLISHED_MARKER).await?;
    }

    info!(
        published = report.published.len(),
        failed = report.failed.len(),
        "Job publishing finished"
    );
    Ok(report)
}
