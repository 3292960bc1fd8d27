//! Persistence of job records with their analyses embedded inline.

use crate::analysis::GeneratorType;
use crate::analysis_service::{parse_id, parse_timestamp, timestamp};
use crate::error::{Result, SeverityError};
use crate::job::{AnalysisSummary, Job, JobRecord};
use crate::metadata_store::{AttributeValue, Item, ItemBackend, ItemExt};
use chrono::Utc;
use tracing::{debug, info, instrument};
use ulid::Ulid;

/// Stores and retrieves jobs as flat items keyed by job id
pub struct JobService<B> {
    backend: B,
}

impl<B: ItemBackend> JobService<B> {
    /// Wrap `backend`, failing immediately if it is not usable
    pub async fn new(backend: B) -> Result<Self> {
        backend.ensure_ready().await?;
        info!("Job service ready");
        Ok(Self { backend })
    }

    /// Upsert the job and all of its analyses, refreshing `updated_at`.
    ///
    /// This replaces the whole item, so any status marker set through
    /// [`JobService::update_status`] is cleared.
    #[instrument(skip(self, job), fields(job_id = %job.id(), analysis_count = job.analysis_count()))]
    pub async fn store(&self, job: &Job) -> Result<()> {
        let item = to_item(job)?;
        self.backend.put(&job.id().to_string(), item).await?;

        debug!("Job stored");
        metrics::counter!("severity.jobs.stored").increment(1);
        Ok(())
    }

    pub async fn get(&self, id: Ulid) -> Result<Option<Job>> {
        match self.backend.get(&id.to_string()).await? {
            Some(item) => from_item(&item).map(Some),
            None => Ok(None),
        }
    }

    /// Up to `limit` jobs in backend order (not recency order)
    pub async fn list(&self, limit: usize) -> Result<Vec<Job>> {
        self.backend
            .scan(limit)
            .await?
            .iter()
            .map(from_item)
            .collect()
    }

    /// Record a job-level status marker (e.g. `PUBLISHED`) and refresh
    /// `updated_at` without touching the embedded analyses.
    ///
    /// The marker is informational: job completeness is always derived from
    /// the children. Returns false when no job exists under `id`.
    #[instrument(skip(self))]
    pub async fn update_status(&self, id: Ulid, status: &str) -> Result<bool> {
        let mut fields = Item::new();
        fields.insert("status".to_string(), status.into());
        fields.insert("updated_at".to_string(), timestamp(Utc::now()).into());

        let updated = self.backend.update(&id.to_string(), fields).await?;
        if updated {
            metrics::counter!("severity.status.updated").increment(1);
        }
        Ok(updated)
    }

    /// The job-level status marker, if the job exists and carries one
    pub async fn status_marker(&self, id: Ulid) -> Result<Option<String>> {
        Ok(self
            .backend
            .get(&id.to_string())
            .await?
            .and_then(|item| item.optional_str("status").map(str::to_string)))
    }
}

fn to_item(job: &Job) -> Result<Item> {
    let record = job.to_record();
    let analysis_count = i64::try_from(record.analyses.len())
        .map_err(|_| SeverityError::MalformedRecord("analysis count overflow".to_string()))?;

    let mut item = Item::new();
    item.insert("id".to_string(), record.id.to_string().into());
    item.insert("generator_type".to_string(), String::from(record.generator_type).into());
    item.insert("created_at".to_string(), timestamp(record.created_at).into());
    item.insert("updated_at".to_string(), timestamp(Utc::now()).into());
    item.insert("analysis_count".to_string(), analysis_count.into());
    item.insert(
        "analyses".to_string(),
        AttributeValue::String(serde_json::to_string(&record.analyses)?),
    );

    Ok(item)
}

fn from_item(item: &Item) -> Result<Job> {
    // Older items were keyed by `job_id`.
    let id = item
        .optional_str("id")
        .or_else(|| item.optional_str("job_id"))
        .ok_or_else(|| SeverityError::MalformedRecord("missing job id".to_string()))?;

    let analyses: Vec<AnalysisSummary> = match item.optional_str("analyses") {
        Some(raw) => serde_json::from_str(raw)?,
        None => Vec::new(),
    };

    let generator_type = item
        .optional_str("generator_type")
        .map(GeneratorType::from)
        .unwrap_or_else(|| GeneratorType::Other("unknown".to_string()));

    Job::from_record(JobRecord {
        id: parse_id(id)?,
        generator_type,
        created_at: parse_timestamp(item, "created_at")?,
        analyses,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Analysis, AnalysisStatus};
    use crate::fire_metadata::{FireMetadata, SaFireMetadata};
    use crate::metadata_store::{MemoryItemTable, MockItemBackend};
    use serde_json::{json, Map};

    fn fire(incident_type: &str, fire_date: &str) -> FireMetadata {
        FireMetadata::SaFire(SaFireMetadata::new(incident_type, fire_date, Map::new()))
    }

    fn two_aoi_job() -> Job {
        let mut job = Job::new(GeneratorType::Dummy);
        for (kind, date) in [("Bushfire", "30/12/2019"), ("Grass Fire", "02/01/2020")] {
            let mut analysis = Analysis::new(GeneratorType::Dummy, Some(fire(kind, date)));
            analysis.set_raw_raster_location("data/dummy_data/raw_dnbr.tif");
            analysis.set_source_vector_location("data/dummy_data/fires.geojson");
            analysis.set_status(AnalysisStatus::Completed).unwrap();
            job.add_analysis(analysis);
        }
        job
    }

    #[tokio::test]
    async fn test_store_and_get_preserves_children() {
        let service = JobService::new(MemoryItemTable::new()).await.unwrap();
        let job = two_aoi_job();

        service.store(&job).await.unwrap();
        let restored = service.get(job.id()).await.unwrap().unwrap();

        assert_eq!(restored, job);
        let ids: Vec<_> = restored.analyses().iter().map(Analysis::id).collect();
        let original: Vec<_> = job.analyses().iter().map(Analysis::id).collect();
        assert_eq!(ids, original);
    }

    #[tokio::test]
    async fn test_item_carries_analysis_count() {
        let mut backend = MockItemBackend::new();
        backend.expect_ensure_ready().returning(|| Ok(()));
        backend
            .expect_put()
            .withf(|_, item| {
                item.get("analysis_count").and_then(AttributeValue::as_i64) == Some(2)
                    && item.get("analyses").and_then(AttributeValue::as_str).is_some()
                    && item.contains_key("updated_at")
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let service = JobService::new(backend).await.unwrap();
        service.store(&two_aoi_job()).await.unwrap();
    }

    #[tokio::test]
    async fn test_get_missing_job() {
        let service = JobService::new(MemoryItemTable::new()).await.unwrap();
        assert!(service.get(Ulid::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_status_keeps_analyses() {
        let service = JobService::new(MemoryItemTable::new()).await.unwrap();
        let job = two_aoi_job();
        service.store(&job).await.unwrap();

        assert!(service.update_status(job.id(), "PUBLISHED").await.unwrap());
        assert!(!service.update_status(Ulid::new(), "PUBLISHED").await.unwrap());

        let restored = service.get(job.id()).await.unwrap().unwrap();
        assert_eq!(restored.analysis_count(), 2);
        assert_eq!(
            service.status_marker(job.id()).await.unwrap().as_deref(),
            Some("PUBLISHED")
        );
    }

    #[tokio::test]
    async fn test_store_clears_status_marker() {
        let service = JobService::new(MemoryItemTable::new()).await.unwrap();
        let job = two_aoi_job();
        service.store(&job).await.unwrap();
        assert!(service.status_marker(job.id()).await.unwrap().is_none());

        service.update_status(job.id(), "PUBLISHED").await.unwrap();
        service.store(&job).await.unwrap();

        assert!(service.status_marker(job.id()).await.unwrap().is_none());
        assert!(service.status_marker(Ulid::new()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reads_legacy_item() {
        let table = MemoryItemTable::new();
        let job_id = Ulid::new();
        let analyses = json!([{
            "aoi_id": "bushfire_20191230",
            "status": "COMPLETED",
            "raw_raster_url": "data/dummy_data/raw_dnbr.tif",
            "source_vector_url": "data/dummy_data/fires.geojson",
            "published_dnbr_raster_url": "",
            "published_vector_url": "",
            "fire_date": "30/12/2019",
            "provider": "sa_fire"
        }]);

        let mut item = Item::new();
        item.insert("job_id".to_string(), job_id.to_string().into());
        item.insert("generator_type".to_string(), "dummy".into());
        item.insert("created_at".to_string(), "2024-01-15T10:30:45.123456".into());
        item.insert("analysis_count".to_string(), 1i64.into());
        item.insert("analyses".to_string(), analyses.to_string().into());
        table.put(&job_id.to_string(), item).await.unwrap();

        let service = JobService::new(table).await.unwrap();
        let job = service.get(job_id).await.unwrap().unwrap();

        assert_eq!(job.id(), job_id);
        assert_eq!(job.analysis_count(), 1);
        let child = &job.analyses()[0];
        assert_eq!(child.aoi_id(), Some("bushfire_20191230"));
        assert_eq!(child.fire_date(), Some("30/12/2019"));
        assert_eq!(child.status(), AnalysisStatus::Completed);
        assert_eq!(child.created_at(), job.created_at());
        assert!(child.published_vector_url().is_none());
    }

    #[tokio::test]
    async fn test_list_jobs() {
        let service = JobService::new(MemoryItemTable::new()).await.unwrap();
        service.store(&two_aoi_job()).await.unwrap();
        service.store(&Job::new(GeneratorType::Gee)).await.unwrap();

        let jobs = service.list(100).await.unwrap();
        assert_eq!(jobs.len(), 2);
    }
}
