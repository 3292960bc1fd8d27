//! Batch container for the analyses produced by one generation run.

use crate::analysis::{next_id, Analysis, AnalysisRecord, AnalysisStatus, GeneratorType};
use crate::error::Result;
use crate::fire_metadata::FireMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::warn;
use ulid::Ulid;

/// A batch of analyses generated together.
///
/// The job owns its analyses; each child carries the job id as a plain
/// back-reference. Status views are computed from the children on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    id: Ulid,
    generator_type: GeneratorType,
    created_at: DateTime<Utc>,
    analyses: Vec<Analysis>,
}

impl Job {
    pub fn new(generator_type: GeneratorType) -> Self {
        Self {
            id: next_id(),
            generator_type,
            created_at: Utc::now(),
            analyses: Vec::new(),
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn generator_type(&self) -> &GeneratorType {
        &self.generator_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Adopt an analysis, stamping it with this job's id. Insertion order is kept.
    pub fn add_analysis(&mut self, mut analysis: Analysis) {
        analysis.set_job_id(self.id);
        self.analyses.push(analysis);
    }

    pub fn analyses(&self) -> &[Analysis] {
        &self.analyses
    }

    pub fn analyses_mut(&mut self) -> &mut [Analysis] {
        &mut self.analyses
    }

    pub fn analysis_count(&self) -> usize {
        self.analyses.len()
    }

    pub fn completed(&self) -> Vec<&Analysis> {
        self.with_status(AnalysisStatus::Completed)
    }

    pub fn pending(&self) -> Vec<&Analysis> {
        self.with_status(AnalysisStatus::Pending)
    }

    pub fn failed(&self) -> Vec<&Analysis> {
        self.with_status(AnalysisStatus::Failed)
    }

    fn with_status(&self, status: AnalysisStatus) -> Vec<&Analysis> {
        self.analyses.iter().filter(|a| a.status() == status).collect()
    }

    /// True when every analysis is COMPLETED (vacuously true when empty)
    pub fn is_complete(&self) -> bool {
        self.analyses
            .iter()
            .all(|a| a.status() == AnalysisStatus::Completed)
    }

    /// True when any analysis FAILED
    pub fn is_failed(&self) -> bool {
        self.analyses
            .iter()
            .any(|a| a.status() == AnalysisStatus::Failed)
    }

    pub fn to_json(&self) -> Value {
        json!({
            "job_id": self.id.to_string(),
            "generator_type": self.generator_type.as_str(),
            "created_at": self.created_at.to_rfc3339(),
            "analysis_count": self.analysis_count(),
            "completed_count": self.completed().len(),
            "pending_count": self.pending().len(),
            "failed_count": self.failed().len(),
            "is_complete": self.is_complete(),
            "is_failed": self.is_failed(),
            "analyses": self.analyses.iter().map(Analysis::to_json).collect::<Vec<_>>(),
        })
    }

    pub fn to_record(&self) -> JobRecord {
        JobRecord {
            id: self.id,
            generator_type: self.generator_type.clone(),
            created_at: self.created_at,
            analyses: self.analyses.iter().map(AnalysisSummary::from).collect(),
        }
    }

    /// Rebuild a job from its record, keeping stored child ids.
    ///
    /// Summaries written before child ids were persisted get a fresh id and
    /// their fire metadata is rebuilt from the flattened aoi id and date.
    pub fn from_record(record: JobRecord) -> Result<Self> {
        let mut job = Job {
            id: record.id,
            generator_type: record.generator_type,
            created_at: record.created_at,
            analyses: Vec::with_capacity(record.analyses.len()),
        };

        for summary in record.analyses {
            let analysis = summary.into_analysis(&job)?;
            job.analyses.push(analysis);
        }

        Ok(job)
    }
}

/// Persisted shape of a job; children are embedded as summaries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: Ulid,
    pub generator_type: GeneratorType,
    pub created_at: DateTime<Utc>,
    pub analyses: Vec<AnalysisSummary>,
}

/// One child analysis as embedded in a job record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    #[serde(default)]
    pub id: Option<Ulid>,
    #[serde(default)]
    pub aoi_id: Option<String>,
    #[serde(default = "default_status")]
    pub status: AnalysisStatus,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "raw_raster_url")]
    pub raw_raster_location: Option<String>,
    #[serde(default, alias = "source_vector_url")]
    pub source_vector_location: Option<String>,
    #[serde(default, alias = "published_dnbr_raster_url")]
    pub published_raster_url: Option<String>,
    #[serde(default)]
    pub published_vector_url: Option<String>,
    #[serde(default)]
    pub fire_date: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub fire_metadata: Option<Value>,
}

fn default_status() -> AnalysisStatus {
    AnalysisStatus::Pending
}

// Older records wrote "" for absent values.
fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl From<&Analysis> for AnalysisSummary {
    fn from(analysis: &Analysis) -> Self {
        Self {
            id: Some(analysis.id()),
            aoi_id: analysis.aoi_id().map(str::to_string),
            status: analysis.status(),
            created_at: Some(analysis.created_at()),
            raw_raster_location: analysis.raw_raster_location().map(str::to_string),
            source_vector_location: analysis.source_vector_location().map(str::to_string),
            published_raster_url: analysis.published_raster_url().map(str::to_string),
            published_vector_url: analysis.published_vector_url().map(str::to_string),
            fire_date: analysis.fire_date().map(str::to_string),
            provider: analysis.provider().map(str::to_string),
            fire_metadata: analysis.fire_metadata().map(FireMetadata::to_dict),
        }
    }
}

impl AnalysisSummary {
    fn into_analysis(self, job: &Job) -> Result<Analysis> {
        let id = match self.id {
            Some(id) => id,
            None => {
                let id = next_id();
                warn!(
                    job_id = %job.id,
                    aoi_id = self.aoi_id.as_deref().unwrap_or_default(),
                    assigned_id = %id,
                    "Job summary has no analysis id, assigning a new one"
                );
                id
            }
        };

        let fire_metadata = match self.fire_metadata {
            Some(dict) => Some(dict),
            None => match (
                non_empty(self.provider),
                non_empty(self.aoi_id),
                non_empty(self.fire_date),
            ) {
                (Some(provider), Some(aoi_id), Some(fire_date)) => {
                    Some(FireMetadata::from_summary(&provider, &aoi_id, &fire_date)?.to_dict())
                }
                _ => None,
            },
        };

        Analysis::from_record(AnalysisRecord {
            id,
            generator_type: job.generator_type.clone(),
            fire_metadata,
            status: self.status,
            created_at: self.created_at.unwrap_or(job.created_at),
            job_id: Some(job.id),
            raw_raster_location: non_empty(self.raw_raster_location),
            source_vector_location: non_empty(self.source_vector_location),
            published_raster_url: non_empty(self.published_raster_url),
            published_vector_url: non_empty(self.published_vector_url),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fire_metadata::SaFireMetadata;
    use serde_json::Map;

    fn analysis_with_status(status: AnalysisStatus) -> Analysis {
        let mut analysis = Analysis::new(GeneratorType::Dummy, None);
        analysis.set_status(status).unwrap();
        analysis
    }

    fn fire(incident_number: &str) -> FireMetadata {
        let mut raw = Map::new();
        raw.insert("INCIDENTNU".to_string(), json!(incident_number));
        FireMetadata::SaFire(SaFireMetadata::new("Bushfire", "03/12/2019", raw))
    }

    #[test]
    fn test_empty_job_is_complete_and_not_failed() {
        let job = Job::new(GeneratorType::Dummy);

        assert!(job.is_complete());
        assert!(!job.is_failed());
        assert_eq!(job.analysis_count(), 0);
    }

    #[test]
    fn test_failed_takes_precedence() {
        let mut job = Job::new(GeneratorType::Dummy);
        job.add_analysis(analysis_with_status(AnalysisStatus::Completed));
        job.add_analysis(analysis_with_status(AnalysisStatus::Failed));

        assert!(!job.is_complete());
        assert!(job.is_failed());
        assert_eq!(job.completed().len(), 1);
        assert_eq!(job.failed().len(), 1);
        assert!(job.pending().is_empty());
    }

    #[test]
    fn test_views_follow_child_status_changes() {
        let mut job = Job::new(GeneratorType::Gee);
        job.add_analysis(Analysis::new(GeneratorType::Gee, None));
        assert_eq!(job.pending().len(), 1);
        assert!(!job.is_complete());

        job.analyses_mut()[0].set_status(AnalysisStatus::Completed).unwrap();

        assert!(job.pending().is_empty());
        assert!(job.is_complete());
    }

    #[test]
    fn test_add_analysis_sets_job_id_and_keeps_order() {
        let mut job = Job::new(GeneratorType::Dummy);
        let first = Analysis::new(GeneratorType::Dummy, Some(fire("A1")));
        let second = Analysis::new(GeneratorType::Dummy, Some(fire("B2")));
        job.add_analysis(first);
        job.add_analysis(second);

        assert_eq!(job.analysis_count(), 2);
        assert!(job.analyses().iter().all(|a| a.job_id() == Some(job.id())));
        let aoi_ids: Vec<_> = job.analyses().iter().filter_map(Analysis::aoi_id).collect();
        assert_eq!(aoi_ids, vec!["A1", "B2"]);
        assert_eq!(job.to_json()["analysis_count"], 2);
    }

    #[test]
    fn test_to_json_counts() {
        let mut job = Job::new(GeneratorType::Dummy);
        job.add_analysis(analysis_with_status(AnalysisStatus::Completed));
        job.add_analysis(analysis_with_status(AnalysisStatus::Pending));

        let value = job.to_json();
        assert_eq!(value["job_id"], job.id().to_string());
        assert_eq!(value["generator_type"], "dummy");
        assert_eq!(value["completed_count"], 1);
        assert_eq!(value["pending_count"], 1);
        assert_eq!(value["failed_count"], 0);
        assert_eq!(value["is_complete"], false);
        assert_eq!(value["analyses"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_record_round_trip_keeps_child_ids() {
        let mut job = Job::new(GeneratorType::Dummy);
        let mut analysis = Analysis::new(GeneratorType::Dummy, Some(fire("12345")));
        analysis.set_raw_raster_location("data/dummy_data/raw_dnbr.tif");
        analysis.set_status(AnalysisStatus::Completed).unwrap();
        job.add_analysis(analysis);
        job.add_analysis(Analysis::new(GeneratorType::Dummy, None));

        let text = serde_json::to_string(&job.to_record()).unwrap();
        let restored = Job::from_record(serde_json::from_str(&text).unwrap()).unwrap();

        assert_eq!(restored, job);
    }

    #[test]
    fn test_legacy_summary_without_id() {
        let job_id = next_id();
        let record: JobRecord = serde_json::from_value(json!({
            "id": job_id.to_string(),
            "generator_type": "dummy",
            "created_at": "2024-01-15T10:30:45Z",
            "analyses": [{
                "aoi_id": "12345",
                "status": "COMPLETED",
                "raw_raster_url": "data/dummy_data/raw_dnbr.tif",
                "source_vector_url": "data/dummy_data/fires.geojson",
                "published_dnbr_raster_url": "",
                "published_vector_url": "",
                "fire_date": "03/12/2019",
                "provider": "sa_fire"
            }]
        }))
        .unwrap();

        let job = Job::from_record(record).unwrap();
        let child = &job.analyses()[0];

        assert_eq!(child.job_id(), Some(job_id));
        assert_eq!(child.aoi_id(), Some("12345"));
        assert_eq!(child.status(), AnalysisStatus::Completed);
        assert_eq!(child.raw_raster_location(), Some("data/dummy_data/raw_dnbr.tif"));
        assert!(child.published_raster_url().is_none());
    }
}
