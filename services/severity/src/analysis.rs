//! The Analysis record: one unit of severity work for one area of interest.

use crate::error::{Result, SeverityError};
use crate::fire_metadata::FireMetadata;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use ulid::{Generator, Ulid};

/// Lifecycle status of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalysisStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl AnalysisStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisStatus::Pending => "PENDING",
            AnalysisStatus::Running => "RUNNING",
            AnalysisStatus::Completed => "COMPLETED",
            AnalysisStatus::Failed => "FAILED",
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-asserting the current status is always allowed. A failed analysis
    /// may be re-queued as pending; a completed one never moves again.
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;

        if self == next {
            return true;
        }

        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Running, Completed)
                | (Running, Failed)
                | (Failed, Pending)
        )
    }
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisStatus {
    type Err = SeverityError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(AnalysisStatus::Pending),
            "RUNNING" => Ok(AnalysisStatus::Running),
            "COMPLETED" => Ok(AnalysisStatus::Completed),
            "FAILED" => Ok(AnalysisStatus::Failed),
            other => Err(SeverityError::MalformedRecord(format!(
                "unknown analysis status '{other}'"
            ))),
        }
    }
}

/// Which generator produced an analysis
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GeneratorType {
    /// Synchronous placeholder generator, completes immediately
    Dummy,
    /// Earth Engine backed generator, completes out-of-band
    Gee,
    Other(String),
}

impl GeneratorType {
    pub fn as_str(&self) -> &str {
        match self {
            GeneratorType::Dummy => "dummy",
            GeneratorType::Gee => "gee",
            GeneratorType::Other(name) => name,
        }
    }
}

impl From<&str> for GeneratorType {
    fn from(value: &str) -> Self {
        match value {
            "dummy" => GeneratorType::Dummy,
            "gee" => GeneratorType::Gee,
            other => GeneratorType::Other(other.to_string()),
        }
    }
}

impl From<String> for GeneratorType {
    fn from(value: String) -> Self {
        GeneratorType::from(value.as_str())
    }
}

impl From<GeneratorType> for String {
    fn from(value: GeneratorType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for GeneratorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Next id from a process-wide monotonic generator, so ids minted within the
/// same millisecond still sort in creation order.
pub(crate) fn next_id() -> Ulid {
    static GENERATOR: OnceLock<Mutex<Generator>> = OnceLock::new();

    GENERATOR
        .get_or_init(|| Mutex::new(Generator::new()))
        .lock()
        .generate()
        .unwrap_or_else(|_| Ulid::new())
}

/// Persisted shape of an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub id: Ulid,
    pub generator_type: GeneratorType,
    /// Output of [`FireMetadata::to_dict`]
    #[serde(default)]
    pub fire_metadata: Option<Value>,
    pub status: AnalysisStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub job_id: Option<Ulid>,
    #[serde(default)]
    pub raw_raster_location: Option<String>,
    #[serde(default)]
    pub source_vector_location: Option<String>,
    #[serde(default)]
    pub published_raster_url: Option<String>,
    #[serde(default)]
    pub published_vector_url: Option<String>,
}

/// A single severity analysis for one area of interest
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    id: Ulid,
    generator_type: GeneratorType,
    fire_metadata: Option<Arc<FireMetadata>>,
    status: AnalysisStatus,
    created_at: DateTime<Utc>,
    job_id: Option<Ulid>,
    raw_raster_location: Option<String>,
    source_vector_location: Option<String>,
    published_raster_url: Option<String>,
    published_vector_url: Option<String>,
}

impl Analysis {
    /// Create a pending analysis with a fresh id and timestamp
    pub fn new(generator_type: GeneratorType, fire_metadata: Option<FireMetadata>) -> Self {
        Self::with_shared_metadata(generator_type, fire_metadata.map(Arc::new))
    }

    /// Create a pending analysis that shares already-built fire metadata
    pub fn with_shared_metadata(
        generator_type: GeneratorType,
        fire_metadata: Option<Arc<FireMetadata>>,
    ) -> Self {
        Self {
            id: next_id(),
            generator_type,
            fire_metadata,
            status: AnalysisStatus::Pending,
            created_at: Utc::now(),
            job_id: None,
            raw_raster_location: None,
            source_vector_location: None,
            published_raster_url: None,
            published_vector_url: None,
        }
    }

    pub fn id(&self) -> Ulid {
        self.id
    }

    pub fn generator_type(&self) -> &GeneratorType {
        &self.generator_type
    }

    pub fn fire_metadata(&self) -> Option<&FireMetadata> {
        self.fire_metadata.as_deref()
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Id of the job this analysis was created in, if any
    pub fn job_id(&self) -> Option<Ulid> {
        self.job_id
    }

    pub fn aoi_id(&self) -> Option<&str> {
        self.fire_metadata().map(FireMetadata::aoi_id)
    }

    pub fn fire_date(&self) -> Option<&str> {
        self.fire_metadata().map(FireMetadata::fire_date)
    }

    pub fn provider(&self) -> Option<&'static str> {
        self.fire_metadata().map(FireMetadata::provider)
    }

    pub fn raw_raster_location(&self) -> Option<&str> {
        self.raw_raster_location.as_deref()
    }

    pub fn source_vector_location(&self) -> Option<&str> {
        self.source_vector_location.as_deref()
    }

    pub fn published_raster_url(&self) -> Option<&str> {
        self.published_raster_url.as_deref()
    }

    pub fn published_vector_url(&self) -> Option<&str> {
        self.published_vector_url.as_deref()
    }

    /// Move to `status`, rejecting transitions outside the lifecycle table
    pub fn set_status(&mut self, status: AnalysisStatus) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(SeverityError::InvalidTransition {
                from: self.status,
                to: status,
            });
        }
        self.status = status;
        Ok(())
    }

    pub fn set_raw_raster_location(&mut self, location: impl Into<String>) {
        self.raw_raster_location = Some(location.into());
    }

    pub fn set_source_vector_location(&mut self, location: impl Into<String>) {
        self.source_vector_location = Some(location.into());
    }

    pub(crate) fn set_published_urls(&mut self, raster_url: String, vector_url: String) {
        self.published_raster_url = Some(raster_url);
        self.published_vector_url = Some(vector_url);
    }

    pub(crate) fn set_job_id(&mut self, job_id: Ulid) {
        self.job_id = Some(job_id);
    }

    pub fn to_record(&self) -> AnalysisRecord {
        AnalysisRecord {
            id: self.id,
            generator_type: self.generator_type.clone(),
            fire_metadata: self.fire_metadata().map(FireMetadata::to_dict),
            status: self.status,
            created_at: self.created_at,
            job_id: self.job_id,
            raw_raster_location: self.raw_raster_location.clone(),
            source_vector_location: self.source_vector_location.clone(),
            published_raster_url: self.published_raster_url.clone(),
            published_vector_url: self.published_vector_url.clone(),
        }
    }

    /// Rebuild an analysis from its record, keeping the stored id and status.
    ///
    /// Embedded fire metadata is resolved through the provider registry, so an
    /// unregistered provider fails instead of dropping the metadata.
    pub fn from_record(record: AnalysisRecord) -> Result<Self> {
        let fire_metadata = record
            .fire_metadata
            .as_ref()
            .map(FireMetadata::from_dict)
            .transpose()?
            .map(Arc::new);

        Ok(Self {
            id: record.id,
            generator_type: record.generator_type,
            fire_metadata,
            status: record.status,
            created_at: record.created_at,
            job_id: record.job_id,
            raw_raster_location: record.raw_raster_location,
            source_vector_location: record.source_vector_location,
            published_raster_url: record.published_raster_url,
            published_vector_url: record.published_vector_url,
        })
    }

    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.to_record())?)
    }

    pub fn deserialize(data: &str) -> Result<Self> {
        Self::from_record(serde_json::from_str(data)?)
    }

    /// JSON view used in job reports
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id.to_string(),
            "generator_type": self.generator_type.as_str(),
            "status": self.status.as_str(),
            "created_at": self.created_at.to_rfc3339(),
            "job_id": self.job_id.map(|id| id.to_string()),
            "aoi_id": self.aoi_id(),
            "fire_date": self.fire_date(),
            "provider": self.provider(),
            "raw_raster_location": self.raw_raster_location,
            "source_vector_location": self.source_vector_location,
            "published_raster_url": self.published_raster_url,
            "published_vector_url": self.published_vector_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fire_metadata::SaFireMetadata;
    use serde_json::Map;

    fn bushfire() -> FireMetadata {
        let mut raw = Map::new();
        raw.insert("FIREDATE".to_string(), json!("30/12/2019"));
        FireMetadata::SaFire(SaFireMetadata::new("Bushfire", "30/12/2019", raw))
    }

    #[test]
    fn test_new_analysis_defaults() {
        let analysis = Analysis::new(GeneratorType::Dummy, None);

        assert_eq!(analysis.status(), AnalysisStatus::Pending);
        assert!(analysis.job_id().is_none());
        assert!(analysis.aoi_id().is_none());
        assert!(analysis.published_raster_url().is_none());
    }

    #[test]
    fn test_ids_sort_in_creation_order() {
        let ids: Vec<Ulid> = (0..50)
            .map(|_| Analysis::new(GeneratorType::Gee, None).id())
            .collect();

        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_legal_transitions() {
        let mut analysis = Analysis::new(GeneratorType::Gee, Some(bushfire()));

        analysis.set_status(AnalysisStatus::Running).unwrap();
        analysis.set_status(AnalysisStatus::Failed).unwrap();
        analysis.set_status(AnalysisStatus::Pending).unwrap();
        analysis.set_status(AnalysisStatus::Completed).unwrap();
        analysis.set_status(AnalysisStatus::Completed).unwrap();

        assert_eq!(analysis.status(), AnalysisStatus::Completed);
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut analysis = Analysis::new(GeneratorType::Dummy, None);
        analysis.set_status(AnalysisStatus::Completed).unwrap();

        let err = analysis.set_status(AnalysisStatus::Pending).unwrap_err();
        assert!(matches!(
            err,
            SeverityError::InvalidTransition {
                from: AnalysisStatus::Completed,
                to: AnalysisStatus::Pending
            }
        ));
        assert_eq!(analysis.status(), AnalysisStatus::Completed);
    }

    #[test]
    fn test_running_cannot_go_back_to_pending() {
        assert!(!AnalysisStatus::Running.can_transition_to(AnalysisStatus::Pending));
        assert!(!AnalysisStatus::Failed.can_transition_to(AnalysisStatus::Completed));
    }

    #[test]
    fn test_round_trip_empty_optionals() {
        let analysis = Analysis::new(GeneratorType::Dummy, None);
        let restored = Analysis::deserialize(&analysis.serialize().unwrap()).unwrap();

        assert_eq!(restored, analysis);
    }

    #[test]
    fn test_round_trip_populated() {
        let mut analysis = Analysis::new(GeneratorType::Other("landsat".to_string()), Some(bushfire()));
        analysis.set_job_id(next_id());
        analysis.set_raw_raster_location("data/dummy_data/raw_dnbr.tif");
        analysis.set_source_vector_location("data/dummy_data/fires.geojson");
        analysis.set_status(AnalysisStatus::Completed).unwrap();
        analysis.set_published_urls(
            "s3://bucket/jobs/x/bushfire_20191230/bushfire_20191230_dnbr.cog.tif".to_string(),
            "s3://bucket/jobs/x/bushfire_20191230/bushfire_20191230_aoi.geojson".to_string(),
        );

        let restored = Analysis::deserialize(&analysis.serialize().unwrap()).unwrap();

        assert_eq!(restored, analysis);
        assert_eq!(restored.aoi_id(), Some("bushfire_20191230"));
        assert_eq!(restored.generator_type().as_str(), "landsat");
    }

    #[test]
    fn test_deserialize_unknown_provider_fails() {
        let mut record = Analysis::new(GeneratorType::Dummy, Some(bushfire())).to_record();
        record.fire_metadata = Some(json!({"provider": "nasa_firms", "fire_date": "1/1/2020"}));
        let data = serde_json::to_string(&record).unwrap();

        let err = Analysis::deserialize(&data).unwrap_err();
        assert!(matches!(err, SeverityError::UnknownProvider(_)));
    }

    #[test]
    fn test_status_parsing() {
        assert_eq!("FAILED".parse::<AnalysisStatus>().unwrap(), AnalysisStatus::Failed);
        assert!("done".parse::<AnalysisStatus>().is_err());
    }

    #[test]
    fn test_to_json_fields() {
        let analysis = Analysis::new(GeneratorType::Gee, Some(bushfire()));
        let value = analysis.to_json();

        assert_eq!(value["status"], "PENDING");
        assert_eq!(value["generator_type"], "gee");
        assert_eq!(value["aoi_id"], "bushfire_20191230");
        assert_eq!(value["provider"], "sa_fire");
        assert!(value["published_raster_url"].is_null());
    }
}
