//! Producers of analyses, and the job runner that drives them.

use crate::analysis::{Analysis, AnalysisStatus, GeneratorType};
use crate::error::{Result, SeverityError};
use crate::fire_metadata::FireMetadata;
use crate::job::Job;
use serde_json::Value;
use tracing::{info, instrument};

/// Creates one analysis for one area of interest
pub trait AnalysisGenerator: Send + Sync {
    fn generator_type(&self) -> GeneratorType;

    fn generate(&self, fire_metadata: FireMetadata) -> Result<Analysis>;
}

/// Completes synchronously, pointing every analysis at fixed artifacts
#[derive(Debug, Clone)]
pub struct DummyGenerator {
    raw_raster_location: String,
    source_vector_location: String,
}

impl DummyGenerator {
    pub fn new(raw_raster_location: impl Into<String>, source_vector_location: impl Into<String>) -> Self {
        Self {
            raw_raster_location: raw_raster_location.into(),
            source_vector_location: source_vector_location.into(),
        }
    }
}

impl AnalysisGenerator for DummyGenerator {
    fn generator_type(&self) -> GeneratorType {
        GeneratorType::Dummy
    }

    fn generate(&self, fire_metadata: FireMetadata) -> Result<Analysis> {
        let mut analysis = Analysis::new(self.generator_type(), Some(fire_metadata));
        analysis.set_raw_raster_location(self.raw_raster_location.as_str());
        analysis.set_source_vector_location(self.source_vector_location.as_str());
        analysis.set_status(AnalysisStatus::Completed)?;
        Ok(analysis)
    }
}

/// Leaves analyses PENDING; an external processing service advances them
/// out-of-band through `update_status`.
#[derive(Debug, Clone)]
pub struct DeferredGenerator {
    generator_type: GeneratorType,
}

impl DeferredGenerator {
    pub fn new(generator_type: GeneratorType) -> Self {
        Self { generator_type }
    }
}

impl Default for DeferredGenerator {
    fn default() -> Self {
        Self::new(GeneratorType::Gee)
    }
}

impl AnalysisGenerator for DeferredGenerator {
    fn generator_type(&self) -> GeneratorType {
        self.generator_type.clone()
    }

    fn generate(&self, fire_metadata: FireMetadata) -> Result<Analysis> {
        Ok(Analysis::new(self.generator_type(), Some(fire_metadata)))
    }
}

/// Build a job with one analysis per feature of `feature_collection`, in
/// input order.
///
/// Fails with `InvalidSource` when the collection has no features or any
/// feature lacks the provider's mandatory fields; nothing is returned for a
/// partially valid collection.
#[instrument(skip(generator, feature_collection), fields(generator_type = %generator.generator_type()))]
pub fn run_job<G>(generator: &G, feature_collection: &Value, provider: &str) -> Result<Job>
where
    G: AnalysisGenerator + ?Sized,
{
    let features = feature_collection
        .get("features")
        .and_then(Value::as_array)
        .filter(|features| !features.is_empty())
        .ok_or_else(|| SeverityError::InvalidSource("No features found in GeoJSON".to_string()))?;

    let mut job = Job::new(generator.generator_type());
    for feature in features {
        let fire_metadata = FireMetadata::from_feature(provider, feature)?;
        job.add_analysis(generator.generate(fire_metadata)?);
    }

    info!(
        job_id = %job.id(),
        analysis_count = job.analysis_count(),
        completed = job.completed().len(),
        "Job created"
    );
    Ok(job)
}
