//! Publishing of completed analyses to durable blob storage.
//!
//! Layout for an analysis with aoi id `A` in scope `S` (the owning job id,
//! or the analysis id when it has no job):
//!
//! ```text
//! jobs/S/A/A_dnbr.cog.tif
//! jobs/S/A/A_aoi.geojson
//! <catalog_prefix>/items/A_S.json
//! <catalog_prefix>/collection.json
//! ```
//!
//! Keys depend only on the analysis, so publishing twice overwrites the same
//! objects.

use crate::analysis::{Analysis, AnalysisStatus};
use crate::blob_store::{content_type_for, BlobStore};
use crate::catalog::{
    collection_key, item_key, Asset, CatalogAssets, CatalogItem, CatalogProperties,
    CollectionPointer,
};
use crate::config::PublishConfig;
use crate::error::{Precondition, Result, SeverityError};
use crate::fire_metadata::{FireMetadata, RASTER, VECTOR};
use crate::raster::RasterTranscoder;
use chrono::Utc;
use serde_json::Value;
use std::path::Path;
use tracing::{info, instrument, warn};

const SCRATCH_COG_NAME: &str = "dnbr.cog.tif";

/// Locations of the two published artifacts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedUrls {
    pub raster_url: String,
    pub vector_url: String,
}

/// Inputs that passed every precondition
struct Checked<'a> {
    fire: &'a FireMetadata,
    raw_raster: &'a str,
    source_vector: &'a str,
}

pub struct Publisher<S, T> {
    store: S,
    transcoder: T,
    config: PublishConfig,
}

impl<S: BlobStore, T: RasterTranscoder> Publisher<S, T> {
    pub fn new(store: S, transcoder: T, config: PublishConfig) -> Self {
        Self {
            store,
            transcoder,
            config,
        }
    }

    pub fn blob_store(&self) -> &S {
        &self.store
    }

    /// Publish a COMPLETED analysis and record the published URLs on it.
    ///
    /// Preconditions are checked before anything is written. On failure the
    /// analysis is left untouched, though objects uploaded by earlier steps
    /// may remain. The caller is responsible for re-storing the analysis.
    #[instrument(skip(self, analysis), fields(analysis_id = %analysis.id()))]
    pub async fn publish(&self, analysis: &mut Analysis) -> Result<PublishedUrls> {
        let result = self.publish_artifacts(analysis).await;

        match &result {
            Ok(urls) => {
                analysis.set_published_urls(urls.raster_url.clone(), urls.vector_url.clone());
                metrics::counter!("severity.publish.succeeded").increment(1);
                info!(raster_url = %urls.raster_url, vector_url = %urls.vector_url, "Analysis published");
            }
            Err(e) => {
                metrics::counter!("severity.publish.failed").increment(1);
                warn!(error = %e, "Analysis not published");
            }
        }

        result
    }

    async fn publish_artifacts(&self, analysis: &Analysis) -> Result<PublishedUrls> {
        let checked = check_preconditions(analysis).await?;
        let aoi_id = checked.fire.aoi_id();

        let geometry = first_geometry(Path::new(checked.source_vector)).await?;

        let scope_id = analysis.job_id().unwrap_or_else(|| analysis.id()).to_string();
        let prefix = key_prefix(&scope_id, aoi_id);
        let raster_key = format!("{prefix}/{}", checked.fire.generate_filename(RASTER));
        let vector_key = format!("{prefix}/{}", checked.fire.generate_filename(VECTOR));
        let raster_type = content_type_for(&raster_key);
        let vector_type = content_type_for(&vector_key);

        // Aoi ids are provider data and may contain path separators, so the
        // scratch file never takes its name from them.
        let scratch = tempfile::tempdir().map_err(|e| SeverityError::publish_failed("transcode", e))?;
        let cog_path = scratch.path().join(SCRATCH_COG_NAME);
        self.transcoder
            .to_cog(Path::new(checked.raw_raster), &cog_path)
            .await
            .map_err(|e| as_publish_failure("transcode", e))?;

        let raster_url = self
            .store
            .upload_file(&cog_path, &raster_key, raster_type)
            .await
            .map_err(|e| as_publish_failure("upload raster", e))?;

        let vector_url = self
            .store
            .upload_file(Path::new(checked.source_vector), &vector_key, vector_type)
            .await
            .map_err(|e| as_publish_failure("upload vector", e))?;

        let item = CatalogItem::new(
            geometry,
            CatalogProperties {
                aoi_id: aoi_id.to_string(),
                scope_id: scope_id.clone(),
                fire_date: checked.fire.fire_date().to_string(),
                provider: checked.fire.provider().to_string(),
                generator_type: analysis.generator_type().to_string(),
                created_at: analysis.created_at(),
                status: analysis.status().to_string(),
            },
            CatalogAssets {
                raster: Asset {
                    href: raster_url.clone(),
                    media_type: raster_type.to_string(),
                },
                vector: Asset {
                    href: vector_url.clone(),
                    media_type: vector_type.to_string(),
                },
            },
        );

        let item_key = item_key(&self.config.catalog_prefix, &item.id);
        let item_href = self
            .store
            .put_object(&item_key, serde_json::to_vec(&item)?, content_type_for(&item_key))
            .await
            .map_err(|e| as_publish_failure("write catalog item", e))?;

        let pointer = CollectionPointer {
            collection_id: self.config.collection_id.clone(),
            latest_scope_id: scope_id,
            latest_item_id: item.id,
            latest_item_href: item_href,
            updated_at: Utc::now(),
        };
        let collection_key = collection_key(&self.config.catalog_prefix);
        self.store
            .put_object(
                &collection_key,
                serde_json::to_vec(&pointer)?,
                content_type_for(&collection_key),
            )
            .await
            .map_err(|e| as_publish_failure("write collection pointer", e))?;

        Ok(PublishedUrls {
            raster_url,
            vector_url,
        })
    }
}

/// `jobs/<scope_id>/<aoi_id>`
pub fn key_prefix(scope_id: &str, aoi_id: &str) -> String {
    format!("jobs/{scope_id}/{aoi_id}")
}

async fn check_preconditions(analysis: &Analysis) -> Result<Checked<'_>> {
    let failed = |precondition| SeverityError::PreconditionFailed {
        analysis_id: analysis.id().to_string(),
        precondition,
    };

    if analysis.status() != AnalysisStatus::Completed {
        return Err(failed(Precondition::NotCompleted {
            status: analysis.status(),
        }));
    }

    let fire = analysis
        .fire_metadata()
        .ok_or_else(|| failed(Precondition::MissingFireMetadata))?;
    if fire.aoi_id().is_empty() {
        return Err(failed(Precondition::EmptyAoiId));
    }

    let raw_raster = analysis
        .raw_raster_location()
        .ok_or_else(|| failed(Precondition::MissingRawRaster))?;
    if !is_reachable(raw_raster).await {
        return Err(failed(Precondition::RawRasterUnreachable {
            location: raw_raster.to_string(),
        }));
    }

    let source_vector = analysis
        .source_vector_location()
        .ok_or_else(|| failed(Precondition::MissingSourceVector))?;
    if !is_reachable(source_vector).await {
        return Err(failed(Precondition::SourceVectorUnreachable {
            location: source_vector.to_string(),
        }));
    }

    Ok(Checked {
        fire,
        raw_raster,
        source_vector,
    })
}

async fn is_reachable(location: &str) -> bool {
    tokio::fs::metadata(location)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

async fn first_geometry(path: &Path) -> Result<Value> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| SeverityError::publish_failed("read vector", e))?;
    let collection: Value =
        serde_json::from_str(&text).map_err(|e| SeverityError::publish_failed("read vector", e))?;

    collection
        .get("features")
        .and_then(Value::as_array)
        .and_then(|features| features.first())
        .and_then(|feature| feature.get("geometry"))
        .cloned()
        .ok_or_else(|| SeverityError::publish_failed("read vector", "no feature geometry"))
}

fn as_publish_failure(step: &'static str, error: SeverityError) -> SeverityError {
    match error {
        SeverityError::PublishFailed { .. } => error,
        other => SeverityError::publish_failed(step, other),
    }
}
