//! Fire Severity Service
//!
//! Lifecycle tracking and publishing for fire severity (dNBR) analyses.
//! Each analysis covers one area of interest identified from provider fire
//! history data, moves through a small status lifecycle, is persisted in a
//! key-value metadata store, and once complete is published to blob storage
//! under a deterministic key layout together with a catalog record.
//!
//! ## Architecture
//!
//! ```text
//! Provider GeoJSON          PostgreSQL item tables        S3 Bucket
//! ┌──────────────┐          ┌──────────────────┐         ┌──────────────┐
//! │ FeatureColl. │          │ analyses         │         │ jobs/        │
//! └──────────────┘          │ jobs             │         │   {scope}/   │
//!        │                  └──────────────────┘         │   {aoi}/     │
//!        ▼                           ▲                   │ catalog/     │
//! ┌──────────────┐                   │                   └──────────────┘
//! │ Fire         │                   │                          ▲
//! │ Metadata     │                   │                          │
//! └──────────────┘                   │                          │
//!        │                           │                          │
//!        ▼                           │                          │
//! ┌──────────────┐           ┌──────────────┐           ┌──────────────┐
//! │ Generator    │──────────▶│ Analysis /   │──────────▶│ Publisher    │
//! │ (run_job)    │           │ Job services │           │ (COG + STAC) │
//! └──────────────┘           └──────────────┘           └──────────────┘
//! ```

pub mod analysis;
pub mod analysis_service;
pub mod blob_store;
pub mod catalog;
pub mod config;
pub mod error;
pub mod fire_metadata;
pub mod generator;
pub mod job;
pub mod job_service;
pub mod metadata_store;
pub mod pipeline;
pub mod publisher;
pub mod raster;

pub use analysis::{Analysis, AnalysisStatus, GeneratorType};
pub use analysis_service::AnalysisService;
pub use blob_store::{BlobStore, MemoryBlobStore, S3BlobStore};
pub use config::Config;
pub use error::{Precondition, Result, SeverityError};
pub use fire_metadata::FireMetadata;
pub use generator::{run_job, AnalysisGenerator, DeferredGenerator, DummyGenerator};
pub use job::Job;
pub use job_service::JobService;
pub use metadata_store::{connect_pool, ItemBackend, MemoryItemTable, PgItemTable};
pub use pipeline::{publish_job, JobPublishReport};
pub use publisher::{PublishedUrls, Publisher};
pub use raster::{CopyTranscoder, GdalCogTranscoder, RasterTranscoder};
