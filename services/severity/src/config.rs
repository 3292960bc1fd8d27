use serde::Deserialize;

/// Main configuration for the severity service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Analysis and job item tables
    pub metadata_store: MetadataStoreConfig,
    /// Artifact blob storage
    pub s3: S3Config,
    /// Publishing layout and raster transcoding
    #[serde(default)]
    pub publish: PublishConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Metadata store (PostgreSQL item tables) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetadataStoreConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Table holding standalone analysis records
    #[serde(default = "default_analyses_table")]
    pub analyses_table: String,
    /// Table holding job records
    #[serde(default = "default_jobs_table")]
    pub jobs_table: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Create the configured item tables on startup when missing
    #[serde(default = "default_create_tables", alias = "run_migrations")]
    pub create_tables: bool,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket receiving published artifacts and catalog records
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (8MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (8MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Publishing configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PublishConfig {
    /// Collection the catalog items belong to
    #[serde(default = "default_collection_id")]
    pub collection_id: String,
    /// Key prefix for catalog items and the collection pointer
    #[serde(default = "default_catalog_prefix")]
    pub catalog_prefix: String,
    /// Cloud-optimized GeoTIFF conversion
    #[serde(default)]
    pub transcoder: TranscoderConfig,
}

/// `gdal_translate` settings for COG conversion
#[derive(Debug, Clone, Deserialize)]
pub struct TranscoderConfig {
    /// Program to run, resolved through PATH
    #[serde(default = "default_transcoder_program")]
    pub program: String,
    /// Lossless compression codec
    #[serde(default = "default_compression")]
    pub compression: String,
    /// Internal tile size in pixels
    #[serde(default = "default_block_size")]
    pub block_size: u32,
    /// Overview resampling; must preserve pixel values
    #[serde(default = "default_overview_resampling")]
    pub overview_resampling: String,
}

// Default value functions
fn default_service_name() -> String {
    "fire-severity".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_analyses_table() -> String {
    "fire_severity_analyses".to_string()
}

fn default_jobs_table() -> String {
    "fire_severity_jobs".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_create_tables() -> bool {
    true
}

fn default_region() -> String {
    "ap-southeast-2".to_string()
}

fn default_multipart_threshold() -> usize {
    8 * 1024 * 1024 // 8MB
}

fn default_part_size() -> usize {
    8 * 1024 * 1024 // 8MB, S3 minimum is 5MB
}

fn default_collection_id() -> String {
    "fire-severity".to_string()
}

fn default_catalog_prefix() -> String {
    "catalog".to_string()
}

fn default_transcoder_program() -> String {
    "gdal_translate".to_string()
}

fn default_compression() -> String {
    "DEFLATE".to_string()
}

fn default_block_size() -> u32 {
    512
}

fn default_overview_resampling() -> String {
    "NEAREST".to_string()
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let builder = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/severity").required(false))
            .add_source(config::File::with_name("/etc/fire-severity/severity").required(false));

        Self::from_builder(builder)
    }

    fn from_builder(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> anyhow::Result<Self> {
        let config = builder
            // Override with environment variables
            // SEVERITY__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("SEVERITY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        crate::metadata_store::validate_table_name(&self.metadata_store.analyses_table)?;
        crate::metadata_store::validate_table_name(&self.metadata_store.jobs_table)?;

        if self.s3.part_size_bytes < 5 * 1024 * 1024 {
            anyhow::bail!("s3.part_size_bytes must be at least 5MB");
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            collection_id: default_collection_id(),
            catalog_prefix: default_catalog_prefix(),
            transcoder: TranscoderConfig::default(),
        }
    }
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            program: default_transcoder_program(),
            compression: default_compression(),
            block_size: default_block_size(),
            overview_resampling: default_overview_resampling(),
        }
    }
}
