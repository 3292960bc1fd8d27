use crate::config::S3Config;
use crate::error::{Result, SeverityError};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client as S3Client;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Content type for cloud-optimized GeoTIFF assets
pub const COG_CONTENT_TYPE: &str = "image/tiff; application=geotiff; profile=cloud-optimized";
pub const GEOJSON_CONTENT_TYPE: &str = "application/geo+json";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Durable object storage for published artifacts and catalog records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file under `key` and return its URL
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> Result<String>;

    /// Write `body` under `key`, replacing any existing object, and return its URL
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String>;

    /// URL an object under `key` is (or would be) reachable at
    fn url_for(&self, key: &str) -> String;
}

/// Content type for a key, from its extension
pub fn content_type_for(key: &str) -> &'static str {
    let extension = key
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "tif" | "tiff" => COG_CONTENT_TYPE,
        "geojson" => GEOJSON_CONTENT_TYPE,
        "json" => JSON_CONTENT_TYPE,
        _ => "application/octet-stream",
    }
}

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
    bucket: String,
    multipart_threshold_bytes: usize,
    part_size_bytes: usize,
}

impl S3BlobStore {
    /// Build a client and verify the bucket is reachable
    pub async fn connect(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        client
            .head_bucket()
            .bucket(&config.bucket)
            .send()
            .await
            .map_err(|e| SeverityError::BackendUnavailable {
                backend: "blob store",
                reason: format!("bucket '{}' not reachable: {e}", config.bucket),
            })?;

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 blob store initialized"
        );

        Ok(Self {
            client,
            bucket: config.bucket.clone(),
            multipart_threshold_bytes: config.multipart_threshold_bytes,
            part_size_bytes: config.part_size_bytes,
        })
    }

    /// Simple single-part upload for small objects
    async fn simple_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| SeverityError::blob_store("put object", e))?;

        Ok(())
    }

    /// Multipart upload for large objects
    async fn multipart_upload(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let create_response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| SeverityError::blob_store("create multipart upload", e))?;

        let upload_id = create_response
            .upload_id()
            .ok_or_else(|| SeverityError::blob_store("create multipart upload", "no upload id"))?;

        let result = self.upload_parts(key, upload_id, &body).await;
        abort_on_error(result, || async {
            self.client
                .abort_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .send()
                .await
                .map(|_| ())
                .map_err(|e| SeverityError::blob_store("abort multipart upload", e))
        })
        .await
    }

    /// Upload every part of an open multipart upload and complete it
    async fn upload_parts(&self, key: &str, upload_id: &str, body: &[u8]) -> Result<()> {
        let mut completed_parts = Vec::new();
        for (index, chunk) in body.chunks(self.part_size_bytes).enumerate() {
            let part_number = i32::try_from(index + 1)
                .map_err(|_| SeverityError::blob_store("upload part", "too many parts"))?;

            let response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(|e| SeverityError::blob_store("upload part", e))?;

            completed_parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(response.e_tag().unwrap_or_default())
                    .build(),
            );
        }

        let completed_upload = CompletedMultipartUpload::builder()
            .set_parts(Some(completed_parts))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(completed_upload)
            .send()
            .await
            .map_err(|e| SeverityError::blob_store("complete multipart upload", e))?;

        Ok(())
    }
}

/// Run `abort` when `result` is an error, keeping the original error.
/// A failed abort is only logged; the parts then expire under the bucket's
/// lifecycle rules.
async fn abort_on_error<F, Fut>(result: Result<()>, abort: F) -> Result<()>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    if let Err(e) = &result {
        warn!(error = %e, "Multipart upload failed, aborting");
        if let Err(abort_error) = abort().await {
            warn!(error = %abort_error, "Failed to abort multipart upload");
        }
    }
    result
}

#[async_trait]
impl BlobStore for S3BlobStore {
    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> Result<String> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| SeverityError::blob_store("read file", format!("{}: {e}", path.display())))?;

        self.put_object(key, body, content_type).await
    }

    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        let size_bytes = body.len();

        if size_bytes > self.multipart_threshold_bytes {
            self.multipart_upload(key, body, content_type).await?;
        } else {
            self.simple_upload(key, body, content_type).await?;
        }

        debug!(key = %key, size_bytes, "Object uploaded");
        Ok(self.url_for(key))
    }

    fn url_for(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

/// A stored object held by [`MemoryBlobStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// In-process blob store for tests and dry runs
pub struct MemoryBlobStore {
    container: String,
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBlobStore {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            objects: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn object(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    /// Keys currently stored, in sorted order
    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload_file(&self, path: &Path, key: &str, content_type: &str) -> Result<String> {
        let body = tokio::fs::read(path)
            .await
            .map_err(|e| SeverityError::blob_store("read file", format!("{}: {e}", path.display())))?;

        self.put_object(key, body, content_type).await
    }

    async fn put_object(&self, key: &str, body: Vec<u8>, content_type: &str) -> Result<String> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(self.url_for(key))
    }

    fn url_for(&self, key: &str) -> String {
        format!("memory://{}/{}", self.container, key)
    }
}
