//! Conversion of raw rasters into cloud-optimized GeoTIFFs.

use crate::config::TranscoderConfig;
use crate::error::{Result, SeverityError};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, instrument};

#[async_trait]
pub trait RasterTranscoder: Send + Sync {
    /// Write a cloud-optimized copy of `input` to `output`, preserving pixel
    /// values and georeferencing.
    async fn to_cog(&self, input: &Path, output: &Path) -> Result<()>;
}

/// Runs `gdal_translate -of COG`
pub struct GdalCogTranscoder {
    config: TranscoderConfig,
}

impl GdalCogTranscoder {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    fn args(&self, input: &Path, output: &Path) -> Vec<String> {
        vec![
            "-of".to_string(),
            "COG".to_string(),
            "-co".to_string(),
            format!("COMPRESS={}", self.config.compression),
            "-co".to_string(),
            format!("BLOCKSIZE={}", self.config.block_size),
            "-co".to_string(),
            "OVERVIEWS=AUTO".to_string(),
            "-co".to_string(),
            format!("RESAMPLING={}", self.config.overview_resampling),
            input.display().to_string(),
            output.display().to_string(),
        ]
    }
}

#[async_trait]
impl RasterTranscoder for GdalCogTranscoder {
    #[instrument(skip(self), fields(program = %self.config.program))]
    async fn to_cog(&self, input: &Path, output: &Path) -> Result<()> {
        let output_result = Command::new(&self.config.program)
            .args(self.args(input, output))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SeverityError::publish_failed("transcode", format!("{}: {e}", self.config.program)))?;

        if !output_result.status.success() {
            let stderr = String::from_utf8_lossy(&output_result.stderr);
            return Err(SeverityError::publish_failed(
                "transcode",
                format!("{} exited with {}: {}", self.config.program, output_result.status, stderr.trim()),
            ));
        }

        debug!(output = %output.display(), "Raster transcoded");
        Ok(())
    }
}

/// Copies the input unchanged. For inputs that are already cloud-optimized
/// and for tests without GDAL installed.
#[derive(Debug, Default, Clone, Copy)]
pub struct CopyTranscoder;

#[async_trait]
impl RasterTranscoder for CopyTranscoder {
    async fn to_cog(&self, input: &Path, output: &Path) -> Result<()> {
        tokio::fs::copy(input, output)
            .await
            .map_err(|e| SeverityError::publish_failed("transcode", format!("{}: {e}", input.display())))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gdal_arguments() {
        let transcoder = GdalCogTranscoder::new(TranscoderConfig::default());
        let args = transcoder.args(Path::new("/in/raw.tif"), Path::new("/out/dnbr.cog.tif"));

        assert_eq!(&args[..2], &["-of", "COG"]);
        assert!(args.contains(&"COMPRESS=DEFLATE".to_string()));
        assert!(args.contains(&"BLOCKSIZE=512".to_string()));
        assert!(args.contains(&"RESAMPLING=NEAREST".to_string()));
        assert_eq!(args[args.len() - 2], "/in/raw.tif");
        assert_eq!(args[args.len() - 1], "/out/dnbr.cog.tif");
    }

    #[tokio::test]
    async fn test_missing_program_is_publish_failure() {
        let transcoder = GdalCogTranscoder::new(TranscoderConfig {
            program: "definitely-not-gdal-translate".to_string(),
            ..TranscoderConfig::default()
        });

        let dir = tempfile::tempdir().unwrap();
        let result = transcoder
            .to_cog(&dir.path().join("in.tif"), &dir.path().join("out.tif"))
            .await;

        assert!(matches!(
            result,
            Err(SeverityError::PublishFailed { step: "transcode", .. })
        ));
    }

    #[tokio::test]
    async fn test_copy_transcoder() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("raw.tif");
        let output = dir.path().join("out.tif");
        std::fs::write(&input, b"pixels").unwrap();

        CopyTranscoder.to_cog(&input, &output).await.unwrap();

        assert_eq!(std::fs::read(output).unwrap(), b"pixels");
    }
}
