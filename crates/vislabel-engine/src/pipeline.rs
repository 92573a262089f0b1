use std::fs;
use std::path::PathBuf;

use crate::compress::{compress_image, CompressionOutcome};
use crate::config::BackendConfig;
use crate::encode::encode_file_base64;
use crate::error::{CompressionError, PredictError};
use crate::paths::{artifact_path, ensure_exists, resolve_local_path};

#[derive(Debug, Clone)]
pub struct PreparedImage {
    pub local_path: PathBuf,
    pub artifact_path: PathBuf,
    pub outcome: CompressionOutcome,
    pub base64: String,
}

/// Turns a task's image reference into base64 JPEG text ready for the model:
/// resolve, check, compress into `processed/`, encode.
#[derive(Debug, Clone)]
pub struct ImagePipeline {
    storage_root: PathBuf,
    processed_dir: PathBuf,
    base_url: String,
    target_bytes: u64,
}

impl ImagePipeline {
    pub fn new(config: &BackendConfig) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            processed_dir: config.processed_dir(),
            base_url: config.base_url.clone(),
            target_bytes: config.target_bytes,
        }
    }

    pub fn prepare(
        &self,
        image_reference: Option<&str>,
        task_id: &str,
    ) -> Result<PreparedImage, PredictError> {
        let local_path =
            resolve_local_path(image_reference, &self.storage_root, &self.base_url, task_id)?;
        log::info!("Processing image path: {}", local_path.display());
        ensure_exists(&local_path)?;

        fs::create_dir_all(&self.processed_dir)
            .map_err(|err| CompressionError::io(&self.processed_dir, err))?;
        let artifact_path = artifact_path(&self.processed_dir, task_id);
        let outcome = compress_image(&local_path, &artifact_path, self.target_bytes)?;
        log::info!(
            "Compressed task {task_id} via {} to {} bytes ({})",
            outcome.label(),
            outcome.bytes(),
            artifact_path.display()
        );

        let base64 = encode_file_base64(&artifact_path)?;
        Ok(PreparedImage {
            local_path,
            artifact_path,
            outcome,
            base64,
        })
    }
}
