use std::path::PathBuf;

use thiserror::Error;

/// Failure while shrinking an image below its byte budget.
#[derive(Debug, Error)]
pub enum CompressionError {
    #[error("io failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("jpeg encode failed at quality {quality}: {source}")]
    Encode {
        quality: u8,
        #[source]
        source: jpeg_encoder::EncodingError,
    },
    #[error("image dimensions {width}x{height} exceed the jpeg limit of 65535")]
    Dimensions { width: u32, height: u32 },
}

impl CompressionError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CompressionError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Everything that can go wrong for a single task.
///
/// None of these escape a batch: the orchestrator turns each into a
/// placeholder prediction.
#[derive(Debug, Error)]
pub enum PredictError {
    #[error("{reason}")]
    MalformedTask { reason: String },
    #[error("empty image reference for task {task_id}")]
    EmptyReference { task_id: String },
    #[error("local image not found: {}", path.display())]
    NotFound { path: PathBuf },
    #[error("image compression failed: {0}")]
    Compression(#[from] CompressionError),
    #[error("failed to read {} for encoding: {source}", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("model invocation failed: {message}")]
    ModelInvocation { message: String },
}

impl PredictError {
    pub fn kind(&self) -> &'static str {
        match self {
            PredictError::MalformedTask { .. } => "malformed_task",
            PredictError::EmptyReference { .. } => "empty_reference",
            PredictError::NotFound { .. } => "not_found",
            PredictError::Compression(_) => "compression",
            PredictError::Encoding { .. } => "encoding",
            PredictError::ModelInvocation { .. } => "model_invocation",
        }
    }
}
