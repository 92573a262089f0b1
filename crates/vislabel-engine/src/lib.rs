pub mod backend;
pub mod client;
pub mod compress;
pub mod config;
pub mod encode;
pub mod error;
pub mod logging;
pub mod paths;
pub mod pipeline;

pub use backend::{InferenceBackend, VisionBackend};
pub use client::{
    ArkVisionClient, DryrunVisionClient, VisionClient, VisionClientRegistry, VisionRequest,
    VisionResponse,
};
pub use compress::{compress_image, CompressionOutcome};
pub use config::{ArkClientConfig, BackendConfig};
pub use error::{CompressionError, PredictError};
pub use logging::{init_logging, LogConfig, LogSink};
pub use pipeline::{ImagePipeline, PreparedImage};
