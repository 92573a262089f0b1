use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::PredictError;

pub fn encode_file_base64(path: &Path) -> Result<String, PredictError> {
    let bytes = fs::read(path).map_err(|source| PredictError::Encoding {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BASE64.encode(bytes))
}

pub fn jpeg_data_url(encoded: &str) -> String {
    format!("data:image/jpeg;base64,{encoded}")
}
