use std::path::{Path, PathBuf};

use crate::error::PredictError;

/// Maps an image reference served by the local file server back to the file
/// it was served from.
///
/// Every occurrence of `base_url` is replaced by `local_root`; a reference
/// without the prefix passes through untouched. Existence is not checked
/// here, see [`ensure_exists`].
///
/// Two normalisations happen before the substitution: surrounding
/// whitespace is trimmed from the reference (so a blank reference counts as
/// empty), and trailing separators are dropped from `local_root` so
/// `root/` and `root` give the same path.
pub fn resolve_local_path(
    image_reference: Option<&str>,
    local_root: &Path,
    base_url: &str,
    task_id: &str,
) -> Result<PathBuf, PredictError> {
    let reference = image_reference
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| PredictError::EmptyReference {
            task_id: task_id.to_string(),
        })?;
    if base_url.is_empty() {
        return Ok(PathBuf::from(reference));
    }
    let root = local_root.to_string_lossy();
    let root = root.trim_end_matches(['/', '\\']);
    Ok(PathBuf::from(reference.replace(base_url, root)))
}

pub fn ensure_exists(path: &Path) -> Result<(), PredictError> {
    if path.exists() {
        return Ok(());
    }
    Err(PredictError::NotFound {
        path: path.to_path_buf(),
    })
}

/// `<processed_dir>/temp_{task_id}.jpeg`
pub fn artifact_path(processed_dir: &Path, task_id: &str) -> PathBuf {
    processed_dir.join(format!("temp_{}.jpeg", sanitize_file_component(task_id)))
}

/// Scratch file used while searching for a quality that fits the budget:
/// the artifact name with its extension replaced by `_temp.jpg`.
pub fn scratch_path(output_path: &Path) -> PathBuf {
    let stem = output_path
        .file_stem()
        .map(|value| value.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output_path.with_file_name(format!("{stem}_temp.jpg"))
}

fn sanitize_file_component(raw: &str) -> String {
    raw.chars()
        .map(|ch| match ch {
            '/' | '\\' | ':' | '\0' => '_',
            other => other,
        })
        .collect()
}
