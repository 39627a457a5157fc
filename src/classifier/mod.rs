use std::path::PathBuf;

use log::debug;

use crate::config::Settings;
use crate::error::Rejection;

/// A request path that targets a watched, supported image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginAsset {
    /// e.g. `/media/subdir/image.jpg`
    pub url_path: String,
    /// e.g. `/media/subdir`
    pub directory: String,
    /// e.g. `image`
    pub file_stem: String,
    /// Extension as requested, e.g. `jpg`
    pub extension: String,
    pub origin_path: PathBuf,
}

/// Decides from the path alone whether a request is ours to transform.
pub fn classify(url_path: &str, settings: &Settings) -> Result<OriginAsset, Rejection> {
    if settings.watched_directories.is_empty() {
        return Err(Rejection::NotEligible(
            "no watched directories configured".to_string(),
        ));
    }

    if !url_path.starts_with('/') || url_path.split('/').any(|s| s == ".." || s == ".") {
        return Err(Rejection::NotEligible(format!("unsafe path: {}", url_path)));
    }

    let (directory, file_name) = match url_path.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => return Err(Rejection::NotEligible(format!("no directory in {}", url_path))),
    };

    if !settings
        .watched_directories
        .iter()
        .any(|pattern| pattern.is_match(directory))
    {
        return Err(Rejection::NotEligible(format!(
            "directory is not in watchlist: {}",
            directory
        )));
    }
    debug!("Requested directory is in watchlist: {}", directory);

    let (file_stem, extension) = match file_name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => (stem, ext),
        _ => {
            return Err(Rejection::NotEligible(format!(
                "no file extension: {}",
                file_name
            )))
        }
    };

    if !settings
        .file_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(extension))
    {
        return Err(Rejection::NotEligible(format!(
            "filetype is not supported: {}",
            extension
        )));
    }

    Ok(OriginAsset {
        url_path: url_path.to_string(),
        directory: directory.to_string(),
        file_stem: file_stem.to_string(),
        extension: extension.to_string(),
        origin_path: settings.static_dir.join(url_path.trim_start_matches('/')),
    })
}

/// The single filesystem touch of the classification stage.
pub async fn ensure_origin_exists(asset: &OriginAsset) -> Result<(), Rejection> {
    match tokio::fs::metadata(&asset.origin_path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        _ => Err(Rejection::NotEligible(format!(
            "origin image does not exist: {}",
            asset.origin_path.display()
        ))),
    }
}
