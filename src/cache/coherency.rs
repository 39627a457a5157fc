use std::io;
use std::path::Path;
use std::time::SystemTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Missing,
    Fresh,
    Stale,
}

/// Compares modification times; the filesystem is the only index.
pub async fn check(origin: &Path, cache_file: &Path) -> io::Result<CacheState> {
    let cached_modified = match tokio::fs::metadata(cache_file).await {
        Ok(meta) => meta.modified()?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CacheState::Missing),
        Err(e) => return Err(e),
    };
    let origin_modified = tokio::fs::metadata(origin).await?.modified()?;

    Ok(compare(origin_modified, cached_modified))
}

pub fn compare(origin_modified: SystemTime, cached_modified: SystemTime) -> CacheState {
    if origin_modified > cached_modified {
        CacheState::Stale
    } else {
        CacheState::Fresh
    }
}

/// Removes a stale variant. Already gone counts as removed.
pub async fn invalidate(cache_file: &Path) -> io::Result<()> {
    match tokio::fs::remove_file(cache_file).await {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
