use std::path::PathBuf;

use crate::config::Settings;
use crate::request::RequestContext;
use crate::scaling::ScalingDecision;

/// Where a variant lives on disk and the path the file server should serve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLocator {
    pub cache_dir: PathBuf,
    pub cache_file: PathBuf,
    /// Web-root relative path, e.g. `/images-cache/640/photo.jpg`
    pub rewrite: String,
}

impl CacheLocator {
    pub fn new(ctx: &RequestContext, decision: &ScalingDecision, settings: &Settings) -> Self {
        let mut dir = format!(
            "{}{}",
            ctx.directory.trim_end_matches('/'),
            settings.cache_suffix
        );
        if !dir.starts_with('/') {
            dir.insert(0, '/');
        }
        if !decision.conversion_only {
            dir = format!("{}/{}", dir, decision.width);
        }

        let rewrite = format!("{}/{}.{}", dir, ctx.file_stem, decision.extension);
        let cache_dir = settings.static_dir.join(dir.trim_start_matches('/'));
        let cache_file = settings.static_dir.join(rewrite.trim_start_matches('/'));

        Self {
            cache_dir,
            cache_file,
            rewrite,
        }
    }
}
