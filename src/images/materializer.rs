use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;

use crate::error::Rejection;
use crate::images::tools::{ImageBackend, ImageConversionFormat, ImageInfo, TransformError, TransformJob};

/// Target properties of a cached variant.
#[derive(Debug, Clone, Copy)]
pub struct VariantSpec {
    pub width: u32,
    pub format: ImageConversionFormat,
    pub preserve_metadata: bool,
    pub animated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Commit {
    Open,
    Committed,
    Abandoned,
}

/// A variant build running on the blocking pool.
///
/// The staged file is renamed into place only while the build is still
/// wanted; once the build is abandoned, the staged file is dropped.
#[derive(Debug)]
pub struct PendingBuild {
    task: JoinHandle<Result<(), TransformError>>,
    commit: Arc<Mutex<Commit>>,
}

impl PendingBuild {
    /// Returns false when the variant was already renamed into place.
    fn abandon(&self) -> bool {
        let mut commit = self.commit.lock();
        match *commit {
            Commit::Committed => false,
            _ => {
                *commit = Commit::Abandoned;
                true
            }
        }
    }

    /// Waits for the blocking work to return, whatever its outcome.
    pub async fn settle(self) {
        if let Err(e) = self.task.await {
            debug!("Abandoned image build ended abnormally: {}", e);
        }
    }
}

/// Runs the image backend off the async runtime, bounded by a timeout.
pub struct Materializer {
    backend: Arc<dyn ImageBackend>,
    timeout: Duration,
}

impl Materializer {
    pub fn new(backend: Arc<dyn ImageBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn probe(&self, path: &Path, count_frames: bool) -> Result<ImageInfo, TransformError> {
        let path = path.to_path_buf();
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || backend.probe(&path, count_frames));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => flatten(joined),
            Err(_) => Err(TransformError::Timeout(self.timeout)),
        }
    }

    /// Starts writing the variant to `cache_file`.
    ///
    /// The image is encoded into a temporary file next to `cache_file`, given
    /// the origin's permissions and renamed into place only once complete; on
    /// failure the temporary file is removed and `cache_file` is left as it
    /// was.
    pub async fn start(
        &self,
        source: &Path,
        cache_dir: &Path,
        cache_file: &Path,
        variant: VariantSpec,
    ) -> Result<PendingBuild, Rejection> {
        // create_dir_all treats a concurrently created directory as success
        tokio::fs::create_dir_all(cache_dir)
            .await
            .map_err(|e| Rejection::FilesystemFailure(cache_dir.to_path_buf(), e))?;

        let commit = Arc::new(Mutex::new(Commit::Open));
        let job = StagedJob {
            source: source.to_path_buf(),
            cache_dir: cache_dir.to_path_buf(),
            cache_file: cache_file.to_path_buf(),
            variant,
            commit: Arc::clone(&commit),
            limit: self.timeout,
        };
        let backend = Arc::clone(&self.backend);
        let task = tokio::task::spawn_blocking(move || job.run(backend.as_ref()));

        Ok(PendingBuild { task, commit })
    }

    /// Waits for a build, giving up after the configured timeout.
    ///
    /// A build that times out is abandoned: it keeps running but will not
    /// rename its output into place. Hand it to [`PendingBuild::settle`] to
    /// know when it is really gone.
    pub async fn wait(&self, build: &mut PendingBuild) -> Result<(), TransformError> {
        match tokio::time::timeout(self.timeout, &mut build.task).await {
            Ok(joined) => flatten(joined),
            Err(_) if build.abandon() => Err(TransformError::Timeout(self.timeout)),
            // Renamed into place as the limit hit
            Err(_) => flatten((&mut build.task).await),
        }
    }
}

struct StagedJob {
    source: PathBuf,
    cache_dir: PathBuf,
    cache_file: PathBuf,
    variant: VariantSpec,
    commit: Arc<Mutex<Commit>>,
    limit: Duration,
}

impl StagedJob {
    fn run(self, backend: &dyn ImageBackend) -> Result<(), TransformError> {
        let staging = NamedTempFile::new_in(&self.cache_dir)?;
        debug!(
            "Staging {} at {}",
            self.cache_file.display(),
            staging.path().display()
        );

        backend.transform(&TransformJob {
            source: self.source.clone(),
            destination: staging.path().to_path_buf(),
            width: self.variant.width,
            format: self.variant.format,
            preserve_metadata: self.variant.preserve_metadata,
            animated: self.variant.animated,
        })?;

        // Temp files are owner-only; variants are served like their origin
        let permissions = std::fs::metadata(&self.source)?.permissions();
        std::fs::set_permissions(staging.path(), permissions)?;

        let mut commit = self.commit.lock();
        if *commit == Commit::Abandoned {
            debug!("Discarding late build of {}", self.cache_file.display());
            return Err(TransformError::Timeout(self.limit));
        }
        staging.persist(&self.cache_file).map_err(|e| e.error)?;
        *commit = Commit::Committed;

        info!("Image scaled and created: {}", self.cache_file.display());
        Ok(())
    }
}

fn flatten<T>(
    joined: Result<Result<T, TransformError>, tokio::task::JoinError>,
) -> Result<T, TransformError> {
    joined.unwrap_or_else(|e| Err(TransformError::Worker(e.to_string())))
}
