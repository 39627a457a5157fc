use std::sync::Arc;

use log::{debug, info, warn};

use crate::cache::coherency;
use crate::cache::{
    BuildCoalescer, BuildOutcome, BuildSlot, CacheLocator, CacheState, LeaderGuard,
};
use crate::classifier;
use crate::config::Settings;
use crate::error::Rejection;
use crate::images::{ImageBackend, ImageConversionFormat, Materializer, TransformError, VariantSpec};
use crate::request::{RequestContext, RequestSignals};
use crate::scaling::{self, ScalingDecision};

/// Decides which file should be served for a request and makes sure it
/// exists.
pub struct Engine {
    settings: Arc<Settings>,
    materializer: Materializer,
    coalescer: BuildCoalescer,
}

impl Engine {
    pub fn new(settings: Settings, backend: Arc<dyn ImageBackend>) -> Self {
        let materializer = Materializer::new(backend, settings.transform_timeout);
        Self {
            settings: Arc::new(settings),
            materializer,
            coalescer: BuildCoalescer::new(),
        }
    }

    /// Returns the web-root path to serve instead of the requested one.
    ///
    /// Any `Err` means the request should go on unmodified.
    pub async fn resolve(&self, signals: &RequestSignals) -> Result<String, Rejection> {
        let asset = classifier::classify(&signals.path, &self.settings)?;
        classifier::ensure_origin_exists(&asset).await?;

        let ctx = RequestContext::new(asset, signals, &self.settings);
        let info = self.materializer.probe(&ctx.origin_path, false).await?;
        debug!("({}) meta loaded: {}x{}", ctx.file_stem, info.width, info.height);

        let decision = scaling::resolve(&ctx, info.width, &self.settings)?;
        debug!(
            "({}) scale by {:?} to {}px as .{}",
            ctx.file_stem, decision.strategy, decision.width, decision.extension
        );

        let locator = CacheLocator::new(&ctx, &decision, &self.settings);
        self.ensure_variant(&ctx, &decision, &locator).await?;

        Ok(locator.rewrite)
    }

    async fn ensure_variant(
        &self,
        ctx: &RequestContext,
        decision: &ScalingDecision,
        locator: &CacheLocator,
    ) -> Result<(), Rejection> {
        if self.cache_state(ctx, locator).await? == CacheState::Fresh {
            info!("({}) requested image is in cache: {}", ctx.file_stem, locator.rewrite);
            return Ok(());
        }

        let limit = self.settings.transform_timeout;
        let slot = tokio::time::timeout(limit, self.coalescer.acquire(&locator.cache_file))
            .await
            .map_err(|_| TransformError::Timeout(limit))?;

        match slot {
            BuildSlot::Follower(BuildOutcome::Built) => {
                debug!("({}) built by a concurrent request", ctx.file_stem);
                Ok(())
            }
            BuildSlot::Follower(BuildOutcome::Failed) => {
                Err(Rejection::ConcurrentBuildFailed(locator.cache_file.clone()))
            }
            BuildSlot::Leader(guard) => self.build(ctx, decision, locator, guard).await,
        }
    }

    // Dropping `guard` early reports the build as failed to any waiters
    async fn build(
        &self,
        ctx: &RequestContext,
        decision: &ScalingDecision,
        locator: &CacheLocator,
        guard: LeaderGuard,
    ) -> Result<(), Rejection> {
        // A previous leader may have finished between our check and acquire
        match self.cache_state(ctx, locator).await? {
            CacheState::Fresh => {
                guard.complete(BuildOutcome::Built);
                return Ok(());
            }
            CacheState::Stale => {
                warn!(
                    "({}) cached image is stale and will be removed: {}",
                    ctx.file_stem,
                    locator.cache_file.display()
                );
                coherency::invalidate(&locator.cache_file)
                    .await
                    .map_err(|e| Rejection::FilesystemFailure(locator.cache_file.clone(), e))?;
            }
            CacheState::Missing => {
                info!(
                    "({}) requested image is not in cache: {}",
                    ctx.file_stem, locator.rewrite
                );
            }
        }

        let format = ImageConversionFormat::from_extension(&decision.extension).ok_or_else(|| {
            Rejection::RejectedByPolicy(format!("no encoder for .{}", decision.extension))
        })?;

        let variant = VariantSpec {
            width: decision.width,
            format,
            preserve_metadata: self.settings.save_with_metadata,
            animated: self.is_animated(ctx, format).await?,
        };

        let mut build = self
            .materializer
            .start(&ctx.origin_path, &locator.cache_dir, &locator.cache_file, variant)
            .await?;

        match self.materializer.wait(&mut build).await {
            Ok(()) => {
                guard.complete(BuildOutcome::Built);
                Ok(())
            }
            Err(e @ TransformError::Timeout(_)) => {
                warn!(
                    "({}) build of {} is still running, serving the original",
                    ctx.file_stem, locator.rewrite
                );
                // The key stays taken until the blocking work is really over
                tokio::spawn(async move {
                    build.settle().await;
                    guard.complete(BuildOutcome::Failed);
                });
                Err(e.into())
            }
            Err(e) => {
                guard.complete(BuildOutcome::Failed);
                Err(e.into())
            }
        }
    }

    // Frames are only counted when a GIF is about to be rebuilt as a GIF
    async fn is_animated(
        &self,
        ctx: &RequestContext,
        format: ImageConversionFormat,
    ) -> Result<bool, Rejection> {
        if !self.settings.animated
            || format != ImageConversionFormat::Gif
            || ctx.origin_extension() != "gif"
        {
            return Ok(false);
        }
        let info = self.materializer.probe(&ctx.origin_path, true).await?;
        Ok(info.pages > 1)
    }

    async fn cache_state(
        &self,
        ctx: &RequestContext,
        locator: &CacheLocator,
    ) -> Result<CacheState, Rejection> {
        coherency::check(&ctx.origin_path, &locator.cache_file)
            .await
            .map_err(|e| Rejection::FilesystemFailure(locator.cache_file.clone(), e))
    }
}
