use std::path::PathBuf;

use log::Level;
use thiserror::Error;

use crate::images::TransformError;

/// Why a request was handed to the file server untouched.
///
/// Every variant is recovered per request: the original asset is served and
/// the reason only shows up in the log.
#[derive(Error, Debug)]
pub enum Rejection {
    #[error("Not eligible: {0}")]
    NotEligible(String),

    #[error("No sizing signal: {0}")]
    SignalMissing(String),

    #[error("Rejected by policy: {0}")]
    RejectedByPolicy(String),

    #[error("Origin image is {intrinsic}px wide, not wider than {requested}px")]
    OriginTooSmall { intrinsic: u32, requested: u32 },

    #[error("Image transform failed: {0}")]
    TransformFailure(#[from] TransformError),

    #[error("Concurrent build of {0} failed")]
    ConcurrentBuildFailed(PathBuf),

    #[error("Filesystem error at {0}: {1}")]
    FilesystemFailure(PathBuf, std::io::Error),
}

impl Rejection {
    pub fn level(&self) -> Level {
        match self {
            Rejection::NotEligible(_) => Level::Debug,
            Rejection::SignalMissing(_)
            | Rejection::RejectedByPolicy(_)
            | Rejection::OriginTooSmall { .. }
            | Rejection::ConcurrentBuildFailed(_) => Level::Warn,
            Rejection::TransformFailure(_) | Rejection::FilesystemFailure(..) => Level::Error,
        }
    }
}
