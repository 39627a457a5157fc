mod materializer;
mod tools;

pub use materializer::{Materializer, PendingBuild, VariantSpec};
pub use tools::{
    ImageBackend, ImageConversionFormat, ImageInfo, RasterBackend, TransformError, TransformJob,
};
