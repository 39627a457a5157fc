pub mod coalescer;
pub mod coherency;
mod locator;

pub use coalescer::{BuildCoalescer, BuildOutcome, BuildSlot, LeaderGuard};
pub use coherency::CacheState;
pub use locator::CacheLocator;
