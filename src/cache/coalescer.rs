use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    Failed,
}

type Outcome = watch::Receiver<Option<BuildOutcome>>;

/// At most one in-flight build per cache file.
///
/// The first requester for a path becomes the leader and builds; everyone
/// arriving while it works waits for its outcome instead of building again.
#[derive(Debug, Clone, Default)]
pub struct BuildCoalescer {
    in_flight: Arc<Mutex<HashMap<PathBuf, Outcome>>>,
}

impl BuildCoalescer {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, key: &Path) -> BuildSlot {
        let mut receiver = {
            let mut in_flight = self.in_flight.lock();
            match in_flight.get(key) {
                Some(receiver) => receiver.clone(),
                None => {
                    let (sender, receiver) = watch::channel(None);
                    in_flight.insert(key.to_path_buf(), receiver);
                    return BuildSlot::Leader(LeaderGuard {
                        key: key.to_path_buf(),
                        coalescer: self.clone(),
                        sender: Some(sender),
                    });
                }
            }
        };

        let outcome = match receiver.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => (*outcome).unwrap_or(BuildOutcome::Failed),
            Err(_) => BuildOutcome::Failed,
        };
        BuildSlot::Follower(outcome)
    }

    #[cfg(test)]
    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }
}

#[derive(Debug)]
pub enum BuildSlot {
    Leader(LeaderGuard),
    /// Another request built (or failed to build) this path meanwhile.
    Follower(BuildOutcome),
}

#[cfg(test)]
impl BuildSlot {
    pub(crate) fn is_leader(&self) -> bool {
        matches!(self, BuildSlot::Leader(_))
    }
}

/// Held by the request doing the build. Dropping it without calling
/// [`LeaderGuard::complete`] reports a failure to the waiters.
#[derive(Debug)]
pub struct LeaderGuard {
    key: PathBuf,
    coalescer: BuildCoalescer,
    sender: Option<watch::Sender<Option<BuildOutcome>>>,
}

impl LeaderGuard {
    pub fn complete(mut self, outcome: BuildOutcome) {
        self.settle(outcome);
    }

    fn settle(&mut self, outcome: BuildOutcome) {
        if let Some(sender) = self.sender.take() {
            self.coalescer.in_flight.lock().remove(&self.key);
            sender.send_replace(Some(outcome));
        }
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.settle(BuildOutcome::Failed);
    }
}
