//! Startup purge of the event queue

use tracing::{info, warn};

use crate::errors::ShipyardError;
use crate::queue::{MessageQueue, PurgeOutcome};

/// Discard events left over from a previous incarnation
///
/// A purge that is already running counts as done.
pub async fn purge_on_startup(queue: &dyn MessageQueue) -> Result<(), ShipyardError> {
    info!("Purging stale messages from {}...", queue.name());

    match queue.purge().await? {
        PurgeOutcome::Purged => {
            info!("Purged {}", queue.name());
        }
        PurgeOutcome::AlreadyInProgress => {
            warn!("Purge of {} already in progress, continuing", queue.name());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::memory::MemoryQueue;
    use std::time::Duration;

    #[tokio::test]
    async fn test_purge_in_progress_is_success() {
        let queue = MemoryQueue::new("events");
        queue.send("stale", Duration::ZERO).await.unwrap();

        purge_on_startup(&queue).await.unwrap();
        assert!(queue.is_empty().await);

        // second purge inside the cooldown window
        tokio_test::assert_ok!(purge_on_startup(&queue).await);
    }
}
