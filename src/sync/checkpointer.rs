use crate::sync::state::SyncShared;
use crate::wal::CheckpointFile;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// Saves the applied watermark on a fixed interval, independent of write
/// volume, which bounds replay cost after a restart. Also logs a status
/// line so operators can watch the watermarks and degraded-mode flag. Runs
/// for the process lifetime on both roles.
pub(crate) struct CheckpointWorker {
    logger: slog::Logger,
    shared: Arc<SyncShared>,
    checkpoint: CheckpointFile,
    interval: Duration,
    stop: watch::Receiver<bool>,
}

impl CheckpointWorker {
    pub(crate) fn new(
        logger: slog::Logger,
        shared: Arc<SyncShared>,
        checkpoint: CheckpointFile,
        interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        CheckpointWorker {
            logger,
            shared,
            checkpoint,
            interval,
            stop,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.stop.changed() => return,
            }
            self.tick();
        }
    }

    fn tick(&self) {
        let status = self.shared.status();
        slog::info!(
            self.logger,
            "sync_offset = {}, current_offset = {}, applied_offset = {}, pending callbacks = {}, master_only = {}",
            status.sync_offset,
            status.current_offset,
            status.applied_offset,
            self.shared.pending_callbacks(),
            status.master_only
        );
        if let Err(e) = self.checkpoint.save(status.applied_offset) {
            slog::warn!(self.logger, "failed to save applied checkpoint: {}", e);
        }
    }
}
