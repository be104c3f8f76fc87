use crate::api::{AppendError, AppendInput, AppendOutput, CommitCallback};
use crate::sync::state::SyncShared;
use bytes::Bytes;
use std::sync::Arc;
use tokio::time::{timeout_at, Duration, Instant};

/// CommitCoordinator is the leader-side write surface. Both commit paths
/// append locally first; replication trouble is never an error to the
/// caller — a commit that only reached the local log reports
/// `replicated: false` and flips the engine into master-only mode.
pub(crate) struct CommitCoordinator {
    logger: slog::Logger,
    shared: Arc<SyncShared>,
    async_commit_timeout: Duration,
}

impl CommitCoordinator {
    pub(crate) fn new(
        logger: slog::Logger,
        shared: Arc<SyncShared>,
        async_commit_timeout: Duration,
    ) -> Self {
        CommitCoordinator {
            logger,
            shared,
            async_commit_timeout,
        }
    }

    /// Blocking commit: returns once the standby has acknowledged the entry
    /// or `input.timeout` has elapsed.
    pub(crate) async fn append(&self, input: AppendInput) -> Result<AppendOutput, AppendError> {
        let (entry_offset, entry_end, skip_wait) = {
            let mut inner = self.shared.lock();
            if !inner.is_leader {
                return Err(AppendError::NotLeader);
            }
            let entry_offset = inner.current_offset;
            let record_len = inner
                .wal
                .append(&input.data)
                .map_err(AppendError::LocalIoError)?;
            inner.current_offset += record_len;
            let entry_end = inner.current_offset;
            // Standby is way behind and we've already given up on it;
            // local durability has to be enough.
            let skip_wait = inner.master_only && inner.sync_offset < entry_offset;
            if skip_wait {
                inner.applied_offset = inner.current_offset;
            }
            (entry_offset, entry_end, skip_wait)
        };
        self.shared.wake_replicator();

        if skip_wait {
            slog::warn!(
                self.logger,
                "master-only mode, not waiting for standby; offset = {}",
                entry_offset
            );
            return Ok(AppendOutput {
                offset: entry_offset,
                replicated: false,
            });
        }

        let started = Instant::now();
        let deadline = started + input.timeout;
        let mut acked = self.shared.subscribe_acked();
        loop {
            if *acked.borrow() >= entry_end {
                self.shared.clear_master_only_if_caught_up(&self.logger);
                slog::debug!(
                    self.logger,
                    "sync commit of offset {} took {} ms",
                    entry_offset,
                    started.elapsed().as_millis()
                );
                return Ok(AppendOutput {
                    offset: entry_offset,
                    replicated: true,
                });
            }
            match timeout_at(deadline, acked.changed()).await {
                Ok(Ok(())) => continue,
                // Engine shutting down mid-wait; same answer as a timeout.
                Ok(Err(_sender_gone)) => break,
                Err(_deadline) => break,
            }
        }

        self.shared.enter_master_only(&self.logger);
        Ok(AppendOutput {
            offset: entry_offset,
            replicated: false,
        })
    }

    /// Callback commit: registers `callback` against the entry's starting
    /// offset and returns immediately. The callback fires with success on
    /// standby acknowledgement, or from the delayed timeout check once the
    /// engine gives up waiting (which also enters master-only mode).
    pub(crate) fn append_with_callback(
        &self,
        data: Bytes,
        callback: CommitCallback,
    ) -> Result<u64, AppendError> {
        let mut inner = self.shared.lock();
        if !inner.is_leader {
            return Err(AppendError::NotLeader);
        }
        let entry_offset = inner.current_offset;
        let record_len = inner.wal.append(&data).map_err(AppendError::LocalIoError)?;
        let skip_wait = inner.master_only && inner.sync_offset < entry_offset;
        inner.current_offset += record_len;

        if skip_wait {
            inner.applied_offset = inner.current_offset;
            drop(inner);
            self.shared.wake_replicator();
            slog::warn!(
                self.logger,
                "master-only mode, completing commit immediately; offset = {}",
                entry_offset
            );
            callback(true);
            return Ok(entry_offset);
        }

        inner.pending.insert(entry_offset, callback);
        drop(inner);
        self.shared.wake_replicator();

        let shared = Arc::clone(&self.shared);
        let logger = self.logger.clone();
        let delay = self.async_commit_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            shared.process_pending(&logger, entry_offset, record_len, true);
        });

        Ok(entry_offset)
    }
}
