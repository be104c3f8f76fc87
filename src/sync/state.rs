use crate::api::{ApplyFn, CommitCallback, SyncStatus};
use crate::wal::WalWriter;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::{watch, Notify};

/// SyncShared is the single synchronization point of the engine: one mutex
/// guards the log write handle, the three watermarks, the degraded-mode
/// flag, role state and the pending-callback table. The replicator wakes on
/// `replicator_wake`; blocking commit callers await the acknowledged offset
/// published on the watch channel.
pub(crate) struct SyncShared {
    inner: Mutex<SharedInner>,
    replicator_wake: Notify,
    acked_tx: watch::Sender<u64>,
    acked_rx: watch::Receiver<u64>,
    apply: ApplyFn,
}

pub(crate) struct SharedInner {
    pub wal: WalWriter,
    /// End of the locally-written log.
    pub current_offset: u64,
    /// Offset up to which the standby has acknowledged acceptance. Only
    /// meaningful on the leader; the replicator is its only live writer.
    pub sync_offset: u64,
    /// Offset up to which entries no longer need replay after a restart.
    pub applied_offset: u64,
    /// True while the leader has given up waiting on the standby.
    pub master_only: bool,
    pub is_leader: bool,
    pub master_addr: String,
    pub slave_addr: String,
    /// Callback commits waiting for acknowledgement, keyed by the entry's
    /// starting offset. Each is consumed exactly once.
    pub pending: HashMap<u64, CommitCallback>,
}

impl SyncShared {
    pub(crate) fn new(
        wal: WalWriter,
        current_offset: u64,
        sync_offset: u64,
        applied_offset: u64,
        is_leader: bool,
        master_addr: String,
        slave_addr: String,
        apply: ApplyFn,
    ) -> Self {
        let (acked_tx, acked_rx) = watch::channel(sync_offset);

        SyncShared {
            inner: Mutex::new(SharedInner {
                wal,
                current_offset,
                sync_offset,
                applied_offset,
                master_only: false,
                is_leader,
                master_addr,
                slave_addr,
                pending: HashMap::new(),
            }),
            replicator_wake: Notify::new(),
            acked_tx,
            acked_rx,
            apply,
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SharedInner> {
        self.inner.lock().expect("sync state mutex poisoned")
    }

    pub(crate) fn wake_replicator(&self) {
        self.replicator_wake.notify_one();
    }

    pub(crate) fn wake_notify(&self) -> &Notify {
        &self.replicator_wake
    }

    pub(crate) fn subscribe_acked(&self) -> watch::Receiver<u64> {
        self.acked_rx.clone()
    }

    pub(crate) fn publish_acked(&self, offset: u64) {
        // Can't fail: we hold a receiver for the channel's lifetime.
        let _ = self.acked_tx.send(offset);
    }

    pub(crate) fn apply(&self, payload: Bytes) {
        (self.apply)(payload);
    }

    /// (current_offset, sync_offset) as one consistent read.
    pub(crate) fn replication_window(&self) -> (u64, u64) {
        let inner = self.lock();
        (inner.current_offset, inner.sync_offset)
    }

    pub(crate) fn has_unacked(&self) -> bool {
        let inner = self.lock();
        inner.sync_offset < inner.current_offset
    }

    pub(crate) fn status(&self) -> SyncStatus {
        let inner = self.lock();
        SyncStatus {
            is_leader: inner.is_leader,
            master_only: inner.master_only,
            current_offset: inner.current_offset,
            sync_offset: inner.sync_offset,
            applied_offset: inner.applied_offset,
        }
    }

    pub(crate) fn pending_callbacks(&self) -> usize {
        self.lock().pending.len()
    }

    /// Consumes the pending callback registered at `offset`, if it is still
    /// pending, and fires it with success. Safe to race between the
    /// replicator acknowledgement and the delayed timeout check: whichever
    /// runs second finds the table empty and does nothing. With
    /// `timeout_check` set, a consumed callback also flips degraded mode on,
    /// since the standby failed to acknowledge within the caller-visible
    /// window.
    pub(crate) fn process_pending(
        &self,
        logger: &slog::Logger,
        offset: u64,
        record_len: u64,
        timeout_check: bool,
    ) {
        let callback = self.lock().pending.remove(&offset);
        let callback = match callback {
            Some(callback) => callback,
            None => return,
        };

        // Caller code runs outside the lock.
        callback(true);

        let mut inner = self.lock();
        if offset + record_len > inner.applied_offset {
            inner.applied_offset = offset + record_len;
        }
        if timeout_check && !inner.master_only {
            inner.master_only = true;
            slog::warn!(
                logger,
                "commit at offset {} unacknowledged after timeout, entering master-only mode",
                offset
            );
        }
    }

    /// Acknowledges one replicated record: advances `sync_offset`, clears
    /// degraded mode once fully caught up, and wakes blocking commit
    /// callers.
    pub(crate) fn advance_acked(&self, logger: &slog::Logger, record_len: u64) {
        let acked = {
            let mut inner = self.lock();
            inner.sync_offset += record_len;
            if inner.master_only && inner.sync_offset == inner.current_offset {
                inner.master_only = false;
                slog::info!(logger, "standby caught up, leaving master-only mode");
            }
            inner.sync_offset
        };
        self.publish_acked(acked);
    }

    /// Divergence recovery: adopt the standby's own end of log as the new
    /// acknowledgement watermark.
    pub(crate) fn rewind_sync(&self, logger: &slog::Logger, offset: u64) {
        {
            let mut inner = self.lock();
            slog::info!(
                logger,
                "sync_offset rewound from {} to {}",
                inner.sync_offset,
                offset
            );
            inner.sync_offset = offset;
        }
        self.publish_acked(offset);
    }

    /// End of a drain pass: everything acknowledged so far no longer needs
    /// replay on this node.
    pub(crate) fn finish_drain_pass(&self) {
        let mut inner = self.lock();
        if inner.sync_offset > inner.applied_offset {
            inner.applied_offset = inner.sync_offset;
        }
    }

    /// A commit wait timed out: give up on the standby for now. Local
    /// durability is the contract from here, so nothing locally written
    /// needs replay on this node. No-op if the standby caught up while the
    /// timeout was firing.
    pub(crate) fn enter_master_only(&self, logger: &slog::Logger) {
        let mut inner = self.lock();
        if inner.sync_offset >= inner.current_offset {
            return;
        }
        if !inner.master_only {
            inner.master_only = true;
            slog::warn!(logger, "sync log timeout, entering master-only mode");
        }
        inner.applied_offset = inner.current_offset;
    }

    pub(crate) fn clear_master_only_if_caught_up(&self, logger: &slog::Logger) {
        let mut inner = self.lock();
        if inner.master_only && inner.sync_offset == inner.current_offset {
            inner.master_only = false;
            slog::info!(logger, "leaving master-only mode");
        }
    }
}
