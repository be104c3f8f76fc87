use crate::sync::{CommitCoordinator, PromoteError, RoleManager, SyncShared};
use bytes::Bytes;
use std::io;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

/// One-shot completion handed to `SyncLog::append_with_callback`. Consumed
/// exactly once: by the replicator acknowledgement or by the delayed
/// timeout check, whichever comes first.
pub type CommitCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Handler for committed entries. Invoked once per entry in strictly
/// increasing offset order, both during startup replay and on the
/// standby's live acceptance path. Must not block for long or replication
/// backs up behind it.
pub type ApplyFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// MetaSyncClient is the running replication engine.
pub struct MetaSyncClient {
    pub log: SyncLog,
    pub role: RoleHandle,
    shared: Arc<SyncShared>,
    stop_tx: watch::Sender<bool>,
}

impl MetaSyncClient {
    pub(crate) fn new(
        log: SyncLog,
        role: RoleHandle,
        shared: Arc<SyncShared>,
        stop_tx: watch::Sender<bool>,
    ) -> Self {
        MetaSyncClient {
            log,
            role,
            shared,
            stop_tx,
        }
    }

    /// Point-in-time view of the watermarks, for health checks.
    pub fn status(&self) -> SyncStatus {
        self.shared.status()
    }

    /// Stops the replicator, the checkpoint worker and the RPC server.
    /// Dropping the client has the same effect.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
    }
}

/// SyncLog is the leader-side commit surface for the metadata layer.
pub struct SyncLog {
    coordinator: CommitCoordinator,
}

impl SyncLog {
    pub(crate) fn new(coordinator: CommitCoordinator) -> Self {
        SyncLog { coordinator }
    }

    /// Blocking commit: resolves once the standby has acknowledged the
    /// entry or the timeout has elapsed. Replication trouble is never an
    /// error — `replicated: false` plus master-only mode is the signal that
    /// only local durability was achieved.
    pub async fn append(&self, input: AppendInput) -> Result<AppendOutput, AppendError> {
        self.coordinator.append(input).await
    }

    /// Callback commit: returns the entry's starting offset immediately;
    /// `callback` fires once the standby acknowledges the entry, or when
    /// the engine gives up waiting.
    pub fn append_with_callback(
        &self,
        data: Bytes,
        callback: CommitCallback,
    ) -> Result<u64, AppendError> {
        self.coordinator.append_with_callback(data, callback)
    }
}

#[derive(Debug)]
pub struct AppendInput {
    pub data: Bytes,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct AppendOutput {
    /// Starting byte offset of the entry in the sync log.
    pub offset: u64,
    /// False when the commit is only locally durable.
    pub replicated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum AppendError {
    #[error("this node is not the leader")]
    NotLeader,

    #[error("Failed to persist log")]
    LocalIoError(io::Error),
}

/// RoleHandle reports and changes this node's replication role.
pub struct RoleHandle {
    manager: RoleManager,
}

impl RoleHandle {
    pub(crate) fn new(manager: RoleManager) -> Self {
        RoleHandle { manager }
    }

    pub fn is_leader(&self) -> bool {
        self.manager.is_leader()
    }

    /// Online promotion to leader, driven by an external arbiter. Starts
    /// the replicator, which re-validates the entire local log against the
    /// new standby.
    pub fn promote(&self) -> Result<(), PromoteError> {
        self.manager.promote()
    }
}

/// Watermark snapshot. When `master_only` is false the watermarks satisfy
/// `applied_offset <= sync_offset <= current_offset`; in master-only mode
/// `applied_offset` may run ahead of `sync_offset` up to `current_offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStatus {
    pub is_leader: bool,
    pub master_only: bool,
    pub current_offset: u64,
    pub sync_offset: u64,
    pub applied_offset: u64,
}
