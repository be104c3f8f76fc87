use crate::sync::peer_link::PeerLinkFactory;
use crate::sync::replicator::Replicator;
use crate::sync::state::SyncShared;
use crate::wal::WalCursor;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum PromoteError {
    #[error("failed to open replication log cursor")]
    LogCursor(io::Error),
}

/// RoleManager tracks whether this node is the leader and performs the
/// bookkeeping for an online promotion. Role changes are handed to this
/// node by an external arbiter; there is no demotion path.
pub(crate) struct RoleManager {
    logger: slog::Logger,
    shared: Arc<SyncShared>,
    link_factory: Arc<dyn PeerLinkFactory>,
    wal_path: PathBuf,
    retry_backoff: Duration,
    stop: watch::Receiver<bool>,
}

impl RoleManager {
    pub(crate) fn new(
        logger: slog::Logger,
        shared: Arc<SyncShared>,
        link_factory: Arc<dyn PeerLinkFactory>,
        wal_path: PathBuf,
        retry_backoff: Duration,
        stop: watch::Receiver<bool>,
    ) -> Self {
        RoleManager {
            logger,
            shared,
            link_factory,
            wal_path,
            retry_backoff,
            stop,
        }
    }

    pub(crate) fn is_leader(&self) -> bool {
        self.shared.lock().is_leader
    }

    /// Flips this node to leader and starts replicating its entire log to
    /// the new standby. The former leader may never have received any of
    /// it, so acknowledgement restarts from offset 0 and the divergence
    /// protocol converges on the standby's actual end of log.
    pub(crate) fn promote(&self) -> Result<(), PromoteError> {
        let standby_addr = {
            let mut inner = self.shared.lock();
            if inner.is_leader {
                slog::info!(self.logger, "already leader, promotion is a no-op");
                return Ok(());
            }
            inner.is_leader = true;
            inner.sync_offset = 0;
            let previous_master = inner.master_addr.clone();
            inner.master_addr = inner.slave_addr.clone();
            inner.slave_addr = previous_master;
            inner.slave_addr.clone()
        };
        self.shared.publish_acked(0);

        self.spawn_replicator(0)?;
        slog::info!(
            self.logger,
            "node switched to leader; replicating to '{}' from offset 0",
            standby_addr
        );

        Ok(())
    }

    /// Starts the background replication worker with its own read cursor
    /// positioned at `from_offset` and a fresh link to the current standby.
    pub(crate) fn spawn_replicator(&self, from_offset: u64) -> Result<(), PromoteError> {
        let mut cursor = WalCursor::open(&self.wal_path).map_err(PromoteError::LogCursor)?;
        cursor.seek(from_offset).map_err(PromoteError::LogCursor)?;

        let standby_addr = self.shared.lock().slave_addr.clone();
        let link = self.link_factory.connect(&standby_addr);
        let replicator = Replicator::new(
            self.logger.new(slog::o!("Task" => "replicator")),
            Arc::clone(&self.shared),
            cursor,
            link,
            self.retry_backoff,
            self.stop.clone(),
        );
        tokio::spawn(replicator.run());

        Ok(())
    }
}
