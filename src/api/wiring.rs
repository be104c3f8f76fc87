use crate::api::client::{ApplyFn, MetaSyncClient, RoleHandle, SyncLog};
use crate::api::options::{SyncOptions, SyncOptionsValidated};
use crate::server::RpcServer;
use crate::sync::{
    CheckpointWorker, CommitCoordinator, GrpcPeerLinkFactory, LogAcceptor, PeerLinkFactory,
    PromoteError, RoleManager, SyncShared,
};
use crate::wal::{record_len, CheckpointFile, RecordRead, WalCursor, WalWriter};
use std::convert::TryFrom;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;

/// Initial role handed to this node by external configuration. Leadership
/// arbitration is somebody else's job; a node told it is leader is trusted.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum NodeRole {
    Leader,
    Standby,
}

pub struct SyncClientConfig {
    /// This node's `ip:port`; must be one of `cluster_nodes`.
    pub my_addr: String,
    /// The two replication peers, in any order.
    pub cluster_nodes: Vec<String>,
    pub initial_role: NodeRole,
    /// Directory holding the sync log and the applied checkpoint.
    pub data_directory: String,
    /// Receives every committed entry; must be in place before creation so
    /// startup replay has somewhere to deliver.
    pub apply_fn: ApplyFn,
    pub info_logger: slog::Logger,
    pub options: SyncOptions,
}

#[derive(Debug, thiserror::Error)]
pub enum SyncClientCreationError {
    #[error("Illegal options for configuring client: {0}")]
    IllegalClientOptions(String),

    #[error("cluster must list exactly two nodes, got {0}")]
    WrongClusterSize(usize),

    // The original deployment treats this as an operator mistake severe
    // enough to refuse startup.
    #[error("my address is not among the configured cluster nodes")]
    NotInCluster,

    #[error("my address is not a listenable socket address: {0}")]
    UnusableListenAddr(std::net::AddrParseError),

    #[error("Log initialization failure")]
    LogInitialization(io::Error),

    #[error("Checkpoint initialization failure")]
    CheckpointInitialization(io::Error),

    #[error("applied checkpoint ({applied_offset}) is beyond the end of the log ({log_end})")]
    CheckpointAheadOfLog { applied_offset: u64, log_end: u64 },
}

/// Builds the engine: recovers watermarks from disk, replays
/// un-checkpointed entries through the apply handler, then starts the
/// checkpoint worker, the RPC server and — on the leader — the replicator.
/// Must be called from within a tokio runtime.
pub fn try_create_sync_client(
    config: SyncClientConfig,
) -> Result<MetaSyncClient, SyncClientCreationError> {
    let root_logger = config.info_logger;

    let options = SyncOptionsValidated::try_from(config.options)
        .map_err(|e| SyncClientCreationError::IllegalClientOptions(e.to_string()))?;

    if config.cluster_nodes.len() != 2 {
        return Err(SyncClientCreationError::WrongClusterSize(
            config.cluster_nodes.len(),
        ));
    }
    let peer_addr = peer_of(&config.my_addr, &config.cluster_nodes)
        .ok_or(SyncClientCreationError::NotInCluster)?
        .clone();
    let listen_addr: SocketAddr = config
        .my_addr
        .parse()
        .map_err(SyncClientCreationError::UnusableListenAddr)?;

    let data_dir = PathBuf::from(&config.data_directory);
    let wal_path = data_dir.join("sync.log");
    let checkpoint = CheckpointFile::new(data_dir.join("applied.log"));

    let mut wal =
        WalWriter::open(&wal_path).map_err(SyncClientCreationError::LogInitialization)?;
    let mut current_offset = wal.end_offset();

    let applied_offset = checkpoint
        .load()
        .map_err(SyncClientCreationError::CheckpointInitialization)?;
    if applied_offset > current_offset {
        return Err(SyncClientCreationError::CheckpointAheadOfLog {
            applied_offset,
            log_end: current_offset,
        });
    }

    // Redo: hand un-checkpointed entries back to the metadata layer.
    let replay_end = replay_log(
        &root_logger,
        &wal_path,
        applied_offset,
        current_offset,
        &config.apply_fn,
    )
    .map_err(SyncClientCreationError::LogInitialization)?;
    if replay_end < current_offset {
        // Torn tail from a crash mid-append; drop it so later appends stay
        // readable.
        slog::warn!(
            root_logger,
            "truncating torn log tail: end of log {} -> {}",
            current_offset,
            replay_end
        );
        wal.truncate(replay_end)
            .map_err(SyncClientCreationError::LogInitialization)?;
        current_offset = replay_end;
    }
    let applied_offset = replay_end;
    // Assume the standby has everything until it tells us otherwise; the
    // divergence protocol corrects this on the first send.
    let sync_offset = current_offset;

    let is_leader = config.initial_role == NodeRole::Leader;
    let (master_addr, slave_addr) = match config.initial_role {
        NodeRole::Leader => (config.my_addr.clone(), peer_addr),
        NodeRole::Standby => (peer_addr, config.my_addr.clone()),
    };
    slog::info!(
        root_logger,
        "starting; role = {:?}, current_offset = {}, applied_offset = {}",
        config.initial_role,
        current_offset,
        applied_offset
    );

    let shared = Arc::new(SyncShared::new(
        wal,
        current_offset,
        sync_offset,
        applied_offset,
        is_leader,
        master_addr,
        slave_addr,
        Arc::clone(&config.apply_fn),
    ));

    let (stop_tx, stop_rx) = watch::channel(false);

    let checkpoint_worker = CheckpointWorker::new(
        root_logger.new(slog::o!("Task" => "checkpoint")),
        Arc::clone(&shared),
        checkpoint,
        options.checkpoint_interval,
        stop_rx.clone(),
    );
    tokio::spawn(checkpoint_worker.run());

    let acceptor = LogAcceptor::new(
        root_logger.new(slog::o!("Task" => "acceptor")),
        Arc::clone(&shared),
    );
    let rpc_server = RpcServer::new(root_logger.new(slog::o!("Task" => "server")), acceptor);
    tokio::spawn(rpc_server.run(listen_addr, stop_rx.clone()));

    let link_factory: Arc<dyn PeerLinkFactory> = Arc::new(GrpcPeerLinkFactory::new(
        root_logger.clone(),
        options.peer_rpc_timeout,
    ));
    let role_manager = RoleManager::new(
        root_logger.new(slog::o!("Task" => "role")),
        Arc::clone(&shared),
        link_factory,
        wal_path,
        options.replication_retry_backoff,
        stop_rx,
    );
    if is_leader {
        role_manager.spawn_replicator(sync_offset).map_err(|e| match e {
            PromoteError::LogCursor(ioe) => SyncClientCreationError::LogInitialization(ioe),
        })?;
    }

    let coordinator = CommitCoordinator::new(
        root_logger.new(slog::o!("Task" => "commit")),
        Arc::clone(&shared),
        options.async_commit_timeout,
    );

    Ok(MetaSyncClient::new(
        SyncLog::new(coordinator),
        RoleHandle::new(role_manager),
        shared,
        stop_tx,
    ))
}

fn peer_of<'a>(my_addr: &str, nodes: &'a [String]) -> Option<&'a String> {
    if my_addr == nodes[0] {
        Some(&nodes[1])
    } else if my_addr == nodes[1] {
        Some(&nodes[0])
    } else {
        None
    }
}

/// Replays `[from, to)` through the apply handler. Returns the offset
/// actually reached, which falls short of `to` only when the tail of the
/// log is torn.
fn replay_log(
    logger: &slog::Logger,
    wal_path: &Path,
    from: u64,
    to: u64,
    apply: &ApplyFn,
) -> io::Result<u64> {
    let mut cursor = WalCursor::open(wal_path)?;
    cursor.seek(from)?;

    let mut applied = from;
    while applied < to {
        match cursor.read_entry()? {
            RecordRead::Record(payload) => {
                let entry_len = record_len(&payload);
                apply(payload);
                applied += entry_len;
            }
            RecordRead::EndOfLog | RecordRead::ShortRecord => {
                slog::warn!(logger, "incomplete record at offset {} during replay", applied);
                break;
            }
        }
    }
    if applied > from {
        slog::info!(logger, "replayed log entries from {} to {}", from, applied);
    }

    Ok(applied)
}
