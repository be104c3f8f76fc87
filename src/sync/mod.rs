mod acceptor;
mod checkpointer;
mod coordinator;
mod peer_link;
mod replicator;
mod role;
mod state;

pub use role::PromoteError;

pub(crate) use acceptor::AcceptOutcome;
pub(crate) use acceptor::LogAcceptor;
pub(crate) use checkpointer::CheckpointWorker;
pub(crate) use coordinator::CommitCoordinator;
pub(crate) use peer_link::GrpcPeerLinkFactory;
pub(crate) use peer_link::PeerLinkFactory;
pub(crate) use role::RoleManager;
pub(crate) use state::SyncShared;
