mod api;
mod server;
mod sync;
mod wal;
mod grpc {
    include!("../generated/metasync.rs");
}

pub use api::try_create_sync_client;
pub use api::AppendError;
pub use api::AppendInput;
pub use api::AppendOutput;
pub use api::ApplyFn;
pub use api::CommitCallback;
pub use api::MetaSyncClient;
pub use api::NodeRole;
pub use api::PromoteError;
pub use api::RoleHandle;
pub use api::SyncClientConfig;
pub use api::SyncClientCreationError;
pub use api::SyncLog;
pub use api::SyncOptions;
pub use api::SyncStatus;
