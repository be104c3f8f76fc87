//! This mod holds the library's client-facing API.
mod client;
mod options;
mod wiring;

pub use client::AppendError;
pub use client::AppendInput;
pub use client::AppendOutput;
pub use client::ApplyFn;
pub use client::CommitCallback;
pub use client::MetaSyncClient;
pub use client::RoleHandle;
pub use client::SyncLog;
pub use client::SyncStatus;
pub use options::SyncOptions;
pub use wiring::try_create_sync_client;
pub use wiring::NodeRole;
pub use wiring::SyncClientConfig;
pub use wiring::SyncClientCreationError;

pub use crate::sync::PromoteError;
