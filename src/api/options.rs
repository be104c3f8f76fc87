use std::convert::TryFrom;
use tokio::time::Duration;

/// Tunables for the replication engine. `None` fields fall back to
/// defaults sized for a LAN pair.
#[derive(Clone, Default)]
pub struct SyncOptions {
    /// How long a callback commit may stay unacknowledged before the
    /// engine gives up waiting and enters master-only mode.
    pub async_commit_timeout: Option<Duration>,
    /// Fixed backoff between replication attempts while the standby is
    /// unreachable.
    pub replication_retry_backoff: Option<Duration>,
    /// How often the applied watermark is checkpointed to disk.
    pub checkpoint_interval: Option<Duration>,
    /// Bound on a single AppendLog RPC attempt.
    pub peer_rpc_timeout: Option<Duration>,
}

pub(crate) struct SyncOptionsValidated {
    pub async_commit_timeout: Duration,
    pub replication_retry_backoff: Duration,
    pub checkpoint_interval: Duration,
    pub peer_rpc_timeout: Duration,
}

impl SyncOptionsValidated {
    fn validate(&self) -> Result<(), &'static str> {
        if self.async_commit_timeout.as_millis() == 0 {
            return Err("Async commit timeout must be non-zero");
        }
        if self.replication_retry_backoff.as_millis() == 0 {
            return Err("Replication retry backoff must be non-zero");
        }
        if self.checkpoint_interval.as_millis() == 0 {
            return Err("Checkpoint interval must be non-zero");
        }
        if self.peer_rpc_timeout.as_millis() == 0 {
            return Err("Peer RPC timeout must be non-zero");
        }

        Ok(())
    }
}

impl TryFrom<SyncOptions> for SyncOptionsValidated {
    type Error = &'static str;

    fn try_from(options: SyncOptions) -> Result<Self, Self::Error> {
        let values = SyncOptionsValidated {
            async_commit_timeout: options.async_commit_timeout.unwrap_or(Duration::from_secs(10)),
            replication_retry_backoff: options
                .replication_retry_backoff
                .unwrap_or(Duration::from_secs(5)),
            checkpoint_interval: options.checkpoint_interval.unwrap_or(Duration::from_secs(5)),
            peer_rpc_timeout: options.peer_rpc_timeout.unwrap_or(Duration::from_secs(15)),
        };

        values.validate()?;
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(SyncOptionsValidated::try_from(SyncOptions::default()).is_ok());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let options = SyncOptions {
            async_commit_timeout: Some(Duration::from_millis(0)),
            ..SyncOptions::default()
        };
        assert!(SyncOptionsValidated::try_from(options).is_err());
    }
}
