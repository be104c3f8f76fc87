use crate::sync::state::SyncShared;
use bytes::Bytes;
use std::io;
use std::sync::Arc;

/// Outcome of one AppendLog offer from the leader.
#[derive(Debug)]
pub(crate) enum AcceptOutcome {
    /// Record appended and handed to the apply callback.
    Accepted,
    /// The leader is ahead of this node; `current_offset` is the resync
    /// hint it should rewind to.
    Gap { current_offset: u64 },
    /// This node is already past the offered record; not reconcilable by
    /// rewinding.
    Stale,
    /// This node is not a standby.
    NotStandby,
}

/// LogAcceptor validates incoming log records against this node's own end
/// of log and appends the ones that line up exactly.
pub(crate) struct LogAcceptor {
    logger: slog::Logger,
    shared: Arc<SyncShared>,
}

impl LogAcceptor {
    pub(crate) fn new(logger: slog::Logger, shared: Arc<SyncShared>) -> Self {
        LogAcceptor { logger, shared }
    }

    pub(crate) fn handle_append_log(&self, offset: u64, payload: Bytes) -> io::Result<AcceptOutcome> {
        let mut inner = self.shared.lock();
        if inner.is_leader {
            slog::warn!(self.logger, "AppendLog offered to a leader node");
            return Ok(AcceptOutcome::NotStandby);
        }
        if offset > inner.current_offset {
            return Ok(AcceptOutcome::Gap {
                current_offset: inner.current_offset,
            });
        }
        if offset < inner.current_offset {
            slog::info!(
                self.logger,
                "out-of-date log request {}, current_offset = {}",
                offset,
                inner.current_offset
            );
            return Ok(AcceptOutcome::Stale);
        }

        let record_len = inner.wal.append(&payload)?;
        // Applied under the lock so entries reach the callback in offset
        // order even with concurrent offers.
        self.shared.apply(payload);
        inner.current_offset += record_len;
        inner.applied_offset = inner.current_offset;

        Ok(AcceptOutcome::Accepted)
    }
}
