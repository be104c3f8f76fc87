use crate::grpc::grpc_meta_sync_client::GrpcMetaSyncClient;
use crate::grpc::ProtoAppendLogReq;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::time::Duration;
use tonic::codegen::http::uri;
use tonic::transport::{Channel, Endpoint};

/// Standby's answer to one replication attempt. `offset` carries the resync
/// hint on a gap rejection, or -1 when the request was behind the standby.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppendLogReply {
    pub success: bool,
    pub offset: i32,
}

/// The wire to the standby. The replicator's infinite-retry loop sits above
/// this; one call here makes a single bounded attempt.
#[async_trait]
pub(crate) trait PeerLink: Send {
    async fn append_log(&mut self, offset: u64, payload: Bytes)
        -> Result<AppendLogReply, PeerLinkError>;
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum PeerLinkError {
    #[error("invalid standby address: {0}")]
    InvalidUri(uri::InvalidUri),
    #[error("failed to connect to standby: {0}")]
    ConnectFailure(tonic::transport::Error),
    #[error("AppendLog call failed: {0}")]
    Rpc(tonic::Status),
    #[error("AppendLog call timed out")]
    Timeout,
}

/// Creates links to whichever node is currently the standby; the role
/// manager asks for a fresh link on promotion.
pub(crate) trait PeerLinkFactory: Send + Sync {
    fn connect(&self, addr: &str) -> Box<dyn PeerLink>;
}

pub(crate) struct GrpcPeerLink {
    logger: slog::Logger,
    addr: String,
    rpc_timeout: Duration,
    client: Option<GrpcMetaSyncClient<Channel>>,
}

impl GrpcPeerLink {
    pub(crate) fn new(logger: slog::Logger, addr: String, rpc_timeout: Duration) -> Self {
        GrpcPeerLink {
            logger,
            addr,
            rpc_timeout,
            client: None,
        }
    }
}

#[async_trait]
impl PeerLink for GrpcPeerLink {
    async fn append_log(
        &mut self,
        offset: u64,
        payload: Bytes,
    ) -> Result<AppendLogReply, PeerLinkError> {
        let mut client = match self.client.take() {
            Some(client) => client,
            None => {
                let url = format!("http://{}", self.addr);
                let endpoint = Endpoint::from_shared(url).map_err(PeerLinkError::InvalidUri)?;
                let channel = endpoint
                    .connect()
                    .await
                    .map_err(PeerLinkError::ConnectFailure)?;
                slog::info!(self.logger, "connected to standby at '{}'", self.addr);
                GrpcMetaSyncClient::new(channel)
            }
        };

        let rpc_request = ProtoAppendLogReq {
            offset: offset as u32,
            log_data: payload.to_vec(),
        };
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_request);
        let rpc_reply = tokio::time::timeout(self.rpc_timeout, client.append_log(rpc_request)).await;
        slog::debug!(self.logger, "ClientWire - {:?}", rpc_reply);

        match rpc_reply {
            Ok(Ok(response)) => {
                let response = response.into_inner();
                // Keep the channel for the next record.
                self.client = Some(client);
                Ok(AppendLogReply {
                    success: response.success,
                    offset: response.offset,
                })
            }
            // Dropping the channel makes the next attempt re-dial, which is
            // what a restarted standby needs.
            Ok(Err(rpc_status)) => Err(PeerLinkError::Rpc(rpc_status)),
            Err(_elapsed) => Err(PeerLinkError::Timeout),
        }
    }
}

pub(crate) struct GrpcPeerLinkFactory {
    logger: slog::Logger,
    rpc_timeout: Duration,
}

impl GrpcPeerLinkFactory {
    pub(crate) fn new(logger: slog::Logger, rpc_timeout: Duration) -> Self {
        GrpcPeerLinkFactory {
            logger,
            rpc_timeout,
        }
    }
}

impl PeerLinkFactory for GrpcPeerLinkFactory {
    fn connect(&self, addr: &str) -> Box<dyn PeerLink> {
        let logger = self.logger.new(slog::o!("Standby" => addr.to_string()));
        Box::new(GrpcPeerLink::new(logger, addr.to_string(), self.rpc_timeout))
    }
}
