use crate::grpc::grpc_meta_sync_server::{GrpcMetaSync, GrpcMetaSyncServer};
use crate::grpc::{ProtoAppendLogReq, ProtoAppendLogResp};
use crate::sync::{AcceptOutcome, LogAcceptor};
use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use tokio::sync::watch;
use tonic::transport::Server;
use tonic::{Request, Response, Status};

/// RpcServer serves the standby-side AppendLog surface, the only wire-level
/// interface this engine exposes to its peer.
pub(crate) struct RpcServer {
    logger: slog::Logger,
    acceptor: LogAcceptor,
}

impl RpcServer {
    pub(crate) fn new(logger: slog::Logger, acceptor: LogAcceptor) -> Self {
        RpcServer { logger, acceptor }
    }

    pub(crate) async fn run(self, socket_addr: SocketAddr, mut stop: watch::Receiver<bool>) {
        let logger = self.logger.clone();
        slog::info!(logger, "Listening on '{:?}'", socket_addr);

        let result = Server::builder()
            .add_service(GrpcMetaSyncServer::new(self))
            .serve_with_shutdown(socket_addr, async move {
                // Explicit stop and engine drop both land here.
                let _ = stop.changed().await;
            })
            .await;

        slog::info!(logger, "Server run() has exited: {:?}", result);
    }

    fn convert_append_log_result(
        app_result: io::Result<AcceptOutcome>,
    ) -> Result<ProtoAppendLogResp, Status> {
        match app_result {
            Ok(AcceptOutcome::Accepted) => Ok(ProtoAppendLogResp {
                success: true,
                offset: 0,
            }),
            Ok(AcceptOutcome::Gap { current_offset }) => Ok(ProtoAppendLogResp {
                success: false,
                offset: current_offset as i32,
            }),
            Ok(AcceptOutcome::Stale) => Ok(ProtoAppendLogResp {
                success: false,
                offset: -1,
            }),
            Ok(AcceptOutcome::NotStandby) => {
                Err(Status::failed_precondition("this node is not a standby"))
            }
            Err(e) => Err(Status::internal(format!("local log write failed: {}", e))),
        }
    }
}

#[async_trait::async_trait]
impl GrpcMetaSync for RpcServer {
    async fn append_log(
        &self,
        rpc_request_wrapped: Request<ProtoAppendLogReq>,
    ) -> Result<Response<ProtoAppendLogResp>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let app_result = self.acceptor.handle_append_log(
            u64::from(rpc_request.offset),
            Bytes::from(rpc_request.log_data),
        );
        let rpc_result = Self::convert_append_log_result(app_result);
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }
}
