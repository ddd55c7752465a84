//! # gRPC surface of a curator leader.
//!
//! [`CuratorService`] adapts a [`CuratorLeader`] onto the generated
//! `Curator`, `CuratorLocal`, `Management` and `Aaa` service traits.
//! Handlers pull the caller's [`PeerIdentity`] from the request (TLS
//! peer certificate in production, injected extension in tests),
//! enforce the permission matrix, and delegate to the leader.
//!
//! Streams (watch, heartbeat, leader info) are fed through bounded
//! channels and end when leadership is lost; clients redial and resume
//! against the next leader.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::ServerTlsConfig;
use tonic::{Request, Response, Status, Streaming};

use crate::proto;
use crate::rpc::auth::{
    peer_identity, require_ephemeral, require_manager, require_node, PeerIdentity,
};

use super::leader::CuratorLeader;
use super::watch::{self, WatchKind};

/// Leader-backed implementation of all curator services.
#[derive(Clone)]
pub struct CuratorService {
    leader: Arc<CuratorLeader>,
}

impl CuratorService {
    pub fn new(leader: Arc<CuratorLeader>) -> Self {
        Self { leader }
    }

    fn identity<T>(&self, request: &Request<T>) -> Result<PeerIdentity, Status> {
        peer_identity(request, Some(self.leader.ca_certificate_der()))
    }
}

#[tonic::async_trait]
impl proto::curator_server::Curator for CuratorService {
    type WatchStream = ReceiverStream<Result<proto::WatchEvent, Status>>;

    async fn watch(
        &self,
        request: Request<proto::WatchRequest>,
    ) -> Result<Response<Self::WatchStream>, Status> {
        let identity = self.identity(&request)?;
        if !matches!(identity, PeerIdentity::Node { .. } | PeerIdentity::Manager) {
            return Err(Status::permission_denied(
                "watches are served to cluster nodes and managers",
            ));
        }
        let kind = match request.into_inner().kind {
            Some(proto::watch_request::Kind::NodeInCluster(n)) => {
                WatchKind::Node { id: n.node_id }
            }
            Some(proto::watch_request::Kind::NodesInCluster(_)) => WatchKind::All,
            None => return Err(Status::invalid_argument("watch request without kind")),
        };
        let rx = watch::spawn(
            self.leader.leadership().kv().clone(),
            kind,
            self.leader.canceled(),
        );
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn update_node_status(
        &self,
        request: Request<proto::UpdateNodeStatusRequest>,
    ) -> Result<Response<proto::UpdateNodeStatusResponse>, Status> {
        let caller = require_node(&self.identity(&request)?)?;
        let req = request.into_inner();
        let status = req
            .status
            .ok_or_else(|| Status::invalid_argument("status is required"))?;
        self.leader
            .update_node_status(&caller, &req.node_id, status)
            .await?;
        Ok(Response::new(proto::UpdateNodeStatusResponse {}))
    }

    type HeartbeatStream = ReceiverStream<Result<proto::HeartbeatUpdateResponse, Status>>;

    async fn heartbeat(
        &self,
        request: Request<Streaming<proto::HeartbeatUpdateRequest>>,
    ) -> Result<Response<Self::HeartbeatStream>, Status> {
        let caller = require_node(&self.identity(&request)?)?;
        let mut inbound = request.into_inner();
        let leader = self.leader.clone();
        let lost = leader.canceled();
        let (tx, rx) = mpsc::channel(4);
        tokio::spawn(async move {
            loop {
                let msg = tokio::select! {
                    _ = lost.cancelled() => break,
                    msg = inbound.message() => msg,
                };
                match msg {
                    Ok(Some(_)) => {
                        leader.heartbeat_received(&caller);
                        if tx
                            .send(Ok(proto::HeartbeatUpdateResponse {}))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(status) => {
                        let _ = tx.send(Err(status)).await;
                        break;
                    }
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn register_node(
        &self,
        request: Request<proto::RegisterNodeRequest>,
    ) -> Result<Response<proto::RegisterNodeResponse>, Status> {
        let caller_key = require_ephemeral(&self.identity(&request)?)?;
        let req = request.into_inner();
        self.leader
            .register_node(&caller_key, &req.register_ticket, &req.join_key)
            .await?;
        Ok(Response::new(proto::RegisterNodeResponse {}))
    }

    async fn join_node(
        &self,
        request: Request<proto::JoinNodeRequest>,
    ) -> Result<Response<proto::JoinNodeResponse>, Status> {
        let caller_key = require_ephemeral(&self.identity(&request)?)?;
        let cluster_unlock_key = self.leader.join_node(&caller_key).await?;
        Ok(Response::new(proto::JoinNodeResponse { cluster_unlock_key }))
    }

    async fn commit_node(
        &self,
        request: Request<proto::CommitNodeRequest>,
    ) -> Result<Response<proto::CommitNodeResponse>, Status> {
        let caller_key = require_ephemeral(&self.identity(&request)?)?;
        let req = request.into_inner();
        self.leader
            .commit_node(&caller_key, &req.cluster_unlock_key)
            .await?;
        Ok(Response::new(proto::CommitNodeResponse {}))
    }
}

#[tonic::async_trait]
impl proto::curator_local_server::CuratorLocal for CuratorService {
    type GetCurrentLeaderStream = ReceiverStream<Result<proto::GetCurrentLeaderResponse, Status>>;

    async fn get_current_leader(
        &self,
        request: Request<proto::GetCurrentLeaderRequest>,
    ) -> Result<Response<Self::GetCurrentLeaderStream>, Status> {
        let caller = require_node(&self.identity(&request)?)?;
        let leader_id = self.leader.leadership().leader_id().to_string();
        if caller != leader_id {
            return Err(Status::permission_denied(
                "leader info is served only to process-local code",
            ));
        }
        let (tx, rx) = mpsc::channel(1);
        let lost = self.leader.canceled();
        let port = i32::from(self.leader.curator_port());
        tokio::spawn(async move {
            let info = proto::GetCurrentLeaderResponse {
                this_node_id: leader_id.clone(),
                leader_node_id: leader_id,
                leader_port: port,
            };
            if tx.send(Ok(info)).await.is_err() {
                return;
            }
            // The serving curator is the leader by construction; a
            // leadership change tears this stream down and the client
            // redials the new leader.
            lost.cancelled().await;
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }
}

#[tonic::async_trait]
impl proto::management_server::Management for CuratorService {
    async fn get_register_ticket(
        &self,
        request: Request<proto::GetRegisterTicketRequest>,
    ) -> Result<Response<proto::GetRegisterTicketResponse>, Status> {
        require_manager(&self.identity(&request)?)?;
        let ticket = self.leader.get_register_ticket().await?;
        Ok(Response::new(proto::GetRegisterTicketResponse { ticket }))
    }

    type GetNodesStream = ReceiverStream<Result<proto::Node, Status>>;

    async fn get_nodes(
        &self,
        request: Request<proto::GetNodesRequest>,
    ) -> Result<Response<Self::GetNodesStream>, Status> {
        require_manager(&self.identity(&request)?)?;
        let nodes = self.leader.get_nodes(&request.into_inner().filter).await?;
        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for node in nodes {
                if tx.send(Ok(node)).await.is_err() {
                    break;
                }
            }
        });
        Ok(Response::new(ReceiverStream::new(rx)))
    }

    async fn approve_node(
        &self,
        request: Request<proto::ApproveNodeRequest>,
    ) -> Result<Response<proto::ApproveNodeResponse>, Status> {
        require_manager(&self.identity(&request)?)?;
        self.leader
            .approve_node(&request.into_inner().pubkey)
            .await?;
        Ok(Response::new(proto::ApproveNodeResponse {}))
    }

    async fn update_node_roles(
        &self,
        request: Request<proto::UpdateNodeRolesRequest>,
    ) -> Result<Response<proto::UpdateNodeRolesResponse>, Status> {
        require_manager(&self.identity(&request)?)?;
        let req = request.into_inner();
        self.leader
            .update_node_roles(&req.pubkey, req.kubernetes_worker, req.consensus_member)
            .await?;
        Ok(Response::new(proto::UpdateNodeRolesResponse {}))
    }

    async fn get_cluster_info(
        &self,
        request: Request<proto::GetClusterInfoRequest>,
    ) -> Result<Response<proto::GetClusterInfoResponse>, Status> {
        let identity = self.identity(&request)?;
        if !matches!(identity, PeerIdentity::Node { .. } | PeerIdentity::Manager) {
            return Err(Status::permission_denied(
                "cluster info is served to cluster nodes and managers",
            ));
        }
        Ok(Response::new(self.leader.cluster_info().await?))
    }
}

#[tonic::async_trait]
impl proto::aaa_server::Aaa for CuratorService {
    async fn escrow(
        &self,
        request: Request<proto::EscrowRequest>,
    ) -> Result<Response<proto::EscrowResponse>, Status> {
        let caller_key = require_ephemeral(&self.identity(&request)?)?;
        let req = request.into_inner();
        if caller_key != req.owner_public_key {
            return Err(Status::permission_denied(
                "escrow must be called with credentials for the claimed owner key",
            ));
        }
        let owner_certificate = self
            .leader
            .escrow(&req.owner_public_key, &req.proof)
            .await?;
        Ok(Response::new(proto::EscrowResponse { owner_certificate }))
    }
}

/// Serves all curator services on `addr` with mutual TLS until
/// `shutdown` fires.
pub async fn serve(
    addr: SocketAddr,
    tls: ServerTlsConfig,
    leader: Arc<CuratorLeader>,
    shutdown: CancellationToken,
) -> Result<(), tonic::transport::Error> {
    let svc = CuratorService::new(leader);
    tonic::transport::Server::builder()
        .tls_config(tls)?
        .add_service(proto::curator_server::CuratorServer::new(svc.clone()))
        .add_service(proto::curator_local_server::CuratorLocalServer::new(
            svc.clone(),
        ))
        .add_service(proto::management_server::ManagementServer::new(svc.clone()))
        .add_service(proto::aaa_server::AaaServer::new(svc))
        .serve_with_shutdown(addr, shutdown.cancelled_owned())
        .await
}
