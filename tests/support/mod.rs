//! Shared test harness: an in-process curator leader served over
//! loopback gRPC.
//!
//! Mirrors the production wiring minus two things: leadership is a fake
//! lock written straight into the store (no election to wait for), and
//! caller identities are injected by per-server interceptors instead of
//! TLS peer certificates. Each identity gets its own loopback server,
//! all backed by the same leader.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Channel;

use clustervisor::curator::{
    CompiledFilter, CuratorLeader, CuratorService, FilterEngine, FilterError, FnFilter,
    FnFilterEngine, Leadership, NodeView, ELECTION_KEY,
};
use clustervisor::kv::{KvStore, LeaderLock};
use clustervisor::proto;
use clustervisor::proto::aaa_server::AaaServer;
use clustervisor::proto::curator_local_server::CuratorLocalServer;
use clustervisor::proto::curator_server::CuratorServer;
use clustervisor::proto::management_server::ManagementServer;
use clustervisor::{ClusterCa, MemoryKv, NodeIdentity, PeerIdentity};

/// An in-process curator leader with pre-connected clients for the
/// local node, a manager, and a foreign node with ephemeral
/// credentials.
pub struct FakeLeader {
    pub kv: MemoryKv,
    pub leader: Arc<CuratorLeader>,
    pub ca: Arc<ClusterCa>,
    /// Identity of the node the leader runs on; its record is UP.
    pub local: NodeIdentity,
    pub local_node_id: String,
    /// A foreign node known only by its keys.
    pub other: NodeIdentity,
    pub owner_key: ed25519_dalek::SigningKey,
    cancel: CancellationToken,
}

/// Routes test logs through tracing; `RUST_LOG` controls verbosity.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

impl FakeLeader {
    pub async fn start() -> Self {
        init_tracing();
        let kv = MemoryKv::new();
        let lock_rev = kv
            .put(ELECTION_KEY, b"fake leader".to_vec())
            .await
            .expect("seeding election lock");

        let local = NodeIdentity::generate();
        let other = NodeIdentity::generate();
        let owner_key = ed25519_dalek::SigningKey::generate(&mut rand::rngs::OsRng);
        let local_node_id = local.node_id();

        let ca = Arc::new(ClusterCa::bootstrap("testcluster").expect("bootstrap CA"));
        let leadership = Leadership::new(
            LeaderLock {
                lock_key: ELECTION_KEY.to_string(),
                lock_rev,
            },
            local_node_id.clone(),
            Arc::new(kv.clone()),
        );
        let cancel = CancellationToken::new();
        let leader = Arc::new(
            CuratorLeader::new(leadership, ca.clone(), test_filter_engine(), cancel.clone())
                .with_initial_owner_key(owner_key.verifying_key().as_bytes().to_vec()),
        );

        // The leader's own node record, replicating bootstrap.
        let mut local_node = clustervisor::curator::Node::new(
            local.public_key().as_bytes().to_vec(),
            local.join_public_key().as_bytes().to_vec(),
        );
        local_node.state = proto::NodeState::Up;
        leader
            .leadership()
            .save_node(&local_node)
            .await
            .expect("saving local node");

        Self {
            kv,
            leader,
            ca,
            local,
            local_node_id,
            other,
            owner_key,
            cancel,
        }
    }

    /// Serves all curator services with a fixed caller identity and
    /// returns a connected channel.
    pub async fn channel_as(&self, identity: PeerIdentity) -> Channel {
        let addr = spawn_server(self.leader.clone(), identity, self.cancel.clone()).await;
        Channel::from_shared(format!("http://{addr}"))
            .expect("endpoint uri")
            .connect()
            .await
            .expect("connecting to loopback server")
    }

    pub async fn node_channel(&self) -> Channel {
        self.channel_as(PeerIdentity::Node {
            id: self.local_node_id.clone(),
        })
        .await
    }

    pub async fn manager_channel(&self) -> Channel {
        self.channel_as(PeerIdentity::Manager).await
    }

    /// Ephemeral credentials carrying the other node's identity key.
    pub async fn other_identity_channel(&self) -> Channel {
        self.channel_as(PeerIdentity::Ephemeral {
            public_key: self.other.public_key().as_bytes().to_vec(),
        })
        .await
    }

    /// Ephemeral credentials carrying the other node's join key.
    pub async fn other_join_channel(&self) -> Channel {
        self.channel_as(PeerIdentity::Ephemeral {
            public_key: self.other.join_public_key().as_bytes().to_vec(),
        })
        .await
    }
}

impl Drop for FakeLeader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn spawn_server(
    leader: Arc<CuratorLeader>,
    identity: PeerIdentity,
    cancel: CancellationToken,
) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("binding loopback listener");
    let addr = listener.local_addr().expect("listener address");
    let incoming = TcpListenerStream::new(listener);

    let svc = CuratorService::new(leader);
    let intercept = move |mut req: tonic::Request<()>| {
        req.extensions_mut().insert(identity.clone());
        Ok(req)
    };
    tokio::spawn(async move {
        let _ = tonic::transport::Server::builder()
            .add_service(CuratorServer::with_interceptor(svc.clone(), intercept.clone()))
            .add_service(CuratorLocalServer::with_interceptor(
                svc.clone(),
                intercept.clone(),
            ))
            .add_service(ManagementServer::with_interceptor(
                svc.clone(),
                intercept.clone(),
            ))
            .add_service(AaaServer::with_interceptor(svc, intercept))
            .serve_with_incoming_shutdown(incoming, cancel.cancelled_owned())
            .await;
    });
    addr
}

/// A small stand-in for the external expression engine:
///
/// - `""`               — all nodes
/// - `state-up`         — nodes in state UP
/// - `worker`           — nodes holding the kubernetes worker role
/// - `hb-age-gt:<secs>` — heartbeat older than the given age
/// - `hb-age-lt:<secs>` — heartbeat younger than the given age
///
/// Anything else fails to compile, exercising the INVALID_ARGUMENT
/// path.
pub fn test_filter_engine() -> Arc<dyn FilterEngine> {
    Arc::new(FnFilterEngine(|expr: &str| {
        let expr = expr.trim().to_string();
        let filter: Box<dyn CompiledFilter> = if expr.is_empty() {
            Box::new(FnFilter(|_: &NodeView| true))
        } else if expr == "state-up" {
            Box::new(FnFilter(|n: &NodeView| n.state == proto::NodeState::Up))
        } else if expr == "worker" {
            Box::new(FnFilter(|n: &NodeView| n.roles.kubernetes_worker))
        } else if let Some(secs) = expr.strip_prefix("hb-age-gt:") {
            let secs: u64 = secs.parse().map_err(|_| FilterError(expr.clone()))?;
            Box::new(FnFilter(move |n: &NodeView| {
                n.time_since_heartbeat
                    .map(|d| d.as_secs_f64() > secs as f64)
                    .unwrap_or(false)
            }))
        } else if let Some(secs) = expr.strip_prefix("hb-age-lt:") {
            let secs: u64 = secs.parse().map_err(|_| FilterError(expr.clone()))?;
            Box::new(FnFilter(move |n: &NodeView| {
                n.time_since_heartbeat
                    .map(|d| d.as_secs_f64() < secs as f64)
                    .unwrap_or(false)
            }))
        } else {
            return Err(FilterError(expr));
        };
        Ok(filter)
    }))
}

/// Collects a `GetNodes` stream into a vector.
pub async fn get_nodes(
    mgmt: &mut proto::management_client::ManagementClient<Channel>,
    filter: &str,
) -> Vec<proto::Node> {
    let mut stream = mgmt
        .get_nodes(proto::GetNodesRequest {
            filter: filter.to_string(),
        })
        .await
        .expect("GetNodes")
        .into_inner();
    let mut nodes = Vec::new();
    while let Some(node) = stream.message().await.expect("GetNodes recv") {
        nodes.push(node);
    }
    nodes
}
