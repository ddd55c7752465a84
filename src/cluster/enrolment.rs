//! # Enrolment and rejoin flows.
//!
//! The client side of the node lifecycle protocol. Every step is
//! idempotent so a node that reboots mid-transition resumes where it
//! left off:
//!
//! ```text
//! foreign ──register(ticket)──▶ NEW ──(manager approves)──▶ STANDBY
//!     STANDBY ──commit(cuk)──▶ UP ──reboot──▶ join ──▶ CUK ──▶ UP
//! ```
//!
//! Registration authenticates with ephemeral credentials derived from
//! the node's *identity* key; commit and join authenticate with
//! ephemeral credentials derived from the *join* key.

use std::time::Duration;

use thiserror::Error;
use tonic::transport::{Certificate, Channel, ClientTlsConfig, Identity};
use tonic::Code;
use tokio_util::sync::CancellationToken;

use crate::curator::CLUSTER_UNLOCK_KEY_LEN;
use crate::proto;
use crate::proto::curator_client::CuratorClient;
use crate::rpc::tls::{ephemeral_certificate, private_key_pem, PkiError};

use super::identity::NodeIdentity;

/// Errors of the enrolment client flows.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum EnrolmentError {
    #[error("transport failed: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("rpc failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("credential generation failed: {0}")]
    Pki(#[from] PkiError),
    #[error("invalid curator endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("cluster returned a malformed unlock key of {0} bytes")]
    MalformedUnlockKey(usize),
    #[error("enrolment canceled")]
    Canceled,
}

/// Which of the node's keys backs the ephemeral credentials.
#[derive(Clone, Copy, Debug)]
pub enum EphemeralRole {
    /// Identity key; accepted by `RegisterNode` together with a ticket.
    Register,
    /// Join key; accepted by `CommitNode` and `JoinNode`.
    Join,
}

/// Dials a curator endpoint with ephemeral credentials.
///
/// The TLS client certificate is self-signed by the selected node key;
/// the server verifies the embedded public key against what it has on
/// file.
pub async fn ephemeral_channel(
    endpoint: String,
    identity: &NodeIdentity,
    role: EphemeralRole,
    ca_pem: &str,
    server_name: &str,
) -> Result<Channel, EnrolmentError> {
    let key = match role {
        EphemeralRole::Register => identity.identity_key(),
        EphemeralRole::Join => identity.join_key(),
    };
    let (_, cert_pem) = ephemeral_certificate(key, "ephemeral")?;
    let key_pem = private_key_pem(key)?;
    let tls = ClientTlsConfig::new()
        .identity(Identity::from_pem(cert_pem, key_pem))
        .ca_certificate(Certificate::from_pem(ca_pem))
        .domain_name(server_name);
    let channel = Channel::from_shared(endpoint)
        .map_err(|e| EnrolmentError::InvalidEndpoint(e.to_string()))?
        .tls_config(tls)?
        .connect()
        .await?;
    Ok(channel)
}

/// Registers this node with the cluster using a register ticket
/// obtained out of band. On success the cluster holds a NEW record for
/// the node.
pub async fn register(
    client: &mut CuratorClient<Channel>,
    identity: &NodeIdentity,
    ticket: Vec<u8>,
) -> Result<(), EnrolmentError> {
    client
        .register_node(proto::RegisterNodeRequest {
            register_ticket: ticket,
            join_key: identity.join_public_key().as_bytes().to_vec(),
        })
        .await?;
    Ok(())
}

/// Commits this node into the cluster, polling until a manager has
/// approved it. `CommitNode` is idempotent, so retrying after a crash
/// or while still NEW is safe.
pub async fn commit_until_up(
    client: &mut CuratorClient<Channel>,
    cluster_unlock_key: [u8; CLUSTER_UNLOCK_KEY_LEN],
    retry: Duration,
    cancel: &CancellationToken,
) -> Result<(), EnrolmentError> {
    loop {
        match client
            .commit_node(proto::CommitNodeRequest {
                cluster_unlock_key: cluster_unlock_key.to_vec(),
            })
            .await
        {
            Ok(_) => return Ok(()),
            // Not approved yet; keep waiting for the manager.
            Err(s) if s.code() == Code::FailedPrecondition => {}
            Err(s) => return Err(s.into()),
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(EnrolmentError::Canceled),
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

/// Rejoins after a reboot: retrieves the cluster unlock key stored at
/// commit time. The caller XORs it with the locally sealed half to
/// unlock the data partition.
pub async fn rejoin(
    client: &mut CuratorClient<Channel>,
) -> Result<[u8; CLUSTER_UNLOCK_KEY_LEN], EnrolmentError> {
    let cuk = client
        .join_node(proto::JoinNodeRequest {})
        .await?
        .into_inner()
        .cluster_unlock_key;
    let len = cuk.len();
    <[u8; CLUSTER_UNLOCK_KEY_LEN]>::try_from(cuk)
        .map_err(|_| EnrolmentError::MalformedUnlockKey(len))
}
