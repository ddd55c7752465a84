//! # Caller identity.
//!
//! Every curator RPC is attributed to one of three principals, derived
//! from the peer's TLS certificate:
//!
//! - [`PeerIdentity::Node`]: a CA-signed node certificate; the common
//!   name is the NodeID.
//! - [`PeerIdentity::Manager`]: a CA-signed owner certificate (common
//!   name `owner`), issued once through AAA escrow.
//! - [`PeerIdentity::Ephemeral`]: a self-signed certificate presented by
//!   a pre-UP node; carries only the embedded Ed25519 public key, which
//!   the curator verifies against keys it already knows (join keys, or
//!   the register ticket path for brand-new nodes).
//!
//! The identity is attached to the request as an extension at the
//! transport boundary; handlers read it from there and never trust
//! identity fields inside payloads. Tests insert [`PeerIdentity`]
//! extensions directly instead of running TLS.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use thiserror::Error;
use tonic::{Request, Status};
use x509_parser::prelude::*;

/// Domain separator for AAA escrow possession proofs.
pub const ESCROW_CONTEXT: &[u8] = b"clustervisor-escrow:";

/// Authenticated principal behind an RPC.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerIdentity {
    /// A cluster member, identified by its NodeID.
    Node { id: String },
    /// The cluster owner (manager certificate from escrow).
    Manager,
    /// A pre-UP node presenting a self-signed certificate; carries the
    /// raw Ed25519 public key embedded in it.
    Ephemeral { public_key: Vec<u8> },
}

/// Errors mapping a peer certificate to an identity.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("malformed peer certificate: {0}")]
    Malformed(String),
    #[error("peer certificate uses a non-Ed25519 key")]
    NotEd25519,
    #[error("peer certificate signature invalid")]
    BadSignature,
    #[error("peer certificate issued by an unknown CA")]
    UnknownIssuer,
}

/// Extracts the caller identity from a request.
///
/// Prefers an injected [`PeerIdentity`] extension (set by in-process
/// transports and tests), falling back to the TLS peer certificate
/// verified against `ca_der` when present.
pub fn peer_identity<T>(request: &Request<T>, ca_der: Option<&[u8]>) -> Result<PeerIdentity, Status> {
    if let Some(id) = request.extensions().get::<PeerIdentity>() {
        return Ok(id.clone());
    }
    if let Some(certs) = request.peer_certs() {
        if let Some(first) = certs.first() {
            return identity_from_der(first.as_ref(), ca_der)
                .map_err(|e| Status::unauthenticated(e.to_string()));
        }
    }
    Err(Status::unauthenticated("no peer identity on connection"))
}

/// Maps a DER-encoded peer certificate to an identity.
///
/// Self-signed certificates become [`PeerIdentity::Ephemeral`];
/// certificates issued by the cluster CA become [`PeerIdentity::Node`]
/// or [`PeerIdentity::Manager`] depending on their common name.
pub fn identity_from_der(der: &[u8], ca_der: Option<&[u8]>) -> Result<PeerIdentity, AuthError> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| AuthError::Malformed(e.to_string()))?;
    let public_key = ed25519_key_of(&cert)?;

    if cert.subject() == cert.issuer() {
        cert.verify_signature(None)
            .map_err(|_| AuthError::BadSignature)?;
        return Ok(PeerIdentity::Ephemeral { public_key });
    }

    let Some(ca_der) = ca_der else {
        return Err(AuthError::UnknownIssuer);
    };
    let (_, ca) =
        X509Certificate::from_der(ca_der).map_err(|e| AuthError::Malformed(e.to_string()))?;
    cert.verify_signature(Some(ca.public_key()))
        .map_err(|_| AuthError::BadSignature)?;

    let cn = cert
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| AuthError::Malformed("certificate without common name".to_string()))?;
    if cn == super::tls::OWNER_COMMON_NAME {
        Ok(PeerIdentity::Manager)
    } else {
        Ok(PeerIdentity::Node { id: cn.to_string() })
    }
}

fn ed25519_key_of(cert: &X509Certificate<'_>) -> Result<Vec<u8>, AuthError> {
    let spki = cert.public_key();
    if spki.algorithm.algorithm != x509_parser::oid_registry::OID_SIG_ED25519 {
        return Err(AuthError::NotEd25519);
    }
    let data = spki.subject_public_key.data.as_ref();
    if data.len() != 32 {
        return Err(AuthError::NotEd25519);
    }
    Ok(data.to_vec())
}

// ---- authorization helpers used by service handlers -------------------

/// Requires the caller to be the cluster manager.
pub fn require_manager(identity: &PeerIdentity) -> Result<(), Status> {
    match identity {
        PeerIdentity::Manager => Ok(()),
        _ => Err(Status::permission_denied("caller is not a cluster manager")),
    }
}

/// Requires the caller to be a cluster node; returns its NodeID.
pub fn require_node(identity: &PeerIdentity) -> Result<String, Status> {
    match identity {
        PeerIdentity::Node { id } => Ok(id.clone()),
        _ => Err(Status::permission_denied("caller is not a cluster node")),
    }
}

/// Requires the caller to hold ephemeral credentials; returns the
/// embedded public key.
pub fn require_ephemeral(identity: &PeerIdentity) -> Result<Vec<u8>, Status> {
    match identity {
        PeerIdentity::Ephemeral { public_key } => Ok(public_key.clone()),
        _ => Err(Status::permission_denied(
            "caller does not hold ephemeral credentials",
        )),
    }
}

// ---- escrow proofs -----------------------------------------------------

/// Signs the escrow possession proof with the owner's key.
pub fn escrow_proof(owner: &SigningKey) -> Vec<u8> {
    let mut msg = ESCROW_CONTEXT.to_vec();
    msg.extend_from_slice(owner.verifying_key().as_bytes());
    owner.sign(&msg).to_bytes().to_vec()
}

/// Verifies an escrow possession proof against the claimed owner key.
pub fn verify_escrow_proof(owner_public_key: &[u8], proof: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; 32]>::try_from(owner_public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(proof) else {
        return false;
    };
    let mut msg = ESCROW_CONTEXT.to_vec();
    msg.extend_from_slice(owner_public_key);
    key.verify_strict(&msg, &sig).is_ok()
}
