//! Authenticated RPC plumbing.
//!
//! The curator speaks gRPC over mutual TLS anchored in an Ed25519
//! cluster CA. This module owns the certificate machinery ([`tls`]) and
//! the mapping from a peer certificate to a caller identity ([`auth`]).
//! Handlers consume [`PeerIdentity`] from request extensions and never
//! trust identity fields in payloads; tests inject identities through
//! the same extension without a TLS stack.

pub mod auth;
pub mod tls;

pub use auth::{
    escrow_proof, identity_from_der, peer_identity, verify_escrow_proof, AuthError, PeerIdentity,
    ESCROW_CONTEXT,
};
pub use tls::{ephemeral_certificate, ClusterCa, NodeCredentials, PkiError, OWNER_COMMON_NAME};
