//! # Node identity.
//!
//! A node's identity is an Ed25519 keypair; the **NodeID** is derived
//! from the public key alone (`node-` + hex of its first 16 bytes),
//! short enough to double as the node's hostname. A second Ed25519
//! **join key** authenticates the node's pre-UP RPCs, before it holds a
//! CA-signed certificate.
//!
//! The cluster unlock key (CUK) handed out by the curator is combined
//! with the locally sealed node unlock key by XOR; neither half alone
//! reveals the disk key.

use std::fmt;

use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;

/// Length of unlock key halves.
pub const UNLOCK_KEY_LEN: usize = 32;

/// Derives a NodeID from an Ed25519 public key.
///
/// Stable for the lifetime of the key; changing the key creates a
/// different node. The encoding keeps the ID under the 63-character
/// hostname-label limit.
pub fn node_id(public_key: &[u8]) -> String {
    let prefix_len = public_key.len().min(16);
    format!("node-{}", hex::encode(&public_key[..prefix_len]))
}

/// Combines a cluster unlock key with the local node unlock key (and
/// back; XOR is its own inverse).
pub fn combine_unlock_keys(
    cluster_half: &[u8; UNLOCK_KEY_LEN],
    local_half: &[u8; UNLOCK_KEY_LEN],
) -> [u8; UNLOCK_KEY_LEN] {
    let mut out = [0u8; UNLOCK_KEY_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = cluster_half[i] ^ local_half[i];
    }
    out
}

/// A node's Ed25519 identity and join keypairs.
///
/// Private keys are never exposed through any public method; signing
/// happens through the enrolment and transport code in this crate.
pub struct NodeIdentity {
    identity: SigningKey,
    join: SigningKey,
}

impl NodeIdentity {
    /// Generates a fresh identity with random identity and join keys.
    pub fn generate() -> Self {
        let mut rng = OsRng;
        Self {
            identity: SigningKey::generate(&mut rng),
            join: SigningKey::generate(&mut rng),
        }
    }

    /// Rebuilds an identity from sealed 32-byte seeds, e.g. after a
    /// reboot. Deterministic: the same seeds produce the same NodeID.
    pub fn from_seeds(identity: [u8; 32], join: [u8; 32]) -> Self {
        Self {
            identity: SigningKey::from_bytes(&identity),
            join: SigningKey::from_bytes(&join),
        }
    }

    /// The NodeID derived from the identity public key.
    pub fn node_id(&self) -> String {
        node_id(self.public_key().as_bytes())
    }

    /// The identity public key.
    pub fn public_key(&self) -> VerifyingKey {
        self.identity.verifying_key()
    }

    /// The join public key, registered with the cluster at enrolment.
    pub fn join_public_key(&self) -> VerifyingKey {
        self.join.verifying_key()
    }

    /// The identity private key, for building ephemeral registration
    /// credentials.
    pub(crate) fn identity_key(&self) -> &SigningKey {
        &self.identity
    }

    /// The join private key, for building ephemeral join credentials.
    pub(crate) fn join_key(&self) -> &SigningKey {
        &self.join
    }
}

// Never print key material.
impl fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdentity")
            .field("node_id", &self.node_id())
            .field("identity", &"[REDACTED]")
            .field("join", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_is_stable_and_key_derived() {
        let a = NodeIdentity::from_seeds([1u8; 32], [2u8; 32]);
        let b = NodeIdentity::from_seeds([1u8; 32], [9u8; 32]);
        // Same identity key, different join key: same NodeID.
        assert_eq!(a.node_id(), b.node_id());

        let c = NodeIdentity::from_seeds([3u8; 32], [2u8; 32]);
        assert_ne!(a.node_id(), c.node_id());
    }

    #[test]
    fn node_id_fits_a_hostname_label() {
        let id = NodeIdentity::generate().node_id();
        assert!(id.len() <= 63);
        assert!(id.starts_with("node-"));
        assert_eq!(id.len(), 5 + 32);
    }

    #[test]
    fn unlock_key_combination_is_its_own_inverse() {
        let cluster = [0xAAu8; UNLOCK_KEY_LEN];
        let local = [0x55u8; UNLOCK_KEY_LEN];
        let sealed = combine_unlock_keys(&cluster, &local);
        assert_eq!(sealed, [0xFFu8; UNLOCK_KEY_LEN]);
        assert_eq!(combine_unlock_keys(&sealed, &local), cluster);
    }

    #[test]
    fn debug_redacts_private_keys() {
        let id = NodeIdentity::generate();
        let dbg = format!("{id:?}");
        assert!(dbg.contains("REDACTED"));
    }
}
