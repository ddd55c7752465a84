//! # Cluster PKI.
//!
//! All cluster transport security hangs off one Ed25519 CA created at
//! bootstrap:
//!
//! - node certificates (common name = NodeID) are CA-signed for the
//!   node's own identity key;
//! - the owner certificate (common name `owner`) is CA-signed for the
//!   key escrowed through AAA;
//! - ephemeral certificates are self-signed by a node that holds no
//!   CA-signed certificate yet; servers verify the embedded public key
//!   against keys already on file.
//!
//! Certificate generation uses `rcgen`; parsing and verification on the
//! receiving side lives in [`super::auth`].

use ed25519_dalek::pkcs8::EncodePrivateKey;
use ed25519_dalek::SigningKey;
use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DnType, DnValue, IsCa, KeyPair,
    RemoteKeyPair, SignatureAlgorithm, PKCS_ED25519,
};
use thiserror::Error;
use tonic::transport::{Certificate as TonicCertificate, ClientTlsConfig, Identity, ServerTlsConfig};

/// Common name of the cluster owner certificate.
pub const OWNER_COMMON_NAME: &str = "owner";

/// Errors from certificate generation.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PkiError {
    #[error("certificate generation failed: {0}")]
    Rcgen(#[from] rcgen::Error),
    #[error("key encoding failed: {0}")]
    KeyEncoding(String),
    #[error("invalid public key length: {0}")]
    InvalidPublicKey(usize),
}

/// A subject public key without its private half; lets the CA sign
/// certificates for keys whose private part it never sees.
struct SubjectPublicKey {
    public: Vec<u8>,
}

impl RemoteKeyPair for SubjectPublicKey {
    fn public_key(&self) -> &[u8] {
        &self.public
    }

    fn sign(&self, _msg: &[u8]) -> Result<Vec<u8>, rcgen::Error> {
        // Subject keys only ever provide their public half; issuance
        // signs with the CA key.
        Err(rcgen::Error::RemoteKeyError)
    }

    fn algorithm(&self) -> &'static SignatureAlgorithm {
        &PKCS_ED25519
    }
}

/// The cluster certificate authority, created once at bootstrap.
pub struct ClusterCa {
    cert: Certificate,
    key: KeyPair,
    cert_der: Vec<u8>,
}

impl ClusterCa {
    /// Generates a fresh Ed25519 CA for a new cluster.
    pub fn bootstrap(cluster_name: &str) -> Result<Self, PkiError> {
        let key = KeyPair::generate_for(&PKCS_ED25519)?;
        let mut params = CertificateParams::default();
        params.distinguished_name.push(
            DnType::CommonName,
            DnValue::Utf8String(format!("{cluster_name} cluster CA")),
        );
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key)?;
        let cert_der = cert.der().to_vec();
        Ok(Self {
            cert,
            key,
            cert_der,
        })
    }

    /// DER-encoded CA certificate, served through `GetClusterInfo`.
    pub fn certificate_der(&self) -> &[u8] {
        &self.cert_der
    }

    /// PEM-encoded CA certificate, for TLS configuration.
    pub fn certificate_pem(&self) -> String {
        self.cert.pem()
    }

    /// Issues a permanent node certificate for a node identity key.
    pub fn issue_node_certificate(
        &self,
        node_public_key: &[u8],
        node_id: &str,
    ) -> Result<Vec<u8>, PkiError> {
        Ok(self.issue(node_public_key, node_id)?.der().to_vec())
    }

    /// Issues a permanent node certificate, PEM-encoded.
    pub fn issue_node_certificate_pem(
        &self,
        node_public_key: &[u8],
        node_id: &str,
    ) -> Result<String, PkiError> {
        Ok(self.issue(node_public_key, node_id)?.pem())
    }

    /// Issues the owner certificate for the escrowed manager key.
    pub fn issue_owner_certificate(&self, owner_public_key: &[u8]) -> Result<Vec<u8>, PkiError> {
        Ok(self.issue(owner_public_key, OWNER_COMMON_NAME)?.der().to_vec())
    }

    fn issue(&self, public_key: &[u8], common_name: &str) -> Result<Certificate, PkiError> {
        if public_key.len() != 32 {
            return Err(PkiError::InvalidPublicKey(public_key.len()));
        }
        let subject = KeyPair::from_remote(Box::new(SubjectPublicKey {
            public: public_key.to_vec(),
        }))?;
        let mut params = CertificateParams::default();
        params.distinguished_name.push(
            DnType::CommonName,
            DnValue::Utf8String(common_name.to_string()),
        );
        Ok(params.signed_by(&subject, &self.cert, &self.key)?)
    }
}

impl std::fmt::Debug for ClusterCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterCa")
            .field("certificate_der_len", &self.cert_der.len())
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Builds a self-signed ephemeral certificate for a pre-UP node key.
///
/// Returns the DER and PEM encodings; the matching private key stays
/// with the caller.
pub fn ephemeral_certificate(
    key: &SigningKey,
    common_name: &str,
) -> Result<(Vec<u8>, String), PkiError> {
    let pkcs8 = key
        .to_pkcs8_der()
        .map_err(|e| PkiError::KeyEncoding(e.to_string()))?;
    let key_pair = KeyPair::try_from(pkcs8.as_bytes())?;
    let mut params = CertificateParams::default();
    params.distinguished_name.push(
        DnType::CommonName,
        DnValue::Utf8String(common_name.to_string()),
    );
    let cert = params.self_signed(&key_pair)?;
    Ok((cert.der().to_vec(), cert.pem()))
}

/// PEM-encodes an Ed25519 private key (PKCS#8) for TLS identities.
pub fn private_key_pem(key: &SigningKey) -> Result<String, PkiError> {
    key.to_pkcs8_pem(pkcs8::LineEnding::LF)
        .map(|z| z.to_string())
        .map_err(|e| PkiError::KeyEncoding(e.to_string()))
}

/// A node's permanent transport credentials.
pub struct NodeCredentials {
    /// The node's ID (certificate common name).
    pub node_id: String,
    /// PEM node certificate signed by the cluster CA.
    pub certificate_pem: String,
    /// PEM PKCS#8 private key.
    pub key_pem: String,
    /// PEM cluster CA certificate.
    pub ca_pem: String,
}

impl NodeCredentials {
    /// Issues credentials for a node identity key. Used at cluster
    /// bootstrap and by test harnesses; enrolled nodes receive their
    /// certificate through the lifecycle protocol.
    pub fn issue(
        ca: &ClusterCa,
        key: &SigningKey,
        node_id: &str,
    ) -> Result<Self, PkiError> {
        let certificate_pem =
            ca.issue_node_certificate_pem(key.verifying_key().as_bytes(), node_id)?;
        Ok(Self {
            node_id: node_id.to_string(),
            certificate_pem,
            key_pem: private_key_pem(key)?,
            ca_pem: ca.certificate_pem(),
        })
    }

    /// Server-side mTLS configuration: present the node certificate,
    /// accept clients rooted in the cluster CA, and allow self-signed
    /// (ephemeral) clients through for pre-UP verification.
    pub fn server_tls(&self) -> ServerTlsConfig {
        ServerTlsConfig::new()
            .identity(Identity::from_pem(&self.certificate_pem, &self.key_pem))
            .client_ca_root(TonicCertificate::from_pem(&self.ca_pem))
            .client_auth_optional(true)
    }

    /// Client-side mTLS configuration for dialing other nodes.
    pub fn client_tls(&self, server_name: &str) -> ClientTlsConfig {
        ClientTlsConfig::new()
            .identity(Identity::from_pem(&self.certificate_pem, &self.key_pem))
            .ca_certificate(TonicCertificate::from_pem(&self.ca_pem))
            .domain_name(server_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn bootstrap_produces_a_self_signed_ca() {
        let ca = ClusterCa::bootstrap("test").unwrap();
        assert!(!ca.certificate_der().is_empty());
        assert!(ca.certificate_pem().contains("BEGIN CERTIFICATE"));
    }

    #[test]
    fn issue_rejects_non_ed25519_key_lengths() {
        let ca = ClusterCa::bootstrap("test").unwrap();
        assert!(matches!(
            ca.issue_node_certificate(b"short", "node-x"),
            Err(PkiError::InvalidPublicKey(5))
        ));
    }

    #[test]
    fn node_credentials_issue_and_configs_build() {
        let ca = ClusterCa::bootstrap("test").unwrap();
        let key = SigningKey::generate(&mut OsRng);
        let creds = NodeCredentials::issue(&ca, &key, "node-0011223344556677").unwrap();
        assert!(creds.certificate_pem.contains("BEGIN CERTIFICATE"));
        assert!(creds.key_pem.contains("PRIVATE KEY"));
        let _ = creds.server_tls();
        let _ = creds.client_tls("node-0011223344556677");
    }

    #[test]
    fn ephemeral_certificate_is_self_contained() {
        let key = SigningKey::generate(&mut OsRng);
        let (der, pem) = ephemeral_certificate(&key, "join").unwrap();
        assert!(!der.is_empty());
        assert!(pem.contains("BEGIN CERTIFICATE"));
    }
}
