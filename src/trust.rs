//! TLS server trust evaluation.
//!
//! The TLS stack is supplied by the [`Connector`](crate::Connector). It hands over the
//! presented certificate chain together with its own chain validation verdict, and a
//! [`TrustPolicy`] decides whether the connection may proceed.

use std::collections::HashSet;

use bytes::Bytes;
use sha2::{Digest, Sha256};

/// A DER encoded X.509 certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Certificate(Bytes);

impl Certificate {
    pub fn from_der(der: impl Into<Bytes>) -> Self {
        Self(der.into())
    }

    pub fn der(&self) -> &[u8] {
        &self.0
    }

    /// SHA-256 over the DER bytes.
    pub fn fingerprint(&self) -> [u8; 32] {
        Sha256::digest(&self.0).into()
    }
}

/// What the TLS stack learned about the server.
#[derive(Debug, Clone, Default)]
pub struct ServerTrust {
    chain: Vec<Certificate>,
    chain_valid: bool,
}

impl ServerTrust {
    /// `chain` starts with the leaf. `chain_valid` is the TLS stack's standard
    /// validation of the chain against its roots for the requested domain.
    pub fn new(chain: Vec<Certificate>, chain_valid: bool) -> Self {
        Self { chain, chain_valid }
    }

    pub fn chain(&self) -> &[Certificate] {
        &self.chain
    }

    pub const fn is_chain_valid(&self) -> bool {
        self.chain_valid
    }
}

/// Decides whether a TLS server may be trusted for a domain.
///
/// Evaluated once per connection attempt, never cached.
pub trait TrustPolicy: Send + Sync + core::fmt::Debug {
    fn evaluate(&self, trust: &ServerTrust, domain: &str) -> bool;
}

/// Standard chain validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPolicy;

impl TrustPolicy for DefaultPolicy {
    fn evaluate(&self, trust: &ServerTrust, domain: &str) -> bool {
        let trusted = !trust.chain().is_empty() && trust.is_chain_valid();

        tracing::debug!(domain, trusted, "Evaluated server trust");

        trusted
    }
}

/// Trusts a server if any certificate of its chain is pinned.
#[derive(Debug, Clone, Default)]
pub struct PinningPolicy {
    pins: HashSet<[u8; 32]>,
}

impl PinningPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pins a certificate.
    pub fn with_certificate(mut self, certificate: &Certificate) -> Self {
        self.pins.insert(certificate.fingerprint());
        self
    }

    /// Pins a SHA-256 fingerprint of a DER certificate.
    pub fn with_fingerprint(mut self, fingerprint: [u8; 32]) -> Self {
        self.pins.insert(fingerprint);
        self
    }
}

impl TrustPolicy for PinningPolicy {
    fn evaluate(&self, trust: &ServerTrust, domain: &str) -> bool {
        let trusted = trust
            .chain()
            .iter()
            .any(|certificate| self.pins.contains(&certificate.fingerprint()));

        tracing::debug!(domain, trusted, pins = self.pins.len(), "Evaluated pinned server trust");

        trusted
    }
}
