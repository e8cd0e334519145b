//! # xrd-gsi
//!
//! The cryptographic core of the GSI (Grid Security Infrastructure)
//! authentication flow for an xrootd data server: a Diffie-Hellman session
//! over a fixed 512-bit group, the PEM/DER encodings that carry the DH
//! parameters between peers, symmetric decryption of client material under
//! the agreed session key, and the shared trust-anchor snapshot consumed by
//! the certificate-chain side of the handshake.
//!
//! The group parameters are fixed for wire compatibility with existing GSI
//! peers; confidentiality rests on the surrounding X.509 handshake, not on
//! the DH exchange alone.

pub mod anchors;
pub mod cipher;
pub mod dh;
pub mod error;
pub mod pem;

pub use anchors::{TrustAnchor, TrustAnchorStore};
pub use dh::{AgreementState, DhSession, DH_GENERATOR, DH_PRIME_HEX};
pub use error::{GsiError, Result};
