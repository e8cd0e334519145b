//! Error types for the GSI crypto plumbing.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, GsiError>;

#[derive(Error, Debug)]
pub enum GsiError {
    /// Structurally invalid PEM, DER or DH message material.
    #[error("malformed material: {0}")]
    Malformed(String),

    /// The peer advertised DH parameters that differ from the fixed group.
    #[error("remote DH parameters differ from local ones")]
    ParamMismatch,

    /// The peer's public value is not a valid group element.
    #[error("peer public key rejected: {0}")]
    KeyRejected(String),

    /// The underlying provider rejected the group parameters.
    #[error("crypto initialization failed: {0}")]
    CryptoInit(String),

    /// Key agreement has not been finalized yet.
    #[error("key agreement not finalized")]
    NotFinalized,

    /// Ciphertext did not unpad cleanly.
    #[error("bad padding in ciphertext")]
    BadPadding,

    /// Ciphertext or key length does not match the cipher block size.
    #[error("bad block size: {0}")]
    BadBlockSize(String),

    /// The requested cipher or key specification is not supported.
    #[error("unsupported algorithm: {0}")]
    AlgorithmUnsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
