//! The small set of semantic error kinds the rotation engine and startup path
//! branch on. Everything else flows through `anyhow::Error` with `.context(...)`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("KMS unreachable: {0}")]
    KmsUnreachable(String),

    #[error("KMS returned a malformed response: {body}")]
    KmsProtocolError { body: String },

    #[error("KMS response contained no usable key")]
    KmsEmptyResponse,

    #[error("TLS error: {0}")]
    TlsError(String),

    #[error("base64 decode error: {0}")]
    DecodeError(String),

    #[error("KDF error: {0}")]
    KdfError(String),

    #[error("WireGuard interface {0:?} not found")]
    IfaceMissing(String),

    #[error("WireGuard error: {0}")]
    WireGuardError(String),

    #[error("peer channel argument was empty: {0}")]
    ArgEmpty(&'static str),

    #[error("peer channel send failed: {0}")]
    PeerSendError(String),

    #[error("PQC PSK file missing: {0}")]
    PqcFileMissing(String),

    #[error("failed to generate random PSK: {0}")]
    RandomPskError(String),
}
