//! Error taxonomy for travel document reading
//!
//! Every failure surfaced to callers is one of these closed variants so the
//! caller can pattern-match on kind instead of string-matching messages.
//! Messages never include key material or other cryptographic state.

use mrtd_common::TlvError;
use thiserror::Error;

/// Transport-level failures underneath [`MrtdError::Communication`]
#[derive(Debug, Error)]
pub enum CommunicationError {
    /// PC/SC layer failure (reader gone, card removed, transmit error)
    #[error("PC/SC transport error: {0}")]
    Pcsc(#[from] pcsc::Error),
    /// The chip answered with a non-success status word
    #[error("unexpected status word 0x{sw:04X}")]
    UnexpectedStatus { sw: u16 },
    /// The response was too short to carry a status word
    #[error("response too short: {len} bytes")]
    ShortResponse { len: usize },
}

/// Failures of the travel document reading pipeline
#[derive(Debug, Error)]
pub enum MrtdError {
    /// MRZ input did not validate (document number too long, malformed date)
    #[error("invalid MRZ data: {0}")]
    InvalidMrzFormat(String),

    /// SELECT of the travel document application was rejected
    #[error("travel document application not found (status 0x{sw:04X})")]
    ApplicationNotFound { sw: u16 },

    /// BAC mutual authentication could not be completed
    #[error("BAC authentication failed: {0}")]
    BacAuthenticationFailed(String),

    /// Transceiver failure or unexpected status word
    #[error("card communication failed: {0}")]
    Communication(#[from] CommunicationError),

    /// MAC mismatch on a secure messaging response; the channel is
    /// desynchronized and the session must be abandoned, not retried
    #[error("secure messaging integrity check failed: {0}")]
    SecureMessagingIntegrity(&'static str),

    /// TLV structure ran past the end of its buffer
    #[error("truncated TLV data at offset {offset}")]
    TruncatedTlv { offset: usize },

    /// Other structural parse failure in a data group or response
    #[error("parse error: {0}")]
    Parse(String),

    /// A data group stayed empty or unreadable after all retry attempts
    #[error("data group {dg} could not be read")]
    MissingDataGroup { dg: u8 },

    /// DG2 biometric block held neither a JPEG nor a JPEG2000 marker
    #[error("no image start marker found in biometric data block")]
    ImageMarkerNotFound,
}

impl MrtdError {
    /// Whether a fresh authentication attempt may succeed.
    ///
    /// Integrity and parse failures indicate interference or
    /// desynchronization and must abort the session instead.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MrtdError::Communication(_)
                | MrtdError::BacAuthenticationFailed(_)
                | MrtdError::ApplicationNotFound { .. }
        )
    }
}

impl From<TlvError> for MrtdError {
    fn from(err: TlvError) -> Self {
        match err {
            TlvError::Truncated { offset } => MrtdError::TruncatedTlv { offset },
            other => MrtdError::Parse(other.to_string()),
        }
    }
}
