use std::io;

use thiserror::Error;

/// Crate-wide decode/normalization error.
///
/// Per-row and per-packet errors are classified by [`NormalizeError::class`]
/// so the driver can tally them without aborting the containing file.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// malformed wire encoding or unsplittable row
    #[error("malformed encoding: {context}")]
    Format { context: String },

    /// recognized container, unknown cryptographic algorithm
    #[error("unsupported algorithm: {algorithm}")]
    UnsupportedAlgorithm { algorithm: String },

    /// no defined fingerprint field order for this record shape
    #[error("no fingerprint field order for key type: {key_type}")]
    UnsupportedKeyType { key_type: String },

    /// decoded value is outside its allowed range (e.g. non-standard DSA size)
    #[error("invalid parameter: {context}")]
    InvalidParameter { context: String },

    /// one PGP packet failed to parse; the stream continues
    #[error("recoverable packet fault: {context}")]
    RecoverablePacket { context: String },

    /// the entire blob is unparsable
    #[error("unrecoverable blob: {context}")]
    FatalDecode { context: String },

    /// file-level I/O error
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl NormalizeError {
    pub(crate) fn format(context: impl Into<String>) -> Self {
        Self::Format {
            context: context.into(),
        }
    }

    pub(crate) fn unsupported_algorithm(algorithm: impl Into<String>) -> Self {
        Self::UnsupportedAlgorithm {
            algorithm: algorithm.into(),
        }
    }

    pub(crate) fn invalid_parameter(context: impl Into<String>) -> Self {
        Self::InvalidParameter {
            context: context.into(),
        }
    }

    pub(crate) fn recoverable(context: impl Into<String>) -> Self {
        Self::RecoverablePacket {
            context: context.into(),
        }
    }

    pub(crate) fn fatal(context: impl Into<String>) -> Self {
        Self::FatalDecode {
            context: context.into(),
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Format { .. } => ErrorClass::Format,
            Self::UnsupportedAlgorithm { .. } => ErrorClass::UnsupportedAlgorithm,
            Self::UnsupportedKeyType { .. } => ErrorClass::UnsupportedKeyType,
            Self::InvalidParameter { .. } => ErrorClass::InvalidParameter,
            Self::RecoverablePacket { .. } => ErrorClass::RecoverablePacket,
            Self::FatalDecode { .. } => ErrorClass::Fatal,
            Self::Io(_) => ErrorClass::Io,
        }
    }
}

/// Error taxonomy used by the driver's per-file tallies.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Format,
    UnsupportedAlgorithm,
    UnsupportedKeyType,
    InvalidParameter,
    RecoverablePacket,
    Fatal,
    Io,
}
