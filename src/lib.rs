//! Normalization engine for harvested public-key material.
//!
//! Raw harvester dumps (semicolon-delimited rows of OpenSSH key lines,
//! ASCII-armored PGP blocks or PEM certificates) are decoded into a single
//! canonical record shape, enriched with a deterministic SHA-512 identity
//! fingerprint and, for EC keys, an on-curve check, then written as
//! newline-delimited JSON — one output artifact per input file, committed
//! atomically.
//!
//! The decoders are usable on their own:
//!
//! ```
//! use keycensus::{DecodeOptions, KeyMaterial};
//! use keycensus::ssh::decode_openssh_line;
//!
//! let line = "ssh-rsa AAAAB3NzaC1yc2EAAAABEQAAAAIMoQ== demo";
//! let keys = decode_openssh_line(line, &DecodeOptions::default())?;
//! assert!(matches!(keys[0].material, KeyMaterial::Rsa { .. }));
//! # Ok::<(), keycensus::NormalizeError>(())
//! ```

pub mod curve;
pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod pgp;
pub mod record;
pub mod ssh;
pub mod x509;

pub(crate) mod clock;

pub use driver::{FileReport, Normalizer};
pub use error::{ErrorClass, NormalizeError};
pub use record::{ContainerType, DecodeOptions, DecodedKey, KeyMaterial, KeyRecord};
