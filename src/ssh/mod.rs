//! OpenSSH public-key and certificate wire-format decoding.

pub mod certificate;
pub mod decode;

pub use decode::{decode_openssh_line, SshReadExt};

pub(crate) mod key_type {
    pub const RSA: &str = "ssh-rsa";
    pub const DSS: &str = "ssh-dss";
    pub const ED25519: &str = "ssh-ed25519";
    pub const ECDSA_SHA2_NIST_P256: &str = "ecdsa-sha2-nistp256";
    pub const ECDSA_SHA2_NIST_P384: &str = "ecdsa-sha2-nistp384";
    pub const ECDSA_SHA2_NIST_P521: &str = "ecdsa-sha2-nistp521";
    pub const CERT_SUFFIX: &str = "-cert-v01@openssh.com";
}
