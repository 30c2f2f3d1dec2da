//! OpenPGP public-key material: armor stripping and packet-stream decoding.

pub mod armor;
pub mod packet;

pub use packet::PgpKeyStream;
