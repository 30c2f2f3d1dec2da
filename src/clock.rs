//! Canonical timestamp rendering shared by all decoders.

use chrono::DateTime;

/// Renders a unix epoch as `YYYY-MM-DD HH:MM:SS` (UTC).
///
/// Returns `None` for epochs chrono cannot represent.
pub(crate) fn canonical_timestamp(epoch: i64) -> Option<String> {
    DateTime::from_timestamp(epoch, 0).map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
}
