//! Persistence traits and their SQLite-backed implementations.
//!
//! Grounded on `certmanager.rs`'s trait-plus-file-backed-impl shape and on
//! the rusqlite usage in `pairing.rs`; the database is opened fresh per
//! call, matching the short-transaction, opened-per-session model the
//! scheduling store is expected to follow.

mod capf_store;
mod tvs_store;

pub use capf_store::SqliteCapfStore;
pub use tvs_store::SqliteTvsStore;

use time::OffsetDateTime;

use crate::error::StoreError;
use crate::model::{Device, TrustRecord};

pub trait CapfStore: Send + Sync {
    fn get_device(&self, name: &str) -> Result<Option<Device>, StoreError>;

    fn update_device_issued(
        &self,
        name: &str,
        serial_hex: &str,
        pem: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<(), StoreError>;

    fn clear_device_certificate(&self, name: &str) -> Result<(), StoreError>;
}

pub trait TvsStore: Send + Sync {
    fn get_trust_record(&self, fingerprint_hex: &str) -> Result<Option<TrustRecord>, StoreError>;
}

/// `YYYY-MM-DD HH:MM:SS` UTC, the timestamp format the store columns use.
pub(crate) fn format_timestamp(t: OffsetDateTime) -> String {
    let t = t.to_offset(time::UtcOffset::UTC);
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        t.year(),
        t.month() as u8,
        t.day(),
        t.hour(),
        t.minute(),
        t.second()
    )
}

/// Parses a stored `YYYY-MM-DD HH:MM:SS` timestamp back to UTC.
pub(crate) fn parse_timestamp(s: &str) -> Result<OffsetDateTime, StoreError> {
    let format = time::macros::format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    );
    let naive = time::PrimitiveDateTime::parse(s, &format)
        .map_err(|e| StoreError::Malformed(format!("bad timestamp {s:?}: {e}")))?;
    Ok(naive.assume_utc())
}

/// Trims a leading `0x00` byte from a hex-encoded serial when the next byte's
/// high bit is already zero (standard big-endian minimum width).
pub(crate) fn trim_serial_hex(hex: &str) -> String {
    if hex.len() >= 4 && &hex[0..2] == "00" {
        if let Ok(b) = u8::from_str_radix(&hex[2..4], 16) {
            if b & 0x80 == 0 {
                return hex[2..].to_string();
            }
        }
    }
    hex.to_string()
}
