use rusqlite::{params, Connection, OptionalExtension};

use super::TvsStore;
use crate::error::StoreError;
use crate::model::{roles_from_csv, TrustRecord, MAX_TTL_SECS, MIN_TTL_SECS};

pub struct SqliteTvsStore {
    db_path: String,
}

impl SqliteTvsStore {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn open(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

impl TvsStore for SqliteTvsStore {
    fn get_trust_record(&self, fingerprint_hex: &str) -> Result<Option<TrustRecord>, StoreError> {
        let conn = self.open()?;
        let record = conn
            .query_row(
                "SELECT roles, ttl FROM trust_records WHERE certificate_hash = ?1",
                params![fingerprint_hex],
                |row| {
                    let roles_csv: String = row.get("roles")?;
                    let ttl: u32 = row.get("ttl")?;
                    Ok(TrustRecord {
                        roles: roles_from_csv(&roles_csv),
                        ttl_secs: ttl,
                    })
                },
            )
            .optional()?;
        if let Some(record) = &record {
            if !(MIN_TTL_SECS..=MAX_TTL_SECS).contains(&record.ttl_secs) {
                return Err(StoreError::Malformed(format!(
                    "trust record ttl {} outside {}..={}",
                    record.ttl_secs, MIN_TTL_SECS, MAX_TTL_SECS
                )));
            }
        }
        Ok(record)
    }
}
