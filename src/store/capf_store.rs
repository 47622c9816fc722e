use rusqlite::{params, Connection, OptionalExtension};
use time::OffsetDateTime;

use super::{format_timestamp, parse_timestamp, trim_serial_hex, CapfStore};
use crate::error::StoreError;
use crate::model::{
    AuthMode, Device, EcCurve, IssuedCert, KeySpec, Operation, MAX_PASSWORD_LEN, MIN_PASSWORD_LEN,
};

pub struct SqliteCapfStore {
    db_path: String,
}

impl SqliteCapfStore {
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
        }
    }

    fn open(&self) -> Result<Connection, StoreError> {
        Ok(Connection::open(&self.db_path)?)
    }
}

fn parse_operation(op: &str, key_size: Option<u32>, curve: Option<&str>) -> Option<Operation> {
    match op {
        "install" => {
            let spec = match (key_size, curve) {
                (Some(bits), None) => KeySpec::Rsa { bits },
                (None, Some(c)) => KeySpec::Ec {
                    curve: match c {
                        "secp256r1" => EcCurve::P256,
                        "secp384r1" => EcCurve::P384,
                        "secp521r1" => EcCurve::P521,
                        _ => return None,
                    },
                },
                _ => return None,
            };
            Some(Operation::Install(spec))
        }
        "fetch" => Some(Operation::Fetch),
        "delete" => Some(Operation::Delete),
        "none" => Some(Operation::None),
        _ => None,
    }
}

fn row_to_device(row: &rusqlite::Row) -> rusqlite::Result<Device> {
    let device_name: String = row.get("device_name")?;
    let operation_raw: String = row.get("operation")?;
    let auth_mode: String = row.get("auth_mode")?;
    let password: Option<String> = row.get("password")?;
    let key_size: Option<u32> = row.get("key_size")?;
    let curve: Option<String> = row.get("curve")?;
    let cert_pem: Option<String> = row.get("cert_pem")?;
    let serial_hex: Option<String> = row.get("serial_hex")?;
    let not_before: Option<String> = row.get("not_before")?;
    let not_after: Option<String> = row.get("not_after")?;

    let operation = parse_operation(&operation_raw, key_size, curve.as_deref())
        .unwrap_or(Operation::None);

    let auth = match auth_mode.as_str() {
        "password" => AuthMode::Password(password.unwrap_or_default()),
        "certificate" => AuthMode::Certificate,
        _ => AuthMode::NoPassword,
    };

    let cert = match (cert_pem, serial_hex, not_before, not_after) {
        (Some(pem), Some(serial_hex), Some(nbf), Some(naf)) => Some(IssuedCert {
            pem,
            serial_hex,
            not_before: parse_timestamp(&nbf).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            not_after: parse_timestamp(&naf).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        }),
        _ => None,
    };

    Ok(Device {
        device_name,
        operation,
        auth,
        cert,
    })
}

/// Rejects a device row the admin tool wrote outside the protocol's own
/// bounds (an install key size the wire format can't carry, a password
/// length the phone could never match) rather than acting on it silently.
fn validate_device(device: &Device) -> Result<(), StoreError> {
    if let Operation::Install(spec) = device.operation {
        if !spec.is_valid() {
            return Err(StoreError::Malformed(format!(
                "device {} has an invalid key spec",
                device.device_name
            )));
        }
    }
    if let AuthMode::Password(password) = &device.auth {
        if !(MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.len()) {
            return Err(StoreError::Malformed(format!(
                "device {} has a password length outside {}..={}",
                device.device_name, MIN_PASSWORD_LEN, MAX_PASSWORD_LEN
            )));
        }
    }
    Ok(())
}

impl CapfStore for SqliteCapfStore {
    fn get_device(&self, name: &str) -> Result<Option<Device>, StoreError> {
        let conn = self.open()?;
        let device = conn
            .query_row(
                "SELECT device_name, operation, auth_mode, password, key_size, curve, \
                 cert_pem, serial_hex, not_before, not_after FROM devices WHERE device_name = ?1",
                params![name],
                row_to_device,
            )
            .optional()?;
        if let Some(device) = &device {
            validate_device(device)?;
        }
        Ok(device)
    }

    fn update_device_issued(
        &self,
        name: &str,
        serial_hex: &str,
        pem: &str,
        not_before: OffsetDateTime,
        not_after: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let conn = self.open()?;
        let trimmed = trim_serial_hex(serial_hex);
        let updated = conn.execute(
            "UPDATE devices SET operation = 'none', cert_pem = ?1, serial_hex = ?2, \
             not_before = ?3, not_after = ?4 WHERE device_name = ?5",
            params![
                pem,
                trimmed,
                format_timestamp(not_before),
                format_timestamp(not_after),
                name,
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn clear_device_certificate(&self, name: &str) -> Result<(), StoreError> {
        let conn = self.open()?;
        let updated = conn.execute(
            "UPDATE devices SET operation = 'none', cert_pem = NULL, serial_hex = NULL, \
             not_before = NULL, not_after = NULL WHERE device_name = ?1",
            params![name],
        )?;
        if updated == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
