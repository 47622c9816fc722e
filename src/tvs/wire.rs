//! TVS command codes and element tags, fixed by the wire protocol.

pub const CMD_VERIFY_REQUEST: u8 = 1;
pub const CMD_VERIFY_RESPONSE: u8 = 2;

pub const TAG_DEVICE_NAME: u8 = 1;
pub const TAG_CERTIFICATE: u8 = 2;
pub const TAG_STATUS: u8 = 7;
pub const TAG_ROLES: u8 = 8;
pub const TAG_TTL: u8 = 9;

pub const KNOWN_TAGS: &[u8] = &[
    TAG_DEVICE_NAME,
    TAG_CERTIFICATE,
    TAG_STATUS,
    TAG_ROLES,
    TAG_TTL,
];

/// Not fixed by the protocol description beyond "STATUS=VALID/INVALID";
/// this implementation's own byte assignment.
pub const STATUS_INVALID: u8 = 0;
pub const STATUS_VALID: u8 = 1;

pub fn role_code(role: crate::model::Role) -> u8 {
    use crate::model::Role::*;
    match role {
        Sast => 0,
        Ccm => 1,
        CcmTftp => 2,
        Tftp => 3,
        Capf => 4,
        AppServer => 7,
        Tvs => 21,
    }
}
