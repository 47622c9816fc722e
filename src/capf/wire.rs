//! CAPF command codes, element tags, and enumerated element values.
//!
//! Command REASONs, AUTH_TYPE, CERTIFICATE_TYPE, KEY_TYPE, CURVE, and HASH
//! values below are fixed by the wire protocol this server must interoperate
//! with. Element *tag bytes* are this implementation's own assignment: the
//! protocol names each element but does not fix its tag number, so one
//! consistent table is defined here (see `DESIGN.md`).

pub const CMD_AUTH_REQUEST: u8 = 1;
pub const CMD_AUTH_RESPONSE: u8 = 2;
pub const CMD_KEY_GEN_REQUEST: u8 = 3;
pub const CMD_REQUEST_IN_PROGRESS: u8 = 4;
pub const CMD_KEY_GEN_RESPONSE: u8 = 5;
pub const CMD_STORE_CERT_REQUEST: u8 = 6;
pub const CMD_STORE_CERT_RESPONSE: u8 = 7;
pub const CMD_FETCH_CERT_REQUEST: u8 = 8;
pub const CMD_FETCH_CERT_RESPONSE: u8 = 9;
pub const CMD_DELETE_CERT_REQUEST: u8 = 10;
pub const CMD_DELETE_CERT_RESPONSE: u8 = 11;
pub const CMD_END_SESSION: u8 = 12;

pub const TAG_VERSION: u8 = 1;
pub const TAG_AUTH_TYPE: u8 = 2;
pub const TAG_DEVICE_NAME: u8 = 3;
pub const TAG_PASSWORD: u8 = 4;
pub const TAG_CERTIFICATE: u8 = 5;
pub const TAG_SIGNED_DATA: u8 = 6;
pub const TAG_SHA2_SIGNED_DATA: u8 = 7;
pub const TAG_SUDI_DATA: u8 = 8;
pub const TAG_KEY_TYPE: u8 = 9;
pub const TAG_KEY_SIZE: u8 = 10;
pub const TAG_CURVE: u8 = 11;
pub const TAG_PUBLIC_KEY: u8 = 12;
pub const TAG_CERT_TYPE: u8 = 13;
pub const TAG_REASON: u8 = 14;

pub const KNOWN_TAGS: &[u8] = &[
    TAG_VERSION,
    TAG_AUTH_TYPE,
    TAG_DEVICE_NAME,
    TAG_PASSWORD,
    TAG_CERTIFICATE,
    TAG_SIGNED_DATA,
    TAG_SHA2_SIGNED_DATA,
    TAG_SUDI_DATA,
    TAG_KEY_TYPE,
    TAG_KEY_SIZE,
    TAG_CURVE,
    TAG_PUBLIC_KEY,
    TAG_CERT_TYPE,
    TAG_REASON,
];

pub const PROTOCOL_VERSION: u8 = 3;

pub const AUTH_TYPE_NONE: u8 = 0;
pub const AUTH_TYPE_PASSWORD: u8 = 1;

pub const CERT_TYPE_LSC: u8 = 1;
#[allow(dead_code)]
pub const CERT_TYPE_MIC: u8 = 2;

pub const KEY_TYPE_RSA: u8 = 0;
pub const KEY_TYPE_EC: u8 = 1;

pub const CURVE_SECP256R1: u8 = 0;
pub const CURVE_SECP384R1: u8 = 1;
pub const CURVE_SECP521R1: u8 = 2;

pub const HASH_SHA1: u8 = 1;
#[allow(dead_code)]
pub const HASH_SHA256: u8 = 2;
pub const HASH_SHA512: u8 = 3;

pub const REASON_NO_ACTION: u8 = 0;
pub const REASON_UPDATE_CERTIFICATE: u8 = 1;
pub const REASON_INVALID_ELEMENT: u8 = 7;
pub const REASON_UNKNOWN_DEVICE: u8 = 9;
