//! Data model shared by the store adapters and session engines.

use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcCurve {
    P256,
    P384,
    P521,
}

impl EcCurve {
    pub fn wire_code(self) -> u8 {
        match self {
            EcCurve::P256 => crate::capf::wire::CURVE_SECP256R1,
            EcCurve::P384 => crate::capf::wire::CURVE_SECP384R1,
            EcCurve::P521 => crate::capf::wire::CURVE_SECP521R1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySpec {
    Rsa { bits: u32 },
    Ec { curve: EcCurve },
}

pub const VALID_RSA_BITS: &[u32] = &[512, 1024, 2048, 3072, 4096];

impl KeySpec {
    pub fn is_valid(&self) -> bool {
        match self {
            KeySpec::Rsa { bits } => VALID_RSA_BITS.contains(bits),
            KeySpec::Ec { .. } => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Install(KeySpec),
    Fetch,
    Delete,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthMode {
    NoPassword,
    Password(String),
    Certificate,
}

pub const MIN_PASSWORD_LEN: usize = 4;
pub const MAX_PASSWORD_LEN: usize = 15;

#[derive(Debug, Clone)]
pub struct IssuedCert {
    pub pem: String,
    pub serial_hex: String,
    pub not_before: OffsetDateTime,
    pub not_after: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct Device {
    pub device_name: String,
    pub operation: Operation,
    pub auth: AuthMode,
    pub cert: Option<IssuedCert>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Sast,
    Ccm,
    CcmTftp,
    Tftp,
    Capf,
    AppServer,
    Tvs,
}

impl Role {
    /// Canonical display order used when serializing roles to CSV for storage.
    pub const CANONICAL_ORDER: &'static [Role] = &[
        Role::Sast,
        Role::Ccm,
        Role::CcmTftp,
        Role::Tftp,
        Role::Capf,
        Role::AppServer,
        Role::Tvs,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Role::Sast => "SAST",
            Role::Ccm => "CCM",
            Role::CcmTftp => "CCM+TFTP",
            Role::Tftp => "TFTP",
            Role::Capf => "CAPF",
            Role::AppServer => "APP-SERVER",
            Role::Tvs => "TVS",
        }
    }

    pub fn parse(name: &str) -> Option<Role> {
        Self::CANONICAL_ORDER.iter().copied().find(|r| r.name() == name)
    }
}

pub const MIN_TTL_SECS: u32 = 1;
pub const MAX_TTL_SECS: u32 = 2_592_000;

#[derive(Debug, Clone)]
pub struct TrustRecord {
    pub roles: Vec<Role>,
    pub ttl_secs: u32,
}

pub fn roles_to_csv(roles: &[Role]) -> String {
    Role::CANONICAL_ORDER
        .iter()
        .filter(|r| roles.contains(r))
        .map(|r| r.name())
        .collect::<Vec<_>>()
        .join(",")
}

pub fn roles_from_csv(csv: &str) -> Vec<Role> {
    csv.split(',')
        .filter_map(|s| Role::parse(s.trim()))
        .collect()
}
