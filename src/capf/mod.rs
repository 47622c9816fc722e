//! CAPF (Certificate Authority Proxy Function) protocol: wire constants,
//! element tags, and the per-connection session engine.

pub mod session;
pub mod wire;

pub use session::{run, CapfContext};
