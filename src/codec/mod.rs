//! Shared framing and element codec for both protocols. Each protocol's
//! concrete frame header lives in its own submodule; [`element`] is the
//! shared tag/length/value body encoding used by both.

pub mod capf;
pub mod element;
pub mod tvs;
