//! Kalshi order routing: a pluggable transport abstraction over a
//! persistent FIX session with an HTTP fallback.

pub mod fallback;
pub mod fix_transport;
pub mod mapper;
pub mod rest;
pub mod session;
pub mod tracker;
pub mod transport;
pub mod types;
