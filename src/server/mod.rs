//! Gateway server modules
//!
//! - `http`: router and download/health handlers
//! - `ratelimit`: fixed-window admission control middleware
//! - `cors`: origin allow-list layer
//! - `startup`: testable server lifecycle

pub mod cors;
pub mod http;
pub mod ratelimit;
pub mod startup;
