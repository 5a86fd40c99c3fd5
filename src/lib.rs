//! vidgate gateway library
//!
//! This library provides the core functionality for the vidgate gateway:
//! the resolver/relay download pipeline, the HTTP server, and the
//! configuration and logging subsystems.

pub mod cli;
pub mod config;
pub mod logging;
pub mod relay;
pub mod resolver;
pub mod server;
