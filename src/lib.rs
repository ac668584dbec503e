//! # Artery
//!
//! A caching forward proxy for Maven-style artifact repositories.
//! Requests are answered from a local artifact store when possible;
//! misses race a streaming fetch against every configured upstream
//! mirror, cache the first success, and stream it back to the client.

pub mod cli;
pub mod config;
pub mod error;
pub mod handler;
pub mod mime;
pub mod server;
