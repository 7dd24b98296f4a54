//! Back office of a small shop site: collections edited through a hosted
//! repository's contents API, and the public catalog views built from the
//! same JSON files.

pub mod auth;
pub mod core;
pub mod error;
pub mod server;
pub mod types;

use tracing_subscriber::{fmt, EnvFilter};

/// Installs the tracing subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();
}
