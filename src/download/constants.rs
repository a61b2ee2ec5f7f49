//! Constants for the download module.

/// HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// HTTP read timeout between body chunks (5 minutes for large media).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// User-Agent sent on every request.
pub const DEFAULT_USER_AGENT: &str = concat!(
    "harvester/",
    env!("CARGO_PKG_VERSION"),
    " (+https://github.com/fierce/harvester)"
);

/// Suffix of in-progress files; renamed away once the body is complete.
pub const PARTIAL_SUFFIX: &str = ".part";
