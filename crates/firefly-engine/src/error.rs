//! Error types for firefly-engine.

use thiserror::Error;

/// Rejected engine configurations.
///
/// Configuration is the only fallible surface of the engine: once an
/// instance exists, runtime anomalies (duplicates, loops, exhausted TTLs,
/// stray slot indexes) are counted or logged, never raised.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The reserved invalid node id (0) cannot be assigned to a device.
    #[error("node id 0 is reserved as the invalid id")]
    InvalidNodeId,

    /// A timing parameter that must be positive was zero.
    #[error("timing parameter `{0}` must be non-zero")]
    ZeroTimingParameter(&'static str),
}
