//! echoes-core library.
//!
//! Causally-ordered event logs for eventually-consistent sites: events are
//! identified by Lamport timestamps ([`causal`]), stored in gap buffers
//! ([`buffer`]) under two ordered views ([`log`]), replayed into an
//! application model that tolerates out-of-order arrival ([`history`]), and
//! exchanged between sites by a credit-based two-role protocol
//! ([`protocol`], [`sync`]).
//!
//! # Conventions
//!
//! - **Errors**: each module has its own `thiserror` enum exposing a stable
//!   [`ErrorCode`]; `anyhow::Result` only where configuration is loaded.
//! - **Logging**: use `tracing` macros (`warn!`, `debug!`, `trace!`).

pub mod buffer;
pub mod causal;
pub mod config;
pub mod error;
pub mod history;
pub mod log;
pub mod protocol;
pub mod sync;

pub use causal::{EventIdentifier, SequenceNumber, SiteIdentifier};
pub use error::ErrorCode;
pub use history::{History, OneWay, OneWayProjection, ProjectionError, TwoWayProjection};
pub use log::EventLog;
pub use sync::{Site, sync};
