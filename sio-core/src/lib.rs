//! sio-core - Foundation types shared by the protocol and client crates.
//!
//! Provides the ambient stack used by every other crate in this workspace:
//! - A unified error type covering engine, codec, and protocol failures
//! - Structured logging with `tracing`
//! - Protocol-wide constants (reserved events, default timings)
//! - A poison-proof `Mutex` locking helper

pub mod constants;
pub mod error;
pub mod logging;
pub mod sync;

pub use error::{SioError, SioResult};
pub use logging::init_logging;
pub use sync::lock;
