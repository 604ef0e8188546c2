//! Process-wide logging setup for binaries and tests embedding the store.
//!
//! Library crates only emit `tracing` spans and events; installing a
//! subscriber is left to the host through this crate.

pub mod logging;

pub use logging::{init, init_for_tests};
