//! `sourcebook-core`: event store foundation building blocks.
//!
//! This crate contains **pure decision logic** (no IO): stream identity and
//! tenancy, global positions, and the versioning / concurrency controller.

pub mod error;
pub mod id;
pub mod position;
pub mod stream;
pub mod tenant;
pub mod versioning;

pub use error::{CoreError, CoreResult};
pub use id::{EventId, StreamId};
pub use position::Position;
pub use stream::{Category, StreamAddress, StreamKey};
pub use tenant::{DEFAULT_TENANT, TenantId};
pub use versioning::{ExpectedVersion, StreamState, Versioning};
