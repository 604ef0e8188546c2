//! `sourcebook-events`: event representation and in-process plumbing.
//!
//! Typed [`EventEnvelope`]s are turned into storage-level [`RawEvent`]s by a
//! [`Codec`], with names resolved through the [`EventRegistry`]. In-process
//! subscribers are held in [`Subscribers`]; after-commit work is buffered in a
//! [`UnitOfWork`].

pub mod codec;
pub mod dispatch;
pub mod envelope;
pub mod event;
pub mod raw;
pub mod registry;
pub mod tenant;
pub mod unit_of_work;

pub use codec::{Codec, CodecError, JsonCodec};
pub use dispatch::{Delivery, Subscribers};
pub use envelope::{Context, EventEnvelope};
pub use event::Event;
pub use raw::{RawEvent, Recorded};
pub use registry::{EventDescriptor, EventRegistry, RegistryError};
pub use tenant::TenantScoped;
pub use unit_of_work::{Callback, UnitOfWork};
