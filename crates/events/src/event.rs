use serde::Serialize;
use serde::de::DeserializeOwned;

/// A domain-agnostic event.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **serializable** (payloads cross the storage boundary as JSON)
/// - **named** through an [`EventRegistry`](crate::EventRegistry), not through the type itself
///
/// Any `serde` type that is `Clone + Debug + Send + Sync + 'static` qualifies;
/// registering it under a stable name is what makes it storable.
pub trait Event: Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static {}

impl<T> Event for T where T: Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static {}
