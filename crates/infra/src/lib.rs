//! Infrastructure layer: storage capabilities, the event store engine, the
//! outbox publisher, catch-up subscriptions and configuration.

pub mod config;
pub mod event_store;
pub mod outbox;
pub mod subscription;


pub use config::{EventStoreBuilder, StoreConfig};
pub use event_store::{
    AppendMode, EventStore, EventStoreError, InMemoryStorage, StorageStrategy, TransactionalStorage,
};
pub use outbox::{Outbox, OutboxEntry, OutboxStorage};
pub use subscription::{Subscription, SubscriptionBuilder, SubscriptionFilter, SubscriptionWorker, WorkerHandle};
