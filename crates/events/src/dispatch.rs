//! In-process subscriber dispatch.
//!
//! Subscribers are keyed by the concrete event type, plus a separate list of
//! catch-all subscribers that see every raw record. On publish, type-specific
//! subscribers run first, then catch-all ones, each in registration order.
//!
//! Delivery is at-least-once from the consumer's point of view: a retried
//! publish re-invokes subscribers, so handlers must be idempotent.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::EventEnvelope;
use crate::event::Event;
use crate::raw::RawEvent;
use crate::unit_of_work::Callback;

/// When a subscriber is invoked relative to the hosting transaction.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum Delivery {
    /// Synchronously, right after the append succeeded.
    #[default]
    Immediate,
    /// Buffered in the unit of work and run only once it commits.
    AfterCommit,
}

type TypedHandler = Arc<dyn Fn(&dyn Any) + Send + Sync>;
type CatchAllHandler = Arc<dyn Fn(&RawEvent) + Send + Sync>;

#[derive(Clone)]
struct Registered<H> {
    handler: H,
    delivery: Delivery,
}

/// Subscriber table shared by every tenant view of a store.
#[derive(Clone, Default)]
pub struct Subscribers {
    by_type: HashMap<TypeId, Vec<Registered<TypedHandler>>>,
    catch_all: Vec<Registered<CatchAllHandler>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events of type `E`.
    pub fn subscribe<E, F>(&mut self, delivery: Delivery, handler: F)
    where
        E: Event,
        F: Fn(&EventEnvelope<E>) + Send + Sync + 'static,
    {
        let handler: TypedHandler = Arc::new(move |any: &dyn Any| {
            if let Some(envelope) = any.downcast_ref::<EventEnvelope<E>>() {
                handler(envelope);
            }
        });
        self.by_type
            .entry(TypeId::of::<E>())
            .or_default()
            .push(Registered { handler, delivery });
    }

    /// Subscribe to every published record, whatever its type.
    pub fn subscribe_all<F>(&mut self, delivery: Delivery, handler: F)
    where
        F: Fn(&RawEvent) + Send + Sync + 'static,
    {
        self.catch_all.push(Registered {
            handler: Arc::new(handler),
            delivery,
        });
    }

    pub fn len(&self) -> usize {
        self.by_type.values().map(Vec::len).sum::<usize>() + self.catch_all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invoke subscribers for one published event.
    ///
    /// Immediate subscribers run inline. After-commit subscribers are handed to
    /// `defer` as boxed callbacks; an error from `defer` stops dispatch.
    /// Returns the number of subscribers invoked or deferred.
    pub fn dispatch<E, Err>(
        &self,
        envelope: &EventEnvelope<E>,
        raw: &RawEvent,
        mut defer: impl FnMut(Callback) -> Result<(), Err>,
    ) -> Result<usize, Err>
    where
        E: Event,
    {
        let mut count = 0;

        if let Some(subscribers) = self.by_type.get(&TypeId::of::<E>()) {
            for sub in subscribers {
                match sub.delivery {
                    Delivery::Immediate => (sub.handler)(envelope as &dyn Any),
                    Delivery::AfterCommit => {
                        let handler = Arc::clone(&sub.handler);
                        let envelope = envelope.clone();
                        defer(Box::new(move || handler(&envelope as &dyn Any)))?;
                    }
                }
                count += 1;
            }
        }

        for sub in &self.catch_all {
            match sub.delivery {
                Delivery::Immediate => (sub.handler)(raw),
                Delivery::AfterCommit => {
                    let handler = Arc::clone(&sub.handler);
                    let raw = raw.clone();
                    defer(Box::new(move || handler(&raw)))?;
                }
            }
            count += 1;
        }

        Ok(count)
    }
}

impl core::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscribers")
            .field("typed", &self.by_type.values().map(Vec::len).sum::<usize>())
            .field("catch_all", &self.catch_all.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, JsonCodec};
    use crate::unit_of_work::UnitOfWork;
    use serde::{Deserialize, Serialize};
    use sourcebook_core::{StreamAddress, TenantId};
    use std::convert::Infallible;
    use std::sync::Mutex;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Deposited(u32);

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Withdrawn(u32);

    fn raw_for<E: Event>(envelope: &EventEnvelope<E>, name: &str) -> RawEvent {
        let key = StreamAddress::named("acc").resolve(&TenantId::default()).unwrap();
        JsonCodec.serialize(envelope, &key, name, Some(1)).unwrap()
    }

    fn no_defer(_: Callback) -> Result<(), Infallible> {
        panic!("nothing should be deferred")
    }

    #[test]
    fn typed_subscribers_run_before_catch_all_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::<String>::new()));
        let mut subs = Subscribers::new();

        let l = Arc::clone(&log);
        subs.subscribe_all(Delivery::Immediate, move |raw| l.lock().unwrap().push(format!("all:{}", raw.name)));
        let l = Arc::clone(&log);
        subs.subscribe::<Deposited, _>(Delivery::Immediate, move |e| l.lock().unwrap().push(format!("a:{}", e.payload().0)));
        let l = Arc::clone(&log);
        subs.subscribe::<Deposited, _>(Delivery::Immediate, move |e| l.lock().unwrap().push(format!("b:{}", e.payload().0)));
        let l = Arc::clone(&log);
        subs.subscribe::<Withdrawn, _>(Delivery::Immediate, move |_| l.lock().unwrap().push("withdrawn".into()));

        let envelope = EventEnvelope::wrap(Deposited(5));
        let invoked = subs.dispatch(&envelope, &raw_for(&envelope, "deposited"), no_defer).unwrap();

        assert_eq!(invoked, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a:5", "b:5", "all:deposited"]);
    }

    #[test]
    fn after_commit_subscribers_are_deferred() {
        let hits = Arc::new(Mutex::new(0u32));
        let mut subs = Subscribers::new();
        let h = Arc::clone(&hits);
        subs.subscribe::<Deposited, _>(Delivery::AfterCommit, move |e| *h.lock().unwrap() += e.payload().0);

        let envelope = EventEnvelope::wrap(Deposited(7));
        let raw = raw_for(&envelope, "deposited");

        let uow = UnitOfWork::new();
        subs.dispatch(&envelope, &raw, |cb| {
            uow.on_commit(cb);
            Ok::<_, Infallible>(())
        })
        .unwrap();
        assert_eq!(*hits.lock().unwrap(), 0);

        uow.commit();
        assert_eq!(*hits.lock().unwrap(), 7);
    }
}
