use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use uuid::Uuid;

use protoworld_common::EntityId;

use crate::EventError;

/// An event type carried by an [`EventBus`].
///
/// `Kind` is the tag handlers subscribe to; one bus carries one event enum.
pub trait Event: fmt::Debug + 'static {
    type Kind: Copy + Ord + Hash + fmt::Debug;

    fn kind(&self) -> Self::Kind;
}

/// Who raised an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSource {
    System,
    Entity(EntityId),
}

/// A queued event together with its sender.
#[derive(Debug, Clone)]
pub struct Envelope<E> {
    pub source: EventSource,
    pub event: E,
}

/// Opaque identity of a subscriber, used for bulk unsubscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberToken(Uuid);

impl SubscriberToken {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle passed to handlers so they can raise follow-up events mid-drain.
pub struct Raiser<'a, E> {
    queue: &'a mut VecDeque<Envelope<E>>,
}

impl<E> Raiser<'_, E> {
    pub fn raise(&mut self, source: EventSource, event: E) {
        self.queue.push_back(Envelope { source, event });
    }
}

/// Shared handler reference. Identity is the allocation, so cloning the `Rc`
/// and subscribing again is a no-op.
pub type Handler<E> = Rc<dyn Fn(&Envelope<E>, &mut Raiser<'_, E>)>;

struct Subscription<E> {
    handler: Handler<E>,
    subscriber: SubscriberToken,
}

/// Tunables for [`EventBus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Upper bound on events dispatched by one `drain` call. `None` disables
    /// the guard, so a handler that re-raises its own event kind never returns.
    pub max_dispatches_per_drain: Option<usize>,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_dispatches_per_drain: Some(10_000),
        }
    }
}

/// Counters from one `drain` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainStats {
    pub dispatched: usize,
    pub handler_calls: usize,
}

/// Subscription registry plus a FIFO dispatch queue.
pub struct EventBus<E: Event> {
    config: EventBusConfig,
    handlers: BTreeMap<E::Kind, Vec<Subscription<E>>>,
    subscriptions: HashMap<SubscriberToken, BTreeSet<E::Kind>>,
    queue: VecDeque<Envelope<E>>,
}

impl<E: Event> EventBus<E> {
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            config,
            handlers: BTreeMap::new(),
            subscriptions: HashMap::new(),
            queue: VecDeque::new(),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }

    /// Register `handler` for `kind` on behalf of `subscriber`.
    ///
    /// Returns `false` when this exact handler is already registered for
    /// `kind`, in which case nothing changes.
    pub fn subscribe(&mut self, kind: E::Kind, handler: Handler<E>, subscriber: SubscriberToken) -> bool {
        let subs = self.handlers.entry(kind).or_default();
        if subs
            .iter()
            .any(|s| std::ptr::addr_eq(Rc::as_ptr(&s.handler), Rc::as_ptr(&handler)))
        {
            return false;
        }
        subs.push(Subscription { handler, subscriber });
        self.subscriptions.entry(subscriber).or_default().insert(kind);
        tracing::trace!(?kind, "handler subscribed");
        true
    }

    /// Drop every handler `subscriber` registered for `kind`.
    pub fn unsubscribe(&mut self, kind: E::Kind, subscriber: SubscriberToken) {
        let Some(kinds) = self.subscriptions.get_mut(&subscriber) else {
            return;
        };
        if !kinds.remove(&kind) {
            return;
        }
        if kinds.is_empty() {
            self.subscriptions.remove(&subscriber);
        }
        self.remove_handlers(kind, subscriber);
    }

    /// Drop every handler `subscriber` registered, for any kind.
    pub fn unsubscribe_all(&mut self, subscriber: SubscriberToken) {
        let Some(kinds) = self.subscriptions.remove(&subscriber) else {
            return;
        };
        for kind in kinds {
            self.remove_handlers(kind, subscriber);
        }
    }

    fn remove_handlers(&mut self, kind: E::Kind, subscriber: SubscriberToken) {
        if let Some(subs) = self.handlers.get_mut(&kind) {
            subs.retain(|s| s.subscriber != subscriber);
            if subs.is_empty() {
                self.handlers.remove(&kind);
            }
        }
    }

    /// Queue an event. Nothing is dispatched until the next `drain`.
    pub fn raise(&mut self, source: EventSource, event: E) {
        self.queue.push_back(Envelope { source, event });
    }

    /// Dispatch queued events, oldest first, until the queue is empty.
    ///
    /// Events raised by handlers are appended to the same queue and handled
    /// before this call returns. When the configured dispatch cap is hit the
    /// undispatched events stay queued for the next drain.
    pub fn drain(&mut self) -> Result<DrainStats, EventError> {
        let _span = tracing::debug_span!("event_drain", queued = self.queue.len()).entered();
        let mut stats = DrainStats::default();

        while let Some(envelope) = self.queue.pop_front() {
            if let Some(limit) = self.config.max_dispatches_per_drain {
                if stats.dispatched >= limit {
                    self.queue.push_front(envelope);
                    tracing::error!(
                        limit,
                        pending = self.queue.len(),
                        "event drain hit dispatch cap, possible re-raise loop"
                    );
                    return Err(EventError::DrainLimitExceeded {
                        dispatched: stats.dispatched,
                        pending: self.queue.len(),
                    });
                }
            }

            let kind = envelope.event.kind();
            let handlers: Vec<Handler<E>> = self
                .handlers
                .get(&kind)
                .map(|subs| subs.iter().map(|s| Rc::clone(&s.handler)).collect())
                .unwrap_or_default();

            let mut raiser = Raiser {
                queue: &mut self.queue,
            };
            for handler in &handlers {
                handler(&envelope, &mut raiser);
            }
            stats.dispatched += 1;
            stats.handler_calls += handlers.len();
        }

        tracing::trace!(dispatched = stats.dispatched, "event drain complete");
        Ok(stats)
    }

    /// Number of queued, undispatched events.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn subscriber_count(&self, kind: E::Kind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    pub fn is_subscribed(&self, kind: E::Kind, subscriber: SubscriberToken) -> bool {
        self.subscriptions
            .get(&subscriber)
            .is_some_and(|kinds| kinds.contains(&kind))
    }

    /// Discard queued events without dispatching them.
    pub fn clear(&mut self) {
        self.queue.clear();
    }
}

impl<E: Event> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
