//! # Change notification
//!
//! A [`ChangeBus`] fans typed events out to any number of subscribers, each receiving over its own
//! channel. Subscribers drain their [`Subscription`] whenever convenient (usually once per frame),
//! so emitting never calls back into foreign code while the document is mid-change.
//!
//! While a batch is held (see [`ChangeBus::hold`]) events are buffered, and events that
//! [`Coalesce`] collapse into the most recent one. Releasing the outermost hold delivers the batch.

use std::sync::{Arc, Weak};

pub type SubscriptionID = crate::id::UniqueID<Subscription<()>>;

/// Events that can replace an earlier event in a held batch.
pub trait Coalesce {
    /// `true` if `self` makes `earlier` redundant.
    fn supersedes(&self, earlier: &Self) -> bool;
}

type Filter<E> = Box<dyn Fn(&E) -> bool + Send + Sync>;

struct Subscriber<E> {
    id: SubscriptionID,
    filter: Option<Filter<E>>,
    sender: crossbeam::channel::Sender<E>,
}

struct Shared<E> {
    subscribers: Vec<Subscriber<E>>,
    /// Nesting depth of holds, and the pending events.
    held: Option<(usize, Vec<E>)>,
}

pub struct ChangeBus<E> {
    shared: Arc<parking_lot::Mutex<Shared<E>>>,
}
impl<E> Default for ChangeBus<E> {
    fn default() -> Self {
        Self {
            shared: Arc::new(parking_lot::Mutex::new(Shared {
                subscribers: Vec::new(),
                held: None,
            })),
        }
    }
}
/// Handles share subscribers and batch state.
impl<E> Clone for ChangeBus<E> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}
impl<E> std::fmt::Debug for ChangeBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeBus")
            .field("subscribers", &self.shared.lock().subscribers.len())
            .finish_non_exhaustive()
    }
}

/// A live subscription. Dropping it unsubscribes.
pub struct Subscription<E> {
    id: SubscriptionID,
    receiver: crossbeam::channel::Receiver<E>,
    bus: Weak<parking_lot::Mutex<Shared<E>>>,
}
impl<E> Subscription<E> {
    #[must_use]
    pub fn id(&self) -> SubscriptionID {
        self.id
    }
    /// Take every event delivered so far, without blocking.
    pub fn drain(&self) -> impl Iterator<Item = E> + '_ {
        self.receiver.try_iter()
    }
}
impl<E> Drop for Subscription<E> {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.lock().subscribers.retain(|sub| sub.id != self.id);
        }
    }
}

impl<E: Clone> ChangeBus<E> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
    /// Receive every event.
    pub fn subscribe(&self) -> Subscription<E> {
        self.insert(None)
    }
    /// Receive only the events for which `filter` returns true.
    pub fn subscribe_filtered(
        &self,
        filter: impl Fn(&E) -> bool + Send + Sync + 'static,
    ) -> Subscription<E> {
        self.insert(Some(Box::new(filter)))
    }
    fn insert(&self, filter: Option<Filter<E>>) -> Subscription<E> {
        let (sender, receiver) = crossbeam::channel::unbounded();
        let id = SubscriptionID::default();
        self.shared.lock().subscribers.push(Subscriber {
            id,
            filter,
            sender,
        });
        Subscription {
            id,
            receiver,
            bus: Arc::downgrade(&self.shared),
        }
    }
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.shared.lock().subscribers.len()
    }
    fn deliver(subscribers: &[Subscriber<E>], event: &E) {
        for sub in subscribers {
            if sub.filter.as_ref().map_or(true, |filter| filter(event)) {
                // Receiver lives as long as the subscription, which unregisters itself on drop.
                let _ = sub.sender.send(event.clone());
            }
        }
    }
}
impl<E: Clone + Coalesce> ChangeBus<E> {
    /// Deliver an event, or queue it if a batch is held.
    pub fn emit(&self, event: E) {
        let mut shared = self.shared.lock();
        if let Some((_, pending)) = shared.held.as_mut() {
            pending.retain(|earlier| !event.supersedes(earlier));
            pending.push(event);
        } else {
            Self::deliver(&shared.subscribers, &event);
        }
    }
    /// Start (or nest) a batch.
    pub fn hold(&self) {
        let mut shared = self.shared.lock();
        match shared.held.as_mut() {
            Some((depth, _)) => *depth += 1,
            None => shared.held = Some((1, Vec::new())),
        }
    }
    /// End a batch. The outermost release delivers everything that was queued.
    pub fn release(&self) {
        let mut shared = self.shared.lock();
        let flush = match shared.held.as_mut() {
            Some((depth, _)) if *depth > 1 => {
                *depth -= 1;
                None
            }
            Some(_) => shared.held.take().map(|(_, pending)| pending),
            None => {
                log::warn!("Change bus released without a matching hold");
                None
            }
        };
        if let Some(pending) = flush {
            for event in &pending {
                Self::deliver(&shared.subscribers, event);
            }
        }
    }
    /// Hold for the duration of `f`. Released on every exit path, including unwinding.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        struct Release<'a, E: Clone + Coalesce>(&'a ChangeBus<E>);
        impl<E: Clone + Coalesce> Drop for Release<'_, E> {
            fn drop(&mut self) {
                self.0.release();
            }
        }
        self.hold();
        let _release = Release(self);
        f()
    }
}
