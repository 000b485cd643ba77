//! Domain event bus.
//!
//! Every channel gets its own single-consumer queue drained by one worker
//! task: subscribers see events in emission order, and handler invocations
//! on a channel are serialized — the next event is not delivered until the
//! previous handler's future completes. Independent channels proceed
//! concurrently.

pub mod event;

pub use event::{Channel, Event};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, warn};

type Handler = Arc<dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync>;
type Predicate = Arc<dyn Fn(&Event) -> bool + Send + Sync>;

struct Subscriber {
    id: u64,
    handler: Handler,
    /// `Some` for once-subscriptions: removed after the first event the
    /// predicate accepts.
    once: Option<Predicate>,
}

#[derive(Clone)]
struct ChannelHandle {
    tx: mpsc::UnboundedSender<Event>,
    subs: Arc<Mutex<Vec<Subscriber>>>,
}

/// Handle returned by every subscribe call; consuming it removes the
/// subscription. Dropping it without calling `unsubscribe` leaves the
/// subscription active for the lifetime of the bus.
pub struct Subscription {
    id: u64,
    subs: Arc<Mutex<Vec<Subscriber>>>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.subs
            .lock()
            .expect("subscriber list poisoned")
            .retain(|s| s.id != self.id);
    }
}

/// Safe for concurrent use across symbols; typically shared as `Arc<EventBus>`.
pub struct EventBus {
    channels: Mutex<HashMap<Channel, ChannelHandle>>,
    next_id: AtomicU64,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Enqueue an event for ordered delivery on the channel. Never blocks
    /// the publisher; a slow handler only delays its own channel's queue.
    pub fn publish(&self, channel: Channel, event: Event) {
        let handle = self.channel(channel);
        if handle.tx.send(event).is_err() {
            warn!(channel = channel.name(), "event bus worker gone, event dropped");
        }
    }

    /// Subscribe a handler to every event on the channel.
    pub fn subscribe<F, Fut>(&self, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add(channel, Arc::new(move |e| Box::pin(handler(e))), None)
    }

    /// Subscribe a handler that fires exactly once: the first event the
    /// predicate accepts invokes it, then the subscription is removed.
    pub fn subscribe_once<P, F, Fut>(&self, channel: Channel, predicate: P, handler: F) -> Subscription
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.add(
            channel,
            Arc::new(move |e| Box::pin(handler(e))),
            Some(Arc::new(predicate)),
        )
    }

    fn add(&self, channel: Channel, handler: Handler, once: Option<Predicate>) -> Subscription {
        let handle = self.channel(channel);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        handle
            .subs
            .lock()
            .expect("subscriber list poisoned")
            .push(Subscriber { id, handler, once });
        Subscription {
            id,
            subs: handle.subs,
        }
    }

    /// Lazily create the channel's queue and spawn its drain worker.
    /// Must be called from within a tokio runtime.
    fn channel(&self, channel: Channel) -> ChannelHandle {
        let mut channels = self.channels.lock().expect("channel map poisoned");
        channels
            .entry(channel)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel::<Event>();
                let subs: Arc<Mutex<Vec<Subscriber>>> = Arc::new(Mutex::new(Vec::new()));
                tokio::spawn(drain(channel, rx, subs.clone()));
                ChannelHandle { tx, subs }
            })
            .clone()
    }
}

/// Single consumer per channel: awaits each handler to completion before
/// touching the next event, which is what guarantees serialized, in-order
/// delivery even when a handler does further async work.
async fn drain(
    channel: Channel,
    mut rx: mpsc::UnboundedReceiver<Event>,
    subs: Arc<Mutex<Vec<Subscriber>>>,
) {
    while let Some(event) = rx.recv().await {
        let handlers: Vec<Handler> = {
            let mut guard = subs.lock().expect("subscriber list poisoned");
            let mut fired = Vec::new();
            guard.retain(|s| match &s.once {
                None => {
                    fired.push(s.handler.clone());
                    true
                }
                Some(predicate) => {
                    if predicate(&event) {
                        fired.push(s.handler.clone());
                        false
                    } else {
                        true
                    }
                }
            });
            fired
        };

        for handler in handlers {
            handler(event.clone()).await;
        }
    }
    debug!(channel = channel.name(), "event channel closed");
}
