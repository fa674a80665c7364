use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use hark_protocol::{BusHandler, Message, SkillResult, SubscriptionId, Transport};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, instrument, warn};

struct Subscriber {
    id: SubscriptionId,
    once: bool,
    sender: mpsc::UnboundedSender<Message>,
}

struct BusInner {
    subscribers: Mutex<HashMap<String, Vec<Subscriber>>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<Message>,
}

/// In-process message bus.
///
/// Every subscription owns a worker task draining its own queue, so a
/// handler sees its messages one at a time in emission order. Distinct
/// subscriptions run independently. Observers attached through
/// [`MessageBus::subscribe`] see every emitted message.
///
/// Subscribing spawns onto the current tokio runtime.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    pub fn new(buffer: usize) -> Self {
        let (stream, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                stream,
            }),
        }
    }

    /// Observe every message emitted on the bus.
    pub fn subscribe(&self) -> broadcast::Receiver<Message> {
        self.inner.stream.subscribe()
    }

    /// [`MessageBus::subscribe`] as a `Stream`. A lagging observer gets an
    /// error item and keeps receiving.
    pub fn subscribe_stream(&self) -> BroadcastStream<Message> {
        BroadcastStream::new(self.inner.stream.subscribe())
    }

    /// Number of live subscriptions on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .subscribers
            .lock()
            .get(topic)
            .map_or(0, Vec::len)
    }

    fn add_subscriber(
        &self,
        topic: &str,
        handler: Arc<dyn BusHandler>,
        once: bool,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, mut receiver) = mpsc::unbounded_channel::<Message>();

        let worker_topic = topic.to_owned();
        tokio::spawn(async move {
            while let Some(message) = receiver.recv().await {
                handler.handle(message).await;
            }
            debug!(topic = %worker_topic, subscription = id.0, "bus worker stopped");
        });

        self.inner
            .subscribers
            .lock()
            .entry(topic.to_owned())
            .or_default()
            .push(Subscriber { id, once, sender });
        debug!(topic, subscription = id.0, once, "handler subscribed");
        id
    }

    fn deliver(&self, message: &Message) -> usize {
        let mut subscribers = self.inner.subscribers.lock();
        let Some(list) = subscribers.get_mut(&message.msg_type) else {
            return 0;
        };

        let mut delivered = 0;
        list.retain(|subscriber| {
            if subscriber.sender.send(message.clone()).is_err() {
                warn!(
                    topic = %message.msg_type,
                    subscription = subscriber.id.0,
                    "dropping subscriber with stopped worker"
                );
                return false;
            }
            delivered += 1;
            !subscriber.once
        });
        if list.is_empty() {
            subscribers.remove(&message.msg_type);
        }
        delivered
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Transport for MessageBus {
    #[instrument(skip(self, message), fields(topic = %message.msg_type))]
    async fn emit(&self, message: Message) -> SkillResult<()> {
        let _ = self.inner.stream.send(message.clone());
        let delivered = self.deliver(&message);
        debug!(delivered, "message emitted");
        Ok(())
    }

    fn on(&self, topic: &str, handler: Arc<dyn BusHandler>) -> SubscriptionId {
        self.add_subscriber(topic, handler, false)
    }

    fn once(&self, topic: &str, handler: Arc<dyn BusHandler>) -> SubscriptionId {
        self.add_subscriber(topic, handler, true)
    }

    fn remove(&self, topic: &str) -> bool {
        let removed = self.inner.subscribers.lock().remove(topic).is_some();
        debug!(topic, removed, "topic subscriptions removed");
        removed
    }

    fn remove_subscription(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.inner.subscribers.lock();
        let mut removed = false;
        subscribers.retain(|_, list| {
            let before = list.len();
            list.retain(|subscriber| subscriber.id != id);
            removed |= list.len() != before;
            !list.is_empty()
        });
        removed
    }

    #[instrument(skip(self, message), fields(topic = %message.msg_type))]
    async fn wait_for_response(
        &self,
        message: Message,
        reply_type: Option<&str>,
        timeout: Duration,
    ) -> SkillResult<Option<Message>> {
        let reply_type = reply_type
            .map(str::to_owned)
            .unwrap_or_else(|| format!("{}.response", message.msg_type));

        // Subscribe before emitting so a fast reply cannot be missed.
        let mut receiver = self.inner.stream.subscribe();
        self.emit(message).await?;

        let wait = async {
            loop {
                match receiver.recv().await {
                    Ok(reply) if reply.msg_type == reply_type => return Some(reply),
                    Ok(_) => continue,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "response waiter lagged behind the bus");
                        continue;
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        };

        match tokio::time::timeout(timeout, wait).await {
            Ok(reply) => Ok(reply),
            Err(_) => {
                debug!(reply_type = %reply_type, "no response before timeout");
                Ok(None)
            }
        }
    }
}

/// Adapts an async closure into a [`BusHandler`].
pub struct FnHandler<F, Fut> {
    f: F,
    _marker: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> BusHandler for FnHandler<F, Fut>
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Message) {
        (self.f)(message).await;
    }
}

pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn BusHandler>
where
    F: Fn(Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(FnHandler {
        f,
        _marker: PhantomData,
    })
}
