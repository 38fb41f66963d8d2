/// Delivered messages and handlers
///
/// A [`Message`] is created by a puller for every delivered entry. Its
/// acknowledgement behavior is supplied by an [`Acknowledger`] that owns
/// the backend coordinates of that entry, captured when the message is built.
///
/// # Example
///
/// ```no_run
/// use flagstream_shared::pubsub::message::{handler_fn, Message};
/// use tokio_util::sync::CancellationToken;
///
/// let handler = handler_fn(|_cancel: CancellationToken, msg: Message| async move {
///     println!("received {} ({} bytes)", msg.id, msg.data.len());
///     msg.ack().await;
/// });
/// # let _ = handler;
/// ```

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Attribute naming the stream an entry was read from
pub const ATTR_STREAM: &str = "stream";

/// Attribute carrying the backend entry ID
pub const ATTR_ID: &str = "id";

/// Attribute set to `"true"` on messages redelivered by the reclaim loop
pub const ATTR_CLAIMED: &str = "claimed";

/// Attribute naming the pub/sub channel a message arrived on
pub const ATTR_CHANNEL: &str = "channel";

/// Acknowledgement behavior of a delivered message
///
/// Implementations log their own failures; callers never see them.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    /// Marks the message as processed
    async fn ack(&self);

    /// Signals that the message was not processed
    async fn nack(&self);
}

/// Acknowledger for transports without acknowledgements
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAck;

#[async_trait]
impl Acknowledger for NoopAck {
    async fn ack(&self) {}

    async fn nack(&self) {}
}

/// A message delivered to a handler
#[derive(Clone)]
pub struct Message {
    /// Message identifier
    pub id: String,

    /// Opaque payload
    pub data: Bytes,

    /// Delivery attributes (source stream, claimed flag, ...)
    pub attributes: HashMap<String, String>,

    acker: Arc<dyn Acknowledger>,
}

impl Message {
    /// Creates a message with the given acknowledger
    pub fn new(
        id: impl Into<String>,
        data: Bytes,
        attributes: HashMap<String, String>,
        acker: Arc<dyn Acknowledger>,
    ) -> Self {
        Self {
            id: id.into(),
            data,
            attributes,
            acker,
        }
    }

    /// Creates a message whose ack and nack do nothing
    pub fn unacked(id: impl Into<String>, data: Bytes, attributes: HashMap<String, String>) -> Self {
        Self::new(id, data, attributes, Arc::new(NoopAck))
    }

    /// Looks up an attribute
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// Returns true if the message was redelivered by the reclaim loop
    pub fn is_claimed(&self) -> bool {
        self.attribute(ATTR_CLAIMED) == Some("true")
    }

    /// Acknowledges the message
    pub async fn ack(&self) {
        self.acker.ack().await
    }

    /// Negatively acknowledges the message
    pub async fn nack(&self) {
        self.acker.nack().await
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("id", &self.id)
            .field("data_len", &self.data.len())
            .field("attributes", &self.attributes)
            .finish()
    }
}

/// Callback invoked for every delivered message
///
/// The token is cancelled when the pull ends, or when the reprocessing
/// timeout of a reclaimed message expires.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, cancel: CancellationToken, message: Message);
}

/// Handler built from an async closure
pub struct HandlerFn<F>(F);

/// Wraps an async closure as a shareable [`MessageHandler`]
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(CancellationToken, Message) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    async fn handle(&self, cancel: CancellationToken, message: Message) {
        (self.0)(cancel, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingAck {
        acks: AtomicUsize,
        nacks: AtomicUsize,
    }

    #[async_trait]
    impl Acknowledger for CountingAck {
        async fn ack(&self) {
            self.acks.fetch_add(1, Ordering::SeqCst);
        }

        async fn nack(&self) {
            self.nacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_ack_and_nack_reach_acknowledger() {
        let acker = Arc::new(CountingAck::default());
        let msg = Message::new("m1", Bytes::from_static(b"x"), HashMap::new(), acker.clone());

        msg.ack().await;
        msg.nack().await;
        msg.clone().ack().await;

        assert_eq!(acker.acks.load(Ordering::SeqCst), 2);
        assert_eq!(acker.nacks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_claimed_attribute() {
        let mut attributes = HashMap::new();
        attributes.insert(ATTR_CLAIMED.to_string(), "true".to_string());

        let claimed = Message::unacked("m1", Bytes::new(), attributes);
        let live = Message::unacked("m2", Bytes::new(), HashMap::new());

        assert!(claimed.is_claimed());
        assert!(!live.is_claimed());
    }

    #[tokio::test]
    async fn test_handler_fn() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        let handler = handler_fn(move |_cancel, msg: Message| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(msg.data.len(), Ordering::SeqCst);
            }
        });

        handler
            .handle(
                CancellationToken::new(),
                Message::unacked("m1", Bytes::from_static(b"abc"), HashMap::new()),
            )
            .await;

        assert_eq!(seen.load(Ordering::SeqCst), 3);
    }
}
