/// Simple (non-partitioned) Redis pub/sub
///
/// At-most-once delivery over one channel per topic. There are no consumer
/// groups and no acknowledgements: a message published while no subscriber
/// is connected is lost.
///
/// # Architecture
///
/// ```text
/// SimplePublisher ──PUBLISH {topic}──> Redis ──SUBSCRIBE {topic}──> SimplePuller
/// ```

use crate::pubsub::message::{Message, MessageHandler, ATTR_CHANNEL};
use crate::pubsub::publisher::{OutgoingMessage, PublishError, Publisher};
use crate::pubsub::puller::{PullError, Puller, PullerState};
use crate::redis::commands::{ChannelMessage, StreamCommands};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

/// Publishes to the channel named after the topic
#[derive(Clone)]
pub struct SimplePublisher {
    commands: Arc<dyn StreamCommands>,
    topic: String,
}

impl SimplePublisher {
    pub fn new(commands: Arc<dyn StreamCommands>, topic: impl Into<String>) -> Self {
        Self {
            commands,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl Publisher for SimplePublisher {
    async fn publish(&self, message: &dyn OutgoingMessage) -> Result<(), PublishError> {
        let payload = message.encode()?;
        let receivers = self.commands.publish(&self.topic, &payload).await?;

        if receivers == 0 {
            tracing::debug!(id = %message.id(), channel = %self.topic, "Published with no subscribers");
        }

        Ok(())
    }

    async fn stop(&self) {
        tracing::debug!(channel = %self.topic, "Simple publisher stopped");
    }
}

/// Subscribes to the channel named after the topic
#[derive(Clone)]
pub struct SimplePuller {
    commands: Arc<dyn StreamCommands>,
    subscription: String,
    topic: String,
    state: Arc<Mutex<PullerState>>,
    done: CancellationToken,
}

impl SimplePuller {
    pub fn new(
        commands: Arc<dyn StreamCommands>,
        subscription: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            commands,
            subscription: subscription.into(),
            topic: topic.into(),
            state: Arc::new(Mutex::new(PullerState::Idle)),
            done: CancellationToken::new(),
        }
    }

    pub fn state(&self) -> PullerState {
        *self.lock_state()
    }

    fn lock_state(&self) -> MutexGuard<'_, PullerState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn shutdown(&self) {
        let mut state = self.lock_state();
        if *state != PullerState::Closed {
            *state = PullerState::Closed;
            self.done.cancel();
            tracing::info!(channel = %self.topic, "Simple puller closed");
        }
    }

    /// Builds a message; the transport has no IDs, so one is derived from the channel
    fn message(msg: ChannelMessage) -> Message {
        let id = format!(
            "{}-{}",
            msg.channel,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        );

        let mut attributes = HashMap::new();
        attributes.insert(ATTR_CHANNEL.to_string(), msg.channel);

        Message::unacked(id, msg.payload, attributes)
    }
}

#[async_trait]
impl Puller for SimplePuller {
    async fn pull(
        &self,
        cancel: CancellationToken,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), PullError> {
        {
            let mut state = self.lock_state();
            match *state {
                PullerState::Closed => return Err(PullError::Closed),
                PullerState::Starting | PullerState::Running => {
                    return Err(PullError::AlreadyPulling)
                }
                PullerState::Idle => *state = PullerState::Starting,
            }
        }

        let mut subscription = match self.commands.subscribe(&self.topic).await {
            Ok(subscription) => subscription,
            Err(e) => {
                tracing::error!(channel = %self.topic, error = %e, "Failed to subscribe");
                self.shutdown();
                return Err(e.into());
            }
        };

        {
            let mut state = self.lock_state();
            if *state == PullerState::Closed {
                return Ok(());
            }
            *state = PullerState::Running;
        }

        tracing::info!(
            subscription = %self.subscription,
            channel = %self.topic,
            "Simple puller subscribed"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::debug!(channel = %self.topic, "Pull cancelled");
                    self.shutdown();
                    return Err(PullError::Cancelled);
                }
                _ = self.done.cancelled() => return Ok(()),
                next = subscription.next() => match next {
                    Some(msg) => handler.handle(cancel.clone(), Self::message(msg)).await,
                    None => {
                        tracing::warn!(channel = %self.topic, "Subscription ended");
                        self.shutdown();
                        return Err(PullError::SubscriptionClosed);
                    }
                },
            }
        }
    }

    async fn close(&self) -> Result<(), PullError> {
        self.shutdown();
        Ok(())
    }

    fn subscription_name(&self) -> String {
        format!("{}:{}", self.subscription, self.topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::message::handler_fn;
    use crate::pubsub::publisher::RawMessage;
    use crate::redis::memory::MemoryStreams;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn wait_until_running(puller: &SimplePuller) {
        while puller.state() != PullerState::Running {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_publish_and_pull() {
        let streams = Arc::new(MemoryStreams::new());
        let publisher = SimplePublisher::new(streams.clone(), "flags");
        let puller = SimplePuller::new(streams.clone(), "sub", "flags");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |_cancel, msg: Message| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(msg);
            }
        });

        let cancel = CancellationToken::new();
        let pull = tokio::spawn({
            let puller = puller.clone();
            let cancel = cancel.clone();
            async move { puller.pull(cancel, handler).await }
        });
        wait_until_running(&puller).await;

        publisher
            .publish(&RawMessage::new("m1", b"hello".to_vec()))
            .await
            .unwrap();

        let msg = rx.recv().await.unwrap();
        assert_eq!(msg.data.as_ref(), b"hello");
        assert_eq!(msg.attribute(ATTR_CHANNEL), Some("flags"));
        assert!(msg.id.starts_with("flags-"));
        msg.ack().await;

        cancel.cancel();
        assert!(pull.await.unwrap().unwrap_err().is_cancelled());
        assert_eq!(puller.state(), PullerState::Closed);
    }

    #[tokio::test]
    async fn test_publish_without_subscriber_is_lost() {
        let streams = Arc::new(MemoryStreams::new());
        let publisher = SimplePublisher::new(streams.clone(), "flags");

        assert!(publisher
            .publish(&RawMessage::new("m1", b"lost".to_vec()))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_close_and_pull_rules() {
        let streams = Arc::new(MemoryStreams::new());
        let puller = SimplePuller::new(streams, "sub", "flags");
        let handler = handler_fn(|_cancel, _msg: Message| async {});

        let pull = tokio::spawn({
            let puller = puller.clone();
            let handler = handler.clone();
            async move { puller.pull(CancellationToken::new(), handler).await }
        });
        wait_until_running(&puller).await;

        let second = puller.pull(CancellationToken::new(), handler.clone()).await;
        assert!(matches!(second, Err(PullError::AlreadyPulling)));

        puller.close().await.unwrap();
        puller.close().await.unwrap();
        assert!(pull.await.unwrap().is_ok());

        let after = puller.pull(CancellationToken::new(), handler).await;
        assert!(matches!(after, Err(PullError::Closed)));
    }

    #[test]
    fn test_subscription_name() {
        let puller = SimplePuller::new(Arc::new(MemoryStreams::new()), "sub", "flags");
        assert_eq!(puller.subscription_name(), "sub:flags");
    }
}
