/// Backend-independent publish/subscribe contracts
///
/// - `message`: delivered messages, acknowledgement, handlers
/// - `publisher`: the [`Publisher`] trait and publish errors
/// - `puller`: the [`Puller`] trait, lifecycle states, pull errors
/// - `backoff`: read-error backoff
/// - `rate_limited`: channel delivery with a messages-per-second ceiling

pub mod backoff;
pub mod message;
pub mod publisher;
pub mod puller;
pub mod rate_limited;

pub use message::{handler_fn, Acknowledger, Message, MessageHandler, NoopAck};
pub use publisher::{EncodeError, OutgoingMessage, PublishError, Publisher, RawMessage};
pub use puller::{PullError, Puller, PullerState};
pub use rate_limited::RateLimitedPuller;
