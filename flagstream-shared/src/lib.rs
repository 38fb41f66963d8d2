//! # Flagstream Shared Library
//!
//! Partitioned publish/subscribe for the feature-flag platform, shared by
//! the API (producer) and the worker (consumer).
//!
//! ## Module Organization
//!
//! - `pubsub`: Publisher / Puller contracts, messages, handlers, rate limiting
//! - `redis`: Redis connection, Streams publisher/puller, simple pub/sub
//! - `provider`: Google and Redis providers behind one `Client`, and the factory
//! - `events`: Feature-flag event envelope
//! - `config`: Backend configuration from the environment

pub mod config;
pub mod events;
pub mod provider;
pub mod pubsub;
pub mod redis;

/// Current version of the Flagstream shared library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
    }
}
