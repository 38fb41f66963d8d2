///! # Flagstream Worker Library
///!
///! Consumes events from a pub/sub subscription and hands them to
///! processors.
///!
///! ## Modules
///!
///! - `config`: Worker settings loaded from the environment
///! - `consumer`: Worker tasks that decode, dispatch, and settle messages
///! - `processors`: Event processors (counter)
///!
///! ## Example
///!
///! ```no_run
///! use flagstream_worker::processors::{EventCounter, Processor};
///!
///! # async fn example() {
///! let processor = EventCounter::new();
///! println!("Processor: {}", processor.name());
///! # }
///! ```

pub mod config;
pub mod consumer;
pub mod processors;
