/// Event processors
///
/// Processors are the business layer of the worker. Each processor:
/// - Implements the `Processor` trait
/// - Declares which event kinds it handles
/// - Reports terminal and retryable failures separately
///
/// # Processors
///
/// - **EventCounter**: per-environment, per-kind totals with payload checks

pub mod counter;
pub mod processor_trait;

pub use counter::EventCounter;
pub use processor_trait::{Processor, ProcessorError, ProcessorResult};
