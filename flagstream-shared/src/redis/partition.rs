/// Topic partitioning
///
/// A logical topic of `N` partitions is backed by `N` physical streams named
/// `"{topic}-{partition}"`. A message lands on the partition chosen by the
/// 32-bit xxHash (seed 0) of its ID, so every message with the same ID goes
/// to the same stream and is delivered in order relative to its siblings.
///
/// # Example
///
/// ```
/// use flagstream_shared::redis::partition::StreamTopic;
///
/// let topic = StreamTopic::new("evaluation-events", 4);
/// let key = topic.stream_key_for("user-42");
/// assert!(topic.stream_keys().contains(&key));
/// ```

use twox_hash::XxHash32;

/// Default number of partitions per topic
pub const DEFAULT_PARTITION_COUNT: u32 = 16;

/// Computes the partition for a message ID
///
/// Deterministic across processes and restarts. `partition_count` must be
/// at least 1.
pub fn partition_for(id: &str, partition_count: u32) -> u32 {
    XxHash32::oneshot(0, id.as_bytes()) % partition_count.max(1)
}

/// Builds the stream key for one partition of a topic
pub fn stream_key(topic: &str, partition: u32) -> String {
    format!("{}-{}", topic, partition)
}

/// A partitioned topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamTopic {
    base: String,
    partition_count: u32,
}

impl StreamTopic {
    /// Creates a topic description
    ///
    /// A zero partition count is treated as 1.
    pub fn new(base: impl Into<String>, partition_count: u32) -> Self {
        Self {
            base: base.into(),
            partition_count: partition_count.max(1),
        }
    }

    /// Logical topic name
    pub fn base(&self) -> &str {
        &self.base
    }

    /// Number of partitions
    pub fn partition_count(&self) -> u32 {
        self.partition_count
    }

    /// Partition a message ID maps to
    pub fn partition_for(&self, id: &str) -> u32 {
        partition_for(id, self.partition_count)
    }

    /// Stream key of a partition
    pub fn stream_key(&self, partition: u32) -> String {
        stream_key(&self.base, partition)
    }

    /// Stream key a message ID maps to
    pub fn stream_key_for(&self, id: &str) -> String {
        self.stream_key(self.partition_for(id))
    }

    /// All stream keys, in partition order
    pub fn stream_keys(&self) -> Vec<String> {
        (0..self.partition_count)
            .map(|partition| self.stream_key(partition))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_is_deterministic() {
        for id in ["user-1", "flag:dark-mode", "", "ünïcødé"] {
            assert_eq!(partition_for(id, 16), partition_for(id, 16));
            assert!(partition_for(id, 16) < 16);
        }
    }

    #[test]
    fn test_partition_matches_xxhash32() {
        let expected = XxHash32::oneshot(0, b"evaluation-123") % 7;
        assert_eq!(partition_for("evaluation-123", 7), expected);
    }

    #[test]
    fn test_single_partition() {
        assert_eq!(partition_for("anything", 1), 0);
        assert_eq!(partition_for("anything", 0), 0);
    }

    #[test]
    fn test_ids_spread_evenly_across_partitions() {
        const KEYS: usize = 10_000;
        const PARTITIONS: u32 = 16;

        let topic = StreamTopic::new("events", PARTITIONS);
        let mut counts = [0usize; PARTITIONS as usize];
        for _ in 0..KEYS {
            let id = uuid::Uuid::new_v4().to_string();
            counts[topic.partition_for(&id) as usize] += 1;
        }

        let mean = KEYS / PARTITIONS as usize;
        let (low, high) = (mean * 8 / 10, mean * 12 / 10);
        for (partition, count) in counts.iter().enumerate() {
            assert!(
                (low..=high).contains(count),
                "partition {} got {} keys, expected {}..={}",
                partition,
                count,
                low,
                high
            );
        }
    }

    #[test]
    fn test_stream_keys() {
        let topic = StreamTopic::new("events", 3);

        assert_eq!(topic.stream_keys(), vec!["events-0", "events-1", "events-2"]);
        assert_eq!(topic.stream_key(2), "events-2");

        let key = topic.stream_key_for("user-42");
        assert_eq!(key, format!("events-{}", partition_for("user-42", 3)));
    }

    #[test]
    fn test_zero_partitions_clamped() {
        let topic = StreamTopic::new("events", 0);
        assert_eq!(topic.partition_count(), 1);
        assert_eq!(topic.stream_keys(), vec!["events-0"]);
    }
}
