use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::debug;
use murmur2::{murmur2, KAFKA_SEED};

use super::{errors::LogError, repositories::*, value_objects::*};

/// Service for routing records to partitions
#[derive(Debug, Default)]
pub struct MessageRoutingService {
    round_robin: AtomicU32,
}

impl MessageRoutingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the partition for a record.
    ///
    /// Keyed records use Kafka's default partitioner,
    /// `toPositive(murmur2(key)) % partitions`, so every record for one key
    /// lands in the same partition. Unkeyed records go round-robin.
    pub fn route(&self, key: Option<&str>, partition_count: u32) -> PartitionId {
        let partition_count = partition_count.max(1);
        match key {
            Some(key) => {
                let hash = murmur2(key.as_bytes(), KAFKA_SEED);
                PartitionId((hash & 0x7fff_ffff) % partition_count)
            }
            None => {
                PartitionId(self.round_robin.fetch_add(1, Ordering::Relaxed) % partition_count)
            }
        }
    }
}

/// Service for managing committed group offsets
pub struct OffsetManagementService {
    offset_repo: Arc<dyn OffsetRepository>,
}

impl OffsetManagementService {
    pub fn new(offset_repo: Arc<dyn OffsetRepository>) -> Self {
        Self { offset_repo }
    }

    /// Get the committed offset for a group and topic-partition, if any
    pub async fn get_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError> {
        let offset = self.offset_repo.load_offset(group, topic_partition).await?;
        debug!(
            "Committed offset for group {} on {}: {:?}",
            group, topic_partition, offset
        );
        Ok(offset)
    }

    /// Commit the next offset to read for a group and topic-partition
    pub async fn commit_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError> {
        self.offset_repo
            .save_offset(group, topic_partition, offset)
            .await?;

        debug!(
            "Committed offset {} for group {} on {}",
            offset, group, topic_partition
        );
        Ok(())
    }
}
