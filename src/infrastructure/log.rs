use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Notify;

use crate::domain::{
    entities::Topic,
    errors::LogError,
    group::{ConsumerGroup, GroupTimeouts},
    repositories::*,
    services::{MessageRoutingService, OffsetManagementService},
    value_objects::*,
};
use crate::infrastructure::persistence::InMemoryOffsetRepository;
use crate::infrastructure::protocol::{encoded_record_len, MAX_FETCH_BYTES, MAX_RECORD_BYTES};

/// How often a blocked join re-evaluates its group
const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct TopicSlot {
    topic: Topic,
    appended: Arc<Notify>,
}

/// Partitioned log with a built-in group coordinator, held in process memory.
///
/// This is the substrate both the broker server and the tests run against.
/// Topics are created on first use with the configured partition count.
pub struct InMemoryLog {
    topics: DashMap<TopicName, TopicSlot>,
    default_partitions: u32,
    router: MessageRoutingService,
    offsets: OffsetManagementService,
    groups: Mutex<HashMap<GroupId, ConsumerGroup>>,
    group_changed: Notify,
    timeouts: GroupTimeouts,
}

impl InMemoryLog {
    pub fn new(default_partitions: u32, timeouts: GroupTimeouts) -> Self {
        Self::with_offset_repository(
            default_partitions,
            timeouts,
            Arc::new(InMemoryOffsetRepository::new()),
        )
    }

    pub fn with_offset_repository(
        default_partitions: u32,
        timeouts: GroupTimeouts,
        offset_repo: Arc<dyn OffsetRepository>,
    ) -> Self {
        Self {
            topics: DashMap::new(),
            default_partitions: default_partitions.max(1),
            router: MessageRoutingService::new(),
            offsets: OffsetManagementService::new(offset_repo),
            groups: Mutex::new(HashMap::new()),
            group_changed: Notify::new(),
            timeouts,
        }
    }

    /// Create a topic with an explicit partition count. Existing topics keep
    /// their partition count; the actual count is returned.
    pub fn create_topic(&self, name: TopicName, partitions: u32) -> u32 {
        self.topics
            .entry(name.clone())
            .or_insert_with(|| {
                info!("Creating topic {} with {} partition(s)", name, partitions.max(1));
                TopicSlot {
                    topic: Topic::new(name, partitions),
                    appended: Arc::new(Notify::new()),
                }
            })
            .topic
            .partition_count()
    }

    pub fn partition_count(&self, topic: &TopicName) -> u32 {
        if let Some(slot) = self.topics.get(topic) {
            return slot.topic.partition_count();
        }
        self.create_topic(topic.clone(), self.default_partitions)
    }

    fn appended_signal(&self, topic: &TopicName) -> Arc<Notify> {
        self.partition_count(topic);
        self.topics
            .get(topic)
            .map(|slot| Arc::clone(&slot.appended))
            .unwrap_or_else(|| Arc::new(Notify::new()))
    }

    fn read(&self, request: &FetchRequest) -> Result<FetchedBatch, LogError> {
        let topic_partition = &request.topic_partition;
        let slot = self
            .topics
            .get(&topic_partition.topic)
            .ok_or_else(|| LogError::UnknownTopic(topic_partition.topic.to_string()))?;
        let partition = slot.topic.partition(topic_partition.partition)?;
        let mut records = partition.read(request.offset, request.max_records)?;

        // Keep the response within one frame; the first record always goes
        let mut budget = MAX_FETCH_BYTES;
        let fits = records
            .iter()
            .take_while(|record| {
                let len = encoded_record_len(record);
                let fits = len <= budget;
                budget = budget.saturating_sub(len);
                fits
            })
            .count();
        records.truncate(fits.max(1));

        Ok(FetchedBatch {
            records,
            high_watermark: partition.high_watermark(),
        })
    }

    /// Run `f` against a group after expiring lapsed members, waking anyone
    /// blocked on the group if its membership or generation moved.
    fn with_group<R>(
        &self,
        group: &GroupId,
        f: impl FnOnce(&mut ConsumerGroup, Instant) -> R,
    ) -> R {
        let mut groups = self.groups.lock().unwrap_or_else(PoisonError::into_inner);
        let state = groups
            .entry(group.clone())
            .or_insert_with(|| ConsumerGroup::new(group.clone(), self.timeouts));
        let now = Instant::now();
        let before = (state.phase(), state.generation(), state.members().count());

        let expired = state.expire(now);
        if !expired.is_empty() {
            warn!(
                "Group {} lost {} member(s) to session expiry: {:?}",
                group,
                expired.len(),
                expired
            );
        }
        let result = f(state, now);

        let after = (state.phase(), state.generation(), state.members().count());
        if before != after {
            self.group_changed.notify_waiters();
        }
        result
    }
}

#[async_trait]
impl LogProducer for InMemoryLog {
    async fn append(
        &self,
        topic: &TopicName,
        key: Option<String>,
        value: Vec<u8>,
    ) -> Result<Ack, LogError> {
        let size = value.len() + key.as_ref().map_or(0, String::len);
        if size > MAX_RECORD_BYTES {
            warn!("Rejected {} byte record for {}", size, topic);
            return Err(LogError::RecordTooLarge(size));
        }
        self.partition_count(topic);
        let (ack, appended) = {
            let mut slot = self
                .topics
                .get_mut(topic)
                .ok_or_else(|| LogError::UnknownTopic(topic.to_string()))?;
            let partition = self
                .router
                .route(key.as_deref(), slot.topic.partition_count());
            let offset = slot.topic.append(partition, key, value)?;
            debug!(
                "Appended {} bytes to {}:{} at offset {}",
                size, topic, partition, offset
            );
            (
                Ack {
                    topic: topic.clone(),
                    partition,
                    offset,
                },
                Arc::clone(&slot.appended),
            )
        };
        appended.notify_waiters();
        Ok(ack)
    }
}

#[async_trait]
impl GroupLog for InMemoryLog {
    async fn join_group(&self, request: JoinRequest) -> Result<Assignment, LogError> {
        let partition_count = self.partition_count(&request.topic);
        let member = self.with_group(&request.group, |group, now| {
            group.join(
                request.member.clone(),
                &request.client_id,
                partition_count,
                now,
            )
        });

        let deadline = Instant::now() + self.timeouts.rebalance * 2;
        loop {
            let changed = self.group_changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();

            let assignment = self.with_group(&request.group, |group, now| {
                group.await_assignment(&member, now)
            })?;
            if let Some(assignment) = assignment {
                debug!(
                    "Member {} assigned {:?} in generation {}",
                    member, assignment.partitions, assignment.generation
                );
                return Ok(assignment);
            }
            if Instant::now() >= deadline {
                return Err(LogError::Timeout);
            }

            tokio::select! {
                _ = &mut changed => {}
                _ = tokio::time::sleep(JOIN_POLL_INTERVAL) => {}
            }
        }
    }

    async fn heartbeat(&self, fence: &GroupFence) -> Result<(), LogError> {
        self.with_group(&fence.group, |group, now| {
            group.heartbeat(&fence.member, fence.generation, now)
        })
    }

    async fn leave_group(&self, group: &GroupId, member: &MemberId) -> Result<(), LogError> {
        self.with_group(group, |state, now| state.leave(member, now))
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchedBatch, LogError> {
        let topic_partition = request.topic_partition.clone();
        let deadline = tokio::time::Instant::now() + request.max_wait;
        let appended = self.appended_signal(&topic_partition.topic);

        loop {
            if let Some(fence) = &request.fence {
                self.with_group(&fence.group, |group, _| {
                    group.check_owner(fence, topic_partition.partition, false)
                })?;
            }

            let notified = appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let batch = self.read(&request)?;
            if !batch.records.is_empty() || tokio::time::Instant::now() >= deadline {
                return Ok(batch);
            }

            let group_changed = self.group_changed.notified();
            tokio::select! {
                _ = &mut notified => {}
                _ = group_changed => {}
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }
    }

    async fn commit_offset(
        &self,
        fence: &GroupFence,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError> {
        self.with_group(&fence.group, |group, _| {
            group.check_owner(fence, topic_partition.partition, true)
        })?;
        self.offsets
            .commit_offset(&fence.group, topic_partition, offset)
            .await
    }

    async fn committed_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError> {
        self.offsets.get_offset(group, topic_partition).await
    }

    async fn end_offset(&self, topic_partition: &TopicPartition) -> Result<Offset, LogError> {
        self.partition_count(&topic_partition.topic);
        let slot = self
            .topics
            .get(&topic_partition.topic)
            .ok_or_else(|| LogError::UnknownTopic(topic_partition.topic.to_string()))?;
        Ok(slot.topic.partition(topic_partition.partition)?.high_watermark())
    }
}
