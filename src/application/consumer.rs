//! Consumer group member runtime.
//!
//! A [`GroupMember`] joins its group, runs one [`PartitionWorker`] per
//! assigned partition and heartbeats until the coordinator announces a
//! rebalance or the process shuts down:
//!
//! ```text
//! Joining ──> Assigned ──> Rebalancing ──> Joining ...
//!                 │
//!                 └──(shutdown)──> Stopped
//! ```
//!
//! Workers commit the next offset to read only after the records before it
//! have been appended to the inbox, so delivery is at-least-once: a member
//! that dies between apply and commit has those records redelivered to the
//! next owner. Records that do not decode are logged and skipped.

use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{ConsumerSettings, OffsetReset};
use crate::domain::{
    codec,
    entities::Record,
    errors::{DomainError, LogError},
    repositories::{GroupLog, InboxRepository},
    value_objects::*,
};
use crate::infrastructure::backoff::Backoff;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemberState {
    Joining,
    Assigned {
        generation: Generation,
        partitions: Vec<PartitionId>,
    },
    Rebalancing,
    Stopped,
}

impl MemberState {
    pub fn name(&self) -> &'static str {
        match self {
            MemberState::Joining => "joining",
            MemberState::Assigned { .. } => "assigned",
            MemberState::Rebalancing => "rebalancing",
            MemberState::Stopped => "stopped",
        }
    }

    pub fn partitions(&self) -> &[PartitionId] {
        match self {
            MemberState::Assigned { partitions, .. } => partitions,
            _ => &[],
        }
    }
}

/// Counters shared between a member and its workers
#[derive(Debug, Default)]
pub struct ConsumerStats {
    applied: AtomicU64,
    skipped: AtomicU64,
    rebalances: AtomicU64,
}

impl ConsumerStats {
    pub fn applied(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    /// Records dropped because they did not decode
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn rebalances(&self) -> u64 {
        self.rebalances.load(Ordering::Relaxed)
    }
}

enum Outcome {
    Shutdown,
    Rebalance,
    Evicted,
    Fatal(LogError),
}

pub struct GroupMember {
    log: Arc<dyn GroupLog>,
    inbox: Arc<dyn InboxRepository>,
    settings: ConsumerSettings,
    state: watch::Sender<MemberState>,
    stats: Arc<ConsumerStats>,
}

impl GroupMember {
    pub fn new(
        log: Arc<dyn GroupLog>,
        inbox: Arc<dyn InboxRepository>,
        settings: ConsumerSettings,
    ) -> Self {
        let (state, _) = watch::channel(MemberState::Joining);
        Self {
            log,
            inbox,
            settings,
            state,
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    pub fn state(&self) -> watch::Receiver<MemberState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    fn set_state(&self, state: MemberState) {
        debug!("Member state -> {}", state.name());
        self.state.send_replace(state);
    }

    /// Participate in the group until `shutdown` fires or coordination
    /// fails for good. On return the member has left the group.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DomainError> {
        let mut member: Option<MemberId> = None;
        let mut join_retry = self.join_backoff();

        loop {
            self.set_state(MemberState::Joining);
            let request = JoinRequest {
                group: self.settings.group.clone(),
                topic: self.settings.topic.clone(),
                member: member.clone(),
                client_id: self.settings.client_id.clone(),
            };
            let joined = tokio::select! {
                _ = shutdown.cancelled() => {
                    self.leave(member.as_ref()).await;
                    self.set_state(MemberState::Stopped);
                    return Ok(());
                }
                joined = self.log.join_group(request) => joined,
            };

            let assignment = match joined {
                Ok(assignment) => {
                    join_retry = self.join_backoff();
                    assignment
                }
                Err(e) => {
                    if matches!(e, LogError::UnknownMember(_)) {
                        member = None;
                    }
                    match join_retry.next() {
                        Some(delay) => {
                            warn!(
                                "Joining group {} failed ({}), retrying in {:?}",
                                self.settings.group, e, delay
                            );
                            if sleep_or_cancel(delay, &shutdown).await {
                                self.leave(member.as_ref()).await;
                                self.set_state(MemberState::Stopped);
                                return Ok(());
                            }
                            continue;
                        }
                        None => {
                            error!("Giving up on group {}: {}", self.settings.group, e);
                            self.set_state(MemberState::Stopped);
                            return Err(DomainError::Coordination(e));
                        }
                    }
                }
            };

            member = Some(assignment.member.clone());
            let fence = GroupFence {
                group: self.settings.group.clone(),
                member: assignment.member.clone(),
                generation: assignment.generation,
            };
            info!(
                "Member {} owns partitions {:?} of {} in generation {}",
                fence.member, assignment.partitions, self.settings.topic, fence.generation
            );
            self.set_state(MemberState::Assigned {
                generation: assignment.generation,
                partitions: assignment.partitions.clone(),
            });

            match self.consume(&fence, &assignment.partitions, &shutdown).await {
                Outcome::Shutdown => {
                    self.leave(member.as_ref()).await;
                    self.set_state(MemberState::Stopped);
                    return Ok(());
                }
                Outcome::Rebalance => {
                    self.stats.rebalances.fetch_add(1, Ordering::Relaxed);
                    info!("Group {} is rebalancing, rejoining", self.settings.group);
                }
                Outcome::Evicted => {
                    self.stats.rebalances.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Member {} was evicted from group {}, joining as new member",
                        fence.member, fence.group
                    );
                    member = None;
                }
                Outcome::Fatal(e) => {
                    error!("Member {} stopping: {}", fence.member, e);
                    self.leave(member.as_ref()).await;
                    self.set_state(MemberState::Stopped);
                    return Err(DomainError::Coordination(e));
                }
            }
        }
    }

    fn join_backoff(&self) -> Backoff {
        Backoff::new(Duration::from_millis(100), self.settings.max_join_failures)
    }

    /// Run workers for one generation; returns once they have all stopped
    async fn consume(
        &self,
        fence: &GroupFence,
        partitions: &[PartitionId],
        shutdown: &CancellationToken,
    ) -> Outcome {
        let generation = shutdown.child_token();
        let mut workers = JoinSet::new();
        for &partition in partitions {
            let worker = PartitionWorker {
                log: Arc::clone(&self.log),
                inbox: Arc::clone(&self.inbox),
                stats: Arc::clone(&self.stats),
                fence: fence.clone(),
                topic_partition: TopicPartition::new(self.settings.topic.clone(), partition),
                max_records: self.settings.fetch_max_records,
                max_wait: self.settings.fetch_max_wait,
                offset_reset: self.settings.offset_reset,
            };
            workers.spawn(worker.run(generation.clone()));
        }

        let mut heartbeat = tokio::time::interval(self.settings.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        heartbeat.tick().await;
        let mut heartbeat_failures = 0u32;

        let outcome = loop {
            tokio::select! {
                _ = shutdown.cancelled() => break Outcome::Shutdown,
                _ = heartbeat.tick() => match self.log.heartbeat(fence).await {
                    Ok(()) => heartbeat_failures = 0,
                    Err(LogError::UnknownMember(_)) => break Outcome::Evicted,
                    Err(e) if e.is_fencing() => break Outcome::Rebalance,
                    Err(e) => {
                        heartbeat_failures += 1;
                        warn!("Heartbeat {} failed: {}", heartbeat_failures, e);
                        if heartbeat_failures > self.settings.max_heartbeat_failures {
                            break Outcome::Fatal(e);
                        }
                    }
                },
                Some(joined) = workers.join_next() => match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(LogError::UnknownMember(_))) => break Outcome::Evicted,
                    Ok(Err(e)) if e.is_fencing() => break Outcome::Rebalance,
                    Ok(Err(e)) => break Outcome::Fatal(e),
                    Err(e) => {
                        error!("Partition worker crashed: {}", e);
                        let crashed = LogError::Protocol(format!("worker crashed: {}", e));
                        break Outcome::Fatal(crashed);
                    }
                },
            }
        };

        self.set_state(MemberState::Rebalancing);
        generation.cancel();
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!("Worker stopped with: {}", e),
                Err(e) => error!("Partition worker crashed: {}", e),
            }
        }
        outcome
    }

    async fn leave(&self, member: Option<&MemberId>) {
        let Some(member) = member else { return };
        match self.log.leave_group(&self.settings.group, member).await {
            Ok(()) => info!("Member {} left group {}", member, self.settings.group),
            Err(e) => warn!(
                "Member {} could not leave group {}: {}",
                member, self.settings.group, e
            ),
        }
    }
}

/// Fetch-decode-apply loop for one owned partition
struct PartitionWorker {
    log: Arc<dyn GroupLog>,
    inbox: Arc<dyn InboxRepository>,
    stats: Arc<ConsumerStats>,
    fence: GroupFence,
    topic_partition: TopicPartition,
    max_records: usize,
    max_wait: Duration,
    offset_reset: OffsetReset,
}

impl PartitionWorker {
    async fn run(self, cancel: CancellationToken) -> Result<(), LogError> {
        let Some(mut position) = self.locate(true, &cancel).await? else {
            return Ok(());
        };
        info!("Consuming {} from offset {}", self.topic_partition, position);
        let mut retry = Backoff::default();

        loop {
            let request = FetchRequest {
                topic_partition: self.topic_partition.clone(),
                offset: position,
                max_records: self.max_records,
                max_wait: self.max_wait,
                fence: Some(self.fence.clone()),
            };
            let fetched = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                fetched = self.log.fetch(request) => fetched,
            };

            let batch = match fetched {
                Ok(batch) => {
                    retry = Backoff::default();
                    batch
                }
                Err(e) if e.is_fencing() => {
                    debug!("Lost {}: {}", self.topic_partition, e);
                    return Err(e);
                }
                Err(LogError::OffsetOutOfRange(offset)) => {
                    warn!("Offset {} out of range on {}, resetting", offset, self.topic_partition);
                    match self.locate(false, &cancel).await? {
                        Some(reset) => position = reset,
                        None => return Ok(()),
                    }
                    continue;
                }
                Err(e) => match retry.next() {
                    Some(delay) => {
                        warn!(
                            "Fetch from {} failed ({}), retrying in {:?}",
                            self.topic_partition, e, delay
                        );
                        if sleep_or_cancel(delay, &cancel).await {
                            return Ok(());
                        }
                        continue;
                    }
                    None => return Err(e),
                },
            };

            let start = position;
            for record in &batch.records {
                if cancel.is_cancelled() {
                    break;
                }
                self.apply(record);
                position = record.offset.next();
            }

            if position > start {
                let tp = &self.topic_partition;
                match self.log.commit_offset(&self.fence, tp, position).await {
                    Ok(()) => debug!("Committed {} at {}", tp, position),
                    Err(e) if cancel.is_cancelled() => {
                        warn!("Could not commit {} at {} on revocation: {}", tp, position, e);
                        return Ok(());
                    }
                    Err(e) if e.is_fencing() => return Err(e),
                    Err(e) => warn!(
                        "Commit of {} at {} failed, will retry with the next batch: {}",
                        tp, position, e
                    ),
                }
            }
        }
    }

    /// Where to read from: the committed offset when `use_committed` and one
    /// exists, the reset position otherwise. Transport failures are retried;
    /// `None` means `cancel` fired while waiting to retry.
    async fn locate(
        &self,
        use_committed: bool,
        cancel: &CancellationToken,
    ) -> Result<Option<Offset>, LogError> {
        let mut retry = Backoff::default();
        loop {
            let located = if use_committed {
                match self.log.committed_offset(&self.fence.group, &self.topic_partition).await {
                    Ok(Some(offset)) => Ok(offset),
                    Ok(None) => self.reset_position().await,
                    Err(e) => Err(e),
                }
            } else {
                self.reset_position().await
            };

            let e = match located {
                Ok(offset) => return Ok(Some(offset)),
                Err(e) if e.is_fencing() => return Err(e),
                Err(e) => e,
            };
            let Some(delay) = retry.next() else {
                return Err(e);
            };
            warn!(
                "Locating start of {} failed ({}), retrying in {:?}",
                self.topic_partition, e, delay
            );
            if sleep_or_cancel(delay, cancel).await {
                return Ok(None);
            }
        }
    }

    async fn reset_position(&self) -> Result<Offset, LogError> {
        match self.offset_reset {
            OffsetReset::Earliest => Ok(Offset::new(0)),
            OffsetReset::Latest => self.log.end_offset(&self.topic_partition).await,
        }
    }

    fn apply(&self, record: &Record) {
        match codec::decode(&record.value) {
            Ok(notification) => {
                let recipient = notification.recipient();
                if record.key.as_deref().is_some_and(|key| key != recipient.partition_key()) {
                    warn!(
                        "Record {}@{} keyed {:?} but addressed to user {}",
                        self.topic_partition, record.offset, record.key, recipient
                    );
                }
                self.inbox.append(recipient, notification);
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
            }
            Err(source) => {
                let err = DomainError::Decode {
                    topic_partition: self.topic_partition.clone(),
                    offset: record.offset,
                    source,
                };
                error!("Skipping record: {}", err);
                self.stats.skipped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Sleep for `delay`; true if `cancel` fired first
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{Notification, User};
    use crate::domain::group::GroupTimeouts;
    use crate::domain::repositories::LogProducer;
    use crate::infrastructure::{InMemoryInboxRepository, InMemoryLog};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;

    /// An [`InMemoryLog`] whose first committed-offset lookups time out
    struct FlakyOffsets {
        log: InMemoryLog,
        failures: AtomicU32,
        lookups: AtomicU32,
    }

    #[async_trait]
    impl GroupLog for FlakyOffsets {
        async fn join_group(&self, request: JoinRequest) -> Result<Assignment, LogError> {
            self.log.join_group(request).await
        }

        async fn heartbeat(&self, fence: &GroupFence) -> Result<(), LogError> {
            self.log.heartbeat(fence).await
        }

        async fn leave_group(&self, group: &GroupId, member: &MemberId) -> Result<(), LogError> {
            self.log.leave_group(group, member).await
        }

        async fn fetch(&self, request: FetchRequest) -> Result<FetchedBatch, LogError> {
            self.log.fetch(request).await
        }

        async fn commit_offset(
            &self,
            fence: &GroupFence,
            topic_partition: &TopicPartition,
            offset: Offset,
        ) -> Result<(), LogError> {
            self.log.commit_offset(fence, topic_partition, offset).await
        }

        async fn committed_offset(
            &self,
            group: &GroupId,
            topic_partition: &TopicPartition,
        ) -> Result<Option<Offset>, LogError> {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(LogError::Timeout);
            }
            self.log.committed_offset(group, topic_partition).await
        }

        async fn end_offset(&self, topic_partition: &TopicPartition) -> Result<Offset, LogError> {
            self.log.end_offset(topic_partition).await
        }
    }

    fn settings() -> ConsumerSettings {
        ConsumerSettings {
            heartbeat_interval: Duration::from_millis(50),
            fetch_max_wait: Duration::from_millis(50),
            ..ConsumerSettings::default()
        }
    }

    #[tokio::test]
    async fn transient_offset_lookup_failures_are_retried() {
        let settings = settings();
        let log = Arc::new(FlakyOffsets {
            log: InMemoryLog::new(1, GroupTimeouts::default()),
            failures: AtomicU32::new(3),
            lookups: AtomicU32::new(0),
        });
        let notification = Notification::new(User::new(1, "Emma"), User::new(2, "Bruno"), "hi");
        let payload = codec::encode(&notification).unwrap();
        log.log.append(&settings.topic, Some("2".into()), payload).await.unwrap();

        let inbox = Arc::new(InMemoryInboxRepository::new());
        let member = GroupMember::new(log.clone(), inbox.clone(), settings);
        let state = member.state();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(member.run(shutdown.clone()));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while inbox.get_all(UserId(2)).is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "notification never applied");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        assert!(log.lookups.load(Ordering::SeqCst) >= 4);
        assert!(matches!(*state.borrow(), MemberState::Assigned { .. }));
        shutdown.cancel();
        handle.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), MemberState::Stopped);
    }

    #[tokio::test]
    async fn cancelled_worker_stops_while_retrying_the_offset_lookup() {
        let log = Arc::new(FlakyOffsets {
            log: InMemoryLog::new(1, GroupTimeouts::default()),
            failures: AtomicU32::new(u32::MAX),
            lookups: AtomicU32::new(0),
        });
        let fence = GroupFence {
            group: GroupId::from("g"),
            member: MemberId::from("m"),
            generation: Generation(1),
        };
        let worker = PartitionWorker {
            log: log.clone(),
            inbox: Arc::new(InMemoryInboxRepository::new()),
            stats: Arc::new(ConsumerStats::default()),
            fence,
            topic_partition: TopicPartition::new(TopicName::from("t"), PartitionId(0)),
            max_records: 10,
            max_wait: Duration::from_millis(10),
            offset_reset: OffsetReset::Earliest,
        };
        let cancel = CancellationToken::new();
        let running = tokio::spawn(worker.run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(120)).await;

        cancel.cancel();
        let stopped = tokio::time::timeout(Duration::from_secs(1), running).await;
        assert_eq!(stopped.unwrap().unwrap(), Ok(()));
        assert!(log.lookups.load(Ordering::SeqCst) >= 2);
    }
}
