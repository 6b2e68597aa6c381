//! Consumer group membership and partition assignment.
//!
//! [`ConsumerGroup`] is the coordinator-side state machine for one group. It
//! is pure: callers pass the current instant, which keeps session expiry and
//! rebalance deadlines testable without sleeping.
//!
//! The protocol is eager. Any membership change moves the group to
//! [`GroupPhase::PreparingRebalance`], every member must rejoin, and only
//! then is a new generation with a fresh assignment published. Fetches are
//! refused while a rebalance is pending, so no partition is served to two
//! members at once.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use log::{debug, info};

use super::errors::LogError;
use super::value_objects::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupPhase {
    /// No members
    Empty,
    /// Waiting for every member to rejoin
    PreparingRebalance,
    /// Assignment published for the current generation
    Stable,
}

#[derive(Debug, Clone, Copy)]
pub struct GroupTimeouts {
    /// Members silent for longer than this are evicted
    pub session: Duration,
    /// Members that do not rejoin within this window are evicted
    pub rebalance: Duration,
}

impl Default for GroupTimeouts {
    fn default() -> Self {
        Self {
            session: Duration::from_secs(10),
            rebalance: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct MemberState {
    last_seen: Instant,
    rejoined: bool,
}

#[derive(Debug)]
pub struct ConsumerGroup {
    pub id: GroupId,
    phase: GroupPhase,
    generation: Generation,
    partition_count: u32,
    members: BTreeMap<MemberId, MemberState>,
    assignment: HashMap<MemberId, Vec<PartitionId>>,
    rebalance_deadline: Option<Instant>,
    timeouts: GroupTimeouts,
}

impl ConsumerGroup {
    pub fn new(id: GroupId, timeouts: GroupTimeouts) -> Self {
        Self {
            id,
            phase: GroupPhase::Empty,
            generation: Generation::default(),
            partition_count: 0,
            members: BTreeMap::new(),
            assignment: HashMap::new(),
            rebalance_deadline: None,
            timeouts,
        }
    }

    pub fn phase(&self) -> GroupPhase {
        self.phase
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn members(&self) -> impl Iterator<Item = &MemberId> {
        self.members.keys()
    }

    /// Register a join. Returns the member id the caller must use from now on.
    ///
    /// Unknown or absent ids get a fresh one. A join while the group is not
    /// already rebalancing starts a rebalance, since the joiner has dropped
    /// whatever it owned.
    pub fn join(
        &mut self,
        member: Option<MemberId>,
        client_id: &str,
        partition_count: u32,
        now: Instant,
    ) -> MemberId {
        let member = member
            .filter(|m| self.members.contains_key(m))
            .unwrap_or_else(|| MemberId::generate(client_id));
        self.partition_count = partition_count;

        if self.phase != GroupPhase::PreparingRebalance {
            self.begin_rebalance(now);
        }
        self.members.insert(
            member.clone(),
            MemberState {
                last_seen: now,
                rejoined: true,
            },
        );
        debug!("Member {} joined group {}", member, self.id);
        self.try_complete_rebalance();
        member
    }

    /// The member's partitions, once the group is stable
    pub fn assignment_for(&self, member: &MemberId) -> Result<Option<Assignment>, LogError> {
        if !self.members.contains_key(member) {
            return Err(LogError::UnknownMember(member.to_string()));
        }
        if self.phase != GroupPhase::Stable {
            return Ok(None);
        }
        Ok(Some(Assignment {
            member: member.clone(),
            generation: self.generation,
            partitions: self.assignment.get(member).cloned().unwrap_or_default(),
        }))
    }

    /// Poll on behalf of a member blocked in join. A member still waiting
    /// for its assignment counts as rejoined for any rebalance that started
    /// after it joined.
    pub fn await_assignment(
        &mut self,
        member: &MemberId,
        now: Instant,
    ) -> Result<Option<Assignment>, LogError> {
        let state = self
            .members
            .get_mut(member)
            .ok_or_else(|| LogError::UnknownMember(member.to_string()))?;
        state.last_seen = now;
        if self.phase == GroupPhase::PreparingRebalance && !state.rejoined {
            state.rejoined = true;
            debug!("Member {} rejoined group {} while waiting", member, self.id);
            self.try_complete_rebalance();
        }
        self.assignment_for(member)
    }

    pub fn heartbeat(
        &mut self,
        member: &MemberId,
        generation: Generation,
        now: Instant,
    ) -> Result<(), LogError> {
        self.touch(member, now)?;
        if self.phase == GroupPhase::PreparingRebalance {
            return Err(LogError::RebalanceInProgress);
        }
        if generation != self.generation {
            return Err(LogError::IllegalGeneration(generation.value()));
        }
        Ok(())
    }

    /// Refresh a member's session without any other effect
    pub fn touch(&mut self, member: &MemberId, now: Instant) -> Result<(), LogError> {
        match self.members.get_mut(member) {
            Some(state) => {
                state.last_seen = now;
                Ok(())
            }
            None => Err(LogError::UnknownMember(member.to_string())),
        }
    }

    pub fn leave(&mut self, member: &MemberId, now: Instant) -> Result<(), LogError> {
        if self.members.remove(member).is_none() {
            return Err(LogError::UnknownMember(member.to_string()));
        }
        info!("Member {} left group {}", member, self.id);
        self.on_membership_loss(now);
        Ok(())
    }

    /// Evict members whose session has lapsed and members that missed the
    /// rebalance deadline; completes a pending rebalance if possible.
    pub fn expire(&mut self, now: Instant) -> Vec<MemberId> {
        let session = self.timeouts.session;
        let mut expired: Vec<MemberId> = self
            .members
            .iter()
            .filter(|(_, state)| now.saturating_duration_since(state.last_seen) > session)
            .map(|(id, _)| id.clone())
            .collect();

        if self.phase == GroupPhase::PreparingRebalance
            && self.rebalance_deadline.is_some_and(|deadline| now >= deadline)
        {
            let stragglers: Vec<MemberId> = self
                .members
                .iter()
                .filter(|&(id, state)| !state.rejoined && !expired.contains(id))
                .map(|(id, _)| id.clone())
                .collect();
            expired.extend(stragglers);
        }

        for member in &expired {
            self.members.remove(member);
            info!("Evicted member {} from group {}", member, self.id);
        }
        if !expired.is_empty() {
            self.on_membership_loss(now);
        }
        self.try_complete_rebalance();
        expired
    }

    /// Check that `fence` owns `partition` in the current generation.
    /// `allow_rebalancing` admits the previous owner while a rebalance is
    /// pending, which lets it commit progress before rejoining.
    pub fn check_owner(
        &self,
        fence: &GroupFence,
        partition: PartitionId,
        allow_rebalancing: bool,
    ) -> Result<(), LogError> {
        if !self.members.contains_key(&fence.member) {
            return Err(LogError::UnknownMember(fence.member.to_string()));
        }
        match self.phase {
            GroupPhase::PreparingRebalance if !allow_rebalancing => {
                return Err(LogError::RebalanceInProgress)
            }
            GroupPhase::Empty => return Err(LogError::RebalanceInProgress),
            _ => {}
        }
        if fence.generation != self.generation {
            return Err(LogError::IllegalGeneration(fence.generation.value()));
        }
        let owns = self
            .assignment
            .get(&fence.member)
            .is_some_and(|partitions| partitions.contains(&partition));
        if !owns {
            return Err(LogError::NotAssigned(partition.to_string()));
        }
        Ok(())
    }

    fn on_membership_loss(&mut self, now: Instant) {
        if self.members.is_empty() {
            self.phase = GroupPhase::Empty;
            self.assignment.clear();
            self.rebalance_deadline = None;
        } else if self.phase != GroupPhase::PreparingRebalance {
            self.begin_rebalance(now);
        } else {
            self.try_complete_rebalance();
        }
    }

    fn begin_rebalance(&mut self, now: Instant) {
        info!(
            "Group {} preparing rebalance from generation {}",
            self.id, self.generation
        );
        self.phase = GroupPhase::PreparingRebalance;
        self.rebalance_deadline = Some(now + self.timeouts.rebalance);
        for state in self.members.values_mut() {
            state.rejoined = false;
        }
    }

    fn try_complete_rebalance(&mut self) -> bool {
        if self.phase != GroupPhase::PreparingRebalance || self.members.is_empty() {
            return false;
        }
        if !self.members.values().all(|state| state.rejoined) {
            return false;
        }

        let members: Vec<MemberId> = self.members.keys().cloned().collect();
        self.generation = self.generation.next();
        self.assignment = assign_range(&members, self.partition_count);
        self.phase = GroupPhase::Stable;
        self.rebalance_deadline = None;
        info!(
            "Group {} stable at generation {} with {} member(s): {:?}",
            self.id,
            self.generation,
            members.len(),
            self.assignment
        );
        true
    }
}

/// Range assignment: contiguous blocks of partitions per member, members in
/// id order, the first `partition_count % members` members taking one extra.
pub fn assign_range(
    members: &[MemberId],
    partition_count: u32,
) -> HashMap<MemberId, Vec<PartitionId>> {
    let mut assignments: HashMap<MemberId, Vec<PartitionId>> =
        members.iter().map(|m| (m.clone(), Vec::new())).collect();
    if members.is_empty() {
        return assignments;
    }

    let mut sorted: Vec<&MemberId> = members.iter().collect();
    sorted.sort();

    let per_member = partition_count as usize / sorted.len();
    let remainder = partition_count as usize % sorted.len();
    let mut next = 0u32;
    for (index, member) in sorted.into_iter().enumerate() {
        let count = per_member + usize::from(index < remainder);
        if let Some(parts) = assignments.get_mut(member) {
            for _ in 0..count {
                parts.push(PartitionId(next));
                next += 1;
            }
        }
    }
    assignments
}
