use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::LogError;
use super::value_objects::*;

/// A user who can send and receive notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

impl User {
    pub fn new(id: impl Into<UserId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A message from one user to another. Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    from: User,
    to: User,
    message: String,
}

impl Notification {
    pub fn new(from: User, to: User, message: impl Into<String>) -> Self {
        Self {
            from,
            to,
            message: message.into(),
        }
    }

    pub fn from(&self) -> &User {
        &self.from
    }

    pub fn to(&self) -> &User {
        &self.to
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// The inbox this notification belongs in
    pub fn recipient(&self) -> UserId {
        self.to.id
    }
}

/// A keyed entry of a partition log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub offset: Offset,
    pub key: Option<String>,
    pub value: Vec<u8>,
    pub timestamp: DateTime<Utc>,
}

impl Record {
    pub fn size(&self) -> usize {
        self.value.len() + self.key.as_ref().map(|k| k.len()).unwrap_or(0)
    }
}

/// A topic is a named set of independently ordered partitions
#[derive(Debug, Clone)]
pub struct Topic {
    pub name: TopicName,
    pub partitions: Vec<Partition>,
    pub record_count: u64,
}

impl Topic {
    pub fn new(name: TopicName, partition_count: u32) -> Self {
        Self {
            name,
            partitions: (0..partition_count.max(1))
                .map(|id| Partition::new(PartitionId(id)))
                .collect(),
            record_count: 0,
        }
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    /// Append a record to the given partition and return its offset
    pub fn append(
        &mut self,
        partition: PartitionId,
        key: Option<String>,
        value: Vec<u8>,
    ) -> Result<Offset, LogError> {
        let topic_partition = TopicPartition::new(self.name.clone(), partition);
        let partition = self
            .partitions
            .get_mut(partition.value() as usize)
            .ok_or_else(|| LogError::UnknownTopic(topic_partition.to_string()))?;
        let offset = partition.append(key, value);
        self.record_count += 1;
        Ok(offset)
    }

    pub fn partition(&self, partition: PartitionId) -> Result<&Partition, LogError> {
        self.partitions.get(partition.value() as usize).ok_or_else(|| {
            LogError::UnknownTopic(TopicPartition::new(self.name.clone(), partition).to_string())
        })
    }
}

/// A partition is an ordered, append-only sequence of records within a topic
#[derive(Debug, Clone)]
pub struct Partition {
    pub id: PartitionId,
    pub records: Vec<Record>,
    pub high_watermark: Offset,
}

impl Partition {
    pub fn new(id: PartitionId) -> Self {
        Self {
            id,
            records: Vec::new(),
            high_watermark: Offset::new(0),
        }
    }

    pub fn append(&mut self, key: Option<String>, value: Vec<u8>) -> Offset {
        let offset = self.high_watermark;
        self.records.push(Record {
            offset,
            key,
            value,
            timestamp: Utc::now(),
        });
        self.high_watermark = offset.next();
        offset
    }

    /// Records starting at `from`, at most `limit` of them
    pub fn read(&self, from: Offset, limit: usize) -> Result<Vec<Record>, LogError> {
        if from > self.high_watermark {
            return Err(LogError::OffsetOutOfRange(from.value()));
        }
        Ok(self
            .records
            .iter()
            .skip(from.value() as usize)
            .take(limit)
            .cloned()
            .collect())
    }

    pub fn high_watermark(&self) -> Offset {
        self.high_watermark
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_offsets_are_dense_and_ordered() {
        let mut partition = Partition::new(PartitionId(0));
        for i in 0..5u8 {
            assert_eq!(partition.append(None, vec![i]), Offset(i as u64));
        }

        let records = partition.read(Offset(2), 10).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].offset, Offset(2));
        assert_eq!(records[2].value, vec![4]);
        assert_eq!(partition.high_watermark(), Offset(5));
    }

    #[test]
    fn reading_at_high_watermark_is_empty_and_past_it_is_an_error() {
        let mut partition = Partition::new(PartitionId(0));
        partition.append(Some("k".into()), b"v".to_vec());

        assert!(partition.read(Offset(1), 10).unwrap().is_empty());
        assert_eq!(
            partition.read(Offset(7), 10),
            Err(LogError::OffsetOutOfRange(7))
        );
    }

    #[test]
    fn topic_rejects_unknown_partition() {
        let mut topic = Topic::new(TopicName::from("notifications"), 2);
        assert!(topic.append(PartitionId(1), None, vec![]).is_ok());
        assert!(topic.append(PartitionId(2), None, vec![]).is_err());
        assert_eq!(topic.record_count, 1);
    }
}
