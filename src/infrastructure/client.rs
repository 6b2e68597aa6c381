use async_trait::async_trait;
use log::{debug, warn};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;

use crate::domain::{errors::LogError, repositories::*, value_objects::*};
use crate::infrastructure::backoff::Backoff;
use crate::infrastructure::protocol::{
    decode_response, encode_request, read_frame, write_frame, ApiKey, CommittedOffset, Decodable,
    Encodable, LeaveGroupRequest, OffsetCommitRequest, OffsetFetchRequest, ProduceRequest,
    RequestHeader, MAX_RECORD_BYTES, PROTOCOL_VERSION,
};

/// Client for a [`BrokerServer`](super::server::BrokerServer).
///
/// Requests run one per connection; idle connections are pooled so that
/// concurrent partition fetchers and the heartbeat never queue behind each
/// other. Connecting is retried with exponential backoff; once the budget
/// is spent the call fails with [`LogError::Unavailable`].
pub struct RemoteLog {
    addr: String,
    client_id: String,
    idle: Mutex<Vec<TcpStream>>,
    correlation: AtomicI32,
    backoff: Backoff,
    request_timeout: Duration,
    join_timeout: Duration,
}

impl RemoteLog {
    pub fn new(addr: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client_id: client_id.into(),
            idle: Mutex::new(Vec::new()),
            correlation: AtomicI32::new(0),
            backoff: Backoff::default(),
            request_timeout: Duration::from_secs(10),
            join_timeout: Duration::from_secs(60),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    async fn connect(&self) -> Result<TcpStream, LogError> {
        let mut delays = self.backoff.clone();
        loop {
            match TcpStream::connect(&self.addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true).ok();
                    debug!("Connected to broker at {}", self.addr);
                    return Ok(stream);
                }
                Err(e) => match delays.next() {
                    Some(delay) => {
                        warn!(
                            "Broker at {} unreachable ({}), retrying in {:?}",
                            self.addr, e, delay
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        return Err(LogError::Unavailable(format!("{}: {}", self.addr, e)));
                    }
                },
            }
        }
    }

    fn checkout(&self) -> Option<TcpStream> {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
    }

    fn checkin(&self, stream: TcpStream) {
        self.idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(stream);
    }

    async fn call<Req: Encodable, Resp: Decodable>(
        &self,
        api_key: ApiKey,
        request: &Req,
        timeout: Duration,
    ) -> Result<Resp, LogError> {
        let correlation_id = self.correlation.fetch_add(1, Ordering::Relaxed);
        let header = RequestHeader {
            api_key,
            api_version: PROTOCOL_VERSION,
            correlation_id,
            client_id: Some(self.client_id.clone()),
        };
        let frame =
            encode_request(&header, request).map_err(|e| LogError::Protocol(e.to_string()))?;

        // A pooled connection may have been closed by the broker since it
        // was last used; such a failure earns one retry on a fresh one.
        let (mut stream, pooled) = match self.checkout() {
            Some(stream) => (stream, true),
            None => (self.connect().await?, false),
        };
        let payload = match exchange(&mut stream, &frame, timeout).await {
            Ok(payload) => payload,
            Err(LogError::Unavailable(reason)) if pooled => {
                debug!("Pooled connection failed ({}), reconnecting", reason);
                stream = self.connect().await?;
                exchange(&mut stream, &frame, timeout).await?
            }
            Err(e) => return Err(e),
        };

        let (response_id, result) =
            decode_response::<Resp>(payload).map_err(|e| LogError::Protocol(e.to_string()))?;
        if response_id != correlation_id {
            return Err(LogError::Protocol(format!(
                "correlation id mismatch: sent {}, got {}",
                correlation_id, response_id
            )));
        }
        self.checkin(stream);
        result
    }
}

async fn exchange(
    stream: &mut TcpStream,
    frame: &[u8],
    timeout: Duration,
) -> Result<bytes::BytesMut, LogError> {
    let round_trip = async {
        write_frame(stream, frame).await?;
        read_frame(stream).await
    };
    match tokio::time::timeout(timeout, round_trip).await {
        Err(_) => Err(LogError::Timeout),
        Ok(Err(e)) => Err(LogError::Unavailable(e.to_string())),
        Ok(Ok(None)) => Err(LogError::Unavailable("connection closed by broker".into())),
        Ok(Ok(Some(payload))) => Ok(payload),
    }
}

#[async_trait]
impl LogProducer for RemoteLog {
    async fn append(
        &self,
        topic: &TopicName,
        key: Option<String>,
        value: Vec<u8>,
    ) -> Result<Ack, LogError> {
        let size = value.len() + key.as_ref().map_or(0, String::len);
        if size > MAX_RECORD_BYTES {
            return Err(LogError::RecordTooLarge(size));
        }
        let request = ProduceRequest {
            topic: topic.clone(),
            key,
            value,
        };
        self.call(ApiKey::Produce, &request, self.request_timeout).await
    }
}

#[async_trait]
impl GroupLog for RemoteLog {
    async fn join_group(&self, request: JoinRequest) -> Result<Assignment, LogError> {
        self.call(ApiKey::JoinGroup, &request, self.join_timeout).await
    }

    async fn heartbeat(&self, fence: &GroupFence) -> Result<(), LogError> {
        self.call(ApiKey::Heartbeat, fence, self.request_timeout).await
    }

    async fn leave_group(&self, group: &GroupId, member: &MemberId) -> Result<(), LogError> {
        let request = LeaveGroupRequest {
            group: group.clone(),
            member: member.clone(),
        };
        self.call(ApiKey::LeaveGroup, &request, self.request_timeout).await
    }

    async fn fetch(&self, request: FetchRequest) -> Result<FetchedBatch, LogError> {
        let timeout = request.max_wait + self.request_timeout;
        self.call(ApiKey::Fetch, &request, timeout).await
    }

    async fn commit_offset(
        &self,
        fence: &GroupFence,
        topic_partition: &TopicPartition,
        offset: Offset,
    ) -> Result<(), LogError> {
        let request = OffsetCommitRequest {
            fence: fence.clone(),
            topic_partition: topic_partition.clone(),
            offset,
        };
        self.call(ApiKey::OffsetCommit, &request, self.request_timeout).await
    }

    async fn committed_offset(
        &self,
        group: &GroupId,
        topic_partition: &TopicPartition,
    ) -> Result<Option<Offset>, LogError> {
        let request = OffsetFetchRequest {
            group: group.clone(),
            topic_partition: topic_partition.clone(),
        };
        let committed: CommittedOffset = self
            .call(ApiKey::OffsetFetch, &request, self.request_timeout)
            .await?;
        Ok(committed.0)
    }

    async fn end_offset(&self, topic_partition: &TopicPartition) -> Result<Offset, LogError> {
        self.call(ApiKey::ListOffsets, topic_partition, self.request_timeout).await
    }
}
