//! Binary protocol spoken between [`RemoteLog`](super::client::RemoteLog)
//! and [`BrokerServer`](super::server::BrokerServer).
//!
//! Every frame is an `i32` size followed by the payload. Requests start with
//! a [`RequestHeader`]; responses start with a [`ResponseHeader`] and an
//! `i16` error code, followed by either the response body (code 0) or a
//! detail string.

use bytes::{Buf, BufMut, BytesMut};
use chrono::{DateTime, Utc};
use crc32fast::Hasher as Crc32Hasher;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::domain::{entities::Record, errors::LogError, value_objects::*};

pub const MAX_FRAME_SIZE: usize = 1024 * 1024;
pub const PROTOCOL_VERSION: i16 = 1;

/// Room left in a frame for headers, topic names and error details
const FRAME_HEADROOM: usize = 1024;
/// Bytes a record carries on the wire besides its key and value: offset,
/// timestamp, crc and the two length prefixes
const RECORD_OVERHEAD: usize = 8 + 8 + 4 + 2 + 4;

/// Record bytes a single fetch response may carry
pub const MAX_FETCH_BYTES: usize = MAX_FRAME_SIZE - FRAME_HEADROOM;
/// Largest key plus value a record may have; such a record still fits a
/// fetch response on its own
pub const MAX_RECORD_BYTES: usize = MAX_FETCH_BYTES - RECORD_OVERHEAD;

/// Size of `record` once encoded in a fetch response
pub fn encoded_record_len(record: &Record) -> usize {
    RECORD_OVERHEAD + record.size()
}

/// API keys for the supported request types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiKey {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    OffsetCommit = 8,
    OffsetFetch = 9,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
}

impl TryFrom<i16> for ApiKey {
    type Error = &'static str;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ApiKey::Produce),
            1 => Ok(ApiKey::Fetch),
            2 => Ok(ApiKey::ListOffsets),
            8 => Ok(ApiKey::OffsetCommit),
            9 => Ok(ApiKey::OffsetFetch),
            11 => Ok(ApiKey::JoinGroup),
            12 => Ok(ApiKey::Heartbeat),
            13 => Ok(ApiKey::LeaveGroup),
            _ => Err("Unknown API key"),
        }
    }
}

impl ApiKey {
    pub fn name(&self) -> &'static str {
        match self {
            ApiKey::Produce => "PRODUCE",
            ApiKey::Fetch => "FETCH",
            ApiKey::ListOffsets => "LIST_OFFSETS",
            ApiKey::OffsetCommit => "OFFSET_COMMIT",
            ApiKey::OffsetFetch => "OFFSET_FETCH",
            ApiKey::JoinGroup => "JOIN_GROUP",
            ApiKey::Heartbeat => "HEARTBEAT",
            ApiKey::LeaveGroup => "LEAVE_GROUP",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResponseHeader {
    pub correlation_id: i32,
}

pub trait Encodable {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()>;
}

pub trait Decodable: Sized {
    fn decode(buf: &mut BytesMut) -> io::Result<Self>;
}

fn invalid(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

fn need(buf: &BytesMut, n: usize) -> io::Result<()> {
    if buf.remaining() < n {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "Not enough bytes"));
    }
    Ok(())
}

pub fn encode_i8(buf: &mut BytesMut, value: i8) {
    buf.put_i8(value);
}

pub fn decode_i8(buf: &mut BytesMut) -> io::Result<i8> {
    need(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn encode_i16(buf: &mut BytesMut, value: i16) {
    buf.put_i16(value);
}

pub fn decode_i16(buf: &mut BytesMut) -> io::Result<i16> {
    need(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn encode_i32(buf: &mut BytesMut, value: i32) {
    buf.put_i32(value);
}

pub fn decode_i32(buf: &mut BytesMut) -> io::Result<i32> {
    need(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn encode_i64(buf: &mut BytesMut, value: i64) {
    buf.put_i64(value);
}

pub fn decode_i64(buf: &mut BytesMut) -> io::Result<i64> {
    need(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn encode_string(buf: &mut BytesMut, value: Option<&str>) -> io::Result<()> {
    match value {
        Some(s) => {
            let bytes = s.as_bytes();
            let len = i16::try_from(bytes.len()).map_err(|_| invalid("String too long"))?;
            encode_i16(buf, len);
            buf.put_slice(bytes);
        }
        None => encode_i16(buf, -1),
    }
    Ok(())
}

pub fn decode_string(buf: &mut BytesMut) -> io::Result<Option<String>> {
    let len = decode_i16(buf)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(invalid("Invalid string length"));
    }
    need(buf, len as usize)?;
    let bytes = buf.split_to(len as usize);
    let s = String::from_utf8(bytes.to_vec()).map_err(|_| invalid("Invalid UTF-8"))?;
    Ok(Some(s))
}

fn decode_required_string(buf: &mut BytesMut, field: &str) -> io::Result<String> {
    decode_string(buf)?.ok_or_else(|| invalid(&format!("{} cannot be null", field)))
}

pub fn encode_bytes(buf: &mut BytesMut, value: Option<&[u8]>) -> io::Result<()> {
    match value {
        Some(bytes) => {
            let len = i32::try_from(bytes.len()).map_err(|_| invalid("Bytes too long"))?;
            encode_i32(buf, len);
            buf.put_slice(bytes);
        }
        None => encode_i32(buf, -1),
    }
    Ok(())
}

pub fn decode_bytes(buf: &mut BytesMut) -> io::Result<Option<Vec<u8>>> {
    let len = decode_i32(buf)?;
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(invalid("Invalid bytes length"));
    }
    need(buf, len as usize)?;
    Ok(Some(buf.split_to(len as usize).to_vec()))
}

fn checksum(value: &[u8]) -> u32 {
    let mut hasher = Crc32Hasher::new();
    hasher.update(value);
    hasher.finalize()
}

impl Encodable for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_i16(buf, self.api_key as i16);
        encode_i16(buf, self.api_version);
        encode_i32(buf, self.correlation_id);
        encode_string(buf, self.client_id.as_deref())
    }
}

impl Decodable for RequestHeader {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let api_key = ApiKey::try_from(decode_i16(buf)?).map_err(invalid)?;
        let api_version = decode_i16(buf)?;
        let correlation_id = decode_i32(buf)?;
        let client_id = decode_string(buf)?;
        Ok(RequestHeader {
            api_key,
            api_version,
            correlation_id,
            client_id,
        })
    }
}

impl Encodable for ResponseHeader {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_i32(buf, self.correlation_id);
        Ok(())
    }
}

impl Decodable for ResponseHeader {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(ResponseHeader {
            correlation_id: decode_i32(buf)?,
        })
    }
}

impl Encodable for () {
    fn encode(&self, _buf: &mut BytesMut) -> io::Result<()> {
        Ok(())
    }
}

impl Decodable for () {
    fn decode(_buf: &mut BytesMut) -> io::Result<Self> {
        Ok(())
    }
}

impl Encodable for TopicPartition {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.topic.as_str()))?;
        encode_i32(buf, self.partition.value() as i32);
        Ok(())
    }
}

impl Decodable for TopicPartition {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let topic = TopicName(decode_required_string(buf, "Topic")?);
        let partition = decode_i32(buf)?;
        let partition = u32::try_from(partition).map_err(|_| invalid("Negative partition"))?;
        Ok(TopicPartition::new(topic, PartitionId(partition)))
    }
}

impl Encodable for Offset {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_i64(buf, self.value() as i64);
        Ok(())
    }
}

impl Decodable for Offset {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let offset = decode_i64(buf)?;
        u64::try_from(offset)
            .map(Offset)
            .map_err(|_| invalid("Negative offset"))
    }
}

impl Encodable for GroupFence {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.group.as_str()))?;
        encode_string(buf, Some(self.member.as_str()))?;
        encode_i32(buf, self.generation.value());
        Ok(())
    }
}

impl Decodable for GroupFence {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(GroupFence {
            group: GroupId(decode_required_string(buf, "Group")?),
            member: MemberId(decode_required_string(buf, "Member")?),
            generation: Generation(decode_i32(buf)?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ProduceRequest {
    pub topic: TopicName,
    pub key: Option<String>,
    pub value: Vec<u8>,
}

impl Encodable for ProduceRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.topic.as_str()))?;
        encode_string(buf, self.key.as_deref())?;
        encode_bytes(buf, Some(&self.value))
    }
}

impl Decodable for ProduceRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(ProduceRequest {
            topic: TopicName(decode_required_string(buf, "Topic")?),
            key: decode_string(buf)?,
            value: decode_bytes(buf)?.unwrap_or_default(),
        })
    }
}

impl Encodable for Ack {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        TopicPartition::new(self.topic.clone(), self.partition).encode(buf)?;
        self.offset.encode(buf)
    }
}

impl Decodable for Ack {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let topic_partition = TopicPartition::decode(buf)?;
        Ok(Ack {
            topic: topic_partition.topic,
            partition: topic_partition.partition,
            offset: Offset::decode(buf)?,
        })
    }
}

impl Encodable for FetchRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        self.topic_partition.encode(buf)?;
        self.offset.encode(buf)?;
        encode_i32(buf, i32::try_from(self.max_records).unwrap_or(i32::MAX));
        encode_i32(buf, i32::try_from(self.max_wait.as_millis()).unwrap_or(i32::MAX));
        match &self.fence {
            Some(fence) => {
                encode_i8(buf, 1);
                fence.encode(buf)
            }
            None => {
                encode_i8(buf, 0);
                Ok(())
            }
        }
    }
}

impl Decodable for FetchRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let topic_partition = TopicPartition::decode(buf)?;
        let offset = Offset::decode(buf)?;
        let max_records = decode_i32(buf)?.max(1) as usize;
        let max_wait = Duration::from_millis(decode_i32(buf)?.max(0) as u64);
        let fence = match decode_i8(buf)? {
            0 => None,
            _ => Some(GroupFence::decode(buf)?),
        };
        Ok(FetchRequest {
            topic_partition,
            offset,
            max_records,
            max_wait,
            fence,
        })
    }
}

impl Encodable for Record {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        self.offset.encode(buf)?;
        encode_i64(buf, self.timestamp.timestamp_millis());
        encode_i32(buf, checksum(&self.value) as i32);
        encode_string(buf, self.key.as_deref())?;
        encode_bytes(buf, Some(&self.value))
    }
}

impl Decodable for Record {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let offset = Offset::decode(buf)?;
        let timestamp = DateTime::<Utc>::from_timestamp_millis(decode_i64(buf)?)
            .ok_or_else(|| invalid("Invalid timestamp"))?;
        let crc = decode_i32(buf)? as u32;
        let key = decode_string(buf)?;
        let value = decode_bytes(buf)?.unwrap_or_default();
        if checksum(&value) != crc {
            return Err(invalid("Record checksum mismatch"));
        }
        Ok(Record {
            offset,
            key,
            value,
            timestamp,
        })
    }
}

impl Encodable for FetchedBatch {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        self.high_watermark.encode(buf)?;
        encode_i32(buf, self.records.len() as i32);
        for record in &self.records {
            record.encode(buf)?;
        }
        Ok(())
    }
}

impl Decodable for FetchedBatch {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let high_watermark = Offset::decode(buf)?;
        let count = decode_i32(buf)?;
        if count < 0 {
            return Err(invalid("Invalid record count"));
        }
        let records = (0..count)
            .map(|_| Record::decode(buf))
            .collect::<io::Result<Vec<_>>>()?;
        Ok(FetchedBatch {
            records,
            high_watermark,
        })
    }
}

impl Encodable for JoinRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.group.as_str()))?;
        encode_string(buf, Some(self.topic.as_str()))?;
        encode_string(buf, self.member.as_ref().map(|m| m.as_str()))?;
        encode_string(buf, Some(&self.client_id))
    }
}

impl Decodable for JoinRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(JoinRequest {
            group: GroupId(decode_required_string(buf, "Group")?),
            topic: TopicName(decode_required_string(buf, "Topic")?),
            member: decode_string(buf)?.map(MemberId),
            client_id: decode_string(buf)?.unwrap_or_default(),
        })
    }
}

impl Encodable for Assignment {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.member.as_str()))?;
        encode_i32(buf, self.generation.value());
        encode_i32(buf, self.partitions.len() as i32);
        for partition in &self.partitions {
            encode_i32(buf, partition.value() as i32);
        }
        Ok(())
    }
}

impl Decodable for Assignment {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let member = MemberId(decode_required_string(buf, "Member")?);
        let generation = Generation(decode_i32(buf)?);
        let count = decode_i32(buf)?;
        let partitions = (0..count.max(0))
            .map(|_| {
                let id = decode_i32(buf)?;
                u32::try_from(id)
                    .map(PartitionId)
                    .map_err(|_| invalid("Negative partition"))
            })
            .collect::<io::Result<Vec<_>>>()?;
        Ok(Assignment {
            member,
            generation,
            partitions,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub group: GroupId,
    pub member: MemberId,
}

impl Encodable for LeaveGroupRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.group.as_str()))?;
        encode_string(buf, Some(self.member.as_str()))
    }
}

impl Decodable for LeaveGroupRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(LeaveGroupRequest {
            group: GroupId(decode_required_string(buf, "Group")?),
            member: MemberId(decode_required_string(buf, "Member")?),
        })
    }
}

#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub fence: GroupFence,
    pub topic_partition: TopicPartition,
    pub offset: Offset,
}

impl Encodable for OffsetCommitRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        self.fence.encode(buf)?;
        self.topic_partition.encode(buf)?;
        self.offset.encode(buf)
    }
}

impl Decodable for OffsetCommitRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(OffsetCommitRequest {
            fence: GroupFence::decode(buf)?,
            topic_partition: TopicPartition::decode(buf)?,
            offset: Offset::decode(buf)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub group: GroupId,
    pub topic_partition: TopicPartition,
}

impl Encodable for OffsetFetchRequest {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_string(buf, Some(self.group.as_str()))?;
        self.topic_partition.encode(buf)
    }
}

impl Decodable for OffsetFetchRequest {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        Ok(OffsetFetchRequest {
            group: GroupId(decode_required_string(buf, "Group")?),
            topic_partition: TopicPartition::decode(buf)?,
        })
    }
}

/// Committed offset, `-1` on the wire when the group has none
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommittedOffset(pub Option<Offset>);

impl Encodable for CommittedOffset {
    fn encode(&self, buf: &mut BytesMut) -> io::Result<()> {
        encode_i64(buf, self.0.map(|o| o.value() as i64).unwrap_or(-1));
        Ok(())
    }
}

impl Decodable for CommittedOffset {
    fn decode(buf: &mut BytesMut) -> io::Result<Self> {
        let offset = decode_i64(buf)?;
        Ok(CommittedOffset(u64::try_from(offset).ok().map(Offset)))
    }
}

/// Build a complete request frame, size prefix included
pub fn encode_request<T: Encodable>(header: &RequestHeader, body: &T) -> io::Result<BytesMut> {
    let mut payload = BytesMut::new();
    header.encode(&mut payload)?;
    body.encode(&mut payload)?;
    Ok(frame(payload))
}

/// Build a complete response frame for a successful call or a log error
pub fn encode_response<T: Encodable>(
    correlation_id: i32,
    result: &Result<T, LogError>,
) -> io::Result<BytesMut> {
    let mut payload = BytesMut::new();
    ResponseHeader { correlation_id }.encode(&mut payload)?;
    match result {
        Ok(body) => {
            encode_i16(&mut payload, 0);
            body.encode(&mut payload)?;
        }
        Err(err) => {
            encode_i16(&mut payload, err.code());
            let detail = err.detail();
            let detail: String = detail.chars().take(i16::MAX as usize / 4).collect();
            encode_string(&mut payload, Some(&detail))?;
        }
    }
    Ok(frame(payload))
}

/// Split a response payload into its correlation id and result
pub fn decode_response<T: Decodable>(mut buf: BytesMut) -> io::Result<(i32, Result<T, LogError>)> {
    let header = ResponseHeader::decode(&mut buf)?;
    let code = decode_i16(&mut buf)?;
    if code == 0 {
        return Ok((header.correlation_id, Ok(T::decode(&mut buf)?)));
    }
    let detail = decode_string(&mut buf)?.unwrap_or_default();
    Ok((header.correlation_id, Err(LogError::from_wire(code, detail))))
}

fn frame(payload: BytesMut) -> BytesMut {
    let mut framed = BytesMut::with_capacity(payload.len() + 4);
    encode_i32(&mut framed, payload.len() as i32);
    framed.extend_from_slice(&payload);
    framed
}

/// Read one size-prefixed frame. `Ok(None)` on a clean end of stream.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> io::Result<Option<BytesMut>> {
    let mut size = [0u8; 4];
    match reader.read_exact(&mut size).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let size = i32::from_be_bytes(size);
    if size <= 0 || size as usize > MAX_FRAME_SIZE {
        return Err(invalid(&format!("Invalid frame size: {}", size)));
    }
    let mut payload = vec![0u8; size as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some(BytesMut::from(&payload[..])))
}

pub async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, frame: &[u8]) -> io::Result<()> {
    writer.write_all(frame).await?;
    writer.flush().await
}
