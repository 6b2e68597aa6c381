use bytes::BytesMut;
use log::{debug, error, info, warn};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::{
    domain::{
        errors::LogError,
        repositories::{GroupLog, LogProducer},
        value_objects::*,
    },
    infrastructure::{
        log::InMemoryLog,
        protocol::{
            encode_response, read_frame, write_frame, ApiKey, CommittedOffset, Decodable,
            LeaveGroupRequest, OffsetCommitRequest, OffsetFetchRequest, ProduceRequest,
            RequestHeader,
        },
    },
};

/// Serves an [`InMemoryLog`] to remote producers and consumers over TCP
pub struct BrokerServer {
    log: Arc<InMemoryLog>,
}

impl BrokerServer {
    pub fn new(log: Arc<InMemoryLog>) -> Self {
        Self { log }
    }

    /// Accept connections until `shutdown` fires
    pub async fn run(
        &self,
        listener: TcpListener,
        shutdown: CancellationToken,
    ) -> anyhow::Result<()> {
        info!("Broker listening on {}", listener.local_addr()?);

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Broker shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!("New connection from: {}", addr);
                    let handler = ConnectionHandler::new(stream, Arc::clone(&self.log));
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            _ = shutdown.cancelled() => {}
                            result = handler.handle() => {
                                if let Err(e) = result {
                                    warn!("Connection from {} closed: {}", addr, e);
                                }
                            }
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

/// Handles individual client connections, one request at a time
struct ConnectionHandler {
    stream: TcpStream,
    log: Arc<InMemoryLog>,
}

fn decode<T: Decodable>(buf: &mut BytesMut) -> Result<T, LogError> {
    T::decode(buf).map_err(|e| LogError::Protocol(e.to_string()))
}

impl ConnectionHandler {
    fn new(stream: TcpStream, log: Arc<InMemoryLog>) -> Self {
        Self { stream, log }
    }

    async fn handle(mut self) -> anyhow::Result<()> {
        while let Some(mut buf) = read_frame(&mut self.stream).await? {
            let header = RequestHeader::decode(&mut buf)?;
            debug!(
                "Processing {} request (correlation_id: {}, client: {:?})",
                header.api_key.name(),
                header.correlation_id,
                header.client_id
            );
            let response = self.process(&header, &mut buf).await?;
            write_frame(&mut self.stream, &response).await?;
        }
        debug!("Client disconnected");
        Ok(())
    }

    async fn process(
        &self,
        header: &RequestHeader,
        buf: &mut BytesMut,
    ) -> anyhow::Result<BytesMut> {
        let correlation_id = header.correlation_id;
        let response = match header.api_key {
            ApiKey::Produce => {
                let result: Result<Ack, LogError> = async {
                    let request: ProduceRequest = decode(buf)?;
                    self.log.append(&request.topic, request.key, request.value).await
                }
                .await;
                if let Err(e) = &result {
                    error!("Failed to store record: {}", e);
                }
                encode_response(correlation_id, &result)?
            }
            ApiKey::Fetch => {
                let result: Result<FetchedBatch, LogError> = async {
                    let request: FetchRequest = decode(buf)?;
                    self.log.fetch(request).await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::ListOffsets => {
                let result: Result<Offset, LogError> = async {
                    let topic_partition: TopicPartition = decode(buf)?;
                    self.log.end_offset(&topic_partition).await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::JoinGroup => {
                let result: Result<Assignment, LogError> = async {
                    let request: JoinRequest = decode(buf)?;
                    self.log.join_group(request).await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::Heartbeat => {
                let result: Result<(), LogError> = async {
                    let fence: GroupFence = decode(buf)?;
                    self.log.heartbeat(&fence).await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::LeaveGroup => {
                let result: Result<(), LogError> = async {
                    let request: LeaveGroupRequest = decode(buf)?;
                    self.log.leave_group(&request.group, &request.member).await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::OffsetCommit => {
                let result: Result<(), LogError> = async {
                    let request: OffsetCommitRequest = decode(buf)?;
                    self.log
                        .commit_offset(&request.fence, &request.topic_partition, request.offset)
                        .await
                }
                .await;
                encode_response(correlation_id, &result)?
            }
            ApiKey::OffsetFetch => {
                let result: Result<CommittedOffset, LogError> = async {
                    let request: OffsetFetchRequest = decode(buf)?;
                    self.log
                        .committed_offset(&request.group, &request.topic_partition)
                        .await
                        .map(CommittedOffset)
                }
                .await;
                encode_response(correlation_id, &result)?
            }
        };
        Ok(response)
    }
}
