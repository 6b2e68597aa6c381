//! Integration tests for the notification pipeline
//!
//! These tests run producers and group members against an in-process log,
//! and exercise the TCP broker and the HTTP surfaces over loopback.

use kafka_notify::application::{
    ConsumerStats, GroupMember, MemberState, QueryInboxUseCase, SendNotificationUseCase,
};
use kafka_notify::config::{ConsumerSettings, OffsetReset};
use kafka_notify::domain::codec;
use kafka_notify::domain::entities::{Notification, User};
use kafka_notify::domain::errors::{DomainError, LogError};
use kafka_notify::domain::group::GroupTimeouts;
use kafka_notify::domain::repositories::{GroupLog, InboxRepository, LogProducer};
use kafka_notify::domain::services::MessageRoutingService;
use kafka_notify::domain::value_objects::*;
use kafka_notify::infrastructure::{
    http, Backoff, BrokerServer, InMemoryInboxRepository, InMemoryLog, InMemoryUserDirectory,
    RemoteLog,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(10);

fn topic() -> TopicName {
    TopicName::from("notifications")
}

fn fast_timeouts() -> GroupTimeouts {
    GroupTimeouts {
        session: Duration::from_millis(600),
        rebalance: Duration::from_millis(600),
    }
}

fn consumer_settings(client_id: &str) -> ConsumerSettings {
    ConsumerSettings {
        client_id: client_id.to_string(),
        heartbeat_interval: Duration::from_millis(100),
        fetch_max_wait: Duration::from_millis(100),
        max_join_failures: 20,
        ..ConsumerSettings::default()
    }
}

fn sender(producer: Arc<dyn LogProducer>) -> SendNotificationUseCase {
    SendNotificationUseCase::new(
        Arc::new(InMemoryUserDirectory::with_default_users()),
        producer,
        topic(),
    )
}

struct RunningMember {
    inbox: Arc<InMemoryInboxRepository>,
    state: watch::Receiver<MemberState>,
    stats: Arc<ConsumerStats>,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<(), DomainError>>,
}

impl RunningMember {
    fn spawn(log: Arc<dyn GroupLog>, settings: ConsumerSettings) -> Self {
        Self::spawn_into(log, settings, Arc::new(InMemoryInboxRepository::new()))
    }

    /// Spawn a member that applies into an inbox it may share with others
    fn spawn_into(
        log: Arc<dyn GroupLog>,
        settings: ConsumerSettings,
        inbox: Arc<InMemoryInboxRepository>,
    ) -> Self {
        let member = GroupMember::new(log, inbox.clone(), settings);
        let state = member.state();
        let stats = member.stats();
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(member.run(shutdown.clone()));
        Self {
            inbox,
            state,
            stats,
            shutdown,
            handle,
        }
    }

    /// Wait until the member owns exactly `count` partitions
    async fn owns(&mut self, count: usize) -> Vec<PartitionId> {
        let state = tokio::time::timeout(
            WAIT,
            self.state.wait_for(|state| match state {
                MemberState::Assigned { partitions, .. } => partitions.len() == count,
                _ => false,
            }),
        )
        .await
        .expect("member was not assigned in time")
        .expect("member state channel closed");
        state.partitions().to_vec()
    }

    async fn stop(self) -> Arc<InMemoryInboxRepository> {
        self.shutdown.cancel();
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("member did not stop in time")
            .expect("member task panicked")
            .expect("member stopped with an error");
        self.inbox
    }
}

/// Poll an inbox until it holds at least `count` notifications
async fn inbox_with(
    inbox: &InMemoryInboxRepository,
    user: UserId,
    count: usize,
) -> Vec<Notification> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let notifications = inbox.get_all(user);
        if notifications.len() >= count {
            return notifications;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "inbox of user {} holds {} of {} notifications",
            user,
            notifications.len(),
            count
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Poll an inbox until its latest notification carries `message`
async fn inbox_ending_with(
    inbox: &InMemoryInboxRepository,
    user: UserId,
    message: &str,
) -> Vec<Notification> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let notifications = inbox.get_all(user);
        if notifications.last().is_some_and(|n| n.message() == message) {
            return notifications;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "inbox of user {} never received {:?}",
            user,
            message
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn messages(notifications: &[Notification]) -> Vec<&str> {
    notifications.iter().map(|n| n.message()).collect()
}

/// Two notifications to one recipient arrive in send order
#[tokio::test]
async fn test_notifications_reach_recipient_inbox_in_order() {
    // Arrange
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    let mut member = RunningMember::spawn(log.clone(), consumer_settings("solo"));
    member.owns(4).await;

    // Act
    send.execute(UserId(1), UserId(2), "hi".into()).await.unwrap();
    send.execute(UserId(3), UserId(2), "yo".into()).await.unwrap();

    // Assert
    let inbox = inbox_with(&member.inbox, UserId(2), 2).await;
    assert_eq!(messages(&inbox), vec!["hi", "yo"]);
    assert_eq!(inbox[0].from(), &User::new(1, "Emma"));
    assert_eq!(inbox[1].from(), &User::new(3, "Rick"));
    assert_eq!(inbox[0].to(), &User::new(2, "Bruno"));
    assert!(member.inbox.get_all(UserId(1)).is_empty());

    member.stop().await;
}

/// An unknown sender is rejected and nothing reaches the log
#[tokio::test]
async fn test_unknown_sender_publishes_nothing() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());

    let err = send.execute(UserId(99), UserId(2), "hi".into()).await.unwrap_err();
    assert!(matches!(err, DomainError::UserNotFound(UserId(99))));

    for partition in 0..4 {
        let tp = TopicPartition::new(topic(), PartitionId(partition));
        assert_eq!(log.end_offset(&tp).await.unwrap(), Offset(0));
    }
}

/// Many notifications to one recipient keep their relative order
#[tokio::test]
async fn test_per_recipient_ordering_with_interleaved_recipients() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    let mut member = RunningMember::spawn(log.clone(), consumer_settings("ordering"));
    member.owns(4).await;

    for i in 0..50 {
        send.execute(UserId(1), UserId(3), format!("to-rick-{}", i)).await.unwrap();
        send.execute(UserId(2), UserId(4), format!("to-lena-{}", i)).await.unwrap();
    }

    let rick = inbox_with(&member.inbox, UserId(3), 50).await;
    let lena = inbox_with(&member.inbox, UserId(4), 50).await;
    let expected_rick: Vec<String> = (0..50).map(|i| format!("to-rick-{}", i)).collect();
    let expected_lena: Vec<String> = (0..50).map(|i| format!("to-lena-{}", i)).collect();
    assert_eq!(messages(&rick), expected_rick);
    assert_eq!(messages(&lena), expected_lena);

    member.stop().await;
}

/// Two members split the partitions and a crashed member's share moves to the survivor
#[tokio::test]
async fn test_partitions_move_to_survivor_after_member_crash() {
    // Arrange
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    let mut first = RunningMember::spawn(log.clone(), consumer_settings("first"));
    first.owns(4).await;
    let mut second = RunningMember::spawn(log.clone(), consumer_settings("second"));

    let mut owned = second.owns(2).await;
    owned.extend(first.owns(2).await);
    owned.sort();
    assert_eq!(owned, (0..4).map(PartitionId).collect::<Vec<_>>());

    for to in 1..=4 {
        send.execute(UserId(1), UserId(to), format!("before-{}", to)).await.unwrap();
    }
    for to in 1..=4 {
        let user = UserId(to);
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let copies = first.inbox.get_all(user).len() + second.inbox.get_all(user).len();
            if copies == 1 {
                break;
            }
            assert!(
                copies == 0 && tokio::time::Instant::now() < deadline,
                "user {} has {} copies",
                to,
                copies
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    // Act
    second.handle.abort();

    // Assert
    first.owns(4).await;
    for to in 1..=4 {
        send.execute(UserId(2), UserId(to), format!("after-{}", to)).await.unwrap();
    }
    for to in 1..=4 {
        let inbox = inbox_ending_with(&first.inbox, UserId(to), &format!("after-{}", to)).await;
        assert_eq!(inbox.iter().filter(|n| n.message().starts_with("after")).count(), 1);
    }
    assert!(first.stats.rebalances() >= 2);

    first.stop().await;
}

/// A member that leaves hands its partitions over without waiting for session
/// expiry
#[tokio::test]
async fn test_graceful_leave_hands_partitions_over() {
    let log = Arc::new(InMemoryLog::new(
        4,
        GroupTimeouts {
            session: Duration::from_secs(30),
            rebalance: Duration::from_secs(5),
        },
    ));
    let mut first = RunningMember::spawn(log.clone(), consumer_settings("stays"));
    first.owns(4).await;
    let mut second = RunningMember::spawn(log.clone(), consumer_settings("leaves"));
    second.owns(2).await;
    first.owns(2).await;

    let started = tokio::time::Instant::now();
    let mut state = second.state.clone();
    second.stop().await;
    assert_eq!(*state.borrow_and_update(), MemberState::Stopped);

    first.owns(4).await;
    assert!(started.elapsed() < Duration::from_secs(5));

    first.stop().await;
}

/// Notifications published while a second member joins and then leaves all
/// land once, in send order, and every partition ends fully committed
#[tokio::test]
async fn test_publishing_through_join_and_graceful_leave() {
    // Arrange
    let log = Arc::new(InMemoryLog::new(
        4,
        GroupTimeouts {
            session: Duration::from_secs(30),
            rebalance: Duration::from_secs(5),
        },
    ));
    let inbox = Arc::new(InMemoryInboxRepository::new());
    let mut first =
        RunningMember::spawn_into(log.clone(), consumer_settings("steady"), inbox.clone());
    first.owns(4).await;

    let publishing = CancellationToken::new();
    let publisher = {
        let send = sender(log.clone());
        let publishing = publishing.clone();
        tokio::spawn(async move {
            let mut sent = 0i64;
            while !publishing.is_cancelled() {
                let to = UserId(sent % 4 + 1);
                send.execute(UserId(1), to, format!("m-{}", sent)).await.unwrap();
                sent += 1;
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            sent
        })
    };

    // Act
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut second =
        RunningMember::spawn_into(log.clone(), consumer_settings("transient"), inbox.clone());
    second.owns(2).await;
    first.owns(2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    second.stop().await;
    first.owns(4).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    publishing.cancel();
    let sent = publisher.await.unwrap();

    // Assert
    for user in 1..=4 {
        let expected: Vec<String> = (0..sent)
            .filter(|i| i % 4 + 1 == user)
            .map(|i| format!("m-{}", i))
            .collect();
        let delivered = inbox_with(&inbox, UserId(user), expected.len()).await;
        assert_eq!(messages(&delivered), expected, "inbox of user {}", user);
    }

    let group = GroupId::from(kafka_notify::config::DEFAULT_GROUP);
    let deadline = tokio::time::Instant::now() + WAIT;
    for partition in 0..4 {
        let tp = TopicPartition::new(topic(), PartitionId(partition));
        let end = log.end_offset(&tp).await.unwrap();
        loop {
            let committed = log.committed_offset(&group, &tp).await.unwrap();
            if committed.unwrap_or_default() == end {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "{} committed {:?} of {}",
                tp,
                committed,
                end
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    first.stop().await;
}

/// A new member of the group resumes where the previous one committed
#[tokio::test]
async fn test_restarted_group_resumes_from_committed_offset() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());

    let mut first = RunningMember::spawn(log.clone(), consumer_settings("before-restart"));
    first.owns(4).await;
    for i in 0..5 {
        send.execute(UserId(1), UserId(2), format!("early-{}", i)).await.unwrap();
    }
    inbox_with(&first.inbox, UserId(2), 5).await;
    first.stop().await;

    let ack = send.execute(UserId(1), UserId(2), "late-0".into()).await.unwrap();
    let tp = TopicPartition::new(topic(), ack.partition);
    let group = GroupId::from(kafka_notify::config::DEFAULT_GROUP);
    assert_eq!(log.committed_offset(&group, &tp).await.unwrap(), Some(Offset(5)));

    let mut second = RunningMember::spawn(log.clone(), consumer_settings("after-restart"));
    second.owns(4).await;
    let inbox = inbox_with(&second.inbox, UserId(2), 1).await;
    assert_eq!(messages(&inbox), vec!["late-0"]);

    second.stop().await;
}

/// A record that does not decode is skipped and counted, and the partition keeps flowing
#[tokio::test]
async fn test_undecodable_record_is_skipped() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    log.append(&topic(), Some("2".into()), b"not a notification".to_vec())
        .await
        .unwrap();
    send.execute(UserId(4), UserId(2), "after garbage".into()).await.unwrap();

    let mut member = RunningMember::spawn(log.clone(), consumer_settings("skipper"));
    member.owns(4).await;

    let inbox = inbox_with(&member.inbox, UserId(2), 1).await;
    assert_eq!(messages(&inbox), vec!["after garbage"]);
    assert_eq!(member.stats.skipped(), 1);

    member.stop().await;
}

/// With the latest reset policy, history before the assignment is not replayed
#[tokio::test]
async fn test_latest_reset_skips_history() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    for i in 0..3 {
        send.execute(UserId(1), UserId(3), format!("old-{}", i)).await.unwrap();
    }

    let settings = ConsumerSettings {
        offset_reset: OffsetReset::Latest,
        ..consumer_settings("latest")
    };
    let mut member = RunningMember::spawn(log.clone(), settings);
    member.owns(4).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    send.execute(UserId(1), UserId(3), "new".into()).await.unwrap();
    let inbox = inbox_with(&member.inbox, UserId(3), 1).await;
    assert_eq!(messages(&inbox), vec!["new"]);

    member.stop().await;
}

async fn start_broker(log: Arc<InMemoryLog>) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    let server = BrokerServer::new(log);
    let token = shutdown.clone();
    tokio::spawn(async move { server.run(listener, token).await });
    (addr, shutdown)
}

/// Producer and member talk to the broker over TCP
#[tokio::test]
async fn test_pipeline_over_tcp_broker() {
    let (addr, broker) = start_broker(Arc::new(InMemoryLog::new(4, fast_timeouts()))).await;
    let send = sender(Arc::new(RemoteLog::new(addr.clone(), "test-producer")));
    let mut member = RunningMember::spawn(
        Arc::new(RemoteLog::new(addr.clone(), "test-consumer")),
        consumer_settings("remote"),
    );
    member.owns(4).await;

    send.execute(UserId(1), UserId(2), "hi".into()).await.unwrap();
    send.execute(UserId(3), UserId(2), "yo".into()).await.unwrap();

    let inbox = inbox_with(&member.inbox, UserId(2), 2).await;
    assert_eq!(messages(&inbox), vec!["hi", "yo"]);

    member.stop().await;
    broker.cancel();
}

/// A backlog of large notifications drains over TCP in frame-sized fetches,
/// and a notification too large for any frame is refused at send time
#[tokio::test]
async fn test_large_notifications_over_tcp_broker() {
    let (addr, broker) = start_broker(Arc::new(InMemoryLog::new(1, fast_timeouts()))).await;
    let send = sender(Arc::new(RemoteLog::new(addr.clone(), "bulk-producer")));
    let filler = "x".repeat(12_000);
    let expected: Vec<String> = (0..100).map(|i| format!("{}-{}", i, filler)).collect();
    for message in &expected {
        send.execute(UserId(1), UserId(2), message.clone()).await.unwrap();
    }

    let mut member = RunningMember::spawn(
        Arc::new(RemoteLog::new(addr.clone(), "bulk-consumer")),
        consumer_settings("bulk"),
    );
    member.owns(1).await;

    let inbox = inbox_with(&member.inbox, UserId(2), expected.len()).await;
    assert_eq!(messages(&inbox), expected);
    assert_eq!(member.stats.skipped(), 0);
    assert!(matches!(*member.state.borrow(), MemberState::Assigned { .. }));

    let err = send
        .execute(UserId(1), UserId(2), "y".repeat(1_100_000))
        .await
        .unwrap_err();
    assert!(matches!(err, DomainError::Publish(LogError::RecordTooLarge(_))));

    member.stop().await;
    broker.cancel();
}

/// Coordinator errors keep their meaning across the wire
#[tokio::test]
async fn test_remote_errors_round_trip() {
    let (addr, broker) = start_broker(Arc::new(InMemoryLog::new(4, fast_timeouts()))).await;
    let remote = RemoteLog::new(addr, "errors");

    let fence = GroupFence {
        group: GroupId::from("nobody-home"),
        member: MemberId::from("ghost"),
        generation: Generation(3),
    };
    let err = remote.heartbeat(&fence).await.unwrap_err();
    assert!(matches!(err, LogError::UnknownMember(_)));

    let tp = TopicPartition::new(topic(), PartitionId(0));
    let request = FetchRequest {
        topic_partition: tp.clone(),
        offset: Offset(7),
        max_records: 10,
        max_wait: Duration::from_millis(10),
        fence: None,
    };
    assert_eq!(remote.fetch(request).await.unwrap_err(), LogError::OffsetOutOfRange(7));
    assert_eq!(remote.committed_offset(&fence.group, &tp).await.unwrap(), None);

    broker.cancel();
}

/// A broker that never comes up is reported as unavailable once the backoff
/// is spent
#[tokio::test]
async fn test_unreachable_broker_is_unavailable() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let remote =
        RemoteLog::new(addr, "nobody").with_backoff(Backoff::new(Duration::from_millis(5), 2));
    let notification = Notification::new(User::new(1, "Emma"), User::new(2, "Bruno"), "hi");
    let payload = codec::encode(&notification).unwrap();
    let err = remote.append(&topic(), Some("2".into()), payload).await.unwrap_err();
    assert!(matches!(err, LogError::Unavailable(_)));

    let send = sender(Arc::new(remote));
    let err = send.execute(UserId(1), UserId(2), "hi".into()).await.unwrap_err();
    assert!(matches!(err, DomainError::Publish(LogError::Unavailable(_))));
}

/// Send a raw HTTP/1.1 request and return status code and body
async fn http_request(
    addr: &str,
    method: &str,
    path: &str,
    content_type: Option<&str>,
    body: &str,
) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let mut request = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n",
        method, path, addr
    );
    if let Some(content_type) = content_type {
        request.push_str(&format!("Content-Type: {}\r\n", content_type));
    }
    request.push_str(&format!("Content-Length: {}\r\n\r\n{}", body.len(), body));
    stream.write_all(request.as_bytes()).await.unwrap();

    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    let status = response
        .split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .unwrap();
    let body = response.split("\r\n\r\n").nth(1).unwrap_or_default().to_string();
    (status, body)
}

async fn start_http(app: axum::Router) -> (String, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let shutdown = CancellationToken::new();
    tokio::spawn(http::serve(listener, app, shutdown.clone()));
    (addr, shutdown)
}

/// The producer accepts form and JSON bodies and maps failures to status codes
#[tokio::test]
async fn test_producer_http_surface() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let app = http::producer_router(Arc::new(sender(log.clone())));
    let (addr, shutdown) = start_http(app).await;
    let form = Some("application/x-www-form-urlencoded");
    let json = Some("application/json");

    let (status, body) =
        http_request(&addr, "POST", "/send", form, "fromId=1&toId=2&message=hello+there").await;
    assert_eq!(status, 200, "{}", body);
    let sent: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(sent["message"], "Notification sent successfully!");
    assert_eq!(sent["offset"], 0);

    let body = r#"{"fromId":"3","toId":"2","message":"yo"}"#;
    let (status, _) = http_request(&addr, "POST", "/send", json, body).await;
    assert_eq!(status, 200);

    let (status, body) =
        http_request(&addr, "POST", "/send", form, "fromId=abc&toId=2&message=x").await;
    assert_eq!(status, 400);
    assert!(body.contains("fromId"), "{}", body);

    let body = r#"{"fromId":"1","toId":"42","message":"x"}"#;
    let (status, body) = http_request(&addr, "POST", "/send", json, body).await;
    assert_eq!(status, 404);
    let error: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(error["message"], "user 42 not found");

    let tp = TopicPartition::new(topic(), MessageRoutingService::new().route(Some("2"), 4));
    assert_eq!(log.end_offset(&tp).await.unwrap(), Offset(2));

    shutdown.cancel();
}

/// The consumer serves inboxes and reports its membership
#[tokio::test]
async fn test_consumer_http_surface() {
    let log = Arc::new(InMemoryLog::new(4, fast_timeouts()));
    let send = sender(log.clone());
    let mut member = RunningMember::spawn(log.clone(), consumer_settings("http"));
    member.owns(4).await;
    let app = http::consumer_router(
        Arc::new(QueryInboxUseCase::new(member.inbox.clone())),
        member.state.clone(),
        member.stats.clone(),
    );
    let (addr, shutdown) = start_http(app).await;

    send.execute(UserId(1), UserId(2), "hi".into()).await.unwrap();
    inbox_with(&member.inbox, UserId(2), 1).await;

    let (status, body) = http_request(&addr, "GET", "/notifications/2", None, "").await;
    assert_eq!(status, 200);
    let inbox: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(inbox["notifications"][0]["from"]["name"], "Emma");
    assert_eq!(inbox["notifications"][0]["to"]["id"], 2);
    assert_eq!(inbox["notifications"][0]["message"], "hi");

    let (status, body) = http_request(&addr, "GET", "/notifications/7", None, "").await;
    assert_eq!(status, 200);
    assert_eq!(body, r#"{"notifications":[]}"#);

    let (status, _) = http_request(&addr, "GET", "/notifications/seven", None, "").await;
    assert_eq!(status, 400);

    let (status, body) = http_request(&addr, "GET", "/health", None, "").await;
    assert_eq!(status, 200);
    let health: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["state"], "assigned");
    assert_eq!(health["partitions"].as_array().unwrap().len(), 4);
    assert_eq!(health["skipped"], 0);

    shutdown.cancel();
    member.stop().await;
}
