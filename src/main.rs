use clap::{Args, Parser, Subcommand};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use kafka_notify::application::{GroupMember, QueryInboxUseCase, SendNotificationUseCase};
use kafka_notify::config::*;
use kafka_notify::domain::group::GroupTimeouts;
use kafka_notify::domain::value_objects::{GroupId, TopicName};
use kafka_notify::infrastructure::{
    http, BrokerServer, InMemoryInboxRepository, InMemoryLog, InMemoryUserDirectory, RemoteLog,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the partitioned log and group coordinator
    Broker(BrokerArgs),
    /// Accept send requests over HTTP and publish them to the log
    Producer(ProducerArgs),
    /// Join the consumer group and serve inboxes over HTTP
    Consumer(ConsumerArgs),
}

#[derive(Args)]
struct BrokerArgs {
    /// Address to accept broker connections on
    #[arg(long, env = "BROKER_LISTEN", default_value = DEFAULT_BROKER_ADDRESS)]
    listen: String,

    /// Partitions of topics created on first use
    #[arg(long, env = "PARTITIONS", default_value_t = DEFAULT_PARTITIONS)]
    partitions: u32,

    /// Silence after which a group member is evicted, in milliseconds
    #[arg(long, env = "SESSION_TIMEOUT_MS", default_value_t = 10_000)]
    session_timeout_ms: u64,

    /// Time members get to rejoin a rebalancing group, in milliseconds
    #[arg(long, env = "REBALANCE_TIMEOUT_MS", default_value_t = 10_000)]
    rebalance_timeout_ms: u64,
}

#[derive(Args)]
struct ProducerArgs {
    /// Broker address
    #[arg(long, env = "BROKER", default_value = DEFAULT_BROKER_ADDRESS)]
    broker: String,

    #[arg(long, env = "TOPIC", default_value = DEFAULT_TOPIC)]
    topic: String,

    /// HTTP port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_PRODUCER_PORT)]
    port: u16,
}

#[derive(Args)]
struct ConsumerArgs {
    /// Broker address
    #[arg(long, env = "BROKER", default_value = DEFAULT_BROKER_ADDRESS)]
    broker: String,

    #[arg(long, env = "TOPIC", default_value = DEFAULT_TOPIC)]
    topic: String,

    #[arg(long, env = "GROUP_ID", default_value = DEFAULT_GROUP)]
    group: String,

    /// Client id prefix of this member's id
    #[arg(long, env = "CLIENT_ID", default_value = "notifications-consumer")]
    client_id: String,

    /// HTTP port
    #[arg(short, long, env = "PORT", default_value_t = DEFAULT_CONSUMER_PORT)]
    port: u16,

    #[arg(long, env = "HEARTBEAT_INTERVAL_MS", default_value_t = 1_000)]
    heartbeat_interval_ms: u64,

    /// Longest a fetch waits for new records, in milliseconds
    #[arg(long, env = "FETCH_MAX_WAIT_MS", default_value_t = 500)]
    fetch_max_wait_ms: u64,

    #[arg(long, env = "FETCH_MAX_RECORDS", default_value_t = 100)]
    fetch_max_records: usize,

    /// Where to start partitions without a committed offset
    #[arg(long, env = "OFFSET_RESET", value_enum, default_value_t = OffsetReset::Earliest)]
    offset_reset: OffsetReset,
}

impl From<BrokerArgs> for BrokerSettings {
    fn from(args: BrokerArgs) -> Self {
        Self {
            listen: args.listen,
            partitions: args.partitions,
            timeouts: GroupTimeouts {
                session: Duration::from_millis(args.session_timeout_ms),
                rebalance: Duration::from_millis(args.rebalance_timeout_ms),
            },
        }
    }
}

impl TryFrom<ProducerArgs> for ProducerSettings {
    type Error = anyhow::Error;

    fn try_from(args: ProducerArgs) -> anyhow::Result<Self> {
        Ok(Self {
            broker: args.broker,
            topic: TopicName::new(args.topic)?,
            port: args.port,
        })
    }
}

impl TryFrom<ConsumerArgs> for ConsumerSettings {
    type Error = anyhow::Error;

    fn try_from(args: ConsumerArgs) -> anyhow::Result<Self> {
        Ok(Self {
            broker: args.broker,
            topic: TopicName::new(args.topic)?,
            group: GroupId::new(args.group),
            client_id: args.client_id,
            port: args.port,
            heartbeat_interval: Duration::from_millis(args.heartbeat_interval_ms),
            fetch_max_wait: Duration::from_millis(args.fetch_max_wait_ms),
            fetch_max_records: args.fetch_max_records,
            offset_reset: args.offset_reset,
            ..ConsumerSettings::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
            }
            shutdown.cancel();
        });
    }

    match cli.command {
        Command::Broker(args) => run_broker(args.into(), shutdown).await,
        Command::Producer(args) => run_producer(args.try_into()?, shutdown).await,
        Command::Consumer(args) => run_consumer(args.try_into()?, shutdown).await,
    }
}

async fn run_broker(settings: BrokerSettings, shutdown: CancellationToken) -> anyhow::Result<()> {
    info!(
        "Starting broker on {} ({} partition(s) per topic)",
        settings.listen, settings.partitions
    );
    let log = Arc::new(InMemoryLog::new(settings.partitions, settings.timeouts));
    let listener = TcpListener::bind(&settings.listen).await?;
    BrokerServer::new(log).run(listener, shutdown).await
}

async fn run_producer(
    settings: ProducerSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!("Starting producer for topic {} via {}", settings.topic, settings.broker);
    let users = Arc::new(InMemoryUserDirectory::with_default_users());
    let log = Arc::new(RemoteLog::new(settings.broker.clone(), "notifications-producer"));
    let send = Arc::new(SendNotificationUseCase::new(users, log, settings.topic.clone()));

    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    http::serve(listener, http::producer_router(send), shutdown).await
}

async fn run_consumer(
    settings: ConsumerSettings,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    info!(
        "Starting consumer {} in group {} for topic {} via {}",
        settings.client_id, settings.group, settings.topic, settings.broker
    );
    let inbox = Arc::new(InMemoryInboxRepository::new());
    let log = Arc::new(RemoteLog::new(settings.broker.clone(), settings.client_id.clone()));
    let member = GroupMember::new(log, inbox.clone(), settings.clone());
    let app = http::consumer_router(
        Arc::new(QueryInboxUseCase::new(inbox)),
        member.state(),
        member.stats(),
    );

    let listener = TcpListener::bind(("0.0.0.0", settings.port)).await?;
    let server = tokio::spawn(http::serve(listener, app, shutdown.clone()));

    let outcome = member.run(shutdown.clone()).await;
    if let Err(e) = &outcome {
        error!("Consumer stopped: {}", e);
        shutdown.cancel();
    }
    server.await??;
    outcome.map_err(Into::into)
}
