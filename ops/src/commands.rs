//! Command execution.

use crate::cli::{Command, PeekArgs, PublishArgs, PurgeArgs, RequeueArgs, ResendArgs};
use anyhow::{Context, bail};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use travel_messaging_amqp::{AmqpBroker, RequeuePlacement, Topology};
use travel_messaging_core::{codec, queues};
use travel_messaging_core::{Broker, BrokerError};
use travel_messaging_runtime::config::RelayConfig;
use travel_messaging_runtime::retry::{RetryPolicy, retry_with_predicate};
use travel_messaging_runtime::{
    CancellationToken, Inspector, Maintenance, ManualBookingRequest, ManualPublisher,
    PoisonPolicy, RequeueCoordinator,
};

/// Connect, run `command`, close the connection.
pub async fn run(
    command: Command,
    config: &RelayConfig,
    placement: RequeuePlacement,
) -> anyhow::Result<()> {
    let broker = Arc::new(connect(config, placement).await?);
    let outcome = dispatch(command, config, &broker).await;

    if let Err(e) = broker.close().await {
        tracing::warn!(error = %e, "Broker close failed");
    }
    outcome
}

async fn dispatch(
    command: Command,
    config: &RelayConfig,
    broker: &Arc<AmqpBroker>,
) -> anyhow::Result<()> {
    let shared: Arc<dyn Broker> = broker.clone();
    match command {
        Command::Requeue(args) => requeue(args, config, shared).await,
        Command::Peek(args) => peek(args, config, shared).await,
        Command::Publish(args) => publish(args, config, shared).await,
        Command::Resend(args) => resend(args, config, shared).await,
        Command::Purge(args) => purge(args, shared).await,
        Command::ListQueues { extra } => {
            let mut queues = config.queues.all();
            queues.extend(extra);
            let statuses = Maintenance::new(shared).list_queues(&queues).await?;
            print_json(&statuses)
        }
        Command::DeclareTopology => {
            let topology = Topology::new(
                config.queues.dead_letter_exchange.clone(),
                [config.queues.bookings.clone(), config.queues.admin.clone()],
            );
            let report = broker.declare_topology(&topology).await?;
            print_json(&json!({
                "declared": report.declared,
                "existing": report.existing,
            }))
        }
    }
}

async fn connect(config: &RelayConfig, placement: RequeuePlacement) -> anyhow::Result<AmqpBroker> {
    let uri = config.broker.uri();
    tracing::info!(uri = %config.broker.redacted_uri(), "Connecting to broker");

    let policy = RetryPolicy::builder()
        .max_retries(config.connect_retries)
        .build();
    let broker = retry_with_predicate(
        policy,
        || {
            AmqpBroker::builder()
                .uri(uri.as_str())
                .requeue_placement(placement)
                .build()
        },
        |e| matches!(e, BrokerError::Connection(_)),
    )
    .await
    .with_context(|| format!("Failed to connect to {}", config.broker.redacted_uri()))?;

    Ok(broker)
}

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted; finishing the current delivery");
            trigger.cancel();
        }
    });
    token
}

async fn requeue(args: RequeueArgs, config: &RelayConfig, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let mut coordinator = RequeueCoordinator::new(broker, config);
    if let Some(ms) = args.timeout_ms {
        coordinator = coordinator.with_timeout(Duration::from_millis(ms));
    }
    let policy = match args.max_retries {
        Some(max_retries) => PoisonPolicy::Park {
            max_retries,
            queue: args
                .parking_queue
                .unwrap_or_else(|| queues::PARKING.to_string()),
        },
        None => config.poison.clone(),
    };
    if policy == PoisonPolicy::Unbounded {
        tracing::warn!("No retry ceiling: poison messages will cycle between DLQ and target");
    }
    coordinator = coordinator.with_poison_policy(policy);

    let max = args.max.unwrap_or(config.requeue.max_messages);
    let pairs = match (args.dlq, args.target) {
        (Some(dlq), Some(target)) => vec![(target, dlq)],
        _ => args.family.pairs(&config.queues),
    };

    let cancel = interrupt_token();
    let mut runs = Vec::with_capacity(pairs.len());
    for (target, dlq) in pairs {
        let report = coordinator
            .requeue_until(&dlq, &target, max, &cancel)
            .await
            .with_context(|| format!("Requeue from {dlq} aborted"))?;
        runs.push(json!({ "dlq": dlq, "target": target, "report": report }));
        if cancel.is_cancelled() {
            break;
        }
    }
    print_json(&runs)
}

async fn peek(args: PeekArgs, config: &RelayConfig, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let mut inspector = Inspector::new(broker, config);
    if let Some(ms) = args.timeout_ms {
        inspector = inspector.with_timeout(Duration::from_millis(ms));
    }
    let queue = args.queue.unwrap_or_else(|| config.queues.bookings_dlq.clone());
    let max = args.max.unwrap_or(config.peek.max_messages);
    let mode = args.mode.unwrap_or(config.peek_mode);

    let messages = inspector
        .peek_until(&queue, max, mode, &interrupt_token())
        .await?;
    print_json(&messages)
}

async fn publish(args: PublishArgs, config: &RelayConfig, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let request = ManualBookingRequest::new(
        args.booking_id,
        args.user_name,
        args.user_email,
        args.destination,
    )
    .with_user_id(args.user_id)
    .with_price(args.price)
    .with_guests(args.guests)
    .with_nights(args.nights)
    .with_queue(args.queue.unwrap_or_else(|| config.queues.bookings.clone()));

    let message = ManualPublisher::new(broker).publish_manual(&request).await?;
    print_json(&message)
}

async fn resend(args: ResendArgs, config: &RelayConfig, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&args.file)
        .await
        .with_context(|| format!("Failed to read {}", args.file.display()))?;
    let original = codec::decode_any(&bytes)
        .with_context(|| format!("{} does not hold a relay message", args.file.display()))?;
    let target = args.queue.unwrap_or_else(|| config.queues.bookings.clone());

    let copy = ManualPublisher::new(broker).resend(&original, &target).await?;
    print_json(&copy)
}

async fn purge(args: PurgeArgs, broker: Arc<dyn Broker>) -> anyhow::Result<()> {
    if !args.yes {
        bail!("Refusing to purge {} without --yes", args.queue);
    }
    let purged = Maintenance::new(broker).purge(&args.queue).await?;
    print_json(&json!({ "queue": args.queue, "purged": purged }))
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
