//! Command-line surface of `dlqctl`.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use travel_messaging_amqp::RequeuePlacement;
use travel_messaging_runtime::config::QueueNames;
use travel_messaging_runtime::{PeekMode, RelayConfig};

/// Top-level arguments.
#[derive(Debug, Parser)]
#[command(name = "dlqctl")]
#[command(version, about = "Requeue, inspect and resend travel relay messages", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub broker: BrokerOverrides,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub json_logs: bool,

    /// Write Prometheus metrics to this file on exit (textfile collector format)
    #[arg(long, global = true, value_name = "PATH")]
    pub metrics_file: Option<PathBuf>,
}

/// Connection settings that take precedence over the environment.
#[derive(Debug, Args)]
pub struct BrokerOverrides {
    /// Broker host
    #[arg(long, global = true)]
    pub host: Option<String>,

    /// Broker AMQP port
    #[arg(long, global = true)]
    pub port: Option<u16>,

    /// Broker user
    #[arg(long, global = true)]
    pub user: Option<String>,

    /// Broker virtual host
    #[arg(long, global = true)]
    pub vhost: Option<String>,

    /// Where nack-with-requeue puts a message
    #[arg(long, global = true, value_enum, default_value_t = Placement::Tail)]
    pub placement: Placement,
}

impl BrokerOverrides {
    /// Apply the overrides to `config`.
    pub fn apply(&self, config: &mut RelayConfig) {
        if let Some(host) = &self.host {
            config.broker.host.clone_from(host);
        }
        if let Some(port) = self.port {
            config.broker.port = port;
        }
        if let Some(user) = &self.user {
            config.broker.user.clone_from(user);
        }
        if let Some(vhost) = &self.vhost {
            config.broker.vhost.clone_from(vhost);
        }
    }
}

/// Command-line spelling of [`RequeuePlacement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Placement {
    /// Behind every ready message
    Tail,
    /// At the head of the queue (native broker requeue)
    Head,
}

impl From<Placement> for RequeuePlacement {
    fn from(placement: Placement) -> Self {
        match placement {
            Placement::Tail => Self::Tail,
            Placement::Head => Self::Head,
        }
    }
}

/// Queue family a command targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Family {
    /// Booking, cancellation and decision events
    Bookings,
    /// Admin notifications
    Admin,
    /// Every family, bookings first
    All,
}

impl Family {
    /// `(main queue, dead-letter queue)` pairs for this family.
    pub fn pairs(self, queues: &QueueNames) -> Vec<(String, String)> {
        let mut pairs = queues.pairs();
        match self {
            Self::Bookings => pairs.truncate(1),
            Self::Admin => {
                pairs.remove(0);
            }
            Self::All => {}
        }
        pairs
    }
}

/// Subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Move dead letters back to their main queue
    Requeue(RequeueArgs),

    /// Show what is sitting in a dead-letter queue
    Peek(PeekArgs),

    /// Publish an operator-built booking confirmation
    Publish(PublishArgs),

    /// Publish the next hop of a message saved as JSON
    Resend(ResendArgs),

    /// Delete every message in a queue
    Purge(PurgeArgs),

    /// Report depth and consumers of the configured queues
    ListQueues {
        /// Additional queues to report on
        #[arg(value_name = "QUEUE")]
        extra: Vec<String>,
    },

    /// Declare the dead-letter exchange and queues
    DeclareTopology,
}

/// Arguments of `requeue`.
#[derive(Debug, Args)]
pub struct RequeueArgs {
    /// Queue family to drain
    #[arg(long, value_enum, default_value_t = Family::Bookings)]
    pub family: Family,

    /// Explicit dead-letter queue (requires --target)
    #[arg(long, requires = "target", conflicts_with = "family")]
    pub dlq: Option<String>,

    /// Explicit target queue (requires --dlq)
    #[arg(long, requires = "dlq")]
    pub target: Option<String>,

    /// Maximum deliveries to attempt per queue
    #[arg(long)]
    pub max: Option<u32>,

    /// Per-poll timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Park envelopes whose retry count reaches this value
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Queue parked envelopes go to
    #[arg(long, requires = "max_retries")]
    pub parking_queue: Option<String>,
}

/// Arguments of `peek`.
#[derive(Debug, Args)]
pub struct PeekArgs {
    /// Queue to read (defaults to the booking DLQ)
    #[arg(long)]
    pub queue: Option<String>,

    /// Maximum messages to return
    #[arg(long)]
    pub max: Option<u32>,

    /// browse (leave messages in place) or drain (remove them)
    #[arg(long)]
    pub mode: Option<PeekMode>,

    /// Per-poll timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

/// Arguments of `publish`.
#[derive(Debug, Args)]
pub struct PublishArgs {
    /// Booking id
    #[arg(long)]
    pub booking_id: i64,

    /// Customer name
    #[arg(long)]
    pub user_name: String,

    /// Customer email
    #[arg(long)]
    pub user_email: String,

    /// Comma-separated destinations
    #[arg(long)]
    pub destination: String,

    /// Customer id
    #[arg(long, default_value_t = 0)]
    pub user_id: i64,

    /// Total price
    #[arg(long, default_value_t = 0.0)]
    pub price: f64,

    /// Number of guests
    #[arg(long, default_value_t = 1)]
    pub guests: u32,

    /// Number of nights
    #[arg(long, default_value_t = 1)]
    pub nights: u32,

    /// Destination queue (defaults to the booking queue)
    #[arg(long)]
    pub queue: Option<String>,
}

/// Arguments of `resend`.
#[derive(Debug, Args)]
pub struct ResendArgs {
    /// JSON file holding one message (one element of `peek` output)
    #[arg(long, value_name = "PATH")]
    pub file: PathBuf,

    /// Target queue (defaults to the booking queue)
    #[arg(long)]
    pub queue: Option<String>,
}

/// Arguments of `purge`.
#[derive(Debug, Args)]
pub struct PurgeArgs {
    /// Queue to purge
    pub queue: String,

    /// Confirm the purge
    #[arg(long)]
    pub yes: bool,
}
