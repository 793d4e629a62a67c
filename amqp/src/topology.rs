//! Dead-letter topology declaration.
//!
//! Every main queue `q` gets a durable `q.dlq` bound to the dead-letter
//! exchange with routing key `q.dlq`, and `q` itself is declared with
//! `x-dead-letter-exchange` / `x-dead-letter-routing-key` pointing there.
//!
//! Queues that already exist are left untouched: redeclaring a queue with
//! different arguments is a `PRECONDITION_FAILED`, and an existing queue's
//! arguments cannot be changed in place anyway.

use crate::{AmqpBroker, ChannelState, convert};
use lapin::ExchangeKind;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable, LongString, ShortString};
use travel_messaging_core::broker::BrokerError;
use travel_messaging_core::queues;

/// The exchange and main queues to declare.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// Direct exchange dead letters are routed through.
    pub dead_letter_exchange: String,
    /// Main queues; each gets a `.dlq` sibling.
    pub queues: Vec<String>,
}

impl Default for Topology {
    fn default() -> Self {
        Self {
            dead_letter_exchange: queues::DEAD_LETTER_EXCHANGE.to_string(),
            queues: vec![queues::BOOKINGS.to_string(), queues::ADMIN.to_string()],
        }
    }
}

impl Topology {
    /// Topology for `queues`, dead-lettered through `dead_letter_exchange`.
    #[must_use]
    pub fn new<S: Into<String>>(
        dead_letter_exchange: impl Into<String>,
        queues: impl IntoIterator<Item = S>,
    ) -> Self {
        Self {
            dead_letter_exchange: dead_letter_exchange.into(),
            queues: queues.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments a main queue is declared with.
    #[must_use]
    pub fn main_queue_arguments(&self, queue: &str) -> FieldTable {
        let mut arguments = FieldTable::default();
        arguments.insert(
            ShortString::from("x-dead-letter-exchange"),
            AMQPValue::LongString(LongString::from(self.dead_letter_exchange.clone())),
        );
        arguments.insert(
            ShortString::from("x-dead-letter-routing-key"),
            AMQPValue::LongString(LongString::from(queues::dead_letter_queue_for(queue))),
        );
        arguments
    }
}

/// Outcome of [`AmqpBroker::declare_topology`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopologyReport {
    /// Queues created by this call, in declaration order.
    pub declared: Vec<String>,
    /// Queues that were already in place and left as they were.
    pub existing: Vec<String>,
}

impl AmqpBroker {
    /// Declare the dead-letter exchange, every dead-letter queue, and every
    /// main queue in `topology`.
    ///
    /// Idempotent: a second call reports everything as existing.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError`] if a declaration or binding is refused, e.g.
    /// the exchange exists with a different type.
    #[tracing::instrument(skip(self, topology), fields(dlx = %topology.dead_letter_exchange))]
    pub async fn declare_topology(&self, topology: &Topology) -> Result<TopologyReport, BrokerError> {
        let mut state = self.state.lock().await;
        let mut report = TopologyReport::default();

        let exchange = state
            .channel
            .exchange_declare(
                &topology.dead_letter_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await;
        if let Err(e) = exchange {
            self.recover(&mut state, &e).await;
            return Err(convert::broker_error(&e, &topology.dead_letter_exchange));
        }

        for queue in &topology.queues {
            let dlq = queues::dead_letter_queue_for(queue);
            self.ensure_queue(&mut state, &dlq, FieldTable::default(), &mut report)
                .await?;

            if let Err(e) = state
                .channel
                .queue_bind(
                    &dlq,
                    &topology.dead_letter_exchange,
                    &dlq,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
            {
                self.recover(&mut state, &e).await;
                return Err(convert::broker_error(&e, &dlq));
            }

            self.ensure_queue(
                &mut state,
                queue,
                topology.main_queue_arguments(queue),
                &mut report,
            )
            .await?;
        }

        tracing::info!(
            declared = report.declared.len(),
            existing = report.existing.len(),
            "Topology declared"
        );
        Ok(report)
    }

    async fn ensure_queue(
        &self,
        state: &mut ChannelState,
        queue: &str,
        arguments: FieldTable,
        report: &mut TopologyReport,
    ) -> Result<(), BrokerError> {
        match self.inspect_queue(state, queue).await {
            Ok(_) => {
                report.existing.push(queue.to_string());
                return Ok(());
            }
            Err(BrokerError::QueueNotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let options = QueueDeclareOptions {
            durable: true,
            ..QueueDeclareOptions::default()
        };
        match state.channel.queue_declare(queue, options, arguments).await {
            Ok(_) => {
                tracing::info!(queue = %queue, "Queue declared");
                report.declared.push(queue.to_string());
                Ok(())
            }
            Err(e) => {
                self.recover(state, &e).await;
                Err(convert::broker_error(&e, queue))
            }
        }
    }
}
