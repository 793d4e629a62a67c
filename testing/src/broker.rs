//! In-memory broker for fast, deterministic tests.
//!
//! [`InMemoryBroker`] implements the full [`Broker`] delivery contract
//! (manual/auto ack, tail placement on nack-with-requeue, purge, stats) over
//! plain `VecDeque`s, plus fault injection for the failure paths:
//!
//! - [`InMemoryBroker::reject_publishes_to`]: every publish to a queue is refused
//! - [`InMemoryBroker::fail_next`] / [`InMemoryBroker::fail_after`]: one `get` / `ack` / `nack` fails once
//! - [`InMemoryBroker::close_channel`]: the handle goes dead, as on a connection drop

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use travel_messaging_core::broker::{Broker, BrokerError, BrokerFuture};
use travel_messaging_core::codec;
use travel_messaging_core::message::Envelope;
use travel_messaging_core::transport::{
    AckMode, Delivery, DeliveryTag, OutboundMessage, QueueStats, TransportProperties,
};

/// Broker operation a one-shot fault can be injected into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`Broker::get`]
    Get,
    /// [`Broker::ack`]
    Ack,
    /// [`Broker::nack`]
    Nack,
}

#[derive(Debug, Clone)]
struct Stored {
    message: OutboundMessage,
    redelivered: bool,
}

#[derive(Debug, Clone)]
struct Outstanding {
    queue: String,
    stored: Stored,
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, VecDeque<Stored>>,
    consumers: HashMap<String, u32>,
    unacked: HashMap<DeliveryTag, Outstanding>,
    rejecting: HashMap<String, String>,
    faults: HashMap<Operation, (usize, BrokerError)>,
    published: Vec<(String, OutboundMessage)>,
    dropped: Vec<(String, OutboundMessage)>,
    next_tag: u64,
    gets: usize,
    closed: bool,
}

/// In-memory [`Broker`].
///
/// Clones share state, so a test can hand one clone to the code under test
/// (as `Arc<dyn Broker>`) and inspect queues through another.
///
/// Queues must exist before they can be read, purged or inspected. By default
/// publishing to an unknown queue declares it; [`Self::strict`] makes that a
/// [`BrokerError::QueueNotFound`] instead, like an unroutable mandatory publish.
///
/// # Example
///
/// ```
/// use travel_messaging_core::{AckMode, Broker};
/// use travel_messaging_testing::InMemoryBroker;
///
/// # tokio_test::block_on(async {
/// let broker = InMemoryBroker::new().with_queue("travel.bookings.dlq");
/// broker.seed("travel.bookings.dlq", b"{}".to_vec());
///
/// let delivery = broker.get("travel.bookings.dlq", AckMode::Manual).await.unwrap().unwrap();
/// broker.nack(delivery.tag, true).await.unwrap();
///
/// assert_eq!(broker.depth("travel.bookings.dlq"), 1);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<Mutex<State>>,
    auto_declare: bool,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBroker {
    /// Broker with no queues that declares queues on first publish.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            auto_declare: true,
        }
    }

    /// Refuse publishes to queues that were never declared.
    #[must_use]
    pub const fn strict(mut self) -> Self {
        self.auto_declare = false;
        self
    }

    /// Declare a queue (builder form).
    #[must_use]
    pub fn with_queue(self, queue: &str) -> Self {
        self.declare_queue(queue);
        self
    }

    /// Declare a queue. Declaring an existing queue leaves it untouched.
    pub fn declare_queue(&self, queue: &str) {
        self.lock().queues.entry(queue.to_string()).or_default();
    }

    /// Append a raw JSON payload to a queue, declaring it if needed.
    pub fn seed(&self, queue: &str, body: Vec<u8>) {
        self.seed_message(
            queue,
            OutboundMessage {
                properties: TransportProperties::default(),
                body,
            },
        );
    }

    /// Append an encoded envelope, with its id as the transport message id.
    pub fn seed_envelope<E: Envelope>(&self, queue: &str, envelope: &E) {
        let properties = TransportProperties::json(
            envelope.message_id().as_str(),
            envelope.meta().timestamp,
        );
        self.seed_message(
            queue,
            OutboundMessage {
                properties,
                body: codec::encode(envelope).unwrap(),
            },
        );
    }

    /// Append a fully-formed message, declaring the queue if needed.
    pub fn seed_message(&self, queue: &str, message: OutboundMessage) {
        self.lock()
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Stored {
                message,
                redelivered: false,
            });
    }

    /// Report `count` consumers on a queue in [`Broker::queue_stats`].
    pub fn set_consumers(&self, queue: &str, count: u32) {
        self.lock().consumers.insert(queue.to_string(), count);
    }

    /// Refuse every publish to `queue` with [`BrokerError::PublishRejected`].
    pub fn reject_publishes_to(&self, queue: &str, reason: &str) {
        self.lock()
            .rejecting
            .insert(queue.to_string(), reason.to_string());
    }

    /// Accept publishes to `queue` again.
    pub fn accept_publishes_to(&self, queue: &str) {
        self.lock().rejecting.remove(queue);
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: Operation, error: BrokerError) {
        self.fail_after(operation, 0, error);
    }

    /// Let `skip` calls of `operation` through, then fail the next one.
    pub fn fail_after(&self, operation: Operation, skip: usize, error: BrokerError) {
        self.lock().faults.insert(operation, (skip, error));
    }

    /// Drop the channel. Unacked deliveries return to their queues and every
    /// later operation fails with [`BrokerError::ChannelClosed`].
    pub fn close_channel(&self) {
        let mut state = self.lock();
        state.closed = true;
        state.release_unacked();
    }

    /// Ready messages in a queue (0 for an unknown queue).
    #[must_use]
    pub fn depth(&self, queue: &str) -> usize {
        self.lock().queues.get(queue).map_or(0, VecDeque::len)
    }

    /// Whether a queue has been declared.
    #[must_use]
    pub fn has_queue(&self, queue: &str) -> bool {
        self.lock().queues.contains_key(queue)
    }

    /// Ready messages in a queue, head first.
    #[must_use]
    pub fn messages(&self, queue: &str) -> Vec<OutboundMessage> {
        self.lock()
            .queues
            .get(queue)
            .map(|ready| ready.iter().map(|stored| stored.message.clone()).collect())
            .unwrap_or_default()
    }

    /// Every successful publish, in order, with its queue.
    #[must_use]
    pub fn published(&self) -> Vec<(String, OutboundMessage)> {
        self.lock().published.clone()
    }

    /// Successful publishes to one queue, in order.
    #[must_use]
    pub fn published_to(&self, queue: &str) -> Vec<OutboundMessage> {
        self.lock()
            .published
            .iter()
            .filter(|(target, _)| target == queue)
            .map(|(_, message)| message.clone())
            .collect()
    }

    /// Messages nacked without requeue, with their source queue.
    #[must_use]
    pub fn dropped(&self) -> Vec<(String, OutboundMessage)> {
        self.lock().dropped.clone()
    }

    /// Deliveries handed out in manual mode and not yet settled.
    #[must_use]
    pub fn unacked(&self) -> usize {
        self.lock().unacked.len()
    }

    /// Number of [`Broker::get`] calls made so far.
    #[must_use]
    pub fn get_calls(&self) -> usize {
        self.lock().gets
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn publish_now(&self, queue: &str, message: &OutboundMessage) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.ensure_open()?;
        if let Some(reason) = state.rejecting.get(queue) {
            return Err(BrokerError::PublishRejected {
                queue: queue.to_string(),
                reason: reason.clone(),
            });
        }
        if !self.auto_declare && !state.queues.contains_key(queue) {
            return Err(BrokerError::QueueNotFound(queue.to_string()));
        }
        state
            .queues
            .entry(queue.to_string())
            .or_default()
            .push_back(Stored {
                message: message.clone(),
                redelivered: false,
            });
        state.published.push((queue.to_string(), message.clone()));
        Ok(())
    }

    fn get_now(&self, queue: &str, mode: AckMode) -> Result<Option<Delivery>, BrokerError> {
        let mut state = self.lock();
        state.gets += 1;
        state.ensure_open()?;
        state.take_fault(Operation::Get)?;

        let Some(stored) = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?
            .pop_front()
        else {
            return Ok(None);
        };

        state.next_tag += 1;
        let tag = DeliveryTag(state.next_tag);
        let delivery = Delivery {
            tag,
            queue: queue.to_string(),
            redelivered: stored.redelivered,
            properties: stored.message.properties.clone(),
            body: stored.message.body.clone(),
        };
        if mode == AckMode::Manual {
            state.unacked.insert(
                tag,
                Outstanding {
                    queue: queue.to_string(),
                    stored,
                },
            );
        }
        Ok(Some(delivery))
    }

    fn settle_now(&self, tag: DeliveryTag, outcome: Settle) -> Result<(), BrokerError> {
        let mut state = self.lock();
        state.ensure_open()?;
        state.take_fault(match outcome {
            Settle::Ack => Operation::Ack,
            Settle::Requeue | Settle::Drop => Operation::Nack,
        })?;

        let outstanding = state
            .unacked
            .remove(&tag)
            .ok_or(BrokerError::UnknownDeliveryTag(tag))?;

        match outcome {
            Settle::Ack => {}
            Settle::Requeue => state.requeue(outstanding),
            Settle::Drop => state
                .dropped
                .push((outstanding.queue, outstanding.stored.message)),
        }
        Ok(())
    }

    fn stats_now(&self, queue: &str) -> Result<QueueStats, BrokerError> {
        let state = self.lock();
        state.ensure_open()?;
        let ready = state
            .queues
            .get(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        Ok(QueueStats {
            queue: queue.to_string(),
            messages: u32::try_from(ready.len()).unwrap_or(u32::MAX),
            consumers: state.consumers.get(queue).copied().unwrap_or(0),
        })
    }

    fn purge_now(&self, queue: &str) -> Result<u32, BrokerError> {
        let mut state = self.lock();
        state.ensure_open()?;
        let ready = state
            .queues
            .get_mut(queue)
            .ok_or_else(|| BrokerError::QueueNotFound(queue.to_string()))?;
        let purged = u32::try_from(ready.len()).unwrap_or(u32::MAX);
        ready.clear();
        Ok(purged)
    }
}

#[derive(Debug, Clone, Copy)]
enum Settle {
    Ack,
    Requeue,
    Drop,
}

impl State {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.closed {
            Err(BrokerError::ChannelClosed("in-memory channel closed".to_string()))
        } else {
            Ok(())
        }
    }

    fn take_fault(&mut self, operation: Operation) -> Result<(), BrokerError> {
        match self.faults.get_mut(&operation) {
            Some((skip, _)) if *skip > 0 => {
                *skip -= 1;
                Ok(())
            }
            Some(_) => self
                .faults
                .remove(&operation)
                .map_or(Ok(()), |(_, error)| Err(error)),
            None => Ok(()),
        }
    }

    fn requeue(&mut self, outstanding: Outstanding) {
        self.queues
            .entry(outstanding.queue)
            .or_default()
            .push_back(Stored {
                redelivered: true,
                ..outstanding.stored
            });
    }

    fn release_unacked(&mut self) {
        let mut outstanding: Vec<_> = self.unacked.drain().collect();
        outstanding.sort_by_key(|(tag, _)| *tag);
        for (_, delivery) in outstanding {
            self.requeue(delivery);
        }
    }
}

impl Broker for InMemoryBroker {
    fn publish<'a>(&'a self, queue: &'a str, message: &'a OutboundMessage) -> BrokerFuture<'a, ()> {
        let result = self.publish_now(queue, message);
        Box::pin(async move { result })
    }

    fn get<'a>(&'a self, queue: &'a str, mode: AckMode) -> BrokerFuture<'a, Option<Delivery>> {
        let result = self.get_now(queue, mode);
        Box::pin(async move { result })
    }

    fn ack(&self, tag: DeliveryTag) -> BrokerFuture<'_, ()> {
        let result = self.settle_now(tag, Settle::Ack);
        Box::pin(async move { result })
    }

    fn nack(&self, tag: DeliveryTag, requeue: bool) -> BrokerFuture<'_, ()> {
        let outcome = if requeue { Settle::Requeue } else { Settle::Drop };
        let result = self.settle_now(tag, outcome);
        Box::pin(async move { result })
    }

    fn queue_stats<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, QueueStats> {
        let result = self.stats_now(queue);
        Box::pin(async move { result })
    }

    fn purge<'a>(&'a self, queue: &'a str) -> BrokerFuture<'a, u32> {
        let result = self.purge_now(queue);
        Box::pin(async move { result })
    }

    fn is_open(&self) -> bool {
        !self.lock().closed
    }

    fn close(&self) -> BrokerFuture<'_, ()> {
        self.close_channel();
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DLQ: &str = "travel.bookings.dlq";

    #[tokio::test]
    async fn nack_with_requeue_goes_to_tail() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.seed(DLQ, b"first".to_vec());
        broker.seed(DLQ, b"second".to_vec());

        let first = broker.get(DLQ, AckMode::Manual).await.unwrap().unwrap();
        broker.nack(first.tag, true).await.unwrap();

        let next = broker.get(DLQ, AckMode::Manual).await.unwrap().unwrap();
        assert_eq!(next.body, b"second");
        assert!(!next.redelivered);
        broker.ack(next.tag).await.unwrap();

        let again = broker.get(DLQ, AckMode::Manual).await.unwrap().unwrap();
        assert_eq!(again.body, b"first");
        assert!(again.redelivered);
        assert_eq!(again.fingerprint(), first.fingerprint());
    }

    #[tokio::test]
    async fn ack_removes_and_tags_settle_once() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.seed(DLQ, b"{}".to_vec());

        let delivery = broker.get(DLQ, AckMode::Manual).await.unwrap().unwrap();
        assert_eq!(broker.unacked(), 1);
        broker.ack(delivery.tag).await.unwrap();

        assert_eq!(broker.depth(DLQ), 0);
        assert_eq!(
            broker.ack(delivery.tag).await,
            Err(BrokerError::UnknownDeliveryTag(delivery.tag))
        );
    }

    #[tokio::test]
    async fn auto_ack_needs_no_settlement() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.seed(DLQ, b"{}".to_vec());

        let delivery = broker.get(DLQ, AckMode::Auto).await.unwrap().unwrap();
        assert_eq!(broker.unacked(), 0);
        assert!(broker.ack(delivery.tag).await.is_err());
        assert!(broker.get(DLQ, AckMode::Auto).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_queue_is_reported() {
        let broker = InMemoryBroker::new();
        assert_eq!(
            broker.get("missing", AckMode::Manual).await,
            Err(BrokerError::QueueNotFound("missing".into()))
        );
        assert!(broker.queue_stats("missing").await.is_err());
    }

    #[tokio::test]
    async fn strict_broker_refuses_undeclared_targets() {
        let broker = InMemoryBroker::new().strict();
        let message = OutboundMessage {
            properties: TransportProperties::default(),
            body: b"{}".to_vec(),
        };
        assert!(matches!(
            broker.publish("travel.bookings", &message).await,
            Err(BrokerError::QueueNotFound(_))
        ));
        assert!(broker.published().is_empty());
    }

    #[tokio::test]
    async fn close_returns_unacked_and_blocks_operations() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.seed(DLQ, b"{}".to_vec());
        let _delivery = broker.get(DLQ, AckMode::Manual).await.unwrap().unwrap();

        broker.close().await.unwrap();

        assert!(!broker.is_open());
        assert_eq!(broker.depth(DLQ), 1);
        assert!(matches!(
            broker.get(DLQ, AckMode::Manual).await,
            Err(BrokerError::ChannelClosed(_))
        ));
    }

    #[tokio::test]
    async fn injected_fault_fires_once() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.fail_next(Operation::Get, BrokerError::Transport("boom".into()));

        assert!(broker.get(DLQ, AckMode::Manual).await.is_err());
        assert!(broker.get(DLQ, AckMode::Manual).await.unwrap().is_none());
        assert_eq!(broker.get_calls(), 2);
    }

    #[tokio::test]
    async fn purge_and_stats() {
        let broker = InMemoryBroker::new().with_queue(DLQ);
        broker.seed(DLQ, b"a".to_vec());
        broker.seed(DLQ, b"b".to_vec());
        broker.set_consumers(DLQ, 3);

        let stats = broker.queue_stats(DLQ).await.unwrap();
        assert_eq!((stats.messages, stats.consumers), (2, 3));
        assert_eq!(broker.purge(DLQ).await.unwrap(), 2);
        assert_eq!(broker.depth(DLQ), 0);
    }
}
