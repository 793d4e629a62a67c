//! Conventional queue names.
//!
//! Every main queue `q` has a dead-letter queue `q.dlq`, bound to the
//! dead-letter exchange with routing key `q.dlq`.

/// Booking, cancellation and decision events.
pub const BOOKINGS: &str = "travel.bookings";
/// Dead letters of [`BOOKINGS`].
pub const BOOKINGS_DLQ: &str = "travel.bookings.dlq";
/// Admin notifications.
pub const ADMIN: &str = "travel.admin";
/// Dead letters of [`ADMIN`].
pub const ADMIN_DLQ: &str = "travel.admin.dlq";
/// Poison messages set aside by the requeue coordinator.
pub const PARKING: &str = "travel.parking";
/// Exchange rejected messages are dead-lettered through.
pub const DEAD_LETTER_EXCHANGE: &str = "travel.dlx";

/// Suffix appended to a queue name to form its dead-letter queue.
pub const DLQ_SUFFIX: &str = ".dlq";

/// Every conventional queue, main queues first.
pub const ALL: [&str; 4] = [BOOKINGS, ADMIN, BOOKINGS_DLQ, ADMIN_DLQ];

/// Name of the dead-letter queue for `queue`.
#[must_use]
pub fn dead_letter_queue_for(queue: &str) -> String {
    format!("{queue}{DLQ_SUFFIX}")
}

/// Whether `queue` names a dead-letter queue.
#[must_use]
pub fn is_dead_letter_queue(queue: &str) -> bool {
    queue.ends_with(DLQ_SUFFIX)
}
