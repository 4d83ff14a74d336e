//! Message-bus binding: subject hierarchy, stream/consumer provisioning, and
//! the at-least-once [`Publisher`] (spec §4.4, §4.5).

pub mod deadletter;
pub mod publisher;
pub mod streams;
pub mod subject;

pub use deadletter::{DeadLetter, DeadLetterBuffer};
pub use publisher::{Publisher, PublisherConfig};
pub use streams::{StreamSpec, ALL_STREAMS};
pub use subject::{orderbook_subject, subject_for_type, OrderbookSubject};
