//! Order Fulfilment Pipeline engine
//!
//! This library contains the core logic for the transactional-outbox order pipeline. It is provider-agnostic:
//! storage backends implement the [`traits::OrderStore`] contract, and message brokers plug in behind the
//! [`events::EventPublisher`] seam.
//!
//! The library is divided into three main sections:
//! 1. Database management ([`mod@sqlite`]). SQLite is the supported backend. You should never need to access the
//!    database directly; use the public API instead. The exception is the data types used in the database, which are
//!    defined in the [`db_types`] module and are public.
//! 2. The pipeline public API ([`OrderFlowApi`]). This owns the three concurrency-critical operations: the atomic
//!    order-plus-outbox write (with its best-effort broker publish), the shared completion logic that drives an order
//!    `Pending → Processing → Finalized` at most once in effect, and the outbox relay cycle that the poller runs.
//! 3. The event seam ([`mod@events`]). Creating an order produces an `OrderCreated` envelope; a publisher
//!    implementation can push it to a broker, but correctness never depends on that publish succeeding, because the
//!    outbox record is written in the same transaction as the order.
mod api;

pub mod db_types;
pub mod events;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "test_utils")]
pub mod test_utils;

pub use api::{CycleStats, Fulfilment, FulfilmentConfig, OrderFlowApi, RelayOutcome};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use traits::{BackoffPolicy, OrderStore, OrderStoreError};
