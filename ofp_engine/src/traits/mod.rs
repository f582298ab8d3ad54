//! The storage contract for the order pipeline.
//!
//! Backends implement [`OrderStore`]; the rest of the engine only ever talks to storage through this trait, which is
//! what keeps the completion logic testable and the backends swappable.
mod order_store;

pub use order_store::{BackoffPolicy, OrderStore, OrderStoreError};
