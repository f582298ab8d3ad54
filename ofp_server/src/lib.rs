//! # Order fulfilment server
//! This crate hosts the outward-facing half of the order fulfilment pipeline. It is responsible for:
//! * Accepting new orders over REST and handing them to the engine for the atomic order-plus-outbox write.
//! * Running the outbox relay worker, which polls the database for undelivered events.
//! * Running the queue listener, which consumes pushed `OrderCreated` events from the broker.
//!
//! ## Configuration
//! The server is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The server exposes the following routes:
//! * `/health`: A health check route that returns a 200 OK response.
//! * `POST /orders`: Accepts a new order and returns it with a `Location` header.
//! * `GET /orders`: Lists all orders, newest first.
//! * `GET /orders/{id}`: Fetches a single order by id.

pub mod broker;
pub mod config;
pub mod data_objects;
pub mod errors;
pub mod listener;
pub mod relay_worker;
pub mod routes;
pub mod server;

#[cfg(test)]
mod endpoint_tests;
