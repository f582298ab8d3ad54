//! SQLite backend for the order pipeline engine.
mod sqlite_impl;

pub mod db;

pub use sqlite_impl::SqliteDatabase;
