//! Gridlink Core Library
//!
//! Shared plumbing for Gridlink components:
//! - SQLite pool helpers and the `define_database!` macro
//! - Tracing/logging initialization

pub mod db;
pub mod tracing_init;

pub use db::{DatabaseError, unix_timestamp};
