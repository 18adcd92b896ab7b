//! Core modules for the analytics sync engine.
//!
//! Shared primitives live here: errors, time, configuration, the record/batch model and
//! the SQLite-backed store with its broker.

pub mod broker;
pub mod config;
pub mod db;
pub mod error;
pub mod model;
pub mod schemas;
pub mod store;
pub mod time;
