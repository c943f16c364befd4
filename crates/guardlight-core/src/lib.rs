//! # Guardlight Core
//!
//! Runtime-free engine for Guardlight's analysis pipeline: data models,
//! typed job payloads, wire contracts, adapter registry, text chunking,
//! store and bus abstractions, and the four engine components.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`ledger`] | Job creation, status machine, stale sweep |
//! | [`dispatcher`] | Per-group admission control and publishing |
//! | [`allocator`] | Fan-out on parse, fan-in on analyze, reporting |
//! | [`requester`] | Submission validation, dedup, first job |
//! | [`store`] | Storage traits and the in-memory store |
//!
//! This crate contains no tokio runtime, sqlx, or filesystem I/O. The
//! `guardlight` crate supplies the SQLite store, the in-process bus and the
//! timers that drive [`dispatcher::Dispatcher::tick`] and
//! [`ledger::JobLedger::sweep_stale_jobs`].

pub mod adapters;
pub mod allocator;
pub mod bus;
pub mod chunk;
pub mod contracts;
pub mod dispatcher;
pub mod ledger;
pub mod models;
pub mod payload;
pub mod requester;
pub mod results;
pub mod store;

#[cfg(test)]
mod testutil;
