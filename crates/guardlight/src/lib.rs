//! # Guardlight
//!
//! **Job orchestration and analysis pipeline for submitted media.**
//!
//! A submission is parsed into text, split into chunks sized for each
//! requested analyzer, analyzed chunk by chunk, aggregated per analyzer and
//! finally judged by the theme's reporter. Every step runs as a persisted
//! job dispatched over a topic bus under per-adapter concurrency limits.
//!
//! ## Architecture
//!
//! ```text
//!  gl submit ──▶ Requester ──▶ jobs (SQLite) ◀── stale sweep
//!                                  │
//!                              Dispatcher ──▶ parser.* / analyzer.* / reporter.*
//!                                                        │
//!                                                  built-in adapters
//!                                                        │
//!  Allocator ◀── parser.result / analyzer.result / reporter.result
//!      │
//!      └──▶ fan-out (analyze jobs), fan-in (analysis score), report job
//! ```
//!
//! The engine components live in `guardlight-core`; this crate supplies the
//! SQLite store, the in-process bus, the timers and the `gl` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! gl init                                   # create database
//! gl submit request.json --owner <uuid>     # queue a submission
//! gl run --until-idle                       # drive the pipeline
//! gl status <submission-id>                 # show results
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema (idempotent) |
//! | [`sqlite_store`] | SQLite implementation of the store traits |
//! | [`bus`] | In-process topic bus |
//! | [`events`] | Owner-scoped pipeline notifications |
//! | [`listener`] | Result topics feeding the allocator |
//! | [`scheduler`] | Dispatch tick, stale sweep and heartbeat loops |
//! | [`builtin`] | `freetext`, `word_search` and `word_count` adapters |
//! | [`engine`] | Component wiring and background task startup |
//! | [`export`] | Processed text written out as files |
//! | [`submit`], [`run`], [`jobs`], [`status`], [`themes`], [`adapters`] | CLI commands |

pub mod adapters;
pub mod builtin;
pub mod bus;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod export;
pub mod jobs;
pub mod listener;
pub mod migrate;
pub mod run;
pub mod scheduler;
pub mod sqlite_store;
pub mod status;
pub mod submit;
pub mod themes;

pub use guardlight_core::{models, store};
