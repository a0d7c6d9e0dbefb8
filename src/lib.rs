//! # linkshelf
//!
//! A local-first bookmark manager: import bookmarks from browser exports,
//! YAML notes, and feeds, reconcile them into one SQLite store without
//! duplicates, and find near-duplicates that differ only in URL.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌──────────┐
//! │   Parsers    │──▶│  Reconciler  │──▶│  SQLite  │
//! │ HTML/YAML/   │   │ (core crate) │   │  Store   │
//! │ Atom/feeds   │   └──────────────┘   └────┬─────┘
//! └──────────────┘                           │
//!                      ┌─────────────────────┤
//!                      ▼                     ▼
//!                ┌───────────┐        ┌────────────┐
//!                │  Dedup    │        │ Enrichment │
//!                │ (cluster) │        │  (reqwest) │
//!                └───────────┘        └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! shelf init                    # create database
//! shelf import                  # import everything under [import].root
//! shelf dedup                   # report near-duplicates
//! shelf dedup --auto            # merge them
//! shelf export --format yaml
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementation of the core `Store` trait |
//! | [`parsers`] | Source file parsers |
//! | [`ingest`] | `import` and `add` commands |
//! | [`dedup_cmd`] | `dedup` command |
//! | [`enrich`] | HTTP metadata fetcher, `enrich` and `validate` commands |
//! | [`progress`] | Import progress reporting |
//! | [`list`], [`tags`], [`export`], [`stats`] | Inspection commands |

pub mod config;
pub mod db;
pub mod dedup_cmd;
pub mod enrich;
pub mod export;
pub mod ingest;
pub mod list;
pub mod migrate;
pub mod parsers;
pub mod progress;
pub mod sqlite_store;
pub mod stats;
pub mod tags;
