//! tidewatch daemon - hook ingest server and session state engine
//!
//! This crate provides the infrastructure behind the `tided` binary:
//! - `ingest` - Unix socket and loopback TCP server for hook connections
//! - `engine` - Session state actor, the single writer of every session
//! - `history` - Incremental JSONL conversation parsing and interrupt watching
//! - `remote` - Conversation log fetching over ssh with retry
//! - `approval` - Routing approval decisions to the hook socket or tmux
//! - `config` - TOML config file with environment overrides
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                           tided daemon                           │
//! ├──────────────────────────────────────────────────────────────────┤
//! │                                                                  │
//! │  ┌──────────────────┐   events   ┌───────────────────────────┐   │
//! │  │ HookIngestServer │───────────▶│       EngineActor         │   │
//! │  │ (unix + tcp)     │            │  (session state owner)    │   │
//! │  └────────┬─────────┘            └──┬──────────┬──────────┬──┘   │
//! │           │ replies                 │          │          │      │
//! │           ▼                         ▼          ▼          ▼      │
//! │  ┌──────────────────┐   ┌────────────────┐ ┌────────┐ ┌───────┐  │
//! │  │PendingPermissions│◀──│ ApprovalRouter │ │History │ │Remote │  │
//! │  └──────────────────┘   │ (socket/tmux)  │ │Loader  │ │Fetcher│  │
//! │                         └────────────────┘ └────────┘ └───────┘  │
//! │                                                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod approval;
pub mod cli;
pub mod config;
pub mod engine;
pub mod history;
pub mod ingest;
pub mod remote;
