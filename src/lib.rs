//! # weather-gateway
//!
//! Membership-gated weather reporting API kept in sync with an on-chain
//! participant registry.
//!
//! A background watcher follows `ParticipantRegistered` /
//! `ParticipantResigned` events from the registry contract and mirrors them
//! into a `memberships` table, recording every processed log in an event
//! ledger that doubles as its resume checkpoint. Registered members submit
//! EIP-712 signed reports to `POST /report-weather`, subject to a per-member
//! call window.
//!
//! ## Architecture
//!
//! ```text
//! Clients (HTTP)                          Registry contract (WebSocket RPC)
//!     │                                            │
//!     ├── Router + middleware (api/)               ├── ChainClient (chain/)
//!     │     gate → authenticate → rate limit       │
//!     ├── ReportService (service/)                 ├── ChainWatcher (service/)
//!     ├── SigningDomain (auth/)                    │
//!     │                                            │
//!     └──────────── RegistryStore (persistence/) ──┘
//!                        │
//!                 ConnectionPool → PostgreSQL
//! ```

pub mod api;
pub mod app_state;
pub mod auth;
pub mod chain;
pub mod config;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod service;
