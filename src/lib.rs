//! # kb-gateway
//!
//! A knowledge-base gateway for internal regulation documents. Users ask
//! questions that are answered from a primary corpus of regulations;
//! administrators fix wrong answers by approving corrections, which land in a
//! second corpus that outranks the first.
//!
//! ## Architecture
//!
//! ```text
//!  upload ──▶ metadata ──▶ classifier ──▶ registry ◀──── sync
//!    │                                      ▲              │
//!    ▼                                      │              ▼
//!  ┌──────────────── corpus store ─────────┴──────────────────┐
//!  │  primary corpus             correction corpus             │
//!  └───────────────────────────────────▲──────────────────────┘
//!                                      │ approve
//!  feedback ──▶ corrections (pending) ─┘          ask ──▶ gateway ──▶ generation
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`docprops`] | Embedded timestamps from OLE and OOXML documents |
//! | [`metadata`] | Version group / version date resolution |
//! | [`registry`] | Version lineages and the latest flag |
//! | [`generation`] | Generative model provider abstraction |
//! | [`classifier`] | Rate-limit-aware category labelling |
//! | [`corpus`] | Corpus store provider abstraction |
//! | [`ingest`] | Batch upload pipeline |
//! | [`feedback`] | Feedback analysis and correction rendering |
//! | [`messages`] | Session transcripts |
//! | [`corrections`] | Correction lifecycle |
//! | [`gateway`] | Corpus precedence for answering |
//! | [`sync`] | Registry reconciliation and store reset |
//! | [`app`] | Component wiring |
//! | [`commands`] | CLI command output |
//! | [`server`] | HTTP API |

pub mod app;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod corpus;
pub mod corrections;
pub mod db;
pub mod docprops;
pub mod error;
pub mod feedback;
pub mod gateway;
pub mod generation;
pub mod ingest;
pub mod messages;
pub mod metadata;
pub mod migrate;
pub mod models;
pub mod registry;
pub mod server;
pub mod sync;
