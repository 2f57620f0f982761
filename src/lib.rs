//! # docqa
//!
//! Upload a document, ask questions about it.
//!
//! docqa extracts text from PDF and plain-text uploads, cleans and splits it
//! into overlapping sentence chunks, embeds the chunks into a fresh vector
//! store collection, and answers questions by retrieving the most similar
//! chunks and handing them to an answer synthesizer.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────────┐
//! │ Upload   │──▶│ Extract → Clean  │──▶│ Embed + Store│
//! │ PDF/TXT  │   │ → Chunk          │   │ (collection) │
//! └──────────┘   └──────────────────┘   └──────┬───────┘
//!                                              │ active pointer
//!                      ┌───────────────────────┤
//!                      ▼                       ▼
//!                 ┌──────────┐          ┌────────────┐
//!                 │ Retrieve │─────────▶│ Synthesize │
//!                 │  top-k   │ context  │  answer    │
//!                 └──────────┘          └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docqa serve                               # HTTP API on 127.0.0.1:5000
//! docqa ask report.pdf "What is the total?" # one-shot, in process
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error taxonomy shared by every stage |
//! | [`extract`] | PDF and plain-text page extraction |
//! | [`clean`] | Text normalization |
//! | [`chunk`] | Sliding-window sentence chunking |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`store`] | Vector store abstraction (memory, Chroma) |
//! | [`registry`] | Collection naming and per-session active pointers |
//! | [`ingest`] | Upload → collection pipeline |
//! | [`retrieve`] | Top-k retrieval and context assembly |
//! | [`generate`] | Answer synthesis |
//! | [`remote`] | Shared HTTP retry helper |
//! | [`service`] | Pipeline facade used by the server and CLI |
//! | [`server`] | HTTP server |

pub mod chunk;
pub mod clean;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod generate;
pub mod ingest;
pub mod models;
pub mod registry;
pub mod remote;
pub mod retrieve;
pub mod server;
pub mod service;
pub mod store;
