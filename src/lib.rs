//! # mcp-rag — minimal retrieval service over MCP
//!
//! Accepts documents, embeds them, keeps the embeddings in an exact
//! in-memory vector index, and answers nearest-neighbour queries. A separate
//! process drives it over the Model Context Protocol on stdio.
//!
//! ## Architecture
//!
//! - **[`config`]** — Configuration loading, env overrides, validation
//! - **[`logging`]** — tracing subscriber on stderr
//! - **[`embedder`]** — Embedder trait; OpenAI-compatible HTTP providers and an offline hashing provider
//! - **[`db`]** — Flat vector index and slot-aligned document store
//! - **[`service`]** — Retrieval service: ingest and query under a read/write lock
//! - **[`mcp`]** — `index_docs` / `retrieve_docs` tools, stdio server, and the client session

pub mod config;
pub mod db;
pub mod embedder;
pub mod logging;
pub mod mcp;
pub mod service;
