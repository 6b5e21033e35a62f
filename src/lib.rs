//! # PDF RAG
//!
//! Retrieval-augmented question answering over a directory of PDF documents.
//!
//! Documents are split into overlapping character windows, embedded through
//! an external provider (Ollama or an OpenAI-compatible API), and stored in a
//! flat, exhaustively searched cosine-similarity index persisted to disk.
//! Queries are embedded with the same provider and answered with the nearest
//! chunks; the chat layer turns those chunks into a prompt for a generation
//! model and reports the `(document, page)` sources it used.
//!
//! ## Architecture
//!
//! ```text
//! corpus change ──▶ watcher ──▶ ingest ──▶ extract ─▶ chunk ─▶ embed ─▶ index (persisted)
//!                                                                         │
//! query ──▶ retrieve ──▶ embed ──▶ index.search ──▶ hits ──▶ chat ──▶ answer + sources
//! ```
//!
//! Every rebuild is from scratch. A rebuild that fails leaves the previous
//! index queryable; the new index becomes visible only once it is fully
//! built and persisted.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`error`] | Typed error taxonomy |
//! | [`models`] | Core data types |
//! | [`source`] | Corpus enumeration |
//! | [`extract`] | PDF page text extraction with fallback |
//! | [`chunk`] | Sliding-window chunking |
//! | [`embedding`] | Embedding provider adapters |
//! | [`index`] | Vector index, persistence and the shared handle |
//! | [`ingest`] | Full-rebuild coordinator |
//! | [`retrieve`] | Query-time retrieval |
//! | [`chat`] | Prompt assembly, generation and source dedup |
//! | [`watcher`] | File watching and rebuild coalescing |
//! | [`context`] | Process-wide state |
//! | [`server`] | HTTP API |

pub mod chat;
pub mod chunk;
pub mod config;
pub mod context;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod index;
pub mod ingest;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod source;
pub mod watcher;
