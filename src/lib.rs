//! # repo-context
//!
//! Snapshot a source repository at a commit, split its text into
//! retrieval-sized chunks, embed them, and answer questions from the
//! nearest chunks with citations back to file and line.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌──────────┐   ┌──────────┐
//! │  Source  │──▶│  Ingest  │──▶│  Parse   │──▶│  Embed   │
//! │GitHub/git│   │ manifest │   │  chunks  │   │ vectors  │
//! └──────────┘   └────┬─────┘   └────┬─────┘   └────┬─────┘
//!                     ▼              ▼              ▼
//!               ┌──────────────────────────┐  ┌──────────┐
//!               │  Blob store (fs / S3)    │  │  Index   │
//!               └────────────┬─────────────┘  │ (SQLite) │
//!                            │                └────┬─────┘
//!                            ▼                     ▼
//!                      ┌──────────────────────────────┐
//!                      │  search / ask (cited answer) │
//!                      └──────────────────────────────┘
//! ```
//!
//! Every commit moves through `Ingested → Parsed → Embedded`; each stage
//! reads only the artifact the previous one wrote.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`error`] | Failure categories callers branch on |
//! | [`models`] | Manifest, chunk, embedding and answer types |
//! | [`normalize`] | Text normalization, hashing, chunk ids |
//! | [`lang`] | Language detection |
//! | [`layout`] | Artifact key layout |
//! | [`blob_store`] | Object storage: memory, filesystem, S3 |
//! | [`source`] | Repository sources: GitHub REST, local git |
//! | [`ingest`] | Snapshot ingestion |
//! | [`chunk`] | Code and markdown chunkers |
//! | [`parse`] | Per-commit chunking stage |
//! | [`embedding`] | Embedding providers and vector codecs |
//! | [`embed_cmd`] | Per-commit embedding stage |
//! | [`index`] | Retrieval index: memory, SQLite |
//! | [`search`] | Nearest-chunk retrieval |
//! | [`resolve`] | Ref pointer resolution |
//! | [`text_loader`] | Chunk text loading for hits |
//! | [`generation`] | Text generation providers |
//! | [`answer`] | Cited answers and the ask flow |
//! | [`pipeline`] | Per-commit stage machine |
//! | [`status`] | Stage status and `rctx status` report |
//! | [`progress`] | Stage progress on stderr |
//! | [`http`] | Provider retry policy |
//! | [`commands`] | `rctx` command implementations |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | Index schema |

pub mod answer;
pub mod blob_store;
pub mod chunk;
pub mod commands;
pub mod config;
pub mod db;
pub mod embed_cmd;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod http;
pub mod index;
pub mod ingest;
pub mod lang;
pub mod layout;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod parse;
pub mod pipeline;
pub mod progress;
pub mod resolve;
pub mod search;
pub mod source;
pub mod status;
pub mod text_loader;
