//! # Knowledge Harness
//!
//! A resolution and caching engine for heterogeneous external content.
//!
//! Knowledge Harness maps wiki pages, tickets, files, and web pages into a
//! uniform addressing scheme (`ndk://` knowledge URIs), dispatches them to
//! pluggable connectors under one metadata and caching contract, and keeps
//! the ingested results in a revision-aware cache so repeated access is
//! cheap and change-aware.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌───────────────┐   ┌─────────────┐
//! │ Connectors │──▶│    Engine      │──▶│ Ingestion   │
//! │ file, ...  │   │ locate/resolve│   │ chunk+media │
//! └────────────┘   │  /observe     │   └──────┬──────┘
//!                  └──────┬────────┘          │
//!                         ▼                   ▼
//!                  ┌────────────────────────────────┐
//!                  │  KnowledgeStore (resource       │
//!                  │  histories, bundles, aliases,   │
//!                  │  relations)                     │
//!                  └────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! kh init                                # prepare the cache directory
//! kh load ndk://file/docs/guide.md       # resolve, ingest, and cache
//! kh observe 'ndk://file/docs/guide.md/$chunk/00'
//! kh aliases                             # list cached external URLs
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`uri`] | Knowledge URIs, affordances, observables, web URLs |
//! | [`error`] | Error taxonomy |
//! | [`metadata`] | Resource deltas, histories, and merged views |
//! | [`relation`] | Typed relations with stable ids |
//! | [`bundle`] | Cacheable content bundles per affordance |
//! | [`connector`] | Connector protocol, registry, request context |
//! | [`connector_fs`] | Built-in filesystem connector |
//! | [`chunk`] | Heading-aware markdown chunking |
//! | [`ingest`] | Fragment ingestion: media, chunks, relations |
//! | [`engine`] | Load modes, cache decisions, batch queries |
//! | [`action`] | Query actions and response shapes |
//! | [`store`] | Key layout and the typed cache store |
//! | [`store_fs`] | Filesystem object-store backend |
//! | [`config`] | TOML configuration parsing |

pub mod action;
pub mod bundle;
pub mod chunk;
pub mod config;
pub mod connector;
pub mod connector_fs;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod metadata;
pub mod relation;
pub mod store;
pub mod store_fs;
pub mod uri;
