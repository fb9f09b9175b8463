//! # Colloquy
//!
//! A retrieval-augmented conversational service for CRM workloads.
//!
//! Colloquy ingests a knowledge base (listing CSVs, JSON records, plain
//! text), chunks and embeds it into a SQLite-backed vector index, and runs
//! multi-turn conversations over it: each turn retrieves relevant chunks,
//! routes to a persona, extracts profile attributes into the user record,
//! and persists the exchange.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────┐   ┌───────────┐
//! │ Documents │──▶│  Ingestion    │──▶│  SQLite    │
//! │ csv/json  │   │ Chunk+Embed  │   │ index+CRM │
//! └───────────┘   └──────────────┘   └─────┬─────┘
//!                                          │
//!                      ┌───────────────────┤
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 │(colloquy)│       │  (JSON)  │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! colloquy init                    # create database
//! colloquy load ./data             # ingest a data directory
//! colloquy search "office space"   # inspect retrieval
//! colloquy chat "any listings on Main St?"
//! colloquy serve                   # start the HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`chunker`] | Sliding-window text chunking |
//! | [`normalize`] | CSV/JSON content rendering |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`generation`] | Completion provider abstraction |
//! | [`index`] | SQLite vector index |
//! | [`retriever`] | Query-time retrieval |
//! | [`ingest`] | Document ingestion pipeline |
//! | [`store`] | Users, sessions, conversations, messages |
//! | [`agents`] | Persona selection and category rules |
//! | [`profile`] | Profile extraction |
//! | [`chat`] | Turn orchestration |
//! | [`server`] | HTTP JSON API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agents;
pub mod chat;
pub mod chunker;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generation;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod normalize;
pub mod profile;
pub mod retriever;
pub mod server;
pub mod store;
