//! # twin-context
//!
//! A retrieval-augmented context service for AI profile assistants.
//!
//! twin-context sits between a chat/voice frontend and three hosted
//! upstreams — a vector index, a relational chunk store, and a key-value
//! cache — and assembles the professional-background context an LLM needs
//! to answer questions in the profile owner's voice.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌───────────────┐   ┌──────────────┐
//! │  Vector   │──▶│   Retriever   │──▶│   Composer   │
//! │  index    │   │ filter + sort │   │ prompt + LLM │
//! └──────────┘   └──────┬────────┘   └──────┬───────┘
//!      ▲                │                   │
//! ┌────┴─────┐   ┌──────▼────────┐   ┌──────▼───────┐
//! │ Postgres  │   │ Cache-aside   │   │  HTTP / CLI  │
//! │ chunks    │   │ + dedupe      │   │  surfaces    │
//! └──────────┘   └───────────────┘   └──────────────┘
//! ```
//!
//! Every upstream is optional and every failure path is open: an outage
//! degrades the response (fallback context, uncached reads, canned replies)
//! instead of surfacing an error to the chat user.
//!
//! ## Quick Start
//!
//! ```bash
//! twinctx serve                          # start the HTTP server
//! twinctx search "Java and Spring Boot"  # ranked content search
//! twinctx chat "What are your skills?"   # one-shot grounded reply
//! twinctx cache clear 'rag:*'            # invalidate cached context
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`vector`] | Vector index client |
//! | [`chunk_store`] | Relational chunk hydration |
//! | [`kv`] | Key-value store clients |
//! | [`cache`] | Cache-aside wrapper |
//! | [`dedupe`] | In-flight request coalescing |
//! | [`retrieve`] | Search and chat-context assembly |
//! | [`compose`] | Prompt building and LLM replies |
//! | [`validate`] | Chat input validation |
//! | [`tools`] | Tool registry for the HTTP API |
//! | [`server`] | HTTP server |
//! | [`app`] | Service-graph assembly |

pub mod app;
pub mod cache;
pub mod chunk_store;
pub mod compose;
pub mod config;
pub mod dedupe;
pub mod kv;
pub mod models;
pub mod retrieve;
pub mod server;
pub mod tools;
pub mod validate;
pub mod vector;
