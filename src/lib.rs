//! # Refpress
//!
//! Publishes version-controlled content. Pages live as directories in a git
//! object store; refpress walks the commit graph, extracts pages, their
//! revision history, and their attachments, and denormalizes everything into
//! a flat SQLite full-text index that supports nested lookups.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌─────────────┐   ┌───────────┐
//! │  Git object  │──▶│   Builder    │──▶│  SQLite    │
//! │    store     │   │ extract+walk │   │ FTS5, WAL │
//! └──────┬───────┘   └─────────────┘   └────┬──────┘
//!        │                                  │
//!        │ lazy blob loads   ┌──────────────┘
//!        ▼                   ▼
//!   ┌──────────────────────────────┐
//!   │         Query engine         │
//!   │  (snapshot per generation)   │
//!   └──────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! refpress init                        # create the index database
//! refpress rebuild                     # index the configured ref
//! refpress list                        # pages, newest first
//! refpress page 2011-11-11 sample-page # one page with its body
//! refpress history 2011-11-11 sample-page
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`repository`] | Read-only git object store access |
//! | [`document`] | Markdown + front-matter extraction |
//! | [`slug`] | Slug derivation from titles |
//! | [`render`] | Markdown to HTML rendering |
//! | [`schema`] | Index schema and record kinds |
//! | [`indexer`] | Transactional index rebuild |
//! | [`query`] | Snapshot query engine |
//! | [`models`] | Read-side data types |
//! | [`error`] | Build and query error taxonomy |

pub mod commands;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod indexer;
pub mod models;
pub mod query;
pub mod render;
pub mod repository;
pub mod schema;
pub mod slug;
