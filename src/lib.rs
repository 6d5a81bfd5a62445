//! # Luminary Index
//!
//! Document indexing and retrieval for the Luminary legal assistant.
//!
//! Turns uploaded files (PDF, DOCX, plain text) into overlapping text
//! chunks, embeds them locally, stores them in a persistent vector index,
//! and answers natural-language questions by ranking the most relevant
//! chunks. The ranked chunks are handed to an external answer generator;
//! this crate never calls a language model.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌─────────┐   ┌──────────┐   ┌──────────────┐
//! │ Extractor │──▶│ Chunker │──▶│ Embedder │──▶│ Vector Index │
//! │ txt/docx/ │   │ sliding │   │ hashing/ │   │   (SQLite)   │
//! │ pdf + OCR │   │ window  │   │ fastembed│   └──────┬───────┘
//! └───────────┘   └─────────┘   └──────────┘          │
//!        ▲                                            │
//!        └──────────── Retrieval Coordinator ◀────────┘
//!                      (+ Document Catalog)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! luminary init
//! luminary add ./lease.pdf --id lease-2024
//! luminary query lease-2024 "when can the tenant terminate?"
//! luminary search "indemnification" --group
//! luminary compare lease-2023 lease-2024
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`extract`] | Text extraction with PDF → OCR fallback |
//! | [`ocr`] | Page recognizers (`tesseract`, disabled) |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | Embedder trait, backends, vector math |
//! | [`index`] | Persistent vector index with corruption recovery |
//! | [`catalog`] | Document records and retained text |
//! | [`coordinator`] | Ingestion and retrieval entry point |
//! | [`search`] | Grouping and comparison ranking |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error taxonomy |

pub mod catalog;
pub mod chunk;
pub mod config;
pub mod connector_fs;
pub mod coordinator;
pub mod db;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod get;
pub mod index;
pub mod ingest;
pub mod migrate;
pub mod models;
pub mod ocr;
pub mod search;
pub mod stats;

pub use coordinator::{RetrievalCoordinator, Upload};
pub use error::{Result, RetrievalError};
