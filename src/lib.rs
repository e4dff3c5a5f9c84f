//! # Valknut: Refactorability Analysis Engine
//!
//! Valknut ranks source entities (functions, methods, classes, files) across a
//! multi-language repository by *refactorability*: a composite score derived
//! from complexity, duplication, dependency centrality, cyclic coupling, type
//! friction, and structural smell signals.
//!
//! The crate is organized as a staged pipeline:
//!
//! ```text
//! Discovery → Parse Index → Feature Extraction → Normalization
//!           → Scoring/Ranking → Impact Packs → Result Assembly
//! ```
//!
//! Stages feed forward only; each stage consumes the previous stage's output
//! and produces an immutable artifact. Alongside the ranked entities the
//! pipeline synthesizes coordinated *impact packs* (clone consolidation,
//! cycle-cut, chokepoint elimination, branch reorganization, file-split) and
//! exposes everything through a JSON-RPC tool protocol for AI coding
//! assistants.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use valknut::{ValknutConfig, ValknutEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = ValknutEngine::new(ValknutConfig::default())?;
//!     let result = engine.analyze_paths(&["./src".into()]).await?;
//!
//!     println!(
//!         "analyzed {} files / {} entities",
//!         result.total_files, result.total_entities
//!     );
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

#[cfg(feature = "mimalloc")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

// Core analysis engine modules
pub mod core {
    //! Core analysis algorithms and data structures.

    pub mod bayesian;
    pub mod config;
    pub mod entities;
    pub mod errors;
    pub mod featureset;
    pub mod normalization;
    pub mod pipeline;
    pub mod scoring;
}

// Specialized detection algorithms
pub mod detectors {
    //! Specialized code analysis detectors.

    pub mod clones;
    pub mod complexity;
    pub mod coverage;
    pub mod graph;
    pub mod refactoring;
    pub mod structure;
}

// Language-specific parsing adapters
pub mod lang {
    //! Language-specific parsing and adapter registry.

    pub mod common;
    pub mod go;
    pub mod javascript;
    pub mod python;
    pub mod registry;
    pub mod rust_lang;
    pub mod typescript;

    pub use common::LanguageAdapter;
    pub use registry::{adapter_for_extension, adapter_for_language, supported_extensions};
}

// Impact pack synthesis
pub mod packs;

// Public API and tool protocol surface
pub mod api {
    //! High-level engine facade and JSON-RPC tool protocol.

    pub mod engine;
    pub mod server;
}

pub use crate::api::engine::ValknutEngine;
pub use crate::core::config::ValknutConfig;
pub use crate::core::errors::{Result, ValknutError};
pub use crate::core::pipeline::results::PipelineResult;

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
