//! Chunk graph construction and code splitting for module bundlers.
//!
//! The pipeline runs over a frozen [`ModuleGraph`]:
//!
//! 1. [`CodeSplitter`] builds the initial chunk graph from the entries,
//! 2. [`SplitChunks`] extracts shared modules according to cache-group rules,
//! 3. [`resolve_runtime_requirements`] settles what each chunk needs at runtime,
//! 4. ids and content hashes are assigned when the graph is sealed.
//!
//! [`Compilation`] drives all of it and produces a [`BuildOutput`].

pub mod chunk_graph;
pub mod code_splitter;
pub mod compilation;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod hashing;
pub mod ids;
pub mod manifest;
pub mod module_graph;
pub mod runtime_requirements;
pub mod split_chunks;
pub mod split_point;
pub mod stats;

pub use chunk_graph::{ChunkGraph, ChunkGroupIdx, ChunkIdx};
pub use code_splitter::CodeSplitter;
pub use compilation::{AbortSignal, BuildOutput, Compilation};
pub use config::Config;
pub use diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};
pub use error::{BuildError, Result};
pub use ids::{IdHints, IdPolicy};
pub use module_graph::{
    DependencyKind, EntryOptions, ModuleDescriptor, ModuleGraph, ModuleGraphBuilder, ModuleIdx,
};
pub use runtime_requirements::{RuntimeRequirement, resolve_runtime_requirements};
pub use split_chunks::{CacheGroup, ChunkFilter, SplitChunks};
pub use stats::ChunkGraphReport;
