//! Runtime requirements per chunk
//!
//! A requirement is a symbolic capability the emitted runtime must provide for
//! a chunk to work (chunk loading, the module registry, share scopes, ...).
//! Chunks start with what their modules declare and inherit whatever the
//! chunks they load need within the same runtime. Requirements can flow along
//! circular group edges, so aggregation runs to a fixed point.

use std::{borrow::Cow, collections::BTreeSet, fmt};

use log::debug;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    chunk_graph::{ChunkGraph, ChunkIdx, ChunkOrigin},
    module_graph::ModuleGraph,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuntimeRequirement(Cow<'static, str>);

impl RuntimeRequirement {
    /// Load the chunks of an async chunk group on demand
    pub const ENSURE_CHUNK: Self = Self(Cow::Borrowed("ensure-chunk"));
    /// Track which chunks are already loaded or in flight
    pub const CHUNK_LOADED_CHECK: Self = Self(Cow::Borrowed("chunk-loaded-check"));
    /// Register and require modules by id
    pub const MODULE_REGISTRY: Self = Self(Cow::Borrowed("module-registry"));
    /// Cross-runtime shared module scope
    pub const SHARE_SCOPE: Self = Self(Cow::Borrowed("share-scope"));

    pub fn new(name: impl Into<String>) -> Self {
        Self(Cow::Owned(name.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Requirement that providing this one depends on
    fn implied(&self) -> Option<Self> {
        match self.as_str() {
            "ensure-chunk" | "share-scope" => Some(Self::MODULE_REGISTRY),
            _ => None,
        }
    }
}

impl fmt::Display for RuntimeRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compute and store the requirement set of every live chunk.
///
/// Returns the number of propagation rounds it took to reach the fixed point.
pub fn resolve_runtime_requirements(graph: &ModuleGraph, chunk_graph: &mut ChunkGraph) -> usize {
    let chunks: Vec<ChunkIdx> = chunk_graph.chunks().map(|c| c.idx).collect();

    let mut requirements: FxHashMap<ChunkIdx, BTreeSet<RuntimeRequirement>> = chunks
        .iter()
        .map(|&chunk| (chunk, initial_requirements(graph, chunk_graph, chunk)))
        .collect();

    // Loading edges restricted to chunks sharing at least one runtime
    let dependencies: FxHashMap<ChunkIdx, Vec<ChunkIdx>> = chunks
        .iter()
        .map(|&chunk| {
            let runtime = &chunk_graph.chunk(chunk).runtime;
            let deps = chunk_graph
                .chunk_dependencies(chunk)
                .into_iter()
                .filter(|&dep| !chunk_graph.chunk(dep).runtime.is_disjoint(runtime))
                .collect();
            (chunk, deps)
        })
        .collect();

    let mut rounds = 0;
    loop {
        rounds += 1;
        let mut changed = false;
        for &chunk in &chunks {
            let mut merged = requirements[&chunk].clone();
            for dep in &dependencies[&chunk] {
                merged.extend(requirements[dep].iter().cloned());
            }
            let implied: Vec<_> = merged.iter().filter_map(RuntimeRequirement::implied).collect();
            merged.extend(implied);

            if merged.len() > requirements[&chunk].len() {
                requirements.insert(chunk, merged);
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
    debug!("Runtime requirements settled after {rounds} rounds");

    for chunk in chunks {
        chunk_graph.chunk_mut(chunk).runtime_requirements = requirements
            .remove(&chunk)
            .unwrap_or_default();
    }
    rounds
}

fn initial_requirements(
    graph: &ModuleGraph,
    chunk_graph: &ChunkGraph,
    chunk: ChunkIdx,
) -> BTreeSet<RuntimeRequirement> {
    let data = chunk_graph.chunk(chunk);
    let mut set: BTreeSet<RuntimeRequirement> = data
        .modules
        .iter()
        .flat_map(|&m| graph.declared_runtime_needs(m).iter().cloned())
        .collect();

    let has_children = data
        .groups
        .iter()
        .any(|&g| !chunk_graph.group(g).children.is_empty());
    if has_children {
        set.insert(RuntimeRequirement::ENSURE_CHUNK);
        set.insert(RuntimeRequirement::CHUNK_LOADED_CHECK);
    }
    // Entry chunks host the runtime that every other chunk registers into
    if data.origin == ChunkOrigin::Entry {
        set.insert(RuntimeRequirement::MODULE_REGISTRY);
    }
    set
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        code_splitter::CodeSplitter,
        module_graph::{EntryOptions, ModuleDescriptor, ModuleGraphBuilder},
    };

    fn names(set: &BTreeSet<RuntimeRequirement>) -> Vec<&str> {
        set.iter().map(RuntimeRequirement::as_str).collect()
    }

    #[test]
    fn test_requirements_flow_along_cyclic_group_edges() {
        let mut builder = ModuleGraphBuilder::new();
        builder
            .add_module(ModuleDescriptor::new("main").dynamic_import("left", None))
            .expect("new module");
        builder
            .add_module(ModuleDescriptor::new("left").dynamic_import("right", None))
            .expect("new module");
        builder
            .add_module(
                ModuleDescriptor::new("right")
                    .dynamic_import("left", None)
                    .needs(RuntimeRequirement::SHARE_SCOPE),
            )
            .expect("new module");
        builder
            .add_entry(EntryOptions::new("main", "main"))
            .expect("new entry");
        let graph = builder.freeze().expect("complete graph");

        let (mut chunk_graph, _) = CodeSplitter::new(&graph, &[], true)
            .split()
            .expect("no collisions");
        resolve_runtime_requirements(&graph, &mut chunk_graph);

        let by_name = |module: &str| {
            let idx = graph.module_by_identity(module).expect("module exists").idx;
            let chunk = chunk_graph
                .chunks_of_module(idx)
                .next()
                .expect("module is included");
            names(&chunk_graph.chunk(chunk).runtime_requirements)
        };

        assert_eq!(
            by_name("main"),
            vec![
                "chunk-loaded-check",
                "ensure-chunk",
                "module-registry",
                "share-scope"
            ]
        );
        assert_eq!(by_name("left"), by_name("right"));
        assert!(by_name("left").contains(&"share-scope"));
    }

    #[test]
    fn test_leaf_chunk_only_gets_declared_needs() {
        let mut builder = ModuleGraphBuilder::new();
        builder
            .add_module(ModuleDescriptor::new("main").dynamic_import("leaf", None))
            .expect("new module");
        builder
            .add_module(ModuleDescriptor::new("leaf").needs(RuntimeRequirement::new("global")))
            .expect("new module");
        builder
            .add_entry(EntryOptions::new("main", "main"))
            .expect("new entry");
        let graph = builder.freeze().expect("complete graph");

        let (mut chunk_graph, _) = CodeSplitter::new(&graph, &[], true)
            .split()
            .expect("no collisions");
        resolve_runtime_requirements(&graph, &mut chunk_graph);

        let leaf = graph.module_by_identity("leaf").expect("module exists").idx;
        let chunk = chunk_graph
            .chunks_of_module(leaf)
            .next()
            .expect("leaf is included");
        assert_eq!(
            names(&chunk_graph.chunk(chunk).runtime_requirements),
            vec!["global"]
        );
    }
}
