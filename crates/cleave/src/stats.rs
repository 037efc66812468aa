//! Chunk graph report consumed by analyzers and manifest writers

use serde::Serialize;

use crate::{
    chunk_graph::{ChunkGroupIdx, ChunkGroupKind, ChunkIdx, ChunkOrigin},
    compilation::BuildOutput,
    diagnostics::Diagnostics,
    module_graph::ModuleGraph,
    runtime_requirements::RuntimeRequirement,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkGraphReport {
    pub chunks: Vec<ChunkReport>,
    pub groups: Vec<ChunkGroupReport>,
    pub weak_references: Vec<WeakReferenceReport>,
    /// Group ids that can trigger loading of each other
    pub cyclic_groups: Vec<Vec<String>>,
    pub diagnostics: Diagnostics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkReport {
    pub id: String,
    pub name: Option<String>,
    pub hash: String,
    pub origin: &'static str,
    pub cache_group: Option<String>,
    pub size: u64,
    /// Module ids in source order
    pub modules: Vec<String>,
    pub runtime: Vec<String>,
    pub runtime_requirements: Vec<RuntimeRequirement>,
    pub files: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ChunkGroupReport {
    /// Split-point key of the group
    pub id: String,
    pub name: Option<String>,
    pub entrypoint: bool,
    pub runtime: Option<String>,
    pub parents: Vec<String>,
    pub children: Vec<String>,
    /// Chunk ids in loading order
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct WeakReferenceReport {
    pub from: String,
    pub to: String,
    /// Whether the target ended up in any chunk
    pub included: bool,
}

impl ChunkGraphReport {
    pub fn new(graph: &ModuleGraph, output: &BuildOutput) -> Self {
        let chunk_graph = &output.chunk_graph;
        let chunk_id = |chunk: ChunkIdx| chunk_graph.chunk(chunk).id.clone().unwrap_or_default();
        let group_id = |group: ChunkGroupIdx| chunk_graph.group(group).split_point.clone();
        let module_id = |module| {
            output
                .module_id(module)
                .map_or_else(|| graph.identity(module).to_owned(), str::to_owned)
        };

        let chunks = chunk_graph
            .chunks()
            .map(|chunk| {
                let id = chunk_id(chunk.idx);
                let hash = chunk.hash.clone().unwrap_or_default();
                let stem = chunk.name.as_deref().unwrap_or(&id);
                let (origin, cache_group) = match &chunk.origin {
                    ChunkOrigin::Entry => ("entry", None),
                    ChunkOrigin::Async => ("async", None),
                    ChunkOrigin::Split { cache_group } => ("split", Some(cache_group.clone())),
                };
                ChunkReport {
                    files: vec![format!("{stem}.{hash}.js")],
                    name: chunk.name.clone(),
                    origin,
                    cache_group,
                    size: chunk.modules.iter().map(|&m| graph.size_of(m)).sum(),
                    modules: chunk.modules.iter().map(|&m| module_id(m)).collect(),
                    runtime: chunk.runtime.iter().cloned().collect(),
                    runtime_requirements: chunk.runtime_requirements.iter().cloned().collect(),
                    id,
                    hash,
                }
            })
            .collect();

        let groups = chunk_graph
            .groups()
            .map(|group| ChunkGroupReport {
                id: group.split_point.clone(),
                name: group.name.clone(),
                entrypoint: group.is_entrypoint(),
                runtime: match &group.kind {
                    ChunkGroupKind::Entrypoint { runtime } => Some(runtime.clone()),
                    ChunkGroupKind::Async => None,
                },
                parents: group.parents.iter().map(|&g| group_id(g)).collect(),
                children: group.children.iter().map(|&g| group_id(g)).collect(),
                chunks: group.chunks.iter().map(|&c| chunk_id(c)).collect(),
            })
            .collect();

        let weak_references = chunk_graph
            .weak_references()
            .iter()
            .map(|&(from, to)| WeakReferenceReport {
                from: graph.identity(from).to_owned(),
                to: graph.identity(to).to_owned(),
                included: chunk_graph.is_module_included(to),
            })
            .collect();

        let cyclic_groups = chunk_graph
            .cyclic_group_sets()
            .into_iter()
            .map(|set| set.into_iter().map(group_id).collect())
            .collect();

        Self {
            chunks,
            groups,
            weak_references,
            cyclic_groups,
            diagnostics: output.diagnostics.clone(),
        }
    }

    /// Chunk layout as `id: module, module` lines, for quick inspection
    pub fn layout(&self) -> String {
        self.chunks
            .iter()
            .map(|chunk| {
                format!(
                    "{} [{}]: {}",
                    chunk.name.as_deref().unwrap_or(&chunk.id),
                    chunk.origin,
                    chunk.modules.join(", ")
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string(self)?)
    }
}
