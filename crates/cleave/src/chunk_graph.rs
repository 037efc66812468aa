//! Chunk graph: chunks, chunk groups and the relations between them
//!
//! Chunks and chunk groups live in arenas and refer to each other by index.
//! The parent/child relation between groups may contain cycles (two async
//! boundaries importing each other), so nothing in here recurses along it;
//! traversals use explicit work lists with visited sets.

use std::collections::{BTreeSet, VecDeque};

use indexmap::{IndexMap, IndexSet};
use log::trace;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{module_graph::ModuleIdx, runtime_requirements::RuntimeRequirement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkIdx(u32);

impl ChunkIdx {
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkGroupIdx(u32);

impl ChunkGroupIdx {
    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    const fn index(self) -> usize {
        self.0 as usize
    }
}

/// How a chunk came into existence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOrigin {
    /// Initial chunk of an entrypoint
    Entry,
    /// Chunk of an async split point
    Async,
    /// Extracted by the split-chunks optimizer
    Split { cache_group: String },
}

impl ChunkOrigin {
    pub fn is_split(&self) -> bool {
        matches!(self, Self::Split { .. })
    }
}

#[derive(Debug, Clone)]
pub struct Chunk {
    pub idx: ChunkIdx,
    /// User-visible name, if any
    pub name: Option<String>,
    pub origin: ChunkOrigin,
    /// Member modules in source order
    pub modules: BTreeSet<ModuleIdx>,
    /// Groups this chunk belongs to; an empty set means the chunk was removed
    pub groups: IndexSet<ChunkGroupIdx>,
    /// Runtimes this chunk is valid under
    pub runtime: BTreeSet<String>,
    pub runtime_requirements: BTreeSet<RuntimeRequirement>,
    /// Assigned at sealing
    pub id: Option<String>,
    /// Assigned at sealing
    pub hash: Option<String>,
}

impl Chunk {
    pub fn is_live(&self) -> bool {
        !self.groups.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkGroupKind {
    Entrypoint { runtime: String },
    Async,
}

#[derive(Debug, Clone)]
pub struct ChunkGroup {
    pub idx: ChunkGroupIdx,
    pub name: Option<String>,
    pub kind: ChunkGroupKind,
    /// Split-point key this group was created for
    pub split_point: String,
    /// Entry module or dynamically imported module
    pub root_module: ModuleIdx,
    /// Chunks in loading order
    pub chunks: Vec<ChunkIdx>,
    pub parents: IndexSet<ChunkGroupIdx>,
    pub children: IndexSet<ChunkGroupIdx>,
}

impl ChunkGroup {
    pub fn is_entrypoint(&self) -> bool {
        matches!(self.kind, ChunkGroupKind::Entrypoint { .. })
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChunkGraph {
    chunks: Vec<Chunk>,
    groups: Vec<ChunkGroup>,
    /// Split-point key to group, in creation order
    split_points: IndexMap<String, ChunkGroupIdx>,
    /// Module to the chunks containing it
    module_chunks: FxHashMap<ModuleIdx, BTreeSet<ChunkIdx>>,
    /// Weak edges seen during construction: (referrer, target)
    weak_references: Vec<(ModuleIdx, ModuleIdx)>,
}

impl ChunkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_chunk(&mut self, name: Option<String>, origin: ChunkOrigin) -> ChunkIdx {
        let idx = ChunkIdx(self.chunks.len() as u32);
        self.chunks.push(Chunk {
            idx,
            name,
            origin,
            modules: BTreeSet::new(),
            groups: IndexSet::new(),
            runtime: BTreeSet::new(),
            runtime_requirements: BTreeSet::new(),
            id: None,
            hash: None,
        });
        idx
    }

    pub fn add_group(
        &mut self,
        name: Option<String>,
        kind: ChunkGroupKind,
        split_point: String,
        root_module: ModuleIdx,
    ) -> ChunkGroupIdx {
        let idx = ChunkGroupIdx(self.groups.len() as u32);
        self.split_points.insert(split_point.clone(), idx);
        self.groups.push(ChunkGroup {
            idx,
            name,
            kind,
            split_point,
            root_module,
            chunks: Vec::new(),
            parents: IndexSet::new(),
            children: IndexSet::new(),
        });
        idx
    }

    pub fn chunk(&self, idx: ChunkIdx) -> &Chunk {
        &self.chunks[idx.index()]
    }

    pub fn chunk_mut(&mut self, idx: ChunkIdx) -> &mut Chunk {
        &mut self.chunks[idx.index()]
    }

    pub fn group(&self, idx: ChunkGroupIdx) -> &ChunkGroup {
        &self.groups[idx.index()]
    }

    /// Live chunks in creation order
    pub fn chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter().filter(|c| c.is_live())
    }

    pub fn groups(&self) -> impl Iterator<Item = &ChunkGroup> {
        self.groups.iter()
    }

    pub fn entrypoints(&self) -> impl Iterator<Item = &ChunkGroup> {
        self.groups.iter().filter(|g| g.is_entrypoint())
    }

    pub fn entrypoint(&self, name: &str) -> Option<&ChunkGroup> {
        self.entrypoints().find(|g| g.name.as_deref() == Some(name))
    }

    pub fn group_by_split_point(&self, key: &str) -> Option<ChunkGroupIdx> {
        self.split_points.get(key).copied()
    }

    pub fn chunk_by_name(&self, name: &str) -> Option<ChunkIdx> {
        self.chunks()
            .find(|c| c.name.as_deref() == Some(name))
            .map(|c| c.idx)
    }

    /// Append a chunk to the end of a group's loading list
    pub fn connect_chunk_and_group(&mut self, chunk: ChunkIdx, group: ChunkGroupIdx) {
        if self.chunks[chunk.index()].groups.insert(group) {
            self.groups[group.index()].chunks.push(chunk);
        }
    }

    /// Insert `chunk` into every position of `group` right before `before`.
    /// No-op if the chunk is already a member of the group.
    pub fn insert_chunk_before(&mut self, group: ChunkGroupIdx, chunk: ChunkIdx, before: ChunkIdx) {
        if !self.chunks[chunk.index()].groups.insert(group) {
            return;
        }
        let chunks = &mut self.groups[group.index()].chunks;
        let position = chunks
            .iter()
            .position(|&c| c == before)
            .unwrap_or(chunks.len());
        chunks.insert(position, chunk);
    }

    pub fn connect_groups(&mut self, parent: ChunkGroupIdx, child: ChunkGroupIdx) {
        self.groups[parent.index()].children.insert(child);
        self.groups[child.index()].parents.insert(parent);
    }

    /// Detach a chunk from all of its groups and drop its modules
    pub fn disconnect_chunk(&mut self, chunk: ChunkIdx) {
        trace!("Disconnecting chunk {chunk:?}");
        let groups = std::mem::take(&mut self.chunks[chunk.index()].groups);
        for group in groups {
            self.groups[group.index()].chunks.retain(|&c| c != chunk);
        }
        let modules = std::mem::take(&mut self.chunks[chunk.index()].modules);
        for module in modules {
            self.forget_membership(module, chunk);
        }
    }

    /// Returns `false` if the module was already in the chunk
    pub fn add_module(&mut self, chunk: ChunkIdx, module: ModuleIdx) -> bool {
        if !self.chunks[chunk.index()].modules.insert(module) {
            return false;
        }
        self.module_chunks.entry(module).or_default().insert(chunk);
        true
    }

    pub fn remove_module(&mut self, chunk: ChunkIdx, module: ModuleIdx) -> bool {
        if !self.chunks[chunk.index()].modules.remove(&module) {
            return false;
        }
        self.forget_membership(module, chunk);
        true
    }

    fn forget_membership(&mut self, module: ModuleIdx, chunk: ChunkIdx) {
        if let Some(chunks) = self.module_chunks.get_mut(&module) {
            chunks.remove(&chunk);
            if chunks.is_empty() {
                self.module_chunks.remove(&module);
            }
        }
    }

    /// Chunks currently containing `module`, in creation order
    pub fn chunks_of_module(&self, module: ModuleIdx) -> impl Iterator<Item = ChunkIdx> + '_ {
        self.module_chunks
            .get(&module)
            .into_iter()
            .flat_map(|chunks| chunks.iter().copied())
    }

    /// Whether `module` ends up in any emitted chunk. This is the existence
    /// check a weak dependency resolves against.
    pub fn is_module_included(&self, module: ModuleIdx) -> bool {
        self.module_chunks
            .get(&module)
            .is_some_and(|chunks| !chunks.is_empty())
    }

    /// All modules present in at least one chunk, in source order
    pub fn included_modules(&self) -> BTreeSet<ModuleIdx> {
        self.module_chunks
            .iter()
            .filter(|(_, chunks)| !chunks.is_empty())
            .map(|(&module, _)| module)
            .collect()
    }

    pub(crate) fn record_weak_reference(&mut self, from: ModuleIdx, to: ModuleIdx) {
        self.weak_references.push((from, to));
    }

    pub fn weak_references(&self) -> &[(ModuleIdx, ModuleIdx)] {
        &self.weak_references
    }

    /// Union of the modules of every chunk in the group
    pub fn group_modules(&self, group: ChunkGroupIdx) -> FxHashSet<ModuleIdx> {
        self.groups[group.index()]
            .chunks
            .iter()
            .flat_map(|&c| self.chunks[c.index()].modules.iter().copied())
            .collect()
    }

    /// Whether the chunk is loaded on startup of some entrypoint
    pub fn is_initial(&self, chunk: ChunkIdx) -> bool {
        self.chunks[chunk.index()]
            .groups
            .iter()
            .any(|&g| self.groups[g.index()].is_entrypoint())
    }

    /// Whether the chunk is loaded on demand by some async group
    pub fn is_async(&self, chunk: ChunkIdx) -> bool {
        self.chunks[chunk.index()]
            .groups
            .iter()
            .any(|&g| !self.groups[g.index()].is_entrypoint())
    }

    /// Chunks that `chunk` may trigger loading of: members of child groups of
    /// any group it belongs to, excluding its own siblings
    pub fn chunk_dependencies(&self, chunk: ChunkIdx) -> BTreeSet<ChunkIdx> {
        let own_groups = &self.chunks[chunk.index()].groups;
        let siblings: FxHashSet<ChunkIdx> = own_groups
            .iter()
            .flat_map(|&g| self.groups[g.index()].chunks.iter().copied())
            .collect();

        own_groups
            .iter()
            .flat_map(|&g| self.groups[g.index()].children.iter())
            .flat_map(|&child| self.groups[child.index()].chunks.iter().copied())
            .filter(|c| *c != chunk && !siblings.contains(c))
            .collect()
    }

    /// Derive each chunk's runtime set from the entrypoints that reach it
    pub fn recompute_runtimes(&mut self) {
        for chunk in &mut self.chunks {
            chunk.runtime.clear();
        }

        let entrypoints: Vec<(ChunkGroupIdx, String)> = self
            .groups
            .iter()
            .filter_map(|g| match &g.kind {
                ChunkGroupKind::Entrypoint { runtime } => Some((g.idx, runtime.clone())),
                ChunkGroupKind::Async => None,
            })
            .collect();

        for (entrypoint, runtime) in entrypoints {
            let mut visited = FxHashSet::default();
            let mut queue = VecDeque::from([entrypoint]);
            while let Some(group) = queue.pop_front() {
                if !visited.insert(group) {
                    continue;
                }
                let group = &self.groups[group.index()];
                for &chunk in &group.chunks {
                    self.chunks[chunk.index()].runtime.insert(runtime.clone());
                }
                queue.extend(group.children.iter().copied());
            }
        }
    }

    /// Sets of chunk groups that can transitively trigger loading of each
    /// other. A runtime loader uses these to guard against re-entrant loads.
    pub fn cyclic_group_sets(&self) -> Vec<Vec<ChunkGroupIdx>> {
        let mut graph = DiGraph::<ChunkGroupIdx, ()>::new();
        let nodes: Vec<_> = self.groups.iter().map(|g| graph.add_node(g.idx)).collect();
        for group in &self.groups {
            for child in &group.children {
                graph.add_edge(nodes[group.idx.index()], nodes[child.index()], ());
            }
        }

        let mut sets: Vec<Vec<ChunkGroupIdx>> = tarjan_scc(&graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || (scc.len() == 1 && graph.contains_edge(scc[0], scc[0]))
            })
            .map(|scc| {
                let mut set: Vec<_> = scc.into_iter().map(|n| graph[n]).collect();
                set.sort();
                set
            })
            .collect();
        sets.sort();
        sets
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn module(i: u32) -> ModuleIdx {
        ModuleIdx::new(i)
    }

    #[test]
    fn test_membership_tracking() {
        let mut graph = ChunkGraph::new();
        let group = graph.add_group(
            Some("main".into()),
            ChunkGroupKind::Entrypoint {
                runtime: "main".into(),
            },
            "entry:main".into(),
            module(0),
        );
        let a = graph.add_chunk(Some("main".into()), ChunkOrigin::Entry);
        let b = graph.add_chunk(None, ChunkOrigin::Async);
        graph.connect_chunk_and_group(a, group);
        graph.connect_chunk_and_group(b, group);

        assert!(graph.add_module(a, module(1)));
        assert!(!graph.add_module(a, module(1)));
        assert!(graph.add_module(b, module(1)));
        assert_eq!(graph.chunks_of_module(module(1)).collect::<Vec<_>>(), vec![a, b]);

        graph.disconnect_chunk(b);
        assert_eq!(graph.chunks_of_module(module(1)).collect::<Vec<_>>(), vec![a]);
        assert_eq!(graph.group(group).chunks, vec![a]);
        assert_eq!(graph.chunks().count(), 1);

        assert!(graph.remove_module(a, module(1)));
        assert!(!graph.is_module_included(module(1)));
    }

    #[test]
    fn test_insert_chunk_before_keeps_loading_order() {
        let mut graph = ChunkGraph::new();
        let group = graph.add_group(None, ChunkGroupKind::Async, "module:x".into(), module(0));
        let first = graph.add_chunk(None, ChunkOrigin::Async);
        let shared = graph.add_chunk(None, ChunkOrigin::Async);
        graph.connect_chunk_and_group(first, group);

        graph.insert_chunk_before(group, shared, first);
        graph.insert_chunk_before(group, shared, first);
        assert_eq!(graph.group(group).chunks, vec![shared, first]);
    }

    #[test]
    fn test_cycles_between_groups_are_reported() {
        let mut graph = ChunkGraph::new();
        let main = graph.add_group(
            Some("main".into()),
            ChunkGroupKind::Entrypoint {
                runtime: "main".into(),
            },
            "entry:main".into(),
            module(0),
        );
        let left = graph.add_group(None, ChunkGroupKind::Async, "module:l".into(), module(1));
        let right = graph.add_group(None, ChunkGroupKind::Async, "module:r".into(), module(2));
        graph.connect_groups(main, left);
        graph.connect_groups(left, right);
        graph.connect_groups(right, left);

        assert_eq!(graph.cyclic_group_sets(), vec![vec![left, right]]);
    }

    #[test]
    fn test_runtimes_follow_children_through_cycles() {
        let mut graph = ChunkGraph::new();
        let main = graph.add_group(
            Some("main".into()),
            ChunkGroupKind::Entrypoint {
                runtime: "web".into(),
            },
            "entry:main".into(),
            module(0),
        );
        let lazy = graph.add_group(None, ChunkGroupKind::Async, "module:l".into(), module(1));
        let main_chunk = graph.add_chunk(Some("main".into()), ChunkOrigin::Entry);
        let lazy_chunk = graph.add_chunk(None, ChunkOrigin::Async);
        graph.connect_chunk_and_group(main_chunk, main);
        graph.connect_chunk_and_group(lazy_chunk, lazy);
        graph.connect_groups(main, lazy);
        graph.connect_groups(lazy, lazy);

        graph.recompute_runtimes();
        assert_eq!(
            graph.chunk(lazy_chunk).runtime,
            BTreeSet::from(["web".to_owned()])
        );
        assert_eq!(
            graph.chunk_dependencies(main_chunk),
            BTreeSet::from([lazy_chunk])
        );
        assert!(graph.chunk_dependencies(lazy_chunk).is_empty());
    }
}
