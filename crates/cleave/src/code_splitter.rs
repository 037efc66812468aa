//! Chunk graph construction
//!
//! Walks the frozen module graph breadth-first from every entry. Static edges
//! keep the walk inside the current chunk, weak edges are only recorded, and
//! async edges open (or reuse) the chunk group memoized under their split-point
//! key. The work queue is keyed by (module, chunk) pairs, so termination does
//! not depend on the shape of the group graph, which may be cyclic.

use std::collections::VecDeque;

use log::{debug, info, trace};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::{
    chunk_graph::{ChunkGraph, ChunkGroupIdx, ChunkGroupKind, ChunkIdx, ChunkOrigin},
    diagnostics::{Diagnostic, DiagnosticKind, Diagnostics},
    error::{BuildError, Result},
    module_graph::{Dependency, DependencyKind, ModuleGraph, ModuleIdx},
    split_point::{SplitPointKey, SplitPointKeyStrategy, derive_split_point_key},
};

#[derive(Debug, Clone, Copy)]
struct QueueItem {
    module: ModuleIdx,
    chunk: ChunkIdx,
    group: ChunkGroupIdx,
}

#[derive(Debug)]
pub struct CodeSplitter<'a> {
    graph: &'a ModuleGraph,
    strategies: &'a [Box<dyn SplitPointKeyStrategy>],
    remove_available_modules: bool,
    chunk_graph: ChunkGraph,
    queue: VecDeque<QueueItem>,
    visited: FxHashSet<(ModuleIdx, ChunkIdx)>,
    /// User-visible chunk names and what claimed them
    claimed_names: FxHashMap<String, String>,
    diagnostics: Diagnostics,
}

impl<'a> CodeSplitter<'a> {
    pub fn new(
        graph: &'a ModuleGraph,
        strategies: &'a [Box<dyn SplitPointKeyStrategy>],
        remove_available_modules: bool,
    ) -> Self {
        Self {
            graph,
            strategies,
            remove_available_modules,
            chunk_graph: ChunkGraph::new(),
            queue: VecDeque::new(),
            visited: FxHashSet::default(),
            claimed_names: FxHashMap::default(),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Build the initial chunk graph
    pub fn split(mut self) -> Result<(ChunkGraph, Diagnostics)> {
        info!(
            "Constructing chunk graph for {} entries",
            self.graph.entries().len()
        );

        for entry in self.graph.entries() {
            self.claim_name(&entry.name, format!("entry '{}'", entry.name))?;
            let group = self.chunk_graph.add_group(
                Some(entry.name.clone()),
                ChunkGroupKind::Entrypoint {
                    runtime: entry.runtime.clone(),
                },
                SplitPointKey::entry(&entry.name).into_string(),
                entry.module,
            );
            let chunk = self
                .chunk_graph
                .add_chunk(Some(entry.name.clone()), ChunkOrigin::Entry);
            self.chunk_graph.connect_chunk_and_group(chunk, group);
            self.queue.push_back(QueueItem {
                module: entry.module,
                chunk,
                group,
            });
        }

        while let Some(item) = self.queue.pop_front() {
            self.process(item)?;
        }

        self.report_orphans();
        if self.remove_available_modules {
            self.remove_available_modules();
        }
        self.chunk_graph.recompute_runtimes();

        debug!(
            "Initial chunk graph: {} chunks in {} groups",
            self.chunk_graph.chunks().count(),
            self.chunk_graph.groups().count()
        );
        Ok((self.chunk_graph, self.diagnostics))
    }

    fn process(&mut self, item: QueueItem) -> Result<()> {
        if !self.visited.insert((item.module, item.chunk)) {
            return Ok(());
        }
        trace!(
            "Adding '{}' to chunk {:?}",
            self.graph.identity(item.module),
            item.chunk
        );
        self.chunk_graph.add_module(item.chunk, item.module);

        let graph = self.graph;
        for dependency in graph.dependencies_of(item.module) {
            match dependency.kind {
                DependencyKind::Static => self.queue.push_back(QueueItem {
                    module: dependency.target,
                    ..item
                }),
                DependencyKind::Weak => self
                    .chunk_graph
                    .record_weak_reference(item.module, dependency.target),
                DependencyKind::Async => self.enter_split_point(item, dependency)?,
            }
        }
        Ok(())
    }

    fn enter_split_point(&mut self, item: QueueItem, dependency: &Dependency) -> Result<()> {
        let graph = self.graph;
        let importer = graph.module(item.module);
        let target = graph.module(dependency.target);
        let key = derive_split_point_key(self.strategies, importer, dependency, target);

        if let Some(existing) = self.chunk_graph.group_by_split_point(key.as_str()) {
            let root = self.chunk_graph.group(existing).root_module;
            if root != dependency.target {
                return Err(BuildError::ChunkNamingCollision {
                    key: key.into_string(),
                    first: graph.identity(root).to_owned(),
                    second: target.identity.clone(),
                });
            }
            trace!("Reusing chunk group for split point '{key}'");
            self.chunk_graph.connect_groups(item.group, existing);
            return Ok(());
        }

        if let Some(name) = &dependency.chunk_name {
            self.claim_name(name, target.identity.clone())?;
        }
        debug!("Creating chunk group for split point '{key}'");
        let group = self.chunk_graph.add_group(
            dependency.chunk_name.clone(),
            ChunkGroupKind::Async,
            key.into_string(),
            dependency.target,
        );
        let chunk = self
            .chunk_graph
            .add_chunk(dependency.chunk_name.clone(), ChunkOrigin::Async);
        self.chunk_graph.connect_chunk_and_group(chunk, group);
        self.chunk_graph.connect_groups(item.group, group);
        self.queue.push_back(QueueItem {
            module: dependency.target,
            chunk,
            group,
        });
        Ok(())
    }

    fn claim_name(&mut self, name: &str, owner: String) -> Result<()> {
        if let Some(first) = self.claimed_names.get(name) {
            return Err(BuildError::ChunkNamingCollision {
                key: name.to_owned(),
                first: first.clone(),
                second: owner,
            });
        }
        self.claimed_names.insert(name.to_owned(), owner);
        Ok(())
    }

    fn report_orphans(&mut self) {
        for module in self.graph.modules() {
            if !self.chunk_graph.is_module_included(module.idx) {
                self.diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::OrphanModule,
                        format!("module '{}' is not reachable from any entry", module.identity),
                    )
                    .with_modules([module.identity.clone()]),
                );
            }
        }
    }

    /// Drop modules from async chunks that every parent group already
    /// guarantees to be loaded.
    fn remove_available_modules(&mut self) {
        let available = self.available_modules();
        let groups: Vec<ChunkGroupIdx> = self.chunk_graph.groups().map(|g| g.idx).collect();

        for group in groups {
            let Some(Some(available)) = available.get(group.as_u32() as usize) else {
                continue;
            };
            if self.chunk_graph.group(group).is_entrypoint() || available.is_empty() {
                continue;
            }
            for chunk in self.chunk_graph.group(group).chunks.clone() {
                let redundant: Vec<ModuleIdx> = self
                    .chunk_graph
                    .chunk(chunk)
                    .modules
                    .iter()
                    .copied()
                    .filter(|m| available.contains(m))
                    .collect();
                for module in &redundant {
                    self.chunk_graph.remove_module(chunk, *module);
                }
                if !redundant.is_empty() {
                    debug!(
                        "Removed {} already-available modules from chunk {chunk:?}",
                        redundant.len()
                    );
                }
                if self.chunk_graph.chunk(chunk).modules.is_empty() {
                    self.chunk_graph.disconnect_chunk(chunk);
                }
            }
        }
    }

    /// Greatest fixed point of
    /// `available(g) = ⋂ over parents p of (available(p) ∪ modules(p))`.
    /// `None` stands for "everything" and only survives for groups that no
    /// entrypoint reaches.
    fn available_modules(&self) -> Vec<Option<FxHashSet<ModuleIdx>>> {
        let groups: Vec<_> = self.chunk_graph.groups().collect();
        let provided: Vec<FxHashSet<ModuleIdx>> = groups
            .iter()
            .map(|g| self.chunk_graph.group_modules(g.idx))
            .collect();
        let mut available: Vec<Option<FxHashSet<ModuleIdx>>> = groups
            .iter()
            .map(|g| g.is_entrypoint().then(FxHashSet::default))
            .collect();

        let mut changed = true;
        while changed {
            changed = false;
            for group in groups.iter().filter(|g| !g.is_entrypoint()) {
                let mut acc: Option<FxHashSet<ModuleIdx>> = None;
                for parent in &group.parents {
                    let p = parent.as_u32() as usize;
                    let Some(parent_available) = &available[p] else {
                        continue;
                    };
                    let through_parent: FxHashSet<ModuleIdx> =
                        parent_available.union(&provided[p]).copied().collect();
                    acc = Some(match acc {
                        None => through_parent,
                        Some(current) => current.intersection(&through_parent).copied().collect(),
                    });
                }
                let slot = &mut available[group.idx.as_u32() as usize];
                if acc.is_some() && *slot != acc {
                    *slot = acc;
                    changed = true;
                }
            }
        }
        available
    }
}
