//! Split-chunks optimizer
//!
//! Rewrites the initial chunk graph by extracting modules shared between
//! chunks into separate chunks, driven by cache-group rules. Cache groups run
//! in descending priority (declaration order breaks ties) and the whole pass
//! repeats until nothing moves or the iteration cap is reached.
//!
//! A module is only a candidate while it still sits in at least one chunk that
//! was not produced by extraction, so every change strictly shrinks the set of
//! (module, original chunk) memberships and the pass terminates.
//!
//! The first cache group to extract a module owns it for the rest of the pass.
//! Lower-priority groups never move an owned module; with
//! `reuse-existing-chunk` they may only fold its remaining copies into the
//! owner's chunk.

mod cache_group;
mod max_size;

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use rustc_hash::{FxHashMap, FxHashSet};

pub use self::cache_group::{CacheGroup, ChunkFilter, ModuleFilter, ModuleTest};
use crate::{
    chunk_graph::{ChunkGraph, ChunkGroupIdx, ChunkIdx, ChunkOrigin},
    diagnostics::{Diagnostic, DiagnosticKind, Diagnostics},
    error::{BuildError, Result},
    module_graph::{ModuleGraph, ModuleIdx},
};

pub const DEFAULT_MAX_ITERATIONS: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CombinationKey {
    /// Named cache groups collect everything into one chunk
    Named,
    /// Set of chunks that will share the extracted chunk
    Chunks(BTreeSet<ChunkIdx>),
}

#[derive(Debug, Default)]
struct Combination {
    chunks: BTreeSet<ChunkIdx>,
    /// Candidate module to the chunks it is extracted from
    sources: BTreeMap<ModuleIdx, BTreeSet<ChunkIdx>>,
}

#[derive(Debug)]
pub struct SplitChunks<'a> {
    graph: &'a ModuleGraph,
    cache_groups: Vec<CacheGroup>,
    max_iterations: usize,
}

impl<'a> SplitChunks<'a> {
    pub fn new(
        graph: &'a ModuleGraph,
        mut cache_groups: Vec<CacheGroup>,
        max_iterations: usize,
    ) -> Self {
        // Stable: equal priorities keep declaration order
        cache_groups.sort_by_key(|group| std::cmp::Reverse(group.priority));
        Self {
            graph,
            cache_groups,
            max_iterations,
        }
    }

    /// Optimize in place and return the diagnostics raised on the way
    pub fn optimize(&self, chunk_graph: &mut ChunkGraph) -> Result<Diagnostics> {
        let mut diagnostics = Diagnostics::default();
        if self.cache_groups.is_empty() {
            return Ok(diagnostics);
        }
        info!(
            "Optimizing chunk graph with {} cache groups",
            self.cache_groups.len()
        );

        let required: Vec<(ChunkGroupIdx, FxHashSet<ModuleIdx>)> = chunk_graph
            .groups()
            .map(|group| (group.idx, chunk_graph.group_modules(group.idx)))
            .collect();

        let mut owners: FxHashMap<ModuleIdx, usize> = FxHashMap::default();
        let mut converged = false;
        for iteration in 1..=self.max_iterations {
            let changed = self.run_iteration(chunk_graph, &mut owners, &mut diagnostics)?;
            self.check_group_modules(chunk_graph, &required)?;
            debug!("Split-chunks iteration {iteration}: changed = {changed}");
            if !changed {
                converged = true;
                break;
            }
        }

        if !converged {
            diagnostics.push(Diagnostic::warning(
                DiagnosticKind::OptimizationDidNotConverge,
                format!(
                    "split-chunks still changed the chunk graph after {} iterations; keeping the \
                     last state",
                    self.max_iterations
                ),
            ));
        }
        chunk_graph.recompute_runtimes();
        Ok(diagnostics)
    }

    /// `owners` maps extracted modules to the rank of the cache group that
    /// extracted them, across iterations
    fn run_iteration(
        &self,
        chunk_graph: &mut ChunkGraph,
        owners: &mut FxHashMap<ModuleIdx, usize>,
        diagnostics: &mut Diagnostics,
    ) -> Result<bool> {
        let roots: FxHashSet<ModuleIdx> = chunk_graph.groups().map(|g| g.root_module).collect();
        let mut changed = false;

        for (rank, cache_group) in self.cache_groups.iter().enumerate() {
            let (combinations, adoptions) =
                self.select(chunk_graph, rank, cache_group, owners, &roots);
            for (module, owner, sources) in adoptions {
                changed |= self.adopt(chunk_graph, module, owner, &sources);
            }
            for combination in combinations.into_values() {
                match self.extract(chunk_graph, cache_group, &combination, diagnostics)? {
                    Extraction::Moved => changed = true,
                    Extraction::AlreadyInPlace => {}
                    Extraction::TooSmall => continue,
                }
                for &module in combination.sources.keys() {
                    owners.insert(module, rank);
                }
            }
        }
        Ok(changed)
    }

    /// Group candidates into combinations. Modules owned by a higher-priority
    /// group are returned separately, with the chunks to fold into the owner.
    fn select(
        &self,
        chunk_graph: &ChunkGraph,
        rank: usize,
        cache_group: &CacheGroup,
        owners: &FxHashMap<ModuleIdx, usize>,
        roots: &FxHashSet<ModuleIdx>,
    ) -> (
        BTreeMap<CombinationKey, Combination>,
        Vec<(ModuleIdx, usize, BTreeSet<ChunkIdx>)>,
    ) {
        let mut combinations: BTreeMap<CombinationKey, Combination> = BTreeMap::new();
        let mut adoptions = Vec::new();

        for module in chunk_graph.included_modules() {
            if roots.contains(&module) || !cache_group.test.matches(self.graph.module(module)) {
                continue;
            }
            let chunks: BTreeSet<ChunkIdx> = chunk_graph
                .chunks_of_module(module)
                .filter(|&chunk| cache_group.chunks.accepts(chunk_graph, chunk))
                .collect();
            if chunks.len() < cache_group.min_chunks
                || chunks
                    .iter()
                    .all(|&chunk| chunk_graph.chunk(chunk).origin.is_split())
            {
                continue;
            }

            if let Some(&owner) = owners.get(&module)
                && owner < rank
            {
                if cache_group.reuse_existing_chunk {
                    let sources = chunks
                        .into_iter()
                        .filter(|&chunk| !chunk_graph.chunk(chunk).origin.is_split())
                        .collect();
                    adoptions.push((module, owner, sources));
                }
                continue;
            }

            let key = if cache_group.name.is_some() {
                CombinationKey::Named
            } else {
                CombinationKey::Chunks(chunks.clone())
            };
            let combination = combinations.entry(key).or_default();
            combination.chunks.extend(chunks.iter().copied());
            combination.sources.insert(module, chunks);
        }
        (combinations, adoptions)
    }

    /// Move `module` out of `sources` into the chunk its owning cache group
    /// extracted it to, wiring that chunk into the sources' groups
    fn adopt(
        &self,
        chunk_graph: &mut ChunkGraph,
        module: ModuleIdx,
        owner: usize,
        sources: &BTreeSet<ChunkIdx>,
    ) -> bool {
        let owner_key = &self.cache_groups[owner].key;
        let Some(target) = chunk_graph.chunks_of_module(module).find(|&chunk| {
            matches!(
                &chunk_graph.chunk(chunk).origin,
                ChunkOrigin::Split { cache_group } if cache_group == owner_key
            )
        }) else {
            return false;
        };
        debug!(
            "Cache group '{owner_key}': folding '{}' from {} chunks into chunk {target:?}",
            self.graph.identity(module),
            sources.len()
        );

        for &source in sources {
            chunk_graph.remove_module(source, module);
            let groups: Vec<ChunkGroupIdx> =
                chunk_graph.chunk(source).groups.iter().copied().collect();
            for group in groups {
                chunk_graph.insert_chunk_before(group, target, source);
            }
            let chunk = chunk_graph.chunk(source);
            if chunk.modules.is_empty() && chunk.origin != ChunkOrigin::Entry {
                chunk_graph.disconnect_chunk(source);
            }
        }
        !sources.is_empty()
    }

    fn extract(
        &self,
        chunk_graph: &mut ChunkGraph,
        cache_group: &CacheGroup,
        combination: &Combination,
        diagnostics: &mut Diagnostics,
    ) -> Result<Extraction> {
        let modules: BTreeSet<ModuleIdx> = combination.sources.keys().copied().collect();
        let size: u64 = modules.iter().map(|&m| self.graph.size_of(m)).sum();
        if size < cache_group.min_size && !cache_group.enforce {
            debug!(
                "Cache group '{}': {} modules ({size} bytes) below min-size {}",
                cache_group.key,
                modules.len(),
                cache_group.min_size
            );
            return Ok(Extraction::TooSmall);
        }

        let target = self.target_chunk(chunk_graph, cache_group, combination, &modules)?;
        if combination.chunks.len() == 1 && combination.chunks.contains(&target) {
            return Ok(Extraction::AlreadyInPlace);
        }
        debug!(
            "Cache group '{}': moving {} modules ({size} bytes) shared by {} chunks into chunk \
             {target:?}",
            cache_group.key,
            modules.len(),
            combination.chunks.len()
        );

        for (&module, sources) in &combination.sources {
            for &source in sources {
                if source != target {
                    chunk_graph.remove_module(source, module);
                }
            }
            chunk_graph.add_module(target, module);
        }

        for &source in &combination.chunks {
            if source == target {
                continue;
            }
            let groups: Vec<ChunkGroupIdx> =
                chunk_graph.chunk(source).groups.iter().copied().collect();
            for group in groups {
                chunk_graph.insert_chunk_before(group, target, source);
            }
            let chunk = chunk_graph.chunk(source);
            if chunk.modules.is_empty() && chunk.origin != ChunkOrigin::Entry {
                chunk_graph.disconnect_chunk(source);
            }
        }

        if let Some(max_size) = cache_group.max_size {
            self.enforce_max_size(chunk_graph, cache_group, target, max_size, diagnostics);
        }
        Ok(Extraction::Moved)
    }

    fn target_chunk(
        &self,
        chunk_graph: &mut ChunkGraph,
        cache_group: &CacheGroup,
        combination: &Combination,
        modules: &BTreeSet<ModuleIdx>,
    ) -> Result<ChunkIdx> {
        if cache_group.reuse_existing_chunk {
            let reusable = combination.chunks.iter().copied().find(|&chunk| {
                let chunk = chunk_graph.chunk(chunk);
                chunk.origin != ChunkOrigin::Entry && chunk.modules == *modules
            });
            if let Some(chunk) = reusable {
                debug!("Cache group '{}': reusing chunk {chunk:?}", cache_group.key);
                return Ok(chunk);
            }
        }

        if let Some(name) = &cache_group.name
            && let Some(existing) = chunk_graph.chunk_by_name(name)
        {
            if !chunk_graph.chunk(existing).origin.is_split() {
                return Err(BuildError::ChunkNamingCollision {
                    key: name.clone(),
                    first: format!("chunk '{name}'"),
                    second: format!("cache group '{}'", cache_group.key),
                });
            }
            return Ok(existing);
        }

        Ok(chunk_graph.add_chunk(
            cache_group.name.clone(),
            ChunkOrigin::Split {
                cache_group: cache_group.key.clone(),
            },
        ))
    }

    fn enforce_max_size(
        &self,
        chunk_graph: &mut ChunkGraph,
        cache_group: &CacheGroup,
        target: ChunkIdx,
        max_size: u64,
        diagnostics: &mut Diagnostics,
    ) {
        let modules = chunk_graph.chunk(target).modules.clone();
        let total: u64 = modules.iter().map(|&m| self.graph.size_of(m)).sum();
        if total <= max_size {
            return;
        }

        let label = chunk_label(chunk_graph, target);
        for &module in &modules {
            let size = self.graph.size_of(module);
            if size > max_size {
                let identity = self.graph.identity(module).to_owned();
                diagnostics.push(
                    Diagnostic::warning(
                        DiagnosticKind::MaxSizeExceeded,
                        format!(
                            "module '{identity}' ({size} bytes) exceeds max-size {max_size} of \
                             cache group '{}' and is emitted as-is",
                            cache_group.key
                        ),
                    )
                    .with_modules([identity])
                    .with_chunks([label.clone()]),
                );
            }
        }

        let parts = max_size::partition(self.graph, &modules, cache_group.min_size, max_size);
        if parts.len() < 2 {
            if modules.len() > 1 {
                oversized_chunk(diagnostics, cache_group, &label, total, max_size);
            }
            return;
        }
        debug!(
            "Cache group '{}': splitting {label} ({total} bytes) into {} parts",
            cache_group.key,
            parts.len()
        );

        let groups: Vec<ChunkGroupIdx> =
            chunk_graph.chunk(target).groups.iter().copied().collect();
        let name = chunk_graph.chunk(target).name.clone();
        for (i, part) in parts.into_iter().enumerate() {
            let chunk = chunk_graph.add_chunk(
                name.as_ref().map(|name| format!("{name}~{i}")),
                ChunkOrigin::Split {
                    cache_group: cache_group.key.clone(),
                },
            );
            let size: u64 = part.iter().map(|&m| self.graph.size_of(m)).sum();
            if size > max_size && part.len() > 1 {
                let label = chunk_label(chunk_graph, chunk);
                oversized_chunk(diagnostics, cache_group, &label, size, max_size);
            }
            for module in part {
                chunk_graph.remove_module(target, module);
                chunk_graph.add_module(chunk, module);
            }
            for &group in &groups {
                chunk_graph.insert_chunk_before(group, chunk, target);
            }
        }
        chunk_graph.disconnect_chunk(target);
    }

    /// Every group must still provide the modules it provided before
    fn check_group_modules(
        &self,
        chunk_graph: &ChunkGraph,
        required: &[(ChunkGroupIdx, FxHashSet<ModuleIdx>)],
    ) -> Result<()> {
        for (group, before) in required {
            let now = chunk_graph.group_modules(*group);
            let mut missing: Vec<String> = before
                .difference(&now)
                .map(|&m| self.graph.identity(m).to_owned())
                .collect();
            if !missing.is_empty() {
                missing.sort();
                let group = chunk_graph.group(*group);
                return Err(BuildError::InvalidChunkGraph {
                    group: group.name.clone().unwrap_or_else(|| group.split_point.clone()),
                    missing,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Extraction {
    Moved,
    AlreadyInPlace,
    TooSmall,
}

/// A chunk of several modules that stays above max-size after partitioning
fn oversized_chunk(
    diagnostics: &mut Diagnostics,
    cache_group: &CacheGroup,
    label: &str,
    size: u64,
    max_size: u64,
) {
    diagnostics.push(
        Diagnostic::warning(
            DiagnosticKind::MaxSizeExceeded,
            format!(
                "chunk '{label}' ({size} bytes) exceeds max-size {max_size} of cache group '{}' \
                 and is emitted as-is (min-size {})",
                cache_group.key, cache_group.min_size
            ),
        )
        .with_chunks([label.to_owned()]),
    );
}

fn chunk_label(chunk_graph: &ChunkGraph, chunk: ChunkIdx) -> String {
    chunk_graph
        .chunk(chunk)
        .name
        .clone()
        .unwrap_or_else(|| format!("#{}", chunk.as_u32()))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        code_splitter::CodeSplitter,
        module_graph::{EntryOptions, ModuleDescriptor, ModuleGraphBuilder},
    };

    /// Two entries that both import `shared`, one of them also through an
    /// async boundary
    fn graph() -> ModuleGraph {
        let mut builder = ModuleGraphBuilder::new();
        let modules = [
            ModuleDescriptor::new("a")
                .import("shared")
                .dynamic_import("lazy", None),
            ModuleDescriptor::new("b").import("shared"),
            ModuleDescriptor::new("lazy").import("other"),
            ModuleDescriptor::new("shared").size(500),
            ModuleDescriptor::new("other").size(500),
        ];
        for module in modules {
            builder.add_module(module).expect("unique module");
        }
        builder
            .add_entry(EntryOptions::new("a", "a"))
            .expect("unique entry");
        builder
            .add_entry(EntryOptions::new("b", "b"))
            .expect("unique entry");
        builder.freeze().expect("complete graph")
    }

    fn split_chunk_modules(graph: &ModuleGraph, chunk_graph: &ChunkGraph) -> Vec<Vec<String>> {
        chunk_graph
            .chunks()
            .filter(|c| c.origin.is_split())
            .map(|c| c.modules.iter().map(|&m| graph.identity(m).to_owned()).collect())
            .collect()
    }

    #[test]
    fn test_shared_module_is_extracted_once() {
        let graph = graph();
        let (mut chunk_graph, _) = CodeSplitter::new(&graph, &[], true)
            .split()
            .expect("no collisions");
        let optimizer = SplitChunks::new(
            &graph,
            vec![CacheGroup::new("common").min_chunks(2)],
            DEFAULT_MAX_ITERATIONS,
        );
        let diagnostics = optimizer.optimize(&mut chunk_graph).expect("valid graph");

        assert!(diagnostics.is_empty());
        assert_eq!(split_chunk_modules(&graph, &chunk_graph), vec![vec!["shared"]]);
        for entry in ["a", "b"] {
            let group = chunk_graph.entrypoint(entry).expect("entrypoint exists");
            assert_eq!(group.chunks.len(), 2);
            assert!(chunk_graph.chunk(group.chunks[0]).origin.is_split());
        }
    }

    #[test]
    fn test_min_size_blocks_unless_enforced() {
        let graph = graph();
        let run = |group: CacheGroup| {
            let (mut chunk_graph, _) = CodeSplitter::new(&graph, &[], true)
                .split()
                .expect("no collisions");
            SplitChunks::new(&graph, vec![group], DEFAULT_MAX_ITERATIONS)
                .optimize(&mut chunk_graph)
                .expect("valid graph");
            split_chunk_modules(&graph, &chunk_graph).len()
        };

        assert_eq!(run(CacheGroup::new("big").min_chunks(2).min_size(1000)), 0);
        assert_eq!(
            run(CacheGroup::new("big").min_chunks(2).min_size(1000).enforce(true)),
            1
        );
    }

    #[test]
    fn test_chunk_filter_restricts_candidates() {
        let graph = graph();
        let (mut chunk_graph, _) = CodeSplitter::new(&graph, &[], true)
            .split()
            .expect("no collisions");
        let optimizer = SplitChunks::new(
            &graph,
            vec![
                CacheGroup::new("lazy-deps")
                    .name("lazy-deps")
                    .chunks(ChunkFilter::Async),
            ],
            DEFAULT_MAX_ITERATIONS,
        );
        optimizer.optimize(&mut chunk_graph).expect("valid graph");

        assert_eq!(split_chunk_modules(&graph, &chunk_graph), vec![vec!["other"]]);
        let lazy_deps = chunk_graph
            .chunk_by_name("lazy-deps")
            .expect("named chunk exists");
        assert!(chunk_graph.is_async(lazy_deps));
        assert!(!chunk_graph.is_initial(lazy_deps));
    }
}
