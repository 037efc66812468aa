//! Build context threaded through every phase
//!
//! A [`Compilation`] owns the configuration, the registered extension
//! strategies and the cancellation flag. [`Compilation::run`] drives one build
//! over a frozen module graph: construction, optimization, runtime
//! requirements and finally sealing. Cancellation is honoured at each phase
//! boundary up to sealing; ids and hashes are computed into scratch state and
//! committed in one step, so a partially sealed graph is never observable.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use indexmap::IndexMap;
use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::{
    chunk_graph::{ChunkGraph, ChunkIdx, ChunkOrigin},
    code_splitter::CodeSplitter,
    config::{Config, OptimizationConfig},
    diagnostics::Diagnostics,
    error::{BuildError, Result},
    hashing::compute_content_hashes,
    ids::{IdCandidate, IdHints, assign_ids},
    module_graph::{ModuleGraph, ModuleIdx},
    runtime_requirements::resolve_runtime_requirements,
    split_chunks::{CacheGroup, SplitChunks},
    split_point::SplitPointKeyStrategy,
    stats::ChunkGraphReport,
};

/// Cloneable cancellation flag, safe to trip from any thread
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct Compilation {
    options: OptimizationConfig,
    cache_groups: Vec<CacheGroup>,
    split_point_strategies: Vec<Box<dyn SplitPointKeyStrategy>>,
    id_hints: IdHints,
    abort: AbortSignal,
}

impl Compilation {
    /// Validate the configuration and prepare a build context
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let cache_groups = config.cache_groups()?;
        Ok(Self {
            options: config.optimization,
            cache_groups,
            split_point_strategies: Vec::new(),
            id_hints: IdHints::default(),
            abort: AbortSignal::new(),
        })
    }

    /// Append a programmatic cache group after the configured ones
    pub fn add_cache_group(&mut self, cache_group: CacheGroup) -> Result<()> {
        cache_group.validate()?;
        if self.cache_groups.iter().any(|g| g.key == cache_group.key) {
            return Err(BuildError::invalid_config(
                format!("cache-groups.{}", cache_group.key),
                "duplicate cache group key",
            ));
        }
        self.cache_groups.push(cache_group);
        Ok(())
    }

    /// Strategies are consulted in registration order
    pub fn register_split_point_strategy(
        &mut self,
        strategy: impl SplitPointKeyStrategy + 'static,
    ) {
        self.split_point_strategies.push(Box::new(strategy));
    }

    /// Ids from a previous build, used to minimise churn
    #[must_use]
    pub fn with_id_hints(mut self, hints: IdHints) -> Self {
        self.id_hints = hints;
        self
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    pub fn options(&self) -> &OptimizationConfig {
        &self.options
    }

    fn check_aborted(&self, phase: &str) -> Result<()> {
        if self.abort.is_aborted() {
            info!("Build aborted before {phase}");
            return Err(BuildError::Aborted);
        }
        Ok(())
    }

    pub fn run(&self, graph: &ModuleGraph) -> Result<BuildOutput> {
        self.check_aborted("chunk graph construction")?;
        info!("Phase 1: constructing chunk graph");
        let (mut chunk_graph, mut diagnostics) = CodeSplitter::new(
            graph,
            &self.split_point_strategies,
            self.options.remove_available_modules,
        )
        .split()?;

        self.check_aborted("optimization")?;
        info!("Phase 2: splitting chunks");
        let optimizer = SplitChunks::new(
            graph,
            self.cache_groups.clone(),
            self.options.split_chunks.max_iterations,
        );
        diagnostics.extend(optimizer.optimize(&mut chunk_graph)?);

        self.check_aborted("runtime requirements")?;
        info!("Phase 3: resolving runtime requirements");
        resolve_runtime_requirements(graph, &mut chunk_graph);

        self.check_aborted("sealing")?;
        info!("Phase 4: sealing");
        let sealed = Seal::compute(graph, &chunk_graph, &self.options, &self.id_hints)?;
        let module_ids = sealed.commit(&mut chunk_graph);

        info!(
            "Built {} chunks in {} chunk groups with {} diagnostics",
            chunk_graph.chunks().count(),
            chunk_graph.groups().count(),
            diagnostics.len()
        );
        Ok(BuildOutput {
            chunk_graph,
            module_ids,
            diagnostics,
        })
    }
}

/// Ids and hashes computed but not yet written to the chunk graph
#[derive(Debug)]
struct Seal {
    chunk_ids: FxHashMap<ChunkIdx, String>,
    chunk_hashes: FxHashMap<ChunkIdx, String>,
    module_ids: IndexMap<ModuleIdx, String>,
}

impl Seal {
    fn compute(
        graph: &ModuleGraph,
        chunk_graph: &ChunkGraph,
        options: &OptimizationConfig,
        hints: &IdHints,
    ) -> Result<Self> {
        let modules: Vec<ModuleIdx> = chunk_graph.included_modules().into_iter().collect();
        let entry_modules: Vec<ModuleIdx> = graph.entries().iter().map(|e| e.module).collect();
        let module_candidates: Vec<IdCandidate> = modules
            .iter()
            .map(|&m| IdCandidate {
                identity: graph.identity(m).to_owned(),
                name: None,
                readable: graph.identity(m).to_owned(),
                size: graph.size_of(m),
                usage: chunk_graph.chunks_of_module(m).count(),
                is_entry: entry_modules.contains(&m),
            })
            .collect();
        let module_ids: IndexMap<ModuleIdx, String> = modules
            .into_iter()
            .zip(assign_ids(
                options.module_ids,
                &module_candidates,
                &hints.modules,
                options.id_digest_length,
            )?)
            .collect();

        let chunks: Vec<ChunkIdx> = chunk_graph.chunks().map(|c| c.idx).collect();
        let mut identities = chunk_identities(graph, chunk_graph);
        let chunk_candidates: Vec<IdCandidate> = chunks
            .iter()
            .map(|&c| {
                let identity = identities.remove(&c).unwrap_or_default();
                chunk_id_candidate(graph, chunk_graph, c, identity)
            })
            .collect();
        let chunk_ids: FxHashMap<ChunkIdx, String> = chunks
            .into_iter()
            .zip(assign_ids(
                options.chunk_ids,
                &chunk_candidates,
                &hints.chunks,
                options.id_digest_length,
            )?)
            .collect();

        let module_id_lookup: FxHashMap<ModuleIdx, String> = module_ids
            .iter()
            .map(|(&m, id)| (m, id.clone()))
            .collect();
        let chunk_hashes = compute_content_hashes(
            graph,
            chunk_graph,
            &chunk_ids,
            &module_id_lookup,
            options.hash_digest_length,
        );
        debug!(
            "Sealed {} chunk ids and {} module ids",
            chunk_ids.len(),
            module_ids.len()
        );

        Ok(Self {
            chunk_ids,
            chunk_hashes,
            module_ids,
        })
    }

    fn commit(self, chunk_graph: &mut ChunkGraph) -> IndexMap<ModuleIdx, String> {
        let Self {
            chunk_ids,
            mut chunk_hashes,
            module_ids,
        } = self;
        for (chunk, id) in chunk_ids {
            let chunk = chunk_graph.chunk_mut(chunk);
            chunk.hash = chunk_hashes.remove(&chunk.idx);
            chunk.id = Some(id);
        }
        module_ids
    }
}

/// Stable identity of every live chunk: its name, if any, and its sorted
/// member identities. Chunks that still share an identity are told apart by
/// their position among the duplicates.
pub fn chunk_identities(
    graph: &ModuleGraph,
    chunk_graph: &ChunkGraph,
) -> FxHashMap<ChunkIdx, String> {
    let mut occurrences: FxHashMap<String, usize> = FxHashMap::default();
    chunk_graph
        .chunks()
        .map(|chunk| {
            let mut members: Vec<&str> =
                chunk.modules.iter().map(|&m| graph.identity(m)).collect();
            members.sort_unstable();
            let mut identity = members.join("\n");
            if let Some(name) = &chunk.name {
                identity = format!("name:{name}\n{identity}");
            }
            let seen = occurrences.entry(identity.clone()).or_default();
            if *seen > 0 {
                identity = format!("{identity}#{seen}");
            }
            *seen += 1;
            (chunk.idx, identity)
        })
        .collect()
}

fn chunk_id_candidate(
    graph: &ModuleGraph,
    chunk_graph: &ChunkGraph,
    chunk: ChunkIdx,
    identity: String,
) -> IdCandidate {
    let data = chunk_graph.chunk(chunk);
    let readable = data
        .modules
        .iter()
        .map(|&m| graph.identity(m))
        .collect::<Vec<_>>()
        .join("+");
    IdCandidate {
        identity,
        name: data.name.clone(),
        readable,
        size: data.modules.iter().map(|&m| graph.size_of(m)).sum(),
        usage: data.groups.len(),
        is_entry: data.origin == ChunkOrigin::Entry,
    }
}

/// Result of a successful build
#[derive(Debug, Clone)]
pub struct BuildOutput {
    pub chunk_graph: ChunkGraph,
    /// Ids of every included module, in source order
    pub module_ids: IndexMap<ModuleIdx, String>,
    pub diagnostics: Diagnostics,
}

impl BuildOutput {
    pub fn module_id(&self, module: ModuleIdx) -> Option<&str> {
        self.module_ids.get(&module).map(String::as_str)
    }

    /// Ids of this build, to be fed back through [`Compilation::with_id_hints`]
    pub fn id_hints(&self, graph: &ModuleGraph) -> IdHints {
        let mut identities = chunk_identities(graph, &self.chunk_graph);
        IdHints {
            chunks: self
                .chunk_graph
                .chunks()
                .filter_map(|c| Some((identities.remove(&c.idx)?, c.id.clone()?)))
                .collect(),
            modules: self
                .module_ids
                .iter()
                .map(|(&m, id)| (graph.identity(m).to_owned(), id.clone()))
                .collect(),
        }
    }

    pub fn report(&self, graph: &ModuleGraph) -> ChunkGraphReport {
        ChunkGraphReport::new(graph, self)
    }
}
