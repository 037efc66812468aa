//! Frozen module graph consumed by the chunking core
//!
//! Modules are produced by an external builder. They are registered with a
//! [`ModuleGraphBuilder`] in source order and become visible to the core only
//! after [`ModuleGraphBuilder::freeze`] succeeds. Freezing is the hard barrier
//! between module building and chunk graph construction: a graph with an
//! unbuilt dependency target is rejected as a whole.

use std::collections::BTreeSet;

use log::debug;
use rustc_hash::FxHashMap;

use crate::{
    error::{BuildError, Result},
    runtime_requirements::RuntimeRequirement,
};

/// Index of a module in the frozen graph, doubling as its source order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIdx(u32);

impl ModuleIdx {
    pub fn new(idx: u32) -> Self {
        Self(idx)
    }

    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }

    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Type of a dependency edge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DependencyKind {
    /// Target must be loaded before the referrer runs
    Static,
    /// Crosses a potential chunk boundary (dynamic import)
    Async,
    /// Existence check only, never forces inclusion
    Weak,
}

/// A resolved dependency edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub target: ModuleIdx,
    pub kind: DependencyKind,
    /// Chunk name requested at the import site, for async edges
    pub chunk_name: Option<String>,
}

/// An immutable, built module
#[derive(Debug, Clone)]
pub struct Module {
    pub idx: ModuleIdx,
    /// Stable identity key (request path plus context)
    pub identity: String,
    /// Size of the emitted code in bytes
    pub size: u64,
    /// Digest of the emitted code, consumed by content hashing
    pub digest: String,
    pub side_effect_free: bool,
    /// Exports used by importers, as computed by tree shaking upstream
    pub used_exports: Option<BTreeSet<String>>,
    /// Runtime capabilities the generated code of this module calls into
    pub runtime_needs: BTreeSet<RuntimeRequirement>,
    /// Outgoing dependencies in source order
    pub dependencies: Vec<Dependency>,
}

/// A configured entry, resolved against the graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub module: ModuleIdx,
    /// Runtime this entry defines; defaults to the entry name
    pub runtime: String,
}

/// Entry as configured by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryOptions {
    pub name: String,
    pub import: String,
    pub runtime: Option<String>,
}

impl EntryOptions {
    pub fn new(name: impl Into<String>, import: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            import: import.into(),
            runtime: None,
        }
    }

    #[must_use]
    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = Some(runtime.into());
        self
    }
}

#[derive(Debug, Clone)]
struct PendingDependency {
    target: String,
    kind: DependencyKind,
    chunk_name: Option<String>,
}

/// Description of a built module before the graph is frozen
#[derive(Debug, Clone)]
pub struct ModuleDescriptor {
    identity: String,
    size: u64,
    digest: String,
    side_effect_free: bool,
    used_exports: Option<BTreeSet<String>>,
    runtime_needs: BTreeSet<RuntimeRequirement>,
    dependencies: Vec<PendingDependency>,
}

impl ModuleDescriptor {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            size: 0,
            digest: String::new(),
            side_effect_free: false,
            used_exports: None,
            runtime_needs: BTreeSet::new(),
            dependencies: Vec::new(),
        }
    }

    #[must_use]
    pub fn size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    #[must_use]
    pub fn digest(mut self, digest: impl Into<String>) -> Self {
        self.digest = digest.into();
        self
    }

    #[must_use]
    pub fn side_effect_free(mut self, side_effect_free: bool) -> Self {
        self.side_effect_free = side_effect_free;
        self
    }

    #[must_use]
    pub fn used_exports(mut self, exports: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.used_exports = Some(exports.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn needs(mut self, requirement: RuntimeRequirement) -> Self {
        self.runtime_needs.insert(requirement);
        self
    }

    #[must_use]
    pub fn dependency(
        mut self,
        target: impl Into<String>,
        kind: DependencyKind,
        chunk_name: Option<&str>,
    ) -> Self {
        self.dependencies.push(PendingDependency {
            target: target.into(),
            kind,
            chunk_name: chunk_name.map(str::to_owned),
        });
        self
    }

    #[must_use]
    pub fn import(self, target: impl Into<String>) -> Self {
        self.dependency(target, DependencyKind::Static, None)
    }

    #[must_use]
    pub fn dynamic_import(self, target: impl Into<String>, chunk_name: Option<&str>) -> Self {
        self.dependency(target, DependencyKind::Async, chunk_name)
    }

    #[must_use]
    pub fn weak_import(self, target: impl Into<String>) -> Self {
        self.dependency(target, DependencyKind::Weak, None)
    }
}

/// Collects built modules until every one of them is available
#[derive(Debug, Default)]
pub struct ModuleGraphBuilder {
    descriptors: Vec<ModuleDescriptor>,
    by_identity: FxHashMap<String, ModuleIdx>,
    entries: Vec<EntryOptions>,
}

impl ModuleGraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a built module; registration order is the source order
    pub fn add_module(&mut self, descriptor: ModuleDescriptor) -> Result<ModuleIdx> {
        if self.by_identity.contains_key(&descriptor.identity) {
            return Err(BuildError::DuplicateModule(descriptor.identity));
        }
        let idx = ModuleIdx::new(self.descriptors.len() as u32);
        self.by_identity.insert(descriptor.identity.clone(), idx);
        self.descriptors.push(descriptor);
        Ok(idx)
    }

    pub fn add_entry(&mut self, entry: EntryOptions) -> Result<()> {
        if self.entries.iter().any(|e| e.name == entry.name) {
            return Err(BuildError::DuplicateEntry(entry.name));
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Resolve all edges and produce the immutable graph
    pub fn freeze(self) -> Result<ModuleGraph> {
        let Self {
            descriptors,
            by_identity,
            entries,
        } = self;

        let mut modules = Vec::with_capacity(descriptors.len());
        for (i, descriptor) in descriptors.into_iter().enumerate() {
            let mut dependencies = Vec::with_capacity(descriptor.dependencies.len());
            for pending in descriptor.dependencies {
                let Some(&target) = by_identity.get(&pending.target) else {
                    return Err(BuildError::IncompleteModuleGraph {
                        module: descriptor.identity,
                        missing: pending.target,
                    });
                };
                dependencies.push(Dependency {
                    target,
                    kind: pending.kind,
                    chunk_name: pending.chunk_name,
                });
            }
            modules.push(Module {
                idx: ModuleIdx::new(i as u32),
                identity: descriptor.identity,
                size: descriptor.size,
                digest: descriptor.digest,
                side_effect_free: descriptor.side_effect_free,
                used_exports: descriptor.used_exports,
                runtime_needs: descriptor.runtime_needs,
                dependencies,
            });
        }

        let entries = entries
            .into_iter()
            .map(|options| {
                let Some(&module) = by_identity.get(&options.import) else {
                    return Err(BuildError::UnknownEntry {
                        entry: options.name,
                        module: options.import,
                    });
                };
                let runtime = options.runtime.unwrap_or_else(|| options.name.clone());
                Ok(Entry {
                    name: options.name,
                    module,
                    runtime,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Froze module graph with {} modules and {} entries",
            modules.len(),
            entries.len()
        );

        Ok(ModuleGraph {
            modules,
            by_identity,
            entries,
        })
    }
}

/// Complete, immutable snapshot of every built module
#[derive(Debug, Clone)]
pub struct ModuleGraph {
    modules: Vec<Module>,
    by_identity: FxHashMap<String, ModuleIdx>,
    entries: Vec<Entry>,
}

impl ModuleGraph {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn module(&self, idx: ModuleIdx) -> &Module {
        &self.modules[idx.index()]
    }

    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.iter()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn module_by_identity(&self, identity: &str) -> Option<&Module> {
        self.by_identity
            .get(identity)
            .map(|&idx| &self.modules[idx.index()])
    }

    pub fn identity(&self, idx: ModuleIdx) -> &str {
        &self.modules[idx.index()].identity
    }

    pub fn dependencies_of(&self, idx: ModuleIdx) -> &[Dependency] {
        &self.modules[idx.index()].dependencies
    }

    pub fn size_of(&self, idx: ModuleIdx) -> u64 {
        self.modules[idx.index()].size
    }

    pub fn declared_runtime_needs(&self, idx: ModuleIdx) -> &BTreeSet<RuntimeRequirement> {
        &self.modules[idx.index()].runtime_needs
    }
}
