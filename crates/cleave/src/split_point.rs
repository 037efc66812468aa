//! Split-point keys
//!
//! Every async edge maps to a key identifying its dynamic-import boundary.
//! Chunk groups are memoized by this key, so several importers of the same
//! boundary share one group. Third parties can register strategies that derive
//! keys differently; they are consulted in registration order and the first
//! one returning a key wins.

use std::fmt;

use crate::module_graph::{Dependency, Module};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SplitPointKey(String);

impl SplitPointKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key for an import that requested a chunk name
    pub fn named(chunk_name: &str) -> Self {
        Self(format!("name:{chunk_name}"))
    }

    /// Key synthesized from the imported module
    pub fn module(identity: &str) -> Self {
        Self(format!("module:{identity}"))
    }

    pub fn entry(name: &str) -> Self {
        Self(format!("entry:{name}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SplitPointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Extension point for split-point key derivation
pub trait SplitPointKeyStrategy: fmt::Debug + Send + Sync {
    /// Return `None` to defer to the next strategy
    fn derive_key(
        &self,
        importer: &Module,
        dependency: &Dependency,
        target: &Module,
    ) -> Option<SplitPointKey>;
}

/// Key by requested chunk name, falling back to the target module identity
pub fn default_split_point_key(dependency: &Dependency, target: &Module) -> SplitPointKey {
    match &dependency.chunk_name {
        Some(name) => SplitPointKey::named(name),
        None => SplitPointKey::module(&target.identity),
    }
}

pub(crate) fn derive_split_point_key(
    strategies: &[Box<dyn SplitPointKeyStrategy>],
    importer: &Module,
    dependency: &Dependency,
    target: &Module,
) -> SplitPointKey {
    strategies
        .iter()
        .find_map(|strategy| strategy.derive_key(importer, dependency, target))
        .unwrap_or_else(|| default_split_point_key(dependency, target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module_graph::{DependencyKind, ModuleDescriptor, ModuleGraphBuilder};

    #[derive(Debug)]
    struct PerImporter;

    impl SplitPointKeyStrategy for PerImporter {
        fn derive_key(
            &self,
            importer: &Module,
            dependency: &Dependency,
            target: &Module,
        ) -> Option<SplitPointKey> {
            dependency.chunk_name.is_none().then(|| {
                SplitPointKey::new(format!("site:{}->{}", importer.identity, target.identity))
            })
        }
    }

    #[test]
    fn test_first_matching_strategy_wins() {
        let mut builder = ModuleGraphBuilder::new();
        builder
            .add_module(
                ModuleDescriptor::new("a")
                    .dynamic_import("b", None)
                    .dynamic_import("b", Some("bee")),
            )
            .expect("new module");
        builder.add_module(ModuleDescriptor::new("b")).expect("new module");
        let graph = builder.freeze().expect("complete graph");

        let a = graph.module_by_identity("a").expect("a exists");
        let b = graph.module_by_identity("b").expect("b exists");
        let deps = graph.dependencies_of(a.idx);
        assert!(deps.iter().all(|d| d.kind == DependencyKind::Async));

        let strategies: Vec<Box<dyn SplitPointKeyStrategy>> = vec![Box::new(PerImporter)];
        assert_eq!(
            derive_split_point_key(&strategies, a, &deps[0], b).as_str(),
            "site:a->b"
        );
        assert_eq!(
            derive_split_point_key(&strategies, a, &deps[1], b).as_str(),
            "name:bee"
        );
        assert_eq!(derive_split_point_key(&[], a, &deps[0], b).as_str(), "module:b");
    }
}
