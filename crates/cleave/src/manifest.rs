//! TOML description of a built module graph
//!
//! The command-line driver has no module builder of its own; it reads the
//! already-built graph from a manifest like
//!
//! ```toml
//! [[entries]]
//! name = "main"
//! import = "src/index.js"
//!
//! [[modules]]
//! identity = "src/index.js"
//! size = 1200
//! digest = "3f2a9c"
//! dependencies = [
//!     { target = "src/lazy.js", kind = "async", chunk-name = "lazy" },
//! ]
//!
//! [[modules]]
//! identity = "src/lazy.js"
//! runtime-needs = ["share-scope"]
//! ```

use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{
    module_graph::{
        DependencyKind, EntryOptions, ModuleDescriptor, ModuleGraph, ModuleGraphBuilder,
    },
    runtime_requirements::RuntimeRequirement,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct GraphManifest {
    pub entries: Vec<EntryManifest>,
    /// Modules in source order
    pub modules: Vec<ModuleManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct EntryManifest {
    pub name: String,
    pub import: String,
    #[serde(default)]
    pub runtime: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ModuleManifest {
    pub identity: String,
    #[serde(default)]
    pub size: u64,
    /// Digest of the emitted code; defaults to empty
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub side_effect_free: bool,
    #[serde(default)]
    pub used_exports: Option<BTreeSet<String>>,
    #[serde(default)]
    pub runtime_needs: BTreeSet<RuntimeRequirement>,
    #[serde(default)]
    pub dependencies: Vec<DependencyManifest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DependencyManifest {
    pub target: String,
    #[serde(default = "default_kind")]
    pub kind: DependencyKind,
    #[serde(default)]
    pub chunk_name: Option<String>,
}

fn default_kind() -> DependencyKind {
    DependencyKind::Static
}

impl GraphManifest {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read module graph: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid module graph: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse module graph manifest")
    }

    /// Register every module and entry, then freeze
    pub fn into_module_graph(self) -> crate::Result<ModuleGraph> {
        let mut builder = ModuleGraphBuilder::new();
        for module in self.modules {
            let mut descriptor = ModuleDescriptor::new(module.identity)
                .size(module.size)
                .digest(module.digest)
                .side_effect_free(module.side_effect_free);
            if let Some(exports) = module.used_exports {
                descriptor = descriptor.used_exports(exports);
            }
            for need in module.runtime_needs {
                descriptor = descriptor.needs(need);
            }
            for dependency in module.dependencies {
                descriptor = descriptor.dependency(
                    dependency.target,
                    dependency.kind,
                    dependency.chunk_name.as_deref(),
                );
            }
            builder.add_module(descriptor)?;
        }
        for entry in self.entries {
            let mut options = EntryOptions::new(entry.name, entry.import);
            if let Some(runtime) = entry.runtime {
                options = options.with_runtime(runtime);
            }
            builder.add_entry(options)?;
        }
        builder.freeze()
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::error::BuildError;

    #[test]
    fn test_manifest_to_graph() {
        let manifest = GraphManifest::from_toml_str(
            r#"
            [[entries]]
            name = "main"
            import = "index.js"
            runtime = "web"

            [[modules]]
            identity = "index.js"
            size = 10
            dependencies = [
                { target = "util.js" },
                { target = "lazy.js", kind = "async", chunk-name = "lazy" },
                { target = "maybe.js", kind = "weak" },
            ]

            [[modules]]
            identity = "util.js"
            used-exports = ["add"]

            [[modules]]
            identity = "lazy.js"
            runtime-needs = ["share-scope"]

            [[modules]]
            identity = "maybe.js"
            "#,
        )
        .expect("valid manifest");
        let graph = manifest.into_module_graph().expect("complete graph");

        assert_eq!(graph.len(), 4);
        assert_eq!(graph.entries()[0].runtime, "web");
        let index = graph.module_by_identity("index.js").expect("module exists");
        let kinds: Vec<_> = graph.dependencies_of(index.idx).iter().map(|d| d.kind).collect();
        assert_eq!(
            kinds,
            vec![
                DependencyKind::Static,
                DependencyKind::Async,
                DependencyKind::Weak
            ]
        );
        let lazy = graph.module_by_identity("lazy.js").expect("module exists");
        assert!(
            graph
                .declared_runtime_needs(lazy.idx)
                .contains(&RuntimeRequirement::SHARE_SCOPE)
        );
    }

    #[test]
    fn test_manifest_with_missing_module() {
        let manifest = GraphManifest::from_toml_str(
            r#"
            [[modules]]
            identity = "index.js"
            dependencies = [{ target = "gone.js" }]
            "#,
        )
        .expect("valid manifest");
        assert!(matches!(
            manifest.into_module_graph(),
            Err(BuildError::IncompleteModuleGraph { .. })
        ));
    }
}
