#![allow(clippy::disallowed_methods)]

use cleave::{
    BuildOutput, CacheGroup, Compilation, Config, EntryOptions, ModuleDescriptor, ModuleGraph,
    ModuleGraphBuilder,
    module_graph::{Dependency, Module},
    split_chunks::ModuleTest,
    split_point::{SplitPointKey, SplitPointKeyStrategy},
};
use pretty_assertions::{assert_eq, assert_ne};
use regex::Regex;

/// main -> pageA -> leafA and main -> pageB, with a vendor loaded by main
fn app(leaf_digest: &str, vendor_digest: &str) -> ModuleGraph {
    let mut builder = ModuleGraphBuilder::new();
    for module in [
        ModuleDescriptor::new("main.js")
            .digest("main")
            .import("node_modules/vendor.js")
            .dynamic_import("pageA.js", None)
            .dynamic_import("pageB.js", None),
        ModuleDescriptor::new("pageA.js")
            .digest("pageA")
            .dynamic_import("leafA.js", None),
        ModuleDescriptor::new("pageB.js").digest("pageB"),
        ModuleDescriptor::new("leafA.js").digest(leaf_digest),
        ModuleDescriptor::new("node_modules/vendor.js")
            .digest(vendor_digest)
            .size(2000),
    ] {
        builder.add_module(module).unwrap();
    }
    builder.add_entry(EntryOptions::new("main", "main.js")).unwrap();
    builder.freeze().unwrap()
}

fn build(graph: &ModuleGraph) -> BuildOutput {
    let mut compilation = Compilation::new(Config::default()).unwrap();
    compilation
        .add_cache_group(
            CacheGroup::new("vendors")
                .name("vendors")
                .test(ModuleTest::Pattern(Regex::new("node_modules").unwrap())),
        )
        .unwrap();
    compilation.run(graph).unwrap()
}

/// Hash of the chunk containing `identity`
fn hash_of(graph: &ModuleGraph, output: &BuildOutput, identity: &str) -> String {
    let module = graph.module_by_identity(identity).unwrap().idx;
    let chunk = output.chunk_graph.chunks_of_module(module).next().unwrap();
    output.chunk_graph.chunk(chunk).hash.clone().unwrap()
}

fn chunk_ids(output: &BuildOutput) -> Vec<String> {
    output
        .chunk_graph
        .chunks()
        .map(|c| c.id.clone().unwrap())
        .collect()
}

#[test]
fn test_identical_inputs_give_identical_reports() {
    let graph = app("leaf", "vendor");
    let first = build(&graph).report(&graph).to_toml().unwrap();
    let second = build(&graph).report(&graph).to_toml().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_leaf_change_propagates_only_to_loaders() {
    let before_graph = app("leaf", "vendor");
    let after_graph = app("leaf-v2", "vendor");
    let before = build(&before_graph);
    let after = build(&after_graph);

    assert_eq!(chunk_ids(&before), chunk_ids(&after));
    for changed in ["leafA.js", "pageA.js", "main.js"] {
        assert_ne!(
            hash_of(&before_graph, &before, changed),
            hash_of(&after_graph, &after, changed),
            "{changed} should be rehashed"
        );
    }
    assert_eq!(
        hash_of(&before_graph, &before, "pageB.js"),
        hash_of(&after_graph, &after, "pageB.js")
    );
}

#[test]
fn test_sibling_chunk_change_stays_local() {
    let before_graph = app("leaf", "vendor");
    let after_graph = app("leaf", "vendor-v2");
    let before = build(&before_graph);
    let after = build(&after_graph);

    assert_ne!(
        hash_of(&before_graph, &before, "node_modules/vendor.js"),
        hash_of(&after_graph, &after, "node_modules/vendor.js")
    );
    for unchanged in ["main.js", "pageA.js", "pageB.js", "leafA.js"] {
        assert_eq!(
            hash_of(&before_graph, &before, unchanged),
            hash_of(&after_graph, &after, unchanged),
            "{unchanged} should keep its hash"
        );
    }
}

#[test]
fn test_unrelated_modules_do_not_shift_ids() {
    let graph = app("leaf", "vendor");
    let output = build(&graph);
    let hints = output.id_hints(&graph);

    let mut builder = ModuleGraphBuilder::new();
    builder
        .add_module(ModuleDescriptor::new("main.js").dynamic_import("pageB.js", None))
        .unwrap();
    builder
        .add_module(ModuleDescriptor::new("pageB.js").digest("pageB"))
        .unwrap();
    builder.add_entry(EntryOptions::new("main", "main.js")).unwrap();
    let smaller = builder.freeze().unwrap();
    let rebuilt = Compilation::new(Config::default())
        .unwrap()
        .with_id_hints(hints.clone())
        .run(&smaller)
        .unwrap();

    let page_b = smaller.module_by_identity("pageB.js").unwrap().idx;
    assert_eq!(
        rebuilt.module_id(page_b),
        hints.modules.get("pageB.js").map(String::as_str)
    );
}

/// Keys every async boundary by its importer, so each importer gets its own
/// group even when the imported module is the same
#[derive(Debug)]
struct PerImporter;

impl SplitPointKeyStrategy for PerImporter {
    fn derive_key(
        &self,
        importer: &Module,
        _dependency: &Dependency,
        target: &Module,
    ) -> Option<SplitPointKey> {
        Some(SplitPointKey::new(format!(
            "{}->{}",
            importer.identity, target.identity
        )))
    }
}

fn rebuild_with_own_hints(graph: &ModuleGraph, compilation: impl Fn() -> Compilation) {
    let first = compilation().run(graph).unwrap();
    let second = compilation()
        .with_id_hints(first.id_hints(graph))
        .run(graph)
        .unwrap();
    assert_eq!(chunk_ids(&first), chunk_ids(&second));
    assert_eq!(first.id_hints(graph), second.id_hints(graph));
}

#[test]
fn test_chunks_with_equal_members_keep_their_ids() {
    // Same module requested under two chunk names
    let mut builder = ModuleGraphBuilder::new();
    builder
        .add_module(
            ModuleDescriptor::new("main.js")
                .dynamic_import("x.js", Some("one"))
                .dynamic_import("x.js", Some("two")),
        )
        .unwrap();
    builder.add_module(ModuleDescriptor::new("x.js")).unwrap();
    builder.add_entry(EntryOptions::new("main", "main.js")).unwrap();
    let named = builder.freeze().unwrap();
    rebuild_with_own_hints(&named, || Compilation::new(Config::default()).unwrap());
    let hints = Compilation::new(Config::default())
        .unwrap()
        .run(&named)
        .unwrap()
        .id_hints(&named);
    assert_eq!(hints.chunks.len(), 3);

    // Same module behind two unnamed boundaries
    let mut builder = ModuleGraphBuilder::new();
    for importer in ["a.js", "b.js"] {
        builder
            .add_module(ModuleDescriptor::new(importer).dynamic_import("x.js", None))
            .unwrap();
    }
    builder.add_module(ModuleDescriptor::new("x.js")).unwrap();
    builder.add_entry(EntryOptions::new("a", "a.js")).unwrap();
    builder.add_entry(EntryOptions::new("b", "b.js")).unwrap();
    let unnamed = builder.freeze().unwrap();
    rebuild_with_own_hints(&unnamed, || {
        let mut compilation = Compilation::new(Config::default()).unwrap();
        compilation.register_split_point_strategy(PerImporter);
        compilation
    });
}
