use std::{hint::black_box, time::Duration};

use cleave::{
    CacheGroup, Compilation, Config, EntryOptions, ModuleDescriptor, ModuleGraph,
    ModuleGraphBuilder, split_chunks::ModuleTest,
};
use criterion::{Criterion, criterion_group, criterion_main};
use regex::Regex;

/// `entries` entry points, each importing a slice of a shared vendor pool and
/// lazily loading `pages` pages that import each other in a ring
fn wide_graph(entries: usize, pages: usize, vendors: usize) -> ModuleGraph {
    let mut builder = ModuleGraphBuilder::new();

    for e in 0..entries {
        let mut entry = ModuleDescriptor::new(format!("src/entry{e}.js")).size(2_000);
        for v in (e..vendors).step_by(entries.max(1)) {
            entry = entry.import(format!("node_modules/vendor{v}.js"));
        }
        for p in 0..pages {
            entry = entry.dynamic_import(format!("src/pages/{p}.js"), None);
        }
        builder.add_module(entry).expect("unique module");
        builder
            .add_entry(EntryOptions::new(format!("entry{e}"), format!("src/entry{e}.js")))
            .expect("unique entry");
    }

    for p in 0..pages {
        let next = (p + 1) % pages;
        let page = ModuleDescriptor::new(format!("src/pages/{p}.js"))
            .size(8_000)
            .digest(format!("page{p}"))
            .import(format!("node_modules/vendor{}.js", p % vendors))
            .import("src/shared/format.js")
            .dynamic_import(format!("src/pages/{next}.js"), None);
        builder.add_module(page).expect("unique module");
    }

    builder
        .add_module(ModuleDescriptor::new("src/shared/format.js").size(4_000))
        .expect("unique module");
    for v in 0..vendors {
        builder
            .add_module(
                ModuleDescriptor::new(format!("node_modules/vendor{v}.js"))
                    .size(15_000)
                    .digest(format!("vendor{v}")),
            )
            .expect("unique module");
    }

    builder.freeze().expect("complete graph")
}

fn compilation() -> Compilation {
    let mut compilation = Compilation::new(Config::default()).expect("default config");
    compilation
        .add_cache_group(
            CacheGroup::new("vendors")
                .name("vendors")
                .test(ModuleTest::Pattern(
                    Regex::new("node_modules").expect("valid regex"),
                ))
                .min_chunks(2)
                .priority(10)
                .max_size(120_000),
        )
        .expect("valid cache group");
    compilation
        .add_cache_group(CacheGroup::new("common").min_chunks(3).min_size(1_000))
        .expect("valid cache group");
    compilation
}

fn benchmark_splitting(c: &mut Criterion) {
    let mut group = c.benchmark_group("splitting");
    group.sample_size(20);
    group.measurement_time(Duration::from_secs(10));

    for (entries, pages, vendors) in [(2, 20, 40), (8, 100, 200)] {
        let graph = wide_graph(entries, pages, vendors);
        let compilation = compilation();
        group.bench_function(format!("build_{entries}x{pages}x{vendors}"), |b| {
            b.iter(|| compilation.run(black_box(&graph)).expect("build succeeds"));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_splitting);
criterion_main!(benches);
