//! Partitioning of chunks that exceed a cache group's `max-size`
//!
//! All parts are loaded together, so the split ignores dependencies and only
//! balances size. Placement is content-addressed: modules are ordered by size
//! and then by the hash of their identity, and each goes to the currently
//! lightest part, so the result depends only on the modules themselves.

use std::{cmp::Reverse, collections::BTreeSet};

use crate::{
    hashing::stable_hash,
    module_graph::{ModuleGraph, ModuleIdx},
};

/// Split `modules` into parts of roughly equal size. Returns a single part when
/// no split is possible or needed. Parts are ordered by their first module.
pub(crate) fn partition(
    graph: &ModuleGraph,
    modules: &BTreeSet<ModuleIdx>,
    min_size: u64,
    max_size: u64,
) -> Vec<BTreeSet<ModuleIdx>> {
    let total: u64 = modules.iter().map(|&m| graph.size_of(m)).sum();
    if total <= max_size || modules.len() < 2 {
        return vec![modules.clone()];
    }

    let mut parts = total.div_ceil(max_size);
    if min_size > 0 {
        parts = parts.min((total / min_size).max(1));
    }
    let parts = (parts as usize).clamp(1, modules.len());
    if parts == 1 {
        return vec![modules.clone()];
    }

    let mut ordered: Vec<(u64, String, ModuleIdx)> = modules
        .iter()
        .map(|&m| (graph.size_of(m), stable_hash([graph.identity(m)], 0), m))
        .collect();
    ordered.sort_by(|a, b| Reverse(a.0).cmp(&Reverse(b.0)).then_with(|| a.1.cmp(&b.1)));

    let mut bins: Vec<(u64, BTreeSet<ModuleIdx>)> = vec![(0, BTreeSet::new()); parts];
    for (size, _, module) in ordered {
        let lightest = bins
            .iter()
            .enumerate()
            .min_by_key(|(i, (load, _))| (*load, *i))
            .map_or(0, |(i, _)| i);
        bins[lightest].0 += size;
        bins[lightest].1.insert(module);
    }

    let mut bins: Vec<BTreeSet<ModuleIdx>> = bins
        .into_iter()
        .map(|(_, set)| set)
        .filter(|set| !set.is_empty())
        .collect();
    bins.sort_by_key(|set| set.first().copied());
    bins
}
