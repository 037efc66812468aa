//! Stable hashing and chunk content hashes
//!
//! A chunk's content hash covers its own id, the ordered (id, digest) pairs of
//! its modules and the content hashes of every chunk it can trigger loading of.
//! Siblings sharing one of its groups are left out, so touching a sibling never
//! perturbs the hash. Loading edges may form cycles; those chunks are hashed
//! together as one strongly connected component.

use std::collections::BTreeSet;

use log::debug;
use petgraph::{algo::tarjan_scc, graph::DiGraph};
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};

use crate::{
    chunk_graph::{ChunkGraph, ChunkIdx},
    module_graph::{ModuleGraph, ModuleIdx},
};

/// Hex-encoded SHA-256 over NUL-separated parts. A non-zero salt is appended
/// so that salt 0 is the plain hash of the parts.
pub fn stable_hash<I, S>(parts: I, salt: u32) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_ref());
        hasher.update([0u8]);
    }
    if salt > 0 {
        hasher.update(salt.to_le_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Truncate a hex digest to `len` characters
pub fn truncate_digest(digest: &str, len: usize) -> String {
    digest[..len.min(digest.len())].to_owned()
}

/// Content hashes of every live chunk, truncated to `digest_length`
pub fn compute_content_hashes(
    graph: &ModuleGraph,
    chunk_graph: &ChunkGraph,
    chunk_ids: &FxHashMap<ChunkIdx, String>,
    module_ids: &FxHashMap<ModuleIdx, String>,
    digest_length: usize,
) -> FxHashMap<ChunkIdx, String> {
    let chunks: Vec<ChunkIdx> = chunk_graph.chunks().map(|c| c.idx).collect();

    let mut loading = DiGraph::<ChunkIdx, ()>::new();
    let nodes: FxHashMap<ChunkIdx, _> = chunks
        .iter()
        .map(|&chunk| (chunk, loading.add_node(chunk)))
        .collect();
    for &chunk in &chunks {
        for dependency in chunk_graph.chunk_dependencies(chunk) {
            if let Some(&to) = nodes.get(&dependency) {
                loading.add_edge(nodes[&chunk], to, ());
            }
        }
    }

    let own: FxHashMap<ChunkIdx, String> = chunks
        .iter()
        .map(|&chunk| {
            (
                chunk,
                own_hash(graph, chunk_graph, chunk, chunk_ids, module_ids),
            )
        })
        .collect();

    // Components come out in postorder: everything a component loads has
    // already been hashed when it is reached.
    let mut full: FxHashMap<ChunkIdx, String> = FxHashMap::default();
    for component in tarjan_scc(&loading) {
        let members: BTreeSet<ChunkIdx> = component.iter().map(|&n| loading[n]).collect();
        let external: BTreeSet<&str> = component
            .iter()
            .flat_map(|&n| loading.neighbors(n))
            .map(|n| loading[n])
            .filter(|c| !members.contains(c))
            .filter_map(|c| full.get(&c).map(String::as_str))
            .collect();

        if members.len() == 1 {
            let chunk = loading[component[0]];
            let hash = stable_hash(
                std::iter::once(own[&chunk].as_str()).chain(external.iter().copied()),
                0,
            );
            full.insert(chunk, hash);
            continue;
        }

        let mut member_hashes: Vec<&str> = members.iter().map(|c| own[c].as_str()).collect();
        member_hashes.sort_unstable();
        let shared = stable_hash(member_hashes.into_iter().chain(external), 0);
        debug!("Hashing {} mutually loading chunks together", members.len());
        for chunk in members {
            let hash = stable_hash([own[&chunk].as_str(), shared.as_str()], 0);
            full.insert(chunk, hash);
        }
    }

    full.into_iter()
        .map(|(chunk, hash)| (chunk, truncate_digest(&hash, digest_length)))
        .collect()
}

fn own_hash(
    graph: &ModuleGraph,
    chunk_graph: &ChunkGraph,
    chunk: ChunkIdx,
    chunk_ids: &FxHashMap<ChunkIdx, String>,
    module_ids: &FxHashMap<ModuleIdx, String>,
) -> String {
    let mut parts: Vec<&str> = Vec::new();
    parts.push(chunk_ids.get(&chunk).map_or("", String::as_str));
    for &module in &chunk_graph.chunk(chunk).modules {
        parts.push(module_ids.get(&module).map_or("", String::as_str));
        parts.push(&graph.module(module).digest);
    }
    stable_hash(parts, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stable_hash_salting() {
        let plain = stable_hash(["a", "b"], 0);
        assert_eq!(plain.len(), 64);
        assert_eq!(plain, stable_hash(["a", "b"], 0));
        assert_ne!(plain, stable_hash(["a", "b"], 1));
        // Separators keep part boundaries significant
        assert_ne!(stable_hash(["ab"], 0), stable_hash(["a", "b"], 0));
    }

    #[test]
    fn test_truncate_digest() {
        assert_eq!(truncate_digest("abcdef", 4), "abcd");
        assert_eq!(truncate_digest("ab", 4), "ab");
    }
}
