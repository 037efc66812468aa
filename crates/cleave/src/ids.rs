//! Chunk and module ids
//!
//! Ids are assigned under one of four policies. `deterministic` derives ids
//! from identity alone so that unrelated graph changes leave them untouched;
//! uniqueness is checked explicitly and collisions are resolved by re-hashing
//! with an increasing salt.

use std::collections::BTreeMap;

use log::{debug, trace};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};

use crate::{
    error::{BuildError, Result},
    hashing::{stable_hash, truncate_digest},
};

/// Salts tried per entity before giving up
pub const MAX_SALT: u32 = 4096;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IdPolicy {
    /// Position in source or creation order
    Natural,
    /// Human-readable, derived from chunk names and request paths
    Named,
    /// Short stable hash of the identity
    #[default]
    Deterministic,
    /// Smallest ids for the most used entities
    Size,
}

/// Ids assigned by a previous build, keyed by identity
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdHints {
    pub chunks: BTreeMap<String, String>,
    pub modules: BTreeMap<String, String>,
}

/// Something that needs an id
#[derive(Debug, Clone)]
pub struct IdCandidate {
    /// Stable identity; for chunks, the name plus sorted member identities
    pub identity: String,
    /// Explicit user-visible name
    pub name: Option<String>,
    /// Human-readable fallback for the `named` policy
    pub readable: String,
    pub size: u64,
    /// Number of containers referencing the entity
    pub usage: usize,
    pub is_entry: bool,
}

/// Assign one id per candidate; the candidate slice is in natural order
pub fn assign_ids(
    policy: IdPolicy,
    candidates: &[IdCandidate],
    hints: &BTreeMap<String, String>,
    digest_length: usize,
) -> Result<Vec<String>> {
    debug!("Assigning {policy:?} ids to {} entities", candidates.len());
    match policy {
        IdPolicy::Natural => Ok((0..candidates.len()).map(|i| i.to_string()).collect()),
        IdPolicy::Named => assign_named(candidates),
        IdPolicy::Deterministic => {
            let identities: Vec<&str> = candidates.iter().map(|c| c.identity.as_str()).collect();
            assign_deterministic(&identities, hints, digest_length)
        }
        IdPolicy::Size => Ok(assign_by_usage(candidates)),
    }
}

pub(crate) fn assign_deterministic(
    identities: &[&str],
    hints: &BTreeMap<String, String>,
    digest_length: usize,
) -> Result<Vec<String>> {
    let mut order: Vec<usize> = (0..identities.len()).collect();
    order.sort_by(|&a, &b| identities[a].cmp(identities[b]).then(a.cmp(&b)));

    let mut ids: Vec<Option<String>> = vec![None; identities.len()];
    let mut used: FxHashSet<String> = FxHashSet::default();

    // Previous ids first, as long as nobody else already holds them
    for &i in &order {
        if let Some(hint) = hints.get(identities[i])
            && used.insert(hint.clone())
        {
            ids[i] = Some(hint.clone());
        }
    }

    for &i in &order {
        if ids[i].is_some() {
            continue;
        }
        let identity = identities[i];
        let assigned = (0..MAX_SALT)
            .map(|salt| truncate_digest(&stable_hash([identity], salt), digest_length))
            .find(|candidate| !used.contains(candidate));
        let Some(id) = assigned else {
            return Err(BuildError::IdSpaceExhausted {
                identity: identity.to_owned(),
                attempts: MAX_SALT,
            });
        };
        trace!("Id '{id}' for '{identity}'");
        used.insert(id.clone());
        ids[i] = Some(id);
    }

    Ok(ids.into_iter().flatten().collect())
}

fn assign_named(candidates: &[IdCandidate]) -> Result<Vec<String>> {
    let mut ids: Vec<Option<String>> = vec![None; candidates.len()];
    let mut owners: BTreeMap<String, usize> = BTreeMap::new();

    for (i, candidate) in candidates.iter().enumerate() {
        let Some(name) = &candidate.name else {
            continue;
        };
        if let Some(&first) = owners.get(name) {
            return Err(BuildError::ChunkNamingCollision {
                key: name.clone(),
                first: candidates[first].identity.clone(),
                second: candidate.identity.clone(),
            });
        }
        owners.insert(name.clone(), i);
        ids[i] = Some(name.clone());
    }

    for (i, candidate) in candidates.iter().enumerate() {
        if ids[i].is_some() {
            continue;
        }
        let base = sanitize(&candidate.readable);
        let mut id = base.clone();
        let mut n = 1;
        while owners.contains_key(&id) {
            id = format!("{base}~{n}");
            n += 1;
        }
        owners.insert(id.clone(), i);
        ids[i] = Some(id);
    }

    Ok(ids.into_iter().flatten().collect())
}

fn assign_by_usage(candidates: &[IdCandidate]) -> Vec<String> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| {
        let (x, y) = (&candidates[a], &candidates[b]);
        y.usage
            .cmp(&x.usage)
            .then(y.is_entry.cmp(&x.is_entry))
            .then(y.size.cmp(&x.size))
            .then(x.identity.cmp(&y.identity))
    });

    let mut ids = vec![String::new(); candidates.len()];
    for (rank, i) in order.into_iter().enumerate() {
        ids[i] = rank.to_string();
    }
    ids
}

/// Make a request path usable as a file name component
fn sanitize(readable: &str) -> String {
    let cleaned: String = readable
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '+') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        "_".to_owned()
    } else {
        trimmed.to_owned()
    }
}
