use std::{collections::BTreeSet, fs, path::Path};

use anyhow::{Context, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    error::BuildError,
    ids::IdPolicy,
    split_chunks::{CacheGroup, ChunkFilter, DEFAULT_MAX_ITERATIONS, ModuleTest},
};

/// Longest hex digest a sha256 can provide
const MAX_DIGEST_LENGTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    pub optimization: OptimizationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct OptimizationConfig {
    pub chunk_ids: IdPolicy,
    pub module_ids: IdPolicy,
    /// Hex characters of deterministic ids
    pub id_digest_length: usize,
    /// Hex characters of content hashes
    pub hash_digest_length: usize,
    /// Skip modules in async chunks that every parent already loaded
    pub remove_available_modules: bool,
    pub split_chunks: SplitChunksConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            chunk_ids: IdPolicy::Deterministic,
            module_ids: IdPolicy::Deterministic,
            id_digest_length: 4,
            hash_digest_length: 20,
            remove_available_modules: true,
            split_chunks: SplitChunksConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct SplitChunksConfig {
    pub max_iterations: usize,
    pub cache_groups: Vec<CacheGroupConfig>,
}

impl Default for SplitChunksConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            cache_groups: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct CacheGroupConfig {
    pub name: Option<String>,
    /// Regex over module identities
    pub test: Option<String>,
    pub chunks: ChunkFilter,
    pub min_size: u64,
    pub max_size: Option<u64>,
    pub min_chunks: usize,
    pub priority: i32,
    pub reuse_existing_chunk: bool,
    pub enforce: bool,
}

impl Default for CacheGroupConfig {
    fn default() -> Self {
        Self {
            name: None,
            test: None,
            chunks: ChunkFilter::All,
            min_size: 0,
            max_size: None,
            min_chunks: 1,
            priority: 0,
            reuse_existing_chunk: false,
            enforce: false,
        }
    }
}

impl CacheGroupConfig {
    fn to_cache_group(&self, index: usize) -> crate::Result<CacheGroup> {
        let key = self
            .name
            .clone()
            .unwrap_or_else(|| format!("cache-group-{index}"));
        let test = match &self.test {
            Some(pattern) => ModuleTest::Pattern(Regex::new(pattern).map_err(|err| {
                BuildError::invalid_config(format!("cache-groups.{key}.test"), err.to_string())
            })?),
            None => ModuleTest::Any,
        };

        let mut group = CacheGroup::new(key)
            .test(test)
            .chunks(self.chunks)
            .min_size(self.min_size)
            .min_chunks(self.min_chunks)
            .priority(self.priority)
            .reuse_existing_chunk(self.reuse_existing_chunk)
            .enforce(self.enforce);
        if let Some(name) = &self.name {
            group = group.name(name.clone());
        }
        if let Some(max_size) = self.max_size {
            group = group.max_size(max_size);
        }
        group.validate()?;
        Ok(group)
    }
}

impl Config {
    /// Read, parse and validate a TOML configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Invalid config file: {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject malformed configuration before any graph work starts
    pub fn validate(&self) -> crate::Result<()> {
        let optimization = &self.optimization;
        for (field, value) in [
            ("id-digest-length", optimization.id_digest_length),
            ("hash-digest-length", optimization.hash_digest_length),
        ] {
            if !(1..=MAX_DIGEST_LENGTH).contains(&value) {
                return Err(BuildError::invalid_config(
                    field,
                    format!("{value} is outside 1..={MAX_DIGEST_LENGTH}"),
                ));
            }
        }
        if optimization.split_chunks.max_iterations == 0 {
            return Err(BuildError::invalid_config(
                "split-chunks.max-iterations",
                "must be at least 1",
            ));
        }

        let mut names = BTreeSet::new();
        for group in &optimization.split_chunks.cache_groups {
            if let Some(name) = &group.name
                && !names.insert(name.as_str())
            {
                return Err(BuildError::invalid_config(
                    format!("cache-groups.{name}.name"),
                    "duplicate cache group name",
                ));
            }
        }
        self.cache_groups().map(|_| ())
    }

    /// Compile the configured cache groups in declaration order
    pub fn cache_groups(&self) -> crate::Result<Vec<CacheGroup>> {
        self.optimization
            .split_chunks
            .cache_groups
            .iter()
            .enumerate()
            .map(|(index, group)| group.to_cache_group(index))
            .collect()
    }
}
