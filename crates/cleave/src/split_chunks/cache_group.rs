use std::{fmt, sync::Arc};

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{
    chunk_graph::{ChunkGraph, ChunkIdx},
    error::{BuildError, Result},
    module_graph::Module,
};

/// Programmatic module predicate for cache groups
pub trait ModuleFilter: fmt::Debug + Send + Sync {
    fn matches(&self, module: &Module) -> bool;
}

/// Which modules a cache group selects
#[derive(Debug, Clone, Default)]
pub enum ModuleTest {
    #[default]
    Any,
    /// Regex over the module identity
    Pattern(Regex),
    Filter(Arc<dyn ModuleFilter>),
}

impl ModuleTest {
    pub fn matches(&self, module: &Module) -> bool {
        match self {
            Self::Any => true,
            Self::Pattern(regex) => regex.is_match(&module.identity),
            Self::Filter(filter) => filter.matches(module),
        }
    }
}

/// Which chunks participate in membership counting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkFilter {
    #[default]
    All,
    Async,
    Initial,
}

impl ChunkFilter {
    pub fn accepts(self, chunk_graph: &ChunkGraph, chunk: ChunkIdx) -> bool {
        match self {
            Self::All => true,
            Self::Async => chunk_graph.is_async(chunk),
            Self::Initial => chunk_graph.is_initial(chunk),
        }
    }
}

/// Rule describing which modules to extract into a shared chunk
#[derive(Debug, Clone)]
pub struct CacheGroup {
    /// Key used in logs and diagnostics
    pub key: String,
    /// When set, every selected module lands in a single chunk of this name
    pub name: Option<String>,
    pub test: ModuleTest,
    pub chunks: ChunkFilter,
    pub min_size: u64,
    pub max_size: Option<u64>,
    /// Number of chunks a module must be shared by
    pub min_chunks: usize,
    pub priority: i32,
    pub reuse_existing_chunk: bool,
    /// Ignore `min_size` for this group
    pub enforce: bool,
}

impl CacheGroup {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            test: ModuleTest::Any,
            chunks: ChunkFilter::All,
            min_size: 0,
            max_size: None,
            min_chunks: 1,
            priority: 0,
            reuse_existing_chunk: false,
            enforce: false,
        }
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn test(mut self, test: ModuleTest) -> Self {
        self.test = test;
        self
    }

    #[must_use]
    pub fn filter(self, filter: impl ModuleFilter + 'static) -> Self {
        self.test(ModuleTest::Filter(Arc::new(filter)))
    }

    #[must_use]
    pub fn chunks(mut self, chunks: ChunkFilter) -> Self {
        self.chunks = chunks;
        self
    }

    #[must_use]
    pub fn min_size(mut self, min_size: u64) -> Self {
        self.min_size = min_size;
        self
    }

    #[must_use]
    pub fn max_size(mut self, max_size: u64) -> Self {
        self.max_size = Some(max_size);
        self
    }

    #[must_use]
    pub fn min_chunks(mut self, min_chunks: usize) -> Self {
        self.min_chunks = min_chunks;
        self
    }

    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn reuse_existing_chunk(mut self, reuse: bool) -> Self {
        self.reuse_existing_chunk = reuse;
        self
    }

    #[must_use]
    pub fn enforce(mut self, enforce: bool) -> Self {
        self.enforce = enforce;
        self
    }

    /// Reject thresholds that can never be satisfied
    pub fn validate(&self) -> Result<()> {
        let field = |name: &str| format!("cache-groups.{}.{name}", self.key);
        if self.min_chunks == 0 {
            return Err(BuildError::invalid_config(
                field("min-chunks"),
                "must be at least 1",
            ));
        }
        if let Some(max_size) = self.max_size {
            if max_size == 0 {
                return Err(BuildError::invalid_config(
                    field("max-size"),
                    "must be greater than 0",
                ));
            }
            if max_size < self.min_size {
                return Err(BuildError::invalid_config(
                    field("max-size"),
                    format!("{max_size} is smaller than min-size {}", self.min_size),
                ));
            }
        }
        if self.name.as_deref().is_some_and(str::is_empty) {
            return Err(BuildError::invalid_config(field("name"), "must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_rejects_impossible_thresholds() {
        assert!(CacheGroup::new("ok").min_size(10).max_size(10).validate().is_ok());

        let err = CacheGroup::new("vendors")
            .min_size(100)
            .max_size(50)
            .validate()
            .expect_err("max below min");
        assert!(err.is_caller_error());
        assert!(err.to_string().contains("cache-groups.vendors.max-size"));

        assert!(CacheGroup::new("zero").min_chunks(0).validate().is_err());
        assert!(CacheGroup::new("empty").max_size(0).validate().is_err());
    }
}
