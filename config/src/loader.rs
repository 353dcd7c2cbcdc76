// Database Loader
// Reads and caches the JSON databases backing the harness

use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::types::{BenchmarkDatabase, FormulaSets, TestDatabase, ToolDatabase};

/// Errors loading or querying a database
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Reading the file failed
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON
    #[error("failed to parse {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The JSON does not match the expected database shape
    #[error("{} is not a valid {what} database: {source}", path.display())]
    Shape {
        path: PathBuf,
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The requested formula set does not exist
    #[error("unknown formula set '{name}', known sets: {known}")]
    UnknownFormulaSet { name: String, known: String },

    /// The requested test does not exist
    #[error("unknown test '{name}', known tests: {known}")]
    UnknownTest { name: String, known: String },

    /// The requested benchmark does not exist
    #[error("unknown benchmark '{name}', known benchmarks: {known}")]
    UnknownBenchmark { name: String, known: String },

    /// A required key is present neither on the entry nor in the defaults
    #[error("{kind} '{name}' is missing required key '{key}'")]
    MissingKey {
        kind: &'static str,
        name: String,
        key: &'static str,
    },
}

pub(crate) fn known_keys<V>(map: &BTreeMap<String, V>) -> String {
    map.keys().cloned().collect::<Vec<_>>().join(", ")
}

/// Locations of the database files and driver scripts
#[derive(Debug, Clone)]
pub struct DataPaths {
    pub tools: PathBuf,
    pub formulas: PathBuf,
    pub tests: PathBuf,
    pub benchmarks: PathBuf,
    pub scripts: PathBuf,
}

impl DataPaths {
    /// Paths under the conventional `data/` directory
    pub fn new() -> Self {
        Self::with_data_dir("data")
    }

    /// Paths under an explicit data directory
    pub fn with_data_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            tools: dir.join("tools.json"),
            formulas: dir.join("formulas.json"),
            tests: dir.join("tests.json"),
            benchmarks: dir.join("benchmarks.json"),
            scripts: PathBuf::from("scripts"),
        }
    }

    /// Full path of a driver script
    pub fn script(&self, name: &str) -> PathBuf {
        self.scripts.join(name)
    }
}

impl Default for DataPaths {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses database files once and serves later loads from memory
#[derive(Debug)]
pub struct LoadCache {
    parsed: HashMap<PathBuf, Arc<Value>>,
}

impl LoadCache {
    pub fn new() -> Self {
        Self {
            parsed: HashMap::new(),
        }
    }

    fn value(&mut self, path: &Path) -> Result<Arc<Value>, DatabaseError> {
        if let Some(value) = self.parsed.get(path) {
            return Ok(Arc::clone(value));
        }

        let text = std::fs::read_to_string(path).map_err(|source| DatabaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| DatabaseError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("parsed database file {}", path.display());

        let value = Arc::new(value);
        self.parsed.insert(path.to_path_buf(), Arc::clone(&value));
        Ok(value)
    }

    fn database<T>(&mut self, path: &Path, what: &'static str) -> Result<T, DatabaseError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let value = self.value(path)?;
        T::deserialize(value.as_ref()).map_err(|source| DatabaseError::Shape {
            path: path.to_path_buf(),
            what,
            source,
        })
    }

    pub fn tool_database(&mut self, path: &Path) -> Result<ToolDatabase, DatabaseError> {
        self.database(path, "tool")
    }

    pub fn formula_sets(&mut self, path: &Path) -> Result<FormulaSets, DatabaseError> {
        self.database(path, "formula")
    }

    pub fn test_database(&mut self, path: &Path) -> Result<TestDatabase, DatabaseError> {
        self.database(path, "test")
    }

    pub fn benchmark_database(&mut self, path: &Path) -> Result<BenchmarkDatabase, DatabaseError> {
        self.database(path, "benchmark")
    }

    /// A single named formula set
    pub fn formula_set(
        &mut self,
        path: &Path,
        name: &str,
    ) -> Result<Vec<String>, DatabaseError> {
        let mut sets = self.formula_sets(path)?;
        match sets.remove(name) {
            Some(set) => Ok(set),
            None => Err(DatabaseError::UnknownFormulaSet {
                name: name.to_string(),
                known: known_keys(&sets),
            }),
        }
    }
}

impl Default for LoadCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn loads_formula_sets() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "formulas.json",
            r#"{ "base": ["G F a", "F G a"], "fairness": ["(G F a) -> (G F b)"] }"#,
        );

        let mut cache = LoadCache::new();
        let set = cache.formula_set(&path, "base").unwrap();
        assert_eq!(set, vec!["G F a".to_string(), "F G a".to_string()]);

        let error = cache.formula_set(&path, "missing").unwrap_err();
        match error {
            DatabaseError::UnknownFormulaSet { name, known } => {
                assert_eq!(name, "missing");
                assert_eq!(known, "base, fairness");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn caches_parsed_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "formulas.json", r#"{ "base": ["G a"] }"#);

        let mut cache = LoadCache::new();
        cache.formula_sets(&path).unwrap();

        // Later loads must come from the cache, not the file.
        fs::write(&path, "not json").unwrap();
        let sets = cache.formula_sets(&path).unwrap();
        assert_eq!(sets["base"], vec!["G a".to_string()]);
    }

    #[test]
    fn reports_missing_file() {
        let mut cache = LoadCache::new();
        let error = cache.formula_sets(Path::new("/no/such/file.json")).unwrap_err();
        assert!(matches!(error, DatabaseError::Io { .. }));
    }

    #[test]
    fn reports_shape_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "tools.json", r#"{ "tools": 42 }"#);

        let mut cache = LoadCache::new();
        let error = cache.tool_database(&path).unwrap_err();
        match error {
            DatabaseError::Shape { what, .. } => assert_eq!(what, "tool"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn script_paths_join_the_scripts_dir() {
        let paths = DataPaths::with_data_dir("data");
        assert_eq!(paths.script("benchmark.sh"), PathBuf::from("scripts/benchmark.sh"));
        assert_eq!(paths.tools, PathBuf::from("data/tools.json"));
    }
}
