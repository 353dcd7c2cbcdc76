// Database Types
// Type definitions for the tool, formula, test and benchmark databases

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::loader::DatabaseError;

/// Named formula sets, keyed by set name
pub type FormulaSets = BTreeMap<String, Vec<String>>;

// ============================================================================
// TOOL DATABASE
// ============================================================================

/// The tool catalog, loaded once and immutable afterwards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDatabase {
  /// Alias name to descriptor string (a single substitution level)
  #[serde(default)]
  pub aliases: BTreeMap<String, String>,
  /// Tool name to definition
  pub tools: BTreeMap<String, ToolEntry>,
}

/// A tool definition, tagged by how the tool is invoked
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ToolEntry {
  /// Runs through the embedded owl runner and exposes pipeline staging
  #[serde(rename = "owl")]
  Native(NativeTool),
  /// Flat invocation of an external executable (spot et al.)
  #[serde(rename = "spot")]
  External(ExternalTool),
}

/// Definition of a tool dispatched through the owl runner
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NativeTool {
  /// Runner subcommand name
  pub name: String,
  /// Modifier name to flag token
  #[serde(default)]
  pub flags: BTreeMap<String, String>,
  /// Modifier name to optimisation token
  #[serde(default)]
  pub optimisations: BTreeMap<String, String>,
  /// Modifiers applied unless overridden
  #[serde(default)]
  pub defaults: Vec<String>,
  /// Groups of mutually exclusive modifiers
  #[serde(default, rename = "exclusive-flags")]
  pub exclusive_flags: Vec<Vec<String>>,
  /// Input stage type
  #[serde(default = "default_input")]
  pub input: String,
  /// Output stage type
  #[serde(default = "default_output")]
  pub output: String,
  /// Stages run before the main tool
  #[serde(default)]
  pub pre: Vec<StageSpec>,
  /// Stages run after the main tool
  #[serde(default)]
  pub post: Vec<StageSpec>,
}

fn default_input() -> String {
  "ltl".to_string()
}

fn default_output() -> String {
  "hoa".to_string()
}

/// Definition of an externally invoked tool
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalTool {
  /// Executable to invoke
  pub executable: String,
  /// Modifier name to flag token
  #[serde(default)]
  pub flags: BTreeMap<String, String>,
  /// Modifier name to optimisation token
  #[serde(default)]
  pub optimisations: BTreeMap<String, String>,
  /// Modifiers applied unless overridden
  #[serde(default)]
  pub defaults: Vec<String>,
  /// Groups of mutually exclusive modifiers
  #[serde(default, rename = "exclusive-flags")]
  pub exclusive_flags: Vec<Vec<String>>,
}

/// One pipeline stage, either a bare token or a token list
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum StageSpec {
  Token(String),
  Tokens(Vec<String>),
}

impl StageSpec {
  /// Tokens of this stage in order
  pub fn tokens(&self) -> &[String] {
    match self {
      StageSpec::Token(token) => std::slice::from_ref(token),
      StageSpec::Tokens(tokens) => tokens,
    }
  }
}

impl ToolEntry {
  /// Modifier-to-flag mapping of the tool
  pub fn flags(&self) -> &BTreeMap<String, String> {
    match self {
      ToolEntry::Native(tool) => &tool.flags,
      ToolEntry::External(tool) => &tool.flags,
    }
  }

  /// Modifier-to-optimisation mapping of the tool
  pub fn optimisations(&self) -> &BTreeMap<String, String> {
    match self {
      ToolEntry::Native(tool) => &tool.optimisations,
      ToolEntry::External(tool) => &tool.optimisations,
    }
  }

  /// Modifiers active unless overridden
  pub fn defaults(&self) -> &[String] {
    match self {
      ToolEntry::Native(tool) => &tool.defaults,
      ToolEntry::External(tool) => &tool.defaults,
    }
  }

  /// Mutually exclusive modifier groups
  pub fn exclusive_flags(&self) -> &[Vec<String>] {
    match self {
      ToolEntry::Native(tool) => &tool.exclusive_flags,
      ToolEntry::External(tool) => &tool.exclusive_flags,
    }
  }
}

// ============================================================================
// TEST DATABASE
// ============================================================================

/// Test definitions with shared defaults and dataset shorthands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDatabase {
  /// Values merged into every test entry
  #[serde(default)]
  pub defaults: TestSpec,
  /// Dataset shorthands usable from `data`
  #[serde(default)]
  pub dataset: BTreeMap<String, Vec<DataSetRef>>,
  /// Test entries
  pub tests: BTreeMap<String, TestEntry>,
}

/// A test entry, either a bare tool descriptor or a full spec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TestEntry {
  Tool(String),
  Spec(TestSpec),
}

/// Raw test fields before defaults are applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestSpec {
  /// Descriptors of the tools under test
  #[serde(default)]
  pub tools: Option<OneOrMany>,
  /// Reference translation the driver compares against
  #[serde(default)]
  pub reference: Option<Reference>,
  /// Formula data: dataset shorthand, set name, or explicit list
  #[serde(default)]
  pub data: Option<DataField>,
}

/// One string or a list of strings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
  One(String),
  Many(Vec<String>),
}

impl OneOrMany {
  /// Contents as an owned list
  pub fn to_vec(&self) -> Vec<String> {
    match self {
      OneOrMany::One(value) => vec![value.clone()],
      OneOrMany::Many(values) => values.clone(),
    }
  }
}

/// Reference tool handed to the comparison driver as-is
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
  /// Display name
  pub name: String,
  /// Invocation tokens
  pub exec: Vec<String>,
}

/// The data field of a test
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataField {
  Name(String),
  List(Vec<DataSetRef>),
}

/// Reference to a formula set, optionally determinised
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DataSetRef {
  Name(String),
  Detailed(DataSetSpec),
}

/// Formula set reference with options
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DataSetSpec {
  /// Formula set name
  pub name: String,
  /// Determinise the inputs before comparison
  #[serde(default)]
  pub determinize: bool,
}

impl DataSetRef {
  /// Name of the referenced formula set
  pub fn name(&self) -> &str {
    match self {
      DataSetRef::Name(name) => name,
      DataSetRef::Detailed(spec) => &spec.name,
    }
  }

  /// Whether the inputs are determinised before comparison
  pub fn determinize(&self) -> bool {
    match self {
      DataSetRef::Name(_) => false,
      DataSetRef::Detailed(spec) => spec.determinize,
    }
  }
}

/// A test case with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
  /// Test name
  pub name: String,
  /// Descriptors of the tools under test
  pub tools: Vec<String>,
  /// Reference translation
  pub reference: Reference,
  /// Formula sets the driver runs over
  pub data: Vec<DataSetRef>,
}

impl TestDatabase {
  /// Assemble a test case, merging the entry over the database defaults
  pub fn case(&self, name: &str) -> Result<TestCase, DatabaseError> {
    let Some(entry) = self.tests.get(name) else {
      return Err(DatabaseError::UnknownTest {
        name: name.to_string(),
        known: crate::loader::known_keys(&self.tests),
      });
    };

    let spec = match entry {
      TestEntry::Tool(tool) => TestSpec {
        tools: Some(OneOrMany::One(tool.clone())),
        ..TestSpec::default()
      },
      TestEntry::Spec(spec) => spec.clone(),
    };

    let tools = spec
      .tools
      .or_else(|| self.defaults.tools.clone())
      .ok_or_else(|| DatabaseError::MissingKey {
        kind: "test",
        name: name.to_string(),
        key: "tools",
      })?
      .to_vec();
    let reference = spec
      .reference
      .or_else(|| self.defaults.reference.clone())
      .ok_or_else(|| DatabaseError::MissingKey {
        kind: "test",
        name: name.to_string(),
        key: "reference",
      })?;
    let data = spec
      .data
      .or_else(|| self.defaults.data.clone())
      .ok_or_else(|| DatabaseError::MissingKey {
        kind: "test",
        name: name.to_string(),
        key: "data",
      })?;

    Ok(TestCase {
      name: name.to_string(),
      tools,
      reference,
      data: self.expand_data(data),
    })
  }

  // A bare name is first tried as a dataset shorthand, then taken as a
  // literal formula set name.
  fn expand_data(&self, field: DataField) -> Vec<DataSetRef> {
    match field {
      DataField::Name(name) => match self.dataset.get(&name) {
        Some(list) => list.clone(),
        None => vec![DataSetRef::Name(name)],
      },
      DataField::List(list) => list,
    }
  }
}

// ============================================================================
// BENCHMARK DATABASE
// ============================================================================

/// Benchmark definitions with shared defaults and dataset shorthands
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkDatabase {
  /// Values merged into every benchmark entry
  #[serde(default)]
  pub defaults: BenchmarkSpec,
  /// Dataset shorthands usable from `data`
  #[serde(default)]
  pub dataset: BTreeMap<String, Vec<String>>,
  /// Benchmark entries, a singular key in the file
  #[serde(rename = "benchmark")]
  pub benchmarks: BTreeMap<String, BenchmarkEntry>,
}

/// A benchmark entry, either a bare tool descriptor or a full spec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BenchmarkEntry {
  Tool(String),
  Spec(BenchmarkSpec),
}

/// Raw benchmark fields before defaults are applied
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BenchmarkSpec {
  /// Descriptor of the benchmarked tool
  #[serde(default)]
  pub tool: Option<String>,
  /// Formula data: dataset shorthand, set name, or explicit list
  #[serde(default)]
  pub data: Option<BenchData>,
  /// Repetitions per formula
  #[serde(default)]
  pub repeat: Option<u32>,
  /// Update the stored baseline
  #[serde(default)]
  pub update: Option<bool>,
  /// Profile with perf (true) or measure time only (false)
  #[serde(default)]
  pub perf: Option<bool>,
}

/// The data field of a benchmark
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BenchData {
  Name(String),
  List(Vec<String>),
}

/// A benchmark case with defaults applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BenchmarkCase {
  /// Benchmark name
  pub name: String,
  /// Descriptor of the benchmarked tool
  pub tool: String,
  /// Formula set names piped to the driver
  pub data: Vec<String>,
  /// Repetitions per formula
  pub repeat: u32,
  /// Update the stored baseline
  pub update: bool,
  /// Profile with perf (true) or measure time only (false)
  pub perf: Option<bool>,
}

impl BenchmarkDatabase {
  /// Assemble a benchmark case, merging the entry over the database defaults
  pub fn case(&self, name: &str) -> Result<BenchmarkCase, DatabaseError> {
    let Some(entry) = self.benchmarks.get(name) else {
      return Err(DatabaseError::UnknownBenchmark {
        name: name.to_string(),
        known: crate::loader::known_keys(&self.benchmarks),
      });
    };

    let spec = match entry {
      BenchmarkEntry::Tool(tool) => BenchmarkSpec {
        tool: Some(tool.clone()),
        ..BenchmarkSpec::default()
      },
      BenchmarkEntry::Spec(spec) => spec.clone(),
    };

    let tool = spec
      .tool
      .or_else(|| self.defaults.tool.clone())
      .ok_or_else(|| DatabaseError::MissingKey {
        kind: "benchmark",
        name: name.to_string(),
        key: "tool",
      })?;
    let data = spec
      .data
      .or_else(|| self.defaults.data.clone())
      .ok_or_else(|| DatabaseError::MissingKey {
        kind: "benchmark",
        name: name.to_string(),
        key: "data",
      })?;

    Ok(BenchmarkCase {
      name: name.to_string(),
      tool,
      data: self.expand_data(data),
      repeat: spec.repeat.or(self.defaults.repeat).unwrap_or(1),
      update: spec.update.or(self.defaults.update).unwrap_or(false),
      perf: spec.perf.or(self.defaults.perf),
    })
  }

  fn expand_data(&self, field: BenchData) -> Vec<String> {
    match field {
      BenchData::Name(name) => match self.dataset.get(&name) {
        Some(list) => list.clone(),
        None => vec![name],
      },
      BenchData::List(list) => list,
    }
  }
}
