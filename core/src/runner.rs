// Test and Benchmark Runner
// Assembles driver invocations and supervises the server processes

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::info;

use owlbench_config::{BenchmarkCase, DataPaths, DatabaseError, LoadCache, TestCase};

use crate::pipeline::{self, InvocationMode, PipelineError};
use crate::pool::{PoolConfig, PoolError, ProcessPool};
use crate::resolver::{self, ResolveError, ResolvedKind, ResolvedTool};

const BASE_PORT: u16 = 6060;
const OWL_CLIENT: &str = "build/exe/owlClient/owl-client";
const TEST_DRIVER: &str = "ltlcross-run.sh";
const BENCH_DRIVER: &str = "benchmark.sh";

/// Errors orchestrating a test or benchmark run
#[derive(Error, Debug)]
pub enum RunnerError {
  /// A database failed to load or misses the requested entry
  #[error("database error: {0}")]
  Database(#[from] DatabaseError),

  /// A tool descriptor did not resolve
  #[error("resolution error: {0}")]
  Resolve(#[from] ResolveError),

  /// A resolved tool did not assemble into a command
  #[error("pipeline error: {0}")]
  Pipeline(#[from] PipelineError),

  /// The server pool failed to come up
  #[error("process pool error: {0}")]
  Pool(#[from] PoolError),

  /// The external driver script failed to run
  #[error("failed to run driver '{}': {source}", script.display())]
  Driver {
    script: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

/// Environment the embedded runner and the comparison driver expect
pub fn java_env() -> Vec<(String, String)> {
  vec![(
    "JAVA_OPTS".to_string(),
    "-enableassertions -Xss64M".to_string(),
  )]
}

/// Driver arguments plus the server commands a test needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestPlan {
  /// Arguments of the comparison driver, the script itself excluded
  pub arguments: Vec<String>,
  /// Server command per port, launched before the driver runs
  pub servers: BTreeMap<u16, Vec<String>>,
}

/// Lay out the comparison driver invocation for a test case.
///
/// Native tools run as servers reached through the socket client, one port
/// per tool starting at 6060. External tools are handed to the driver as a
/// literal command with the `%f` formula placeholder.
pub fn plan_test(case: &TestCase, tools: &[ResolvedTool]) -> Result<TestPlan, PipelineError> {
  let mut arguments = vec![case.reference.name.clone(), case.reference.exec.join(" ")];
  let mut servers = BTreeMap::new();
  let mut port = BASE_PORT;

  for tool in tools {
    arguments.push("-t".to_string());
    match &tool.kind {
      ResolvedKind::Native(_) => {
        arguments.push(display_name(tool, tools.len()));
        let command = pipeline::build(tool, InvocationMode::Server { port: Some(port) })?;
        servers.insert(port, command);
        arguments.push(format!("\"{OWL_CLIENT}\" localhost {port} %f"));
        port += 1;
      }
      ResolvedKind::External { .. } => {
        arguments.push(tool.name.clone());
        let command = pipeline::build(
          tool,
          InvocationMode::Literal {
            formula: "%f".to_string(),
          },
        )?;
        arguments.push(command.join(" "));
      }
    }
  }

  for data_set in &case.data {
    if data_set.determinize() {
      arguments.push("-d".to_string());
    }
    arguments.push(data_set.name().to_string());
  }

  Ok(TestPlan { arguments, servers })
}

// The qualified name disambiguates variants of the same tool in the driver
// report. A single tool needs no qualification.
fn display_name(tool: &ResolvedTool, tool_count: usize) -> String {
  if tool_count > 1 && !tool.flags.is_empty() {
    tool.qualified_name()
  } else {
    tool.name.clone()
  }
}

/// Run a named test: resolve its tools, start the servers, hand the plan to
/// the comparison driver and tear the servers down again.
pub async fn run_test(
  cache: &mut LoadCache,
  paths: &DataPaths,
  name: &str,
  pool_config: PoolConfig,
) -> Result<ExitStatus, RunnerError> {
  let tests = cache.test_database(&paths.tests)?;
  let case = tests.case(name)?;

  let tool_database = cache.tool_database(&paths.tools)?;
  let mut tools = Vec::with_capacity(case.tools.len());
  for descriptor in &case.tools {
    tools.push(resolver::resolve(&tool_database, descriptor)?);
  }

  // Formula sets are validated before any server is launched.
  for data_set in &case.data {
    cache.formula_set(&paths.formulas, data_set.name())?;
  }

  let TestPlan { arguments, servers } = plan_test(&case, &tools)?;
  let env = java_env();

  let mut pool = ProcessPool::new(pool_config);
  if !servers.is_empty() {
    info!("starting {} server(s) for test '{}'", servers.len(), name);
    if let Err(error) = pool.start(servers, &env).await {
      pool.stop().await;
      return Err(error.into());
    }
  }

  let status = run_driver(paths.script(TEST_DRIVER), arguments, &env, None).await;
  pool.stop().await;
  status
}

/// Command-line overrides for a benchmark run
#[derive(Debug, Clone, Default)]
pub struct BenchOverrides {
  /// Force updating the stored baseline
  pub update: bool,
  /// Force profiling (true) or plain timing (false)
  pub perf: Option<bool>,
}

/// Lay out the benchmark driver arguments for a case
pub fn plan_benchmark(
  case: &BenchmarkCase,
  command: Vec<String>,
  overrides: &BenchOverrides,
) -> Vec<String> {
  let mut arguments = vec![
    "--stdin".to_string(),
    "--repeat".to_string(),
    case.repeat.to_string(),
  ];
  if overrides.update || case.update {
    arguments.push("--update".to_string());
  }
  match overrides.perf.or(case.perf) {
    Some(true) => arguments.push("--perf".to_string()),
    Some(false) => arguments.push("--time".to_string()),
    None => {}
  }
  arguments.push("--".to_string());
  arguments.extend(command);
  arguments
}

/// Run a named benchmark: build the tool command in file mode and pipe the
/// selected formula sets to the driver on stdin.
pub async fn run_benchmark(
  cache: &mut LoadCache,
  paths: &DataPaths,
  name: &str,
  overrides: &BenchOverrides,
) -> Result<ExitStatus, RunnerError> {
  let benchmarks = cache.benchmark_database(&paths.benchmarks)?;
  let case = benchmarks.case(name)?;

  let tool_database = cache.tool_database(&paths.tools)?;
  let tool = resolver::resolve(&tool_database, &case.tool)?;
  let command = pipeline::build(
    &tool,
    InvocationMode::File {
      path: "%F".to_string(),
    },
  )?;
  let arguments = plan_benchmark(&case, command, overrides);

  let mut sets = Vec::with_capacity(case.data.len());
  for set_name in &case.data {
    sets.push(cache.formula_set(&paths.formulas, set_name)?.join("\n"));
  }
  let input = sets.join("\n");

  run_driver(paths.script(BENCH_DRIVER), arguments, &[], Some(input)).await
}

async fn run_driver(
  script: PathBuf,
  arguments: Vec<String>,
  env: &[(String, String)],
  input: Option<String>,
) -> Result<ExitStatus, RunnerError> {
  info!("running driver {}", script.display());

  let mut command = Command::new(&script);
  command.args(&arguments);
  for (key, value) in env {
    command.env(key, value);
  }
  if input.is_some() {
    command.stdin(Stdio::piped());
  }

  let mut child = command.spawn().map_err(|source| RunnerError::Driver {
    script: script.clone(),
    source,
  })?;
  if let Some(text) = input {
    if let Some(mut stdin) = child.stdin.take() {
      stdin
        .write_all(text.as_bytes())
        .await
        .map_err(|source| RunnerError::Driver {
          script: script.clone(),
          source,
        })?;
    }
  }

  let status = child.wait().await.map_err(|source| RunnerError::Driver {
    script,
    source,
  })?;
  Ok(status)
}

#[cfg(test)]
mod tests {
  use super::*;
  use owlbench_config::{DataSetRef, Reference, ToolDatabase};
  use pretty_assertions::assert_eq;

  fn tool_database() -> ToolDatabase {
    serde_json::from_value(serde_json::json!({
      "tools": {
        "ltl2dpa": {
          "type": "owl",
          "name": "ltl2dpa",
          "flags": {
            "symmetric": "--symmetric",
            "asymmetric": "--asymmetric"
          },
          "defaults": ["asymmetric"],
          "exclusive-flags": [["symmetric", "asymmetric"]]
        },
        "ltl2tgba": {
          "type": "spot",
          "executable": "ltl2tgba",
          "flags": { "deterministic": "--deterministic" },
          "defaults": ["deterministic"]
        }
      }
    }))
    .unwrap()
  }

  fn case(descriptors: &[&str]) -> TestCase {
    TestCase {
      name: "smoke".to_string(),
      tools: descriptors.iter().map(|tool| tool.to_string()).collect(),
      reference: Reference {
        name: "reference".to_string(),
        exec: vec!["ltl2tgba".to_string(), "-f".to_string(), "%f".to_string()],
      },
      data: vec![DataSetRef::Name("base".to_string())],
    }
  }

  fn resolve_all(descriptors: &[&str]) -> Vec<ResolvedTool> {
    let database = tool_database();
    descriptors
      .iter()
      .map(|descriptor| resolver::resolve(&database, descriptor).unwrap())
      .collect()
  }

  #[test]
  fn test_plan_lays_out_the_driver_arguments() {
    let descriptors = ["ltl2dpa", "ltl2tgba"];
    let plan = plan_test(&case(&descriptors), &resolve_all(&descriptors)).unwrap();

    assert_eq!(plan.servers.len(), 1);
    assert!(plan.servers.contains_key(&6060));
    assert_eq!(
      plan.arguments,
      vec![
        "reference".to_string(),
        "ltl2tgba -f %f".to_string(),
        "-t".to_string(),
        "ltl2dpa#asymmetric".to_string(),
        "\"build/exe/owlClient/owl-client\" localhost 6060 %f".to_string(),
        "-t".to_string(),
        "ltl2tgba".to_string(),
        "ltl2tgba --deterministic -f %f".to_string(),
        "base".to_string(),
      ]
    );
  }

  #[test]
  fn native_tools_get_consecutive_ports() {
    let descriptors = ["ltl2dpa", "ltl2dpa#symmetric"];
    let plan = plan_test(&case(&descriptors), &resolve_all(&descriptors)).unwrap();
    let ports: Vec<u16> = plan.servers.keys().copied().collect();
    assert_eq!(ports, vec![6060, 6061]);
    assert!(plan.arguments.contains(&"ltl2dpa#asymmetric".to_string()));
    assert!(plan.arguments.contains(&"ltl2dpa#symmetric".to_string()));
  }

  #[test]
  fn single_tool_keeps_its_plain_name() {
    let descriptors = ["ltl2dpa"];
    let plan = plan_test(&case(&descriptors), &resolve_all(&descriptors)).unwrap();
    assert!(plan.arguments.contains(&"ltl2dpa".to_string()));
    assert!(!plan.arguments.contains(&"ltl2dpa#asymmetric".to_string()));
  }

  #[test]
  fn determinized_set_is_marked_for_the_driver() {
    let mut test_case = case(&["ltl2tgba"]);
    test_case.data = vec![
      DataSetRef::Name("base".to_string()),
      serde_json::from_value(serde_json::json!({ "name": "fairness", "determinize": true }))
        .unwrap(),
    ];
    let plan = plan_test(&test_case, &resolve_all(&["ltl2tgba"])).unwrap();
    let tail = &plan.arguments[plan.arguments.len() - 3..];
    assert_eq!(
      tail,
      ["base".to_string(), "-d".to_string(), "fairness".to_string()]
    );
  }

  fn bench_case() -> BenchmarkCase {
    BenchmarkCase {
      name: "dpa".to_string(),
      tool: "ltl2dpa".to_string(),
      data: vec!["base".to_string()],
      repeat: 5,
      update: false,
      perf: None,
    }
  }

  #[test]
  fn benchmark_plan_carries_the_tool_command() {
    let command = vec![
      "build/exe/owl/owl".to_string(),
      "-I".to_string(),
      "%F".to_string(),
    ];
    let arguments = plan_benchmark(&bench_case(), command, &BenchOverrides::default());
    assert_eq!(
      arguments,
      vec!["--stdin", "--repeat", "5", "--", "build/exe/owl/owl", "-I", "%F"]
    );
  }

  #[test]
  fn benchmark_plan_places_update_and_perf_flags() {
    let mut case = bench_case();
    case.update = true;
    case.perf = Some(true);
    let arguments = plan_benchmark(&case, vec!["x".to_string()], &BenchOverrides::default());
    assert_eq!(
      arguments,
      vec!["--stdin", "--repeat", "5", "--update", "--perf", "--", "x"]
    );

    case.perf = Some(false);
    let arguments = plan_benchmark(&case, vec!["x".to_string()], &BenchOverrides::default());
    assert!(arguments.contains(&"--time".to_string()));
    assert!(!arguments.contains(&"--perf".to_string()));
  }

  #[test]
  fn overrides_win_over_the_database_entry() {
    let overrides = BenchOverrides {
      update: true,
      perf: Some(false),
    };
    let arguments = plan_benchmark(&bench_case(), vec!["x".to_string()], &overrides);
    assert!(arguments.contains(&"--update".to_string()));
    assert!(arguments.contains(&"--time".to_string()));
  }

  #[test]
  fn java_options_are_pinned() {
    assert_eq!(
      java_env(),
      vec![(
        "JAVA_OPTS".to_string(),
        "-enableassertions -Xss64M".to_string()
      )]
    );
  }
}
