// Owlbench CLI - Command Line Interface Entry Point

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::info;

use owlbench_config::{DataPaths, LoadCache};
use owlbench_core::pipeline::{self, InvocationMode};
use owlbench_core::pool::PoolConfig;
use owlbench_core::runner::{self, BenchOverrides};
use owlbench_core::{resolver, stats};

/// Owlbench - benchmark harness for LTL-to-automata translation tools
#[derive(Parser, Debug)]
#[command(name = "owlbench")]
#[command(version, about, long_about = None)]
struct TopCli {
    #[clap(flatten)]
    paths: PathArgs,

    #[clap(subcommand)]
    command: Commands,
}

/// Database and script location overrides
#[derive(Debug, clap::Args)]
struct PathArgs {
    /// Directory holding the database files
    #[arg(long = "data-dir", value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Tool database file
    #[arg(long = "tools", value_name = "FILE")]
    tools: Option<PathBuf>,

    /// Formula database file
    #[arg(long = "formulas", value_name = "FILE")]
    formulas: Option<PathBuf>,

    /// Test database file
    #[arg(long = "tests", value_name = "FILE")]
    tests: Option<PathBuf>,

    /// Benchmark database file
    #[arg(long = "benchmarks", value_name = "FILE")]
    benchmarks: Option<PathBuf>,

    /// Directory holding the driver scripts
    #[arg(long = "scripts", value_name = "DIR")]
    scripts: Option<PathBuf>,
}

impl PathArgs {
    fn to_paths(&self) -> DataPaths {
        let mut paths = match &self.data_dir {
            Some(dir) => DataPaths::with_data_dir(dir),
            None => DataPaths::new(),
        };
        if let Some(tools) = &self.tools {
            paths.tools = tools.clone();
        }
        if let Some(formulas) = &self.formulas {
            paths.formulas = formulas.clone();
        }
        if let Some(tests) = &self.tests {
            paths.tests = tests.clone();
        }
        if let Some(benchmarks) = &self.benchmarks {
            paths.benchmarks = benchmarks.clone();
        }
        if let Some(scripts) = &self.scripts {
            paths.scripts = scripts.clone();
        }
        paths
    }
}

/// Available commands
#[derive(Debug, Subcommand)]
enum Commands {
    /// Resolve a tool descriptor and print its command line
    Tool {
        /// Tool descriptor, e.g. ltl2dpa#symmetric
        descriptor: String,

        /// Build the server command
        #[arg(long)]
        server: bool,

        /// Server port
        #[arg(long, value_name = "PORT", requires = "server")]
        port: Option<u16>,

        /// Read formulas from a file
        #[arg(long, value_name = "FILE", conflicts_with = "server")]
        file: Option<String>,

        /// Translate a single formula
        #[arg(long, value_name = "LTL", conflicts_with_all = ["server", "file"])]
        formula: Option<String>,
    },

    /// Print the formulas of the named sets
    Formula {
        /// Formula set names
        #[arg(required = true)]
        sets: Vec<String>,
    },

    /// Run a comparison test against the reference tool
    Test {
        /// Test name
        name: String,
    },

    /// Run a benchmark
    Bench {
        /// Benchmark name
        name: String,

        /// Update the stored baseline
        #[arg(long)]
        update: bool,

        /// Profile with perf
        #[arg(long, conflicts_with = "time")]
        perf: bool,

        /// Measure wall-clock time only
        #[arg(long)]
        time: bool,
    },

    /// Aggregate comparison driver reports
    Stats {
        /// Report flavor
        #[arg(value_enum)]
        mode: StatsMode,

        /// CSV report files
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

/// Report flavor of the stats command
#[derive(Debug, Clone, Copy, ValueEnum)]
enum StatsMode {
    /// Reports keyed by formula
    Ltl,
    /// Reports keyed by input automaton
    Aut,
}

impl From<StatsMode> for stats::RunMode {
    fn from(mode: StatsMode) -> Self {
        match mode {
            StatsMode::Ltl => stats::RunMode::Ltl,
            StatsMode::Aut => stats::RunMode::Aut,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout stays reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info".to_string())
                .as_str(),
        )
        .with_writer(std::io::stderr)
        .init();

    // Parse CLI arguments
    let cli = TopCli::parse();
    let paths = cli.paths.to_paths();
    let mut cache = LoadCache::new();

    match cli.command {
        Commands::Tool {
            descriptor,
            server,
            port,
            file,
            formula,
        } => {
            print_tool(&mut cache, &paths, &descriptor, server, port, file, formula)?;
        }
        Commands::Formula { sets } => {
            print_formulas(&mut cache, &paths, &sets)?;
        }
        Commands::Test { name } => {
            info!("Running test: {}", name);
            let status = runner::run_test(&mut cache, &paths, &name, PoolConfig::default())
                .await
                .with_context(|| format!("test '{name}' failed to run"))?;
            std::process::exit(status.code().unwrap_or(1));
        }
        Commands::Bench {
            name,
            update,
            perf,
            time,
        } => {
            info!("Running benchmark: {}", name);
            let overrides = BenchOverrides {
                update,
                perf: if perf {
                    Some(true)
                } else if time {
                    Some(false)
                } else {
                    None
                },
            };
            let status = runner::run_benchmark(&mut cache, &paths, &name, &overrides)
                .await
                .with_context(|| format!("benchmark '{name}' failed to run"))?;
            std::process::exit(status.code().unwrap_or(1));
        }
        Commands::Stats { mode, files } => {
            print_stats(mode.into(), &files)?;
        }
    }

    Ok(())
}

/// Resolve a descriptor and print its command, one token per line
fn print_tool(
    cache: &mut LoadCache,
    paths: &DataPaths,
    descriptor: &str,
    server: bool,
    port: Option<u16>,
    file: Option<String>,
    formula: Option<String>,
) -> Result<()> {
    let database = cache.tool_database(&paths.tools)?;
    let tool = resolver::resolve(&database, descriptor)?;

    let mode = if server {
        InvocationMode::Server { port }
    } else if let Some(formula) = formula {
        InvocationMode::Literal { formula }
    } else {
        InvocationMode::File {
            path: file.unwrap_or_else(|| "%F".to_string()),
        }
    };

    for token in pipeline::build(&tool, mode)? {
        println!("{}", token);
    }
    Ok(())
}

/// Print the formulas of the given sets in order
fn print_formulas(cache: &mut LoadCache, paths: &DataPaths, sets: &[String]) -> Result<()> {
    // Every set is validated before anything is printed.
    let mut selected = Vec::with_capacity(sets.len());
    for name in sets {
        selected.push(cache.formula_set(&paths.formulas, name)?);
    }
    for set in selected {
        for formula in set {
            println!("{}", formula);
        }
    }
    Ok(())
}

/// Evaluate report files and print the aggregates
fn print_stats(mode: stats::RunMode, files: &[PathBuf]) -> Result<()> {
    let mut sources = Vec::with_capacity(files.len());
    for file in files {
        let text = std::fs::read_to_string(file)
            .with_context(|| format!("failed to read report {}", file.display()))?;
        sources.push((file.display().to_string(), text));
    }

    let report = stats::evaluate(&sources, mode)?;
    for (tool, count) in &report.failures {
        println!("{} failed {} time(s)", tool, count);
    }
    for summary in &report.tools {
        for column in &summary.columns {
            println!(
                "{} {}: n={} mean={:.1} median={:.1} top1%={:.1}",
                summary.tool,
                column.name,
                column.count,
                column.mean,
                column.median,
                column.top_mean
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        TopCli::command().debug_assert();
    }
}
