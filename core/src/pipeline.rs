// Pipeline Builder
// Emits the command token sequence for a resolved tool

use thiserror::Error;

use crate::resolver::{ResolvedKind, ResolvedTool, Staging};

/// Reserved token between pipeline stages
pub const STAGE_SEPARATOR: &str = "---";

const INPUT_LTL: &str = "ltl";
const OUTPUT_HOA: &str = "hoa";
const LAUNCHER: &str = "build/exe/owl/owl";

/// How the built command consumes its input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationMode {
  /// Long-running server, optionally pinned to a port
  Server { port: Option<u16> },
  /// Read formulas from a file
  File { path: String },
  /// A single formula given inline
  Literal { formula: String },
}

/// Errors assembling a command line
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
  /// The tool declares an input type the pipeline cannot provide
  #[error("tool '{tool}' declares unsupported input type '{input}'")]
  UnsupportedInputType { tool: String, input: String },

  /// The tool declares an output type the pipeline cannot consume
  #[error("tool '{tool}' declares unsupported output type '{output}'")]
  UnsupportedOutputType { tool: String, output: String },

  /// External tools have no server mode
  #[error("external tool '{tool}' cannot run in server mode")]
  UnsupportedMode { tool: String },

  /// A stage or flag produced an empty token
  #[error("pipeline for '{tool}' contains an empty token")]
  EmptyToken { tool: String },

  /// A stage or flag collides with the stage separator
  #[error("pipeline for '{tool}' contains the reserved separator token")]
  ReservedToken { tool: String },
}

/// Launcher executable of the staged runner, platform dependent
pub fn launcher() -> String {
  if cfg!(windows) {
    format!("{LAUNCHER}.bat")
  } else {
    LAUNCHER.to_string()
  }
}

/// Assemble the command tokens for `tool` under `mode`
pub fn build(tool: &ResolvedTool, mode: InvocationMode) -> Result<Vec<String>, PipelineError> {
  match &tool.kind {
    ResolvedKind::External { executable } => build_external(tool, executable, mode),
    ResolvedKind::Native(staging) => build_native(tool, staging, mode),
  }
}

fn build_external(
  tool: &ResolvedTool,
  executable: &str,
  mode: InvocationMode,
) -> Result<Vec<String>, PipelineError> {
  let mut tokens = vec![executable.to_string()];
  tokens.extend(tool.flag_tokens().map(str::to_string));
  match mode {
    InvocationMode::Server { .. } => {
      return Err(PipelineError::UnsupportedMode {
        tool: tool.name.clone(),
      });
    }
    InvocationMode::File { path } => {
      tokens.push("-F".to_string());
      tokens.push(path);
    }
    InvocationMode::Literal { formula } => {
      tokens.push("-f".to_string());
      tokens.push(formula);
    }
  }
  check_tokens(&tool.name, &tokens)?;
  Ok(tokens)
}

fn build_native(
  tool: &ResolvedTool,
  staging: &Staging,
  mode: InvocationMode,
) -> Result<Vec<String>, PipelineError> {
  if staging.input != INPUT_LTL {
    return Err(PipelineError::UnsupportedInputType {
      tool: tool.name.clone(),
      input: staging.input.clone(),
    });
  }
  if staging.output != OUTPUT_HOA {
    return Err(PipelineError::UnsupportedOutputType {
      tool: tool.name.clone(),
      output: staging.output.clone(),
    });
  }

  let mut main = vec![tool.name.clone()];
  main.extend(tool.flag_tokens().map(str::to_string));
  if !tool.optimisations.is_empty() {
    main.push(tool.optimisations.join(","));
  }

  let mut stages: Vec<Vec<String>> = vec![vec![staging.input.clone()]];
  stages.extend(staging.pre.iter().map(|stage| stage.tokens().to_vec()));
  stages.push(main);
  stages.extend(staging.post.iter().map(|stage| stage.tokens().to_vec()));
  stages.push(vec![staging.output.clone()]);

  // Tokens are checked before the separators go in, so a stage can never
  // smuggle one in.
  let mut tokens = launcher_prefix(mode);
  check_tokens(&tool.name, &tokens)?;
  for stage in &stages {
    check_tokens(&tool.name, stage)?;
  }
  for stage in stages {
    tokens.push(STAGE_SEPARATOR.to_string());
    tokens.extend(stage);
  }
  Ok(tokens)
}

fn launcher_prefix(mode: InvocationMode) -> Vec<String> {
  let mut prefix = vec![launcher()];
  match mode {
    InvocationMode::Server { port: Some(port) } => {
      prefix.push("--port".to_string());
      prefix.push(port.to_string());
    }
    InvocationMode::Server { port: None } => {}
    InvocationMode::File { path } => {
      prefix.push("-I".to_string());
      prefix.push(path);
    }
    InvocationMode::Literal { formula } => {
      prefix.push("-i".to_string());
      prefix.push(formula);
    }
  }
  prefix
}

fn check_tokens(tool: &str, tokens: &[String]) -> Result<(), PipelineError> {
  for token in tokens {
    if token.is_empty() {
      return Err(PipelineError::EmptyToken {
        tool: tool.to_string(),
      });
    }
    if token == STAGE_SEPARATOR {
      return Err(PipelineError::ReservedToken {
        tool: tool.to_string(),
      });
    }
  }
  Ok(())
}
