// Tool Descriptor Resolver
// Turns a textual descriptor plus the tool database into a concrete tool

use std::collections::{HashMap, HashSet};
use thiserror::Error;

use owlbench_config::{StageSpec, ToolDatabase, ToolEntry};

/// Modifier that enables the runner's parallel evaluation
pub const PARALLEL: &str = "parallel";
/// Modifier that disables all optimisation passes
pub const NO_OPT: &str = "no-opt";

const PARALLEL_TOKEN: &str = "--parallel";
const NO_OPT_TOKEN: &str = "--noopt";

/// Errors resolving a descriptor against the database
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
  /// The descriptor contains more than one '#'
  #[error("descriptor '{descriptor}' contains more than one '#'")]
  AmbiguousDescriptor { descriptor: String },

  /// The named tool is not in the database
  #[error("unknown tool '{name}' in descriptor '{descriptor}'")]
  UnknownTool { descriptor: String, name: String },

  /// A '-' modifier removed a name that is not in the working set
  #[error("descriptor '{descriptor}' removes modifier '{modifier}' which is not present")]
  InvalidModifierRemoval { descriptor: String, modifier: String },

  /// A modifier matches neither a flag, an optimisation nor a builtin
  #[error("unknown modifier '{modifier}' for tool '{tool}', flags: {flags:?}, optimisations: {optimisations:?}")]
  UnknownModifier {
    tool: String,
    modifier: String,
    flags: Vec<String>,
    optimisations: Vec<String>,
  },
}

/// A resolved flag, kept with the modifier that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flag {
  /// Modifier name from the descriptor or the defaults
  pub modifier: String,
  /// Literal command token
  pub token: String,
}

/// Pipeline staging of a native tool, carried through as data
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staging {
  pub input: String,
  pub output: String,
  pub pre: Vec<StageSpec>,
  pub post: Vec<StageSpec>,
}

/// How the resolved tool is invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedKind {
  /// Staged pipeline through the runner launcher
  Native(Staging),
  /// Flat invocation of an external executable
  External { executable: String },
}

/// Outcome of a descriptor resolution, an immutable value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTool {
  pub name: String,
  pub flags: Vec<Flag>,
  pub optimisations: Vec<String>,
  pub kind: ResolvedKind,
}

impl ResolvedTool {
  /// Resolved flag tokens in their final order
  pub fn flag_tokens(&self) -> impl Iterator<Item = &str> {
    self.flags.iter().map(|flag| flag.token.as_str())
  }

  /// Name qualified by the active flag modifiers
  pub fn qualified_name(&self) -> String {
    if self.flags.is_empty() {
      return self.name.clone();
    }
    let modifiers: Vec<&str> = self.flags.iter().map(|flag| flag.modifier.as_str()).collect();
    format!("{}#{}", self.name, modifiers.join(","))
  }
}

/// Resolve `descriptor` against `database` into a concrete tool.
///
/// The resolution is pure and deterministic: the same inputs always yield a
/// value-equal [`ResolvedTool`]. Defaults are applied in name order, the
/// descriptor's own modifiers in their written order, so the last written
/// modifier wins a conflict within an exclusive group.
pub fn resolve(database: &ToolDatabase, descriptor: &str) -> Result<ResolvedTool, ResolveError> {
  // One substitution level, the target is not re-checked against the aliases.
  let descriptor = match database.aliases.get(descriptor) {
    Some(target) => target.as_str(),
    None => descriptor,
  };

  let (name, modifiers) = split_descriptor(descriptor)?;
  let Some(entry) = database.tools.get(name) else {
    return Err(ResolveError::UnknownTool {
      descriptor: descriptor.to_string(),
      name: name.to_string(),
    });
  };

  let tool_name = match entry {
    ToolEntry::Native(tool) => tool.name.clone(),
    ToolEntry::External(_) => name.to_string(),
  };

  let working = working_set(descriptor, entry.defaults(), modifiers)?;
  let conflict_map = conflicts(entry.exclusive_flags());

  let flag_map = entry.flags();
  let optimisation_map = entry.optimisations();
  let mut flags: Vec<Flag> = Vec::new();
  let mut optimisations: Vec<String> = Vec::new();

  for modifier in &working {
    if let Some(token) = flag_map.get(modifier) {
      if let Some(losers) = conflict_map.get(modifier.as_str()) {
        flags.retain(|flag| !losers.contains(flag.modifier.as_str()));
      }
      flags.push(Flag {
        modifier: modifier.clone(),
        token: token.clone(),
      });
    } else if let Some(token) = optimisation_map.get(modifier) {
      optimisations.push(token.clone());
    } else if modifier == PARALLEL {
      flags.push(Flag {
        modifier: modifier.clone(),
        token: PARALLEL_TOKEN.to_string(),
      });
    } else if modifier == NO_OPT {
      flags.push(Flag {
        modifier: modifier.clone(),
        token: NO_OPT_TOKEN.to_string(),
      });
    } else {
      return Err(ResolveError::UnknownModifier {
        tool: tool_name,
        modifier: modifier.clone(),
        flags: flag_map.keys().cloned().collect(),
        optimisations: optimisation_map.keys().cloned().collect(),
      });
    }
  }

  // Sorting before the token dedup keeps the outcome independent of the
  // order modifiers were written in.
  flags.sort_by(|a, b| a.modifier.cmp(&b.modifier));
  let mut seen = HashSet::new();
  flags.retain(|flag| seen.insert(flag.token.clone()));
  optimisations.sort();
  optimisations.dedup();

  let kind = match entry {
    ToolEntry::Native(tool) => ResolvedKind::Native(Staging {
      input: tool.input.clone(),
      output: tool.output.clone(),
      pre: tool.pre.clone(),
      post: tool.post.clone(),
    }),
    ToolEntry::External(tool) => ResolvedKind::External {
      executable: tool.executable.clone(),
    },
  };

  Ok(ResolvedTool {
    name: tool_name,
    flags,
    optimisations,
    kind,
  })
}

fn split_descriptor(descriptor: &str) -> Result<(&str, &str), ResolveError> {
  match descriptor.split_once('#') {
    None => Ok((descriptor, "")),
    Some((_, rest)) if rest.contains('#') => Err(ResolveError::AmbiguousDescriptor {
      descriptor: descriptor.to_string(),
    }),
    Some((name, modifiers)) => Ok((name, modifiers)),
  }
}

// The working set keeps defaults first, sorted by name, followed by the
// descriptor's modifiers in written order. Restating a default moves it to
// its written position.
fn working_set(
  descriptor: &str,
  defaults: &[String],
  modifiers: &str,
) -> Result<Vec<String>, ResolveError> {
  let mut base = defaults.to_vec();
  base.sort();
  base.dedup();
  let mut added: Vec<String> = Vec::new();

  for token in modifiers.split(',') {
    if token.is_empty() {
      continue;
    }
    if let Some(name) = token.strip_prefix('-') {
      if let Some(position) = base.iter().position(|modifier| modifier == name) {
        base.remove(position);
      } else if let Some(position) = added.iter().position(|modifier| modifier == name) {
        added.remove(position);
      } else {
        return Err(ResolveError::InvalidModifierRemoval {
          descriptor: descriptor.to_string(),
          modifier: name.to_string(),
        });
      }
    } else if let Some(position) = base.iter().position(|modifier| modifier == token) {
      base.remove(position);
      added.push(token.to_string());
    } else if !added.iter().any(|modifier| modifier == token) {
      added.push(token.to_string());
    }
  }

  base.append(&mut added);
  Ok(base)
}

fn conflicts(groups: &[Vec<String>]) -> HashMap<&str, HashSet<&str>> {
  let mut map: HashMap<&str, HashSet<&str>> = HashMap::new();
  for group in groups {
    for member in group {
      let entry = map.entry(member.as_str()).or_default();
      for other in group {
        if other != member {
          entry.insert(other.as_str());
        }
      }
    }
  }
  map
}
