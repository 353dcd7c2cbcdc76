// Statistics Evaluation
// Aggregates comparison driver CSV reports across tools

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

const INPUT_TOOL: &str = "input";
const TOOL_COLUMN: &str = "tool";
const STATUS_COLUMN: &str = "exit_status";
const STATUS_OK: &str = "ok";

const LTL_INPUT_KEY: &str = "formula";
const AUT_INPUT_KEY: &str = "input.source";

// (csv column, report name)
const LTL_COLUMNS: &[(&str, &str)] = &[
  ("time", "time"),
  ("states", "states"),
  ("edges", "edges"),
  ("transitions", "trans"),
  ("acc", "acc"),
  ("scc", "scc"),
];
const AUT_COLUMNS: &[(&str, &str)] = &[
  ("time", "time"),
  ("output.states", "states"),
  ("output.edges", "edges"),
  ("output.transitions", "trans"),
  ("output.acc_sets", "acc"),
  ("output.scc", "scc"),
];
const AUT_INPUT_COLUMNS: &[(&str, &str)] = &[
  ("input.states", "states"),
  ("input.edges", "edges"),
  ("input.transitions", "trans"),
  ("input.acc_sets", "acc"),
  ("input.scc", "scc"),
];

/// Which comparison driver produced the reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  /// Reports keyed by formula
  Ltl,
  /// Reports keyed by input automaton
  Aut,
}

impl RunMode {
  fn input_key(self) -> &'static str {
    match self {
      RunMode::Ltl => LTL_INPUT_KEY,
      RunMode::Aut => AUT_INPUT_KEY,
    }
  }

  fn columns(self) -> &'static [(&'static str, &'static str)] {
    match self {
      RunMode::Ltl => LTL_COLUMNS,
      RunMode::Aut => AUT_COLUMNS,
    }
  }
}

/// Errors evaluating a batch of reports
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StatsError {
  /// The CSV structure itself is broken
  #[error("{source_name}:{line}: {message}")]
  Csv {
    source_name: String,
    line: usize,
    message: String,
  },

  /// A required column is missing from the header
  #[error("{source_name}: missing column '{column}'")]
  MissingColumn {
    source_name: String,
    column: &'static str,
  },

  /// A row has no value in the input key column
  #[error("{source_name}:{line}: row without '{key}' value")]
  MissingKey {
    source_name: String,
    line: usize,
    key: &'static str,
  },

  /// A numeric cell does not parse
  #[error("{source_name}:{line}: column '{column}' value '{value}' is not a number")]
  BadNumber {
    source_name: String,
    line: usize,
    column: &'static str,
    value: String,
  },

  /// Every input failed for at least one tool
  #[error("no input for which all tools succeeded")]
  NoCommonInputs,
}

/// Aggregates of one column for one tool
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnSummary {
  pub name: &'static str,
  pub count: usize,
  pub mean: f64,
  pub median: f64,
  /// Mean over the top percentile, the tail the plain mean hides
  pub top_mean: f64,
}

/// Aggregates of one tool over the commonly solved inputs
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSummary {
  pub tool: String,
  pub columns: Vec<ColumnSummary>,
}

/// Outcome of evaluating a batch of reports
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
  /// Tools that failed at least one input, with the failure count
  pub failures: Vec<(String, usize)>,
  /// Per-tool summaries, the input pseudo tool first where present
  pub tools: Vec<ToolSummary>,
}

#[derive(Debug, Clone)]
struct Sample {
  status: String,
  values: BTreeMap<&'static str, f64>,
}

#[derive(Debug)]
struct Row {
  line: usize,
  cells: Vec<String>,
}

/// Evaluate report files, given as (name, contents) pairs.
///
/// An input counts against a tool when the tool has no complete row for it
/// or its exit status is not `ok`. Aggregation only covers inputs every
/// tool solved; later rows for the same tool and input replace earlier
/// ones, also across files.
pub fn evaluate(sources: &[(String, String)], mode: RunMode) -> Result<Report, StatsError> {
  let mut data: BTreeMap<String, BTreeMap<String, Sample>> = BTreeMap::new();
  let mut input_keys: BTreeSet<String> = BTreeSet::new();

  for (source_name, text) in sources {
    collect(source_name, text, mode, &mut data, &mut input_keys)?;
  }

  let mut failures: Vec<(String, usize)> = Vec::new();
  let mut failed_keys: BTreeSet<String> = BTreeSet::new();
  for (tool, samples) in &data {
    let mut count = 0;
    for key in &input_keys {
      let solved = samples
        .get(key)
        .is_some_and(|sample| sample.status == STATUS_OK);
      if !solved {
        count += 1;
        failed_keys.insert(key.clone());
      }
    }
    if count > 0 {
      failures.push((tool.clone(), count));
    }
  }

  if failed_keys.len() == input_keys.len() {
    return Err(StatsError::NoCommonInputs);
  }

  let mut tools: Vec<ToolSummary> = Vec::new();
  for (tool, samples) in &data {
    let mut columns = Vec::with_capacity(mode.columns().len());
    for &(_, name) in mode.columns() {
      let mut values: Vec<f64> = Vec::new();
      for (key, sample) in samples {
        if failed_keys.contains(key) {
          continue;
        }
        if let Some(value) = sample.values.get(name) {
          values.push(*value);
        }
      }
      columns.push(summarize(name, values));
    }
    tools.push(ToolSummary {
      tool: tool.clone(),
      columns,
    });
  }

  // The input pseudo tool leads the report in automaton mode.
  if let Some(position) = tools.iter().position(|summary| summary.tool == INPUT_TOOL) {
    let input = tools.remove(position);
    tools.insert(0, input);
  }

  Ok(Report { failures, tools })
}

fn collect(
  source_name: &str,
  text: &str,
  mode: RunMode,
  data: &mut BTreeMap<String, BTreeMap<String, Sample>>,
  input_keys: &mut BTreeSet<String>,
) -> Result<(), StatsError> {
  let mut rows = parse_csv(source_name, text)?.into_iter();
  let Some(header) = rows.next() else {
    return Ok(());
  };
  let header = header.cells;

  let index = |column: &'static str| -> Result<usize, StatsError> {
    header
      .iter()
      .position(|cell| cell == column)
      .ok_or_else(|| StatsError::MissingColumn {
        source_name: source_name.to_string(),
        column,
      })
  };

  let key_index = index(mode.input_key())?;
  let tool_index = index(TOOL_COLUMN)?;
  let status_index = index(STATUS_COLUMN)?;
  let mut columns = Vec::with_capacity(mode.columns().len());
  for &(column, name) in mode.columns() {
    columns.push((index(column)?, column, name));
  }
  let mut input_columns = Vec::new();
  if mode == RunMode::Aut {
    for &(column, name) in AUT_INPUT_COLUMNS {
      input_columns.push((index(column)?, column, name));
    }
  }

  for row in rows {
    if row.cells.len() != header.len() {
      return Err(StatsError::Csv {
        source_name: source_name.to_string(),
        line: row.line,
        message: format!(
          "row has {} cells, header has {}",
          row.cells.len(),
          header.len()
        ),
      });
    }

    let key = row.cells[key_index].clone();
    if key.is_empty() {
      return Err(StatsError::MissingKey {
        source_name: source_name.to_string(),
        line: row.line,
        key: mode.input_key(),
      });
    }
    input_keys.insert(key.clone());

    let tool = row.cells[tool_index].clone();
    data.entry(tool.clone()).or_default();

    // A row with an empty numeric cell is a failed computation; the key
    // still counts against the tool.
    if columns.iter().any(|(cell, _, _)| row.cells[*cell].is_empty()) {
      continue;
    }

    let mut values = BTreeMap::new();
    for &(cell, column, name) in &columns {
      values.insert(name, parse_number(source_name, &row, cell, column)?);
    }
    let status = row.cells[status_index].clone();

    if mode == RunMode::Aut {
      let input_samples = data.entry(INPUT_TOOL.to_string()).or_default();
      if !input_samples.contains_key(&key) {
        let mut input_values = BTreeMap::new();
        for &(cell, column, name) in &input_columns {
          input_values.insert(name, parse_number(source_name, &row, cell, column)?);
        }
        input_values.insert("time", 0.0);
        input_samples.insert(
          key.clone(),
          Sample {
            status: STATUS_OK.to_string(),
            values: input_values,
          },
        );
      }
    }

    data
      .entry(tool)
      .or_default()
      .insert(key, Sample { status, values });
  }

  Ok(())
}

fn parse_number(
  source_name: &str,
  row: &Row,
  cell: usize,
  column: &'static str,
) -> Result<f64, StatsError> {
  let value = &row.cells[cell];
  value.parse::<f64>().map_err(|_| StatsError::BadNumber {
    source_name: source_name.to_string(),
    line: row.line,
    column,
    value: value.clone(),
  })
}

fn summarize(name: &'static str, mut values: Vec<f64>) -> ColumnSummary {
  if values.is_empty() {
    return ColumnSummary {
      name,
      count: 0,
      mean: 0.0,
      median: 0.0,
      top_mean: 0.0,
    };
  }

  values.sort_by(f64::total_cmp);
  let count = values.len();
  let mean = values.iter().sum::<f64>() / count as f64;
  let median = if count % 2 == 1 {
    values[count / 2]
  } else {
    (values[count / 2 - 1] + values[count / 2]) / 2.0
  };
  let top = &values[count * 99 / 100..];
  let top_mean = top.iter().sum::<f64>() / top.len() as f64;

  ColumnSummary {
    name,
    count,
    mean,
    median,
    top_mean,
  }
}

// Minimal reader for the quoted CSV the comparison drivers emit. Quoted
// fields may contain commas, doubled quotes and newlines.
fn parse_csv(source_name: &str, text: &str) -> Result<Vec<Row>, StatsError> {
  let mut rows = Vec::new();
  let mut cells: Vec<String> = Vec::new();
  let mut field = String::new();
  let mut quoted = false;
  let mut line = 1;
  let mut row_line = 1;
  let mut chars = text.chars().peekable();

  while let Some(c) = chars.next() {
    if quoted {
      match c {
        '"' => {
          if chars.peek() == Some(&'"') {
            chars.next();
            field.push('"');
          } else {
            quoted = false;
          }
        }
        '\n' => {
          line += 1;
          field.push('\n');
        }
        other => field.push(other),
      }
      continue;
    }

    match c {
      '"' if field.is_empty() => quoted = true,
      '"' => {
        return Err(StatsError::Csv {
          source_name: source_name.to_string(),
          line,
          message: "unexpected quote inside unquoted field".to_string(),
        });
      }
      ',' => cells.push(std::mem::take(&mut field)),
      '\r' => {}
      '\n' => {
        cells.push(std::mem::take(&mut field));
        // A fully blank line is not a record.
        if cells.len() > 1 || !cells[0].is_empty() {
          rows.push(Row {
            line: row_line,
            cells: std::mem::take(&mut cells),
          });
        } else {
          cells.clear();
        }
        line += 1;
        row_line = line;
      }
      other => field.push(other),
    }
  }

  if quoted {
    return Err(StatsError::Csv {
      source_name: source_name.to_string(),
      line,
      message: "unterminated quoted field".to_string(),
    });
  }
  if !field.is_empty() || !cells.is_empty() {
    cells.push(field);
    rows.push(Row {
      line: row_line,
      cells,
    });
  }
  Ok(rows)
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  const LTL_HEADER: &str = "formula,tool,exit_status,time,states,edges,transitions,acc,scc";

  fn ltl_row(formula: &str, tool: &str, status: &str, value: f64) -> String {
    format!("\"{formula}\",{tool},{status},{value},{value},{value},{value},{value},{value}")
  }

  fn source(rows: &[String]) -> Vec<(String, String)> {
    let mut text = String::from(LTL_HEADER);
    for row in rows {
      text.push('\n');
      text.push_str(row);
    }
    text.push('\n');
    vec![("report.csv".to_string(), text)]
  }

  fn column<'a>(report: &'a Report, tool: &str, name: &str) -> &'a ColumnSummary {
    let summary = report
      .tools
      .iter()
      .find(|summary| summary.tool == tool)
      .unwrap();
    summary
      .columns
      .iter()
      .find(|column| column.name == name)
      .unwrap()
  }

  #[test]
  fn aggregates_over_commonly_solved_inputs() {
    let report = evaluate(
      &source(&[
        ltl_row("f1", "alpha", "ok", 1.0),
        ltl_row("f1", "beta", "ok", 2.0),
        ltl_row("f2", "alpha", "ok", 2.0),
        ltl_row("f2", "beta", "ok", 4.0),
        ltl_row("f3", "alpha", "ok", 3.0),
        ltl_row("f3", "beta", "timeout", 9.0),
      ]),
      RunMode::Ltl,
    )
    .unwrap();

    assert_eq!(report.failures, vec![("beta".to_string(), 1)]);

    let alpha_time = column(&report, "alpha", "time");
    assert_eq!(alpha_time.count, 2);
    assert_eq!(alpha_time.mean, 1.5);
    assert_eq!(alpha_time.median, 1.5);
    assert_eq!(alpha_time.top_mean, 2.0);

    let beta_time = column(&report, "beta", "time");
    assert_eq!(beta_time.mean, 3.0);
  }

  #[test]
  fn all_inputs_failing_is_an_error() {
    let error = evaluate(
      &source(&[ltl_row("f1", "alpha", "timeout", 1.0)]),
      RunMode::Ltl,
    )
    .unwrap_err();
    assert_eq!(error, StatsError::NoCommonInputs);
  }

  #[test]
  fn empty_reports_have_no_common_inputs() {
    let error = evaluate(&source(&[]), RunMode::Ltl).unwrap_err();
    assert_eq!(error, StatsError::NoCommonInputs);
  }

  #[test]
  fn empty_numeric_cell_counts_as_a_failure() {
    let incomplete = "\"f1\",alpha,ok,,1,1,1,1,1".to_string();
    let report = evaluate(
      &source(&[incomplete, ltl_row("f2", "alpha", "ok", 2.0)]),
      RunMode::Ltl,
    )
    .unwrap();

    assert_eq!(report.failures, vec![("alpha".to_string(), 1)]);
    assert_eq!(column(&report, "alpha", "time").count, 1);
  }

  #[test]
  fn odd_sample_median_is_the_middle_value() {
    let report = evaluate(
      &source(&[
        ltl_row("f1", "alpha", "ok", 1.0),
        ltl_row("f2", "alpha", "ok", 2.0),
        ltl_row("f3", "alpha", "ok", 100.0),
      ]),
      RunMode::Ltl,
    )
    .unwrap();

    let time = column(&report, "alpha", "time");
    assert_eq!(time.median, 2.0);
    assert_eq!(time.count, 3);
  }

  #[test]
  fn top_mean_covers_the_last_percentile() {
    let rows: Vec<String> = (1..=100)
      .map(|value| ltl_row(&format!("f{value}"), "alpha", "ok", f64::from(value)))
      .collect();
    let report = evaluate(&source(&rows), RunMode::Ltl).unwrap();

    let time = column(&report, "alpha", "time");
    assert_eq!(time.count, 100);
    assert_eq!(time.top_mean, 100.0);
  }

  #[test]
  fn later_rows_replace_earlier_ones() {
    let mut sources = source(&[ltl_row("f1", "alpha", "ok", 1.0)]);
    sources.extend(source(&[ltl_row("f1", "alpha", "ok", 5.0)]));
    let report = evaluate(&sources, RunMode::Ltl).unwrap();
    assert_eq!(column(&report, "alpha", "time").mean, 5.0);
  }

  #[test]
  fn quoted_fields_keep_commas_and_quotes() {
    let rows = parse_csv("test", "a,\"b,c\",\"d\"\"e\"\nf,g,h\n").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].cells, vec!["a", "b,c", "d\"e"]);
    assert_eq!(rows[1].line, 2);
  }

  #[test]
  fn quoted_newlines_stay_in_the_field() {
    let rows = parse_csv("test", "a,\"b\nc\"\nd,e\n").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].cells[1], "b\nc");
    assert_eq!(rows[1].line, 3);
  }

  #[test]
  fn unterminated_quote_is_an_error() {
    let error = parse_csv("test", "a,\"b\n").unwrap_err();
    assert!(matches!(error, StatsError::Csv { .. }));
  }

  #[test]
  fn missing_column_is_reported() {
    let error = evaluate(
      &[("broken.csv".to_string(), "formula,time\n\"f1\",1\n".to_string())],
      RunMode::Ltl,
    )
    .unwrap_err();
    assert_eq!(
      error,
      StatsError::MissingColumn {
        source_name: "broken.csv".to_string(),
        column: "tool",
      }
    );
  }

  #[test]
  fn empty_key_cell_is_reported() {
    let error = evaluate(
      &source(&[ltl_row("", "alpha", "ok", 1.0)]),
      RunMode::Ltl,
    )
    .unwrap_err();
    assert_eq!(
      error,
      StatsError::MissingKey {
        source_name: "report.csv".to_string(),
        line: 2,
        key: "formula",
      }
    );
  }

  const AUT_HEADER: &str = "input.source,tool,exit_status,time,\
output.states,output.edges,output.transitions,output.acc_sets,output.scc,\
input.states,input.edges,input.transitions,input.acc_sets,input.scc";

  fn aut_row(input: &str, tool: &str, output: f64, input_size: f64) -> String {
    format!(
      "\"{input}\",{tool},ok,1.0,{output},{output},{output},{output},{output},\
{input_size},{input_size},{input_size},{input_size},{input_size}"
    )
  }

  #[test]
  fn automaton_mode_synthesizes_the_input_tool() {
    let text = format!(
      "{AUT_HEADER}\n{}\n{}\n",
      aut_row("a1", "alpha", 5.0, 7.0),
      aut_row("a1", "beta", 6.0, 8.0),
    );
    let report = evaluate(&[("aut.csv".to_string(), text)], RunMode::Aut).unwrap();

    assert!(report.failures.is_empty());
    assert_eq!(report.tools[0].tool, "input");

    // First row wins for the synthesized input statistics.
    let input_states = column(&report, "input", "states");
    assert_eq!(input_states.mean, 7.0);
    let input_time = column(&report, "input", "time");
    assert_eq!(input_time.mean, 0.0);

    assert_eq!(column(&report, "alpha", "states").mean, 5.0);
    assert_eq!(column(&report, "beta", "states").mean, 6.0);
  }
}
