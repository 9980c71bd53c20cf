//! Variant-aware preprocessing of YAML files.
//!
//! Environment files, `meta.yaml` recipes and feedstock test files are written
//! with conda-build conventions: `{% set %}` statements, `{{ expr }}`
//! substitutions and trailing `# [selector]` comments. [`render`] resolves
//! those against a variant's variables and returns plain YAML.

mod selector;

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

pub use selector::evaluate as evaluate_selector;

static SET_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^\s*\{%-?\s*set\s+(\w+)\s*=\s*(.+?)\s*-?%\}\s*$").expect("valid regex"));
static STATEMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*\{%.*%\}\s*$").expect("valid regex"));
static SELECTOR_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(?P<content>.*?)\s*#\s*\[(?P<expr>.+)\]\s*$").expect("valid regex"));
static EXPR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{\{\s*(.*?)\s*\}\}").expect("valid regex"));
static DEFAULT_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"^(\w+)\s*\|\s*default\((.+)\)$").expect("valid regex"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct RenderError {
  pub line: usize,
  pub message: String,
}

/// Render `text` for the given variables.
///
/// With `permit_undefined`, an expression that cannot be resolved is replaced
/// by its own source text; otherwise it is an error.
pub fn render(text: &str, vars: &BTreeMap<String, String>, permit_undefined: bool) -> Result<String, RenderError> {
  let mut scope = vars.clone();
  let mut out = String::with_capacity(text.len());

  for (idx, raw) in text.lines().enumerate() {
    let line_no = idx + 1;
    let err = |message: String| RenderError { line: line_no, message };

    if let Some(caps) = SET_RE.captures(raw) {
      let value = literal_or_lookup(&caps[2], &scope).ok_or_else(|| err(format!("cannot evaluate '{}'", &caps[2])))?;
      scope.insert(caps[1].to_string(), value);
      continue;
    }
    if STATEMENT_RE.is_match(raw) {
      continue;
    }

    let content = match SELECTOR_RE.captures(raw) {
      Some(caps) => {
        if !selector::evaluate(&caps["expr"], &scope).map_err(err)? {
          continue;
        }
        caps["content"].to_string()
      }
      None => raw.to_string(),
    };

    let mut failure = None;
    let substituted = EXPR_RE.replace_all(&content, |caps: &regex::Captures<'_>| {
      let expr = &caps[1];
      match evaluate_expression(expr, &scope) {
        Some(value) => value,
        None if permit_undefined => expr.to_string(),
        None => {
          failure.get_or_insert_with(|| err(format!("'{}' is undefined", expr)));
          String::new()
        }
      }
    });
    if let Some(e) = failure {
      return Err(e);
    }

    out.push_str(&substituted);
    out.push('\n');
  }

  Ok(out)
}

fn evaluate_expression(expr: &str, scope: &BTreeMap<String, String>) -> Option<String> {
  if let Some(caps) = DEFAULT_RE.captures(expr) {
    return scope
      .get(&caps[1])
      .cloned()
      .or_else(|| literal_or_lookup(&caps[2], scope));
  }
  literal_or_lookup(expr, scope)
}

fn literal_or_lookup(token: &str, scope: &BTreeMap<String, String>) -> Option<String> {
  let token = token.trim();
  for quote in ['"', '\''] {
    if token.len() >= 2 && token.starts_with(quote) && token.ends_with(quote) {
      return Some(token[1..token.len() - 1].to_string());
    }
  }
  if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit() || c == '.') {
    return Some(token.to_string());
  }
  scope.get(token).cloned()
}
