//! Evaluation of conda-style line selectors such as `# [build_type == 'cuda' and not ppc64le]`.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::util::compare_versions;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Ident(String),
  Literal(String),
  Op(&'static str),
  And,
  Or,
  Not,
  LParen,
  RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
  let chars: Vec<char> = expr.chars().collect();
  let mut tokens = Vec::new();
  let mut i = 0;

  while i < chars.len() {
    let c = chars[i];
    match c {
      c if c.is_whitespace() => i += 1,
      '(' => {
        tokens.push(Token::LParen);
        i += 1;
      }
      ')' => {
        tokens.push(Token::RParen);
        i += 1;
      }
      '\'' | '"' => {
        let quote = c;
        let start = i + 1;
        let end = chars[start..]
          .iter()
          .position(|&ch| ch == quote)
          .map(|p| start + p)
          .ok_or_else(|| format!("unterminated string in '{}'", expr))?;
        tokens.push(Token::Literal(chars[start..end].iter().collect()));
        i = end + 1;
      }
      '=' | '!' | '<' | '>' => {
        let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
        let op = match two.as_str() {
          "==" => "==",
          "!=" => "!=",
          "<=" => "<=",
          ">=" => ">=",
          _ if c == '<' => "<",
          _ if c == '>' => ">",
          _ => return Err(format!("unexpected '{}' in '{}'", c, expr)),
        };
        i += op.len();
        tokens.push(Token::Op(op));
      }
      c if c.is_ascii_digit() => {
        let start = i;
        while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '.') {
          i += 1;
        }
        tokens.push(Token::Literal(chars[start..i].iter().collect()));
      }
      c if c.is_alphabetic() || c == '_' => {
        let start = i;
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
          i += 1;
        }
        let word: String = chars[start..i].iter().collect();
        tokens.push(match word.as_str() {
          "and" => Token::And,
          "or" => Token::Or,
          "not" => Token::Not,
          "True" | "true" => Token::Literal("true".into()),
          "False" | "false" => Token::Literal("false".into()),
          _ => Token::Ident(word),
        });
      }
      other => return Err(format!("unexpected '{}' in '{}'", other, expr)),
    }
  }

  Ok(tokens)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
  Str(String),
  Undefined,
}

impl Value {
  fn truthy(&self) -> bool {
    match self {
      Value::Str(s) => !s.is_empty() && s != "false",
      Value::Undefined => false,
    }
  }

  fn from_bool(b: bool) -> Self {
    Value::Str(if b { "true" } else { "false" }.to_string())
  }
}

struct Parser<'a> {
  tokens: Vec<Token>,
  pos: usize,
  vars: &'a BTreeMap<String, String>,
}

impl Parser<'_> {
  fn peek(&self) -> Option<&Token> {
    self.tokens.get(self.pos)
  }

  fn next(&mut self) -> Option<Token> {
    let token = self.tokens.get(self.pos).cloned();
    self.pos += 1;
    token
  }

  fn or_expr(&mut self) -> Result<Value, String> {
    let mut value = self.and_expr()?;
    while self.peek() == Some(&Token::Or) {
      self.pos += 1;
      let rhs = self.and_expr()?;
      value = Value::from_bool(value.truthy() || rhs.truthy());
    }
    Ok(value)
  }

  fn and_expr(&mut self) -> Result<Value, String> {
    let mut value = self.not_expr()?;
    while self.peek() == Some(&Token::And) {
      self.pos += 1;
      let rhs = self.not_expr()?;
      value = Value::from_bool(value.truthy() && rhs.truthy());
    }
    Ok(value)
  }

  fn not_expr(&mut self) -> Result<Value, String> {
    if self.peek() == Some(&Token::Not) {
      self.pos += 1;
      let inner = self.not_expr()?;
      return Ok(Value::from_bool(!inner.truthy()));
    }
    self.comparison()
  }

  fn comparison(&mut self) -> Result<Value, String> {
    let lhs = self.atom()?;
    let Some(Token::Op(op)) = self.peek().cloned() else {
      return Ok(lhs);
    };
    self.pos += 1;
    let rhs = self.atom()?;
    Ok(Value::from_bool(compare(&lhs, op, &rhs)))
  }

  fn atom(&mut self) -> Result<Value, String> {
    match self.next() {
      Some(Token::Ident(name)) => Ok(self.vars.get(&name).cloned().map(Value::Str).unwrap_or(Value::Undefined)),
      Some(Token::Literal(lit)) => Ok(Value::Str(lit)),
      Some(Token::LParen) => {
        let value = self.or_expr()?;
        match self.next() {
          Some(Token::RParen) => Ok(value),
          _ => Err("missing ')'".to_string()),
        }
      }
      Some(other) => Err(format!("unexpected token {:?}", other)),
      None => Err("unexpected end of expression".to_string()),
    }
  }
}

fn compare(lhs: &Value, op: &str, rhs: &Value) -> bool {
  let (Value::Str(l), Value::Str(r)) = (lhs, rhs) else {
    // Comparisons against undefined names are never equal.
    return op == "!=";
  };
  let ordering = if looks_like_version(l) && looks_like_version(r) {
    compare_versions(l, r)
  } else {
    l.cmp(r)
  };
  match op {
    "==" => ordering == Ordering::Equal,
    "!=" => ordering != Ordering::Equal,
    "<" => ordering == Ordering::Less,
    "<=" => ordering != Ordering::Greater,
    ">" => ordering == Ordering::Greater,
    _ => ordering != Ordering::Less,
  }
}

fn looks_like_version(s: &str) -> bool {
  !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '.')
}

/// Evaluate a selector expression against `vars`.
pub fn evaluate(expr: &str, vars: &BTreeMap<String, String>) -> Result<bool, String> {
  let tokens = tokenize(expr)?;
  if tokens.is_empty() {
    return Err("empty selector".to_string());
  }
  let mut parser = Parser { tokens, pos: 0, vars };
  let value = parser.or_expr()?;
  if parser.pos < parser.tokens.len() {
    return Err(format!("trailing input in selector '{}'", expr));
  }
  Ok(value.truthy())
}

#[cfg(test)]
mod tests {
  use super::*;

  fn vars() -> BTreeMap<String, String> {
    BTreeMap::from([
      ("build_type".to_string(), "cuda".to_string()),
      ("python".to_string(), "3.10".to_string()),
      ("py".to_string(), "310".to_string()),
      ("linux".to_string(), "true".to_string()),
      ("ppc64le".to_string(), "false".to_string()),
    ])
  }

  #[test]
  fn equality_and_inequality() {
    assert!(evaluate("build_type == 'cuda'", &vars()).unwrap());
    assert!(!evaluate("build_type != \"cuda\"", &vars()).unwrap());
  }

  #[test]
  fn boolean_connectives_and_grouping() {
    assert!(evaluate("linux and not ppc64le", &vars()).unwrap());
    assert!(evaluate("ppc64le or (build_type == 'cuda' and linux)", &vars()).unwrap());
    assert!(!evaluate("not (linux or ppc64le)", &vars()).unwrap());
  }

  #[test]
  fn version_comparison_is_numeric() {
    assert!(evaluate("python >= '3.9'", &vars()).unwrap());
    assert!(evaluate("py > 39", &vars()).unwrap());
  }

  #[test]
  fn undefined_names_are_false() {
    assert!(!evaluate("win", &vars()).unwrap());
    assert!(!evaluate("cudatoolkit == '11.2'", &vars()).unwrap());
    assert!(evaluate("cudatoolkit != '11.2'", &vars()).unwrap());
  }

  #[test]
  fn malformed_expressions_error() {
    assert!(evaluate("build_type == ", &vars()).is_err());
    assert!(evaluate("(linux", &vars()).is_err());
    assert!(evaluate("'open", &vars()).is_err());
    assert!(evaluate("linux linux", &vars()).is_err());
  }
}
