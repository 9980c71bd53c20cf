//! Subprocess execution for the external tools this crate drives.
//!
//! Everything heavy (conda-build, git patching, container engines, test
//! scripts) runs as a child process. Output is captured, logged at debug
//! level, and non-zero exits become [`CmdError::Failed`] carrying the tail of
//! stderr so callers can surface something useful.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Number of stderr lines kept in a [`CmdError::Failed`].
const STDERR_TAIL_LINES: usize = 20;

#[derive(Debug, Error)]
pub enum CmdError {
  /// The program could not be started at all.
  #[error("failed to start `{program}`: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// The program ran and exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}{}", tail_suffix(.stderr_tail))]
  Failed {
    cmd: String,
    code: Option<i32>,
    stderr_tail: String,
  },
}

fn tail_suffix(tail: &str) -> String {
  if tail.is_empty() {
    String::new()
  } else {
    format!("\n{}", tail)
  }
}

/// Captured result of a finished process.
#[derive(Debug, Clone)]
pub struct CmdOutput {
  pub code: Option<i32>,
  pub stdout: String,
  pub stderr: String,
}

impl CmdOutput {
  pub fn success(&self) -> bool {
    self.code == Some(0)
  }
}

/// A command line plus its working directory and extra environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
  program: String,
  args: Vec<String>,
  cwd: Option<PathBuf>,
  env: BTreeMap<String, String>,
}

impl Cmd {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      cwd: None,
      env: BTreeMap::new(),
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn cwd(mut self, dir: impl AsRef<Path>) -> Self {
    self.cwd = Some(dir.as_ref().to_path_buf());
    self
  }

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn get_args(&self) -> &[String] {
    &self.args
  }

  /// Run to completion, returning captured output regardless of exit status.
  pub async fn output(&self) -> Result<CmdOutput, CmdError> {
    info!(cmd = %self, "executing command");

    let mut command = Command::new(&self.program);
    command
      .args(&self.args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(cwd) = &self.cwd {
      command.current_dir(cwd);
    }
    for (key, value) in &self.env {
      command.env(key, value);
    }

    debug!(program = %self.program, working_dir = ?self.cwd, "spawning process");

    let output = command.output().await.map_err(|source| CmdError::Spawn {
      program: self.program.clone(),
      source,
    })?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    if !stderr.is_empty() {
      debug!(stderr = %stderr, "command stderr");
    }
    if !stdout.is_empty() {
      debug!(stdout = %stdout, "command stdout");
    }

    Ok(CmdOutput {
      code: output.status.code(),
      stdout,
      stderr,
    })
  }

  /// Run to completion, failing on a non-zero exit. Returns trimmed stdout.
  pub async fn run(&self) -> Result<String, CmdError> {
    let output = self.output().await?;
    if !output.success() {
      return Err(CmdError::Failed {
        cmd: self.to_string(),
        code: output.code,
        stderr_tail: tail(&output.stderr, STDERR_TAIL_LINES),
      });
    }
    Ok(output.stdout.trim().to_string())
  }
}

impl fmt::Display for Cmd {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      if arg.is_empty() || arg.contains(char::is_whitespace) {
        write!(f, " '{}'", arg)?;
      } else {
        write!(f, " {}", arg)?;
      }
    }
    Ok(())
  }
}

fn tail(text: &str, lines: usize) -> String {
  let all: Vec<&str> = text.trim_end().lines().collect();
  let start = all.len().saturating_sub(lines);
  all[start..].join("\n")
}
