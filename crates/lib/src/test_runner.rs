//! Feedstock tests run against generated environment files.
//!
//! A feedstock declares its tests in `tests/open-ce-tests.yaml`:
//!
//! ```yaml
//! tests:
//!   - name: Import numpy
//!     command: python -c "import numpy"
//! ```
//!
//! For each environment file a fresh conda environment is created, every test
//! command runs inside it with bash, and the environment is removed again.
//! Results are written as JUnit XML.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};

use crate::consts::{CONDA_ENV_FILENAME_PREFIX, DEFAULT_PPC_ARCH, DEFAULT_TEST_CONFIG_FILE, DEFAULT_TEST_RESULT_FILE};
use crate::env_file::{CondaEnv, EnvFileError, variant_of_env_file};
use crate::graph::FeedstockDir;
use crate::render::{RenderError, render};
use crate::util::Cmd;
use crate::variant::BuildVariant;

#[derive(Debug, Error)]
pub enum TestRunError {
  #[error("failed to read '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("error in {file}: {source}")]
  Render {
    file: PathBuf,
    #[source]
    source: RenderError,
  },

  #[error("error in {file}: {source}")]
  Parse {
    file: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error(transparent)]
  EnvFile(#[from] EnvFileError),

  #[error("failed to write '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("There were {count} test failures. The following tests failed: {}", .names.join(", "))]
  Failed { count: usize, names: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestSpec {
  pub name: String,
  pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestFile {
  #[serde(default)]
  pub tests: Vec<TestSpec>,
}

/// Outcome of one test command.
#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
  pub name: String,
  pub feedstock: String,
  pub env_file: PathBuf,
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
  pub elapsed: Duration,
}

/// Selector variables for rendering a test file against `env_file`.
///
/// The variant comes from the file's header; every label becomes a true boolean.
pub fn test_vars(env_file: &Path, labels: &[String]) -> Result<BTreeMap<String, String>, TestRunError> {
  let mut vars = match variant_of_env_file(env_file)? {
    Some(s) => BuildVariant::from_variant_string(&s, DEFAULT_PPC_ARCH)
      .map(|v| v.selector_context())
      .unwrap_or_default(),
    None => BTreeMap::new(),
  };
  for label in labels {
    vars.insert(label.clone(), "true".to_string());
  }
  Ok(vars)
}

/// Load and render the feedstock's test file. `None` when it has no tests.
pub fn load_test_file(feedstock_dir: &Path, vars: &BTreeMap<String, String>) -> Result<Option<TestFile>, TestRunError> {
  let path = feedstock_dir.join(DEFAULT_TEST_CONFIG_FILE);
  if !path.is_file() {
    return Ok(None);
  }
  let text = fs::read_to_string(&path).map_err(|source| TestRunError::Read {
    path: path.clone(),
    source,
  })?;
  let rendered = render(&text, vars, true).map_err(|source| TestRunError::Render {
    file: path.clone(),
    source,
  })?;
  let file: Option<TestFile> =
    serde_yaml::from_str(&rendered).map_err(|source| TestRunError::Parse { file: path, source })?;
  Ok(file.filter(|f| !f.tests.is_empty()))
}

/// A bash script plus the name it is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCommand {
  pub name: String,
  pub script: String,
}

const CONDA_PREAMBLE: &str = "CONDA_BIN=$(dirname $(which conda))\nsource ${CONDA_BIN}/../etc/profile.d/conda.sh\n";

/// The create-env step, every test, and the remove-env step, in run order.
pub fn test_commands(tests: &TestFile, env_file: &Path, conda_env: &str, feedstock_dir: &Path) -> Vec<TestCommand> {
  let env_path = env_file.display();
  let first_channel = fs::read_to_string(env_file)
    .ok()
    .and_then(|text| serde_yaml::from_str::<CondaEnv>(&text).ok())
    .and_then(|env| env.channels.into_iter().next());

  let mut create = format!("{}conda env create -f {} -n {}\n", CONDA_PREAMBLE, env_path, conda_env);
  if let Some(channel) = first_channel {
    let _ = write!(
      create,
      "conda activate {}\nconda config --env --add channels {}\n",
      conda_env, channel
    );
  }

  let mut commands = vec![TestCommand {
    name: format!("Create conda environment {}", conda_env),
    script: create,
  }];
  for test in &tests.tests {
    commands.push(TestCommand {
      name: test.name.clone(),
      script: format!(
        "{}set -e\nconda activate {}\nexport FEEDSTOCK_DIR={}\nset -x\n{}\n",
        CONDA_PREAMBLE,
        conda_env,
        feedstock_dir.display(),
        test.command
      ),
    });
  }
  commands.push(TestCommand {
    name: format!("Remove conda environment {}", conda_env),
    script: format!("{}conda env remove -y -n {}\n", CONDA_PREAMBLE, conda_env),
  });
  commands
}

/// Name of the throwaway conda environment, unique per second.
pub fn conda_env_name() -> String {
  format!("{}{}", CONDA_ENV_FILENAME_PREFIX, chrono::Local::now().format("%Y%m%d%H%M%S"))
}

async fn run_command(
  command: &TestCommand,
  feedstock: &FeedstockDir,
  env_file: &Path,
) -> Result<TestResult, TestRunError> {
  info!(test = %command.name, feedstock = %feedstock.name, "running test");
  let write_err = |path: PathBuf| move |source: std::io::Error| TestRunError::Write { path, source };
  let mut script = tempfile::Builder::new()
    .prefix("open-ce-test-")
    .suffix(".sh")
    .tempfile()
    .map_err(write_err(std::env::temp_dir()))?;
  script
    .write_all(command.script.as_bytes())
    .map_err(write_err(script.path().to_path_buf()))?;

  let start = Instant::now();
  let output = Cmd::new("bash")
    .arg(script.path().to_string_lossy())
    .cwd(&feedstock.dir)
    .output()
    .await;
  let elapsed = start.elapsed();

  let (success, stdout, stderr) = match output {
    Ok(out) => (out.success(), out.stdout, out.stderr),
    Err(e) => (false, String::new(), e.to_string()),
  };
  if !success {
    error!(test = %command.name, feedstock = %feedstock.name, stderr = %stderr, "test failed");
  }
  Ok(TestResult {
    name: command.name.clone(),
    feedstock: feedstock.name.clone(),
    env_file: env_file.to_path_buf(),
    success,
    stdout,
    stderr,
    elapsed,
  })
}

/// Run the tests of every feedstock against every environment file.
pub async fn run_tests(
  feedstocks: &[FeedstockDir],
  env_files: &[PathBuf],
  labels: &[String],
) -> Result<Vec<TestResult>, TestRunError> {
  let mut results = Vec::new();
  for env_file in env_files {
    let vars = test_vars(env_file, labels)?;
    for feedstock in feedstocks {
      let Some(tests) = load_test_file(&feedstock.dir, &vars)? else {
        continue;
      };
      let commands = test_commands(&tests, env_file, &conda_env_name(), &feedstock.dir);
      for command in &commands {
        results.push(run_command(command, feedstock, env_file).await?);
      }
    }
  }
  Ok(results)
}

fn escape(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&apos;")
}

/// JUnit XML with one suite per feedstock.
pub fn junit_xml(results: &[TestResult], labels: &[String]) -> String {
  let mut suites: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
  for result in results {
    suites.entry(result.feedstock.as_str()).or_default().push(result);
  }
  let label_string = if labels.is_empty() {
    String::new()
  } else {
    format!(" with labels: {}", labels.join(", "))
  };

  let mut xml = String::from("<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<testsuites>\n");
  for (feedstock, cases) in suites {
    let failures = cases.iter().filter(|c| !c.success).count();
    let time: f64 = cases.iter().map(|c| c.elapsed.as_secs_f64()).sum();
    let _ = writeln!(
      xml,
      "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" time=\"{:.3}\">",
      escape(&format!("Open-CE tests for {}{}", feedstock, label_string)),
      cases.len(),
      failures,
      time
    );
    for case in cases {
      let env = case.env_file.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
      let _ = write!(
        xml,
        "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
        escape(&case.name),
        escape(&format!("{}:{}", feedstock, env)),
        case.elapsed.as_secs_f64()
      );
      if case.success {
        xml.push_str("/>\n");
        continue;
      }
      xml.push_str(">\n");
      let _ = writeln!(
        xml,
        "      <failure message=\"{}\">See stderr and stdout for output.</failure>",
        escape(&format!("Failed test: {}", case.name))
      );
      let _ = writeln!(xml, "      <system-out>{}</system-out>", escape(&case.stdout));
      let _ = writeln!(xml, "      <system-err>{}</system-err>", escape(&case.stderr));
      xml.push_str("    </testcase>\n");
    }
    xml.push_str("  </testsuite>\n");
  }
  xml.push_str("</testsuites>\n");
  xml
}

/// Write `<output>/test_results.xml` and fail when any test failed.
pub fn process_test_results(
  results: &[TestResult],
  output_folder: &Path,
  labels: &[String],
) -> Result<PathBuf, TestRunError> {
  let path = output_folder.join(DEFAULT_TEST_RESULT_FILE);
  fs::create_dir_all(output_folder)
    .and_then(|_| fs::write(&path, junit_xml(results, labels)))
    .map_err(|source| TestRunError::Write {
      path: path.clone(),
      source,
    })?;

  let names: Vec<String> = results.iter().filter(|r| !r.success).map(|r| r.name.clone()).collect();
  if !names.is_empty() {
    return Err(TestRunError::Failed {
      count: names.len(),
      names,
    });
  }
  info!(tests = results.len(), "all tests passed");
  Ok(path)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn feedstock_with_tests(root: &Path, tests: &str) -> FeedstockDir {
    let dir = root.join("numpy-feedstock");
    fs::create_dir_all(dir.join("tests")).unwrap();
    fs::write(dir.join(DEFAULT_TEST_CONFIG_FILE), tests).unwrap();
    FeedstockDir {
      name: "numpy".into(),
      dir,
    }
  }

  fn env_file(root: &Path) -> PathBuf {
    let path = root.join("open-ce-conda-env-py3.9-cuda-openmpi.yaml");
    fs::write(
      &path,
      "#open-ce-variant:py3.9-cuda-openmpi-11.2\nname: x\nchannels:\n- file://out\n- defaults\ndependencies: []\n",
    )
    .unwrap();
    path
  }

  #[test]
  fn test_file_is_rendered_with_variant_and_labels() {
    let dir = TempDir::new().unwrap();
    let feedstock = feedstock_with_tests(
      dir.path(),
      "tests:\n  - {name: cuda only, command: nvidia-smi}  # [build_type == 'cuda']\n  - {name: long, command: ./long.sh}  # [long]\n  - {name: cpu only, command: echo cpu}  # [build_type == 'cpu']\n",
    );
    let env = env_file(dir.path());
    let vars = test_vars(&env, &["long".to_string()]).unwrap();
    assert_eq!(vars["cudatoolkit"], "11.2");

    let tests = load_test_file(&feedstock.dir, &vars).unwrap().unwrap();
    let names: Vec<&str> = tests.tests.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["cuda only", "long"]);
  }

  #[test]
  fn feedstock_without_tests() {
    let dir = TempDir::new().unwrap();
    assert_eq!(load_test_file(dir.path(), &BTreeMap::new()).unwrap(), None);
  }

  #[test]
  fn unknown_test_keys_are_rejected() {
    let dir = TempDir::new().unwrap();
    let feedstock = feedstock_with_tests(dir.path(), "tests:\n  - name: a\n    command: b\n    timeout: 3\n");
    assert!(matches!(
      load_test_file(&feedstock.dir, &BTreeMap::new()),
      Err(TestRunError::Parse { .. })
    ));
  }

  #[test]
  fn scripts_wrap_tests_in_a_fresh_env() {
    let dir = TempDir::new().unwrap();
    let env = env_file(dir.path());
    let tests = TestFile {
      tests: vec![TestSpec {
        name: "import".into(),
        command: "python -c 'import numpy'".into(),
      }],
    };
    let commands = test_commands(&tests, &env, "open-ce-conda-env-1", Path::new("/f/numpy-feedstock"));
    assert_eq!(commands.len(), 3);
    assert_eq!(commands[0].name, "Create conda environment open-ce-conda-env-1");
    assert!(commands[0].script.contains(&format!("conda env create -f {} -n open-ce-conda-env-1", env.display())));
    assert!(commands[0].script.contains("conda config --env --add channels file://out"));
    assert!(commands[1].script.contains("set -e\nconda activate open-ce-conda-env-1\nexport FEEDSTOCK_DIR=/f/numpy-feedstock\nset -x\npython -c 'import numpy'\n"));
    assert!(commands[2].script.ends_with("conda env remove -y -n open-ce-conda-env-1\n"));
  }

  #[test]
  fn env_name_has_timestamp() {
    let name = conda_env_name();
    let stamp = name.strip_prefix(CONDA_ENV_FILENAME_PREFIX).unwrap();
    assert_eq!(stamp.len(), 14);
    assert!(stamp.chars().all(|c| c.is_ascii_digit()));
  }

  fn result(name: &str, success: bool) -> TestResult {
    TestResult {
      name: name.into(),
      feedstock: "numpy".into(),
      env_file: PathBuf::from("/out/open-ce-conda-env-py3.9-cpu-openmpi.yaml"),
      success,
      stdout: "out <1>".into(),
      stderr: "err & more".into(),
      elapsed: Duration::from_millis(1500),
    }
  }

  #[test]
  fn junit_report() {
    let xml = junit_xml(&[result("passes", true), result("fails", false)], &[]);
    assert!(xml.contains("<testsuite name=\"Open-CE tests for numpy\" tests=\"2\" failures=\"1\" time=\"3.000\">"));
    assert!(xml.contains(
      "<testcase name=\"passes\" classname=\"numpy:open-ce-conda-env-py3.9-cpu-openmpi.yaml\" time=\"1.500\"/>"
    ));
    assert!(xml.contains("<failure message=\"Failed test: fails\">"));
    assert!(xml.contains("<system-out>out &lt;1&gt;</system-out>"));
    assert!(xml.contains("<system-err>err &amp; more</system-err>"));
  }

  #[test]
  fn failures_are_reported_after_writing_results() {
    let dir = TempDir::new().unwrap();
    let err = process_test_results(&[result("a", true), result("b", false)], dir.path(), &[]).unwrap_err();
    assert!(matches!(err, TestRunError::Failed { count: 1, ref names } if names == &vec!["b".to_string()]));
    assert!(dir.path().join(DEFAULT_TEST_RESULT_FILE).exists());

    let path = process_test_results(&[result("a", true)], dir.path(), &[]).unwrap();
    assert_eq!(path, dir.path().join("test_results.xml"));
  }

  #[cfg(unix)]
  #[tokio::test]
  async fn failing_command_is_a_failed_result() {
    let dir = TempDir::new().unwrap();
    let feedstock = FeedstockDir {
      name: "a".into(),
      dir: dir.path().to_path_buf(),
    };
    let ok = TestCommand {
      name: "ok".into(),
      script: "echo hello\n".into(),
    };
    let bad = TestCommand {
      name: "bad".into(),
      script: "echo oops >&2\nexit 3\n".into(),
    };
    let env = dir.path().join("env.yaml");
    let ok = run_command(&ok, &feedstock, &env).await.unwrap();
    assert!(ok.success);
    assert_eq!(ok.stdout.trim(), "hello");
    let bad = run_command(&bad, &feedstock, &env).await.unwrap();
    assert!(!bad.success);
    assert_eq!(bad.stderr.trim(), "oops");
  }
}
