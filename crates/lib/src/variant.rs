//! Build variants and the variant matrix.
//!
//! A [`BuildVariant`] is one concrete combination of python version, build
//! type, MPI type, CUDA version and ppc architecture. The [`VariantMatrix`] is
//! the cartesian product requested on the command line.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::SUPPORTED_PPC_ARCHES;
use crate::util::parse_arg_list;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VariantError {
  #[error("unknown build type '{0}': expected 'cpu' or 'cuda'")]
  UnknownBuildType(String),

  #[error("unsupported ppc architecture '{arch}': expected one of {}", SUPPORTED_PPC_ARCHES.join(", "), arch = .0)]
  UnknownPpcArch(String),

  #[error("'{axis}' must list at least one value")]
  EmptyAxis { axis: &'static str },

  #[error("cuda build type requested but no cuda versions were given")]
  MissingCudaVersion,

  #[error("malformed variant string '{0}'")]
  MalformedVariantString(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildType {
  Cpu,
  Cuda,
}

impl BuildType {
  pub fn as_str(self) -> &'static str {
    match self {
      BuildType::Cpu => "cpu",
      BuildType::Cuda => "cuda",
    }
  }
}

impl fmt::Display for BuildType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for BuildType {
  type Err = VariantError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "cpu" => Ok(BuildType::Cpu),
      "cuda" => Ok(BuildType::Cuda),
      other => Err(VariantError::UnknownBuildType(other.to_string())),
    }
  }
}

/// One concrete point of the variant matrix.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BuildVariant {
  pub python: String,
  pub build_type: BuildType,
  pub mpi_type: String,
  /// Set only for cuda builds.
  pub cuda: Option<String>,
  pub ppc_arch: String,
}

impl BuildVariant {
  /// `py<python>-<build_type>-<mpi_type>[-<cuda>]`.
  pub fn variant_string(&self) -> String {
    let mut s = format!("py{}-{}-{}", self.python, self.build_type, self.mpi_type);
    if let Some(cuda) = &self.cuda {
      s.push('-');
      s.push_str(cuda);
    }
    s
  }

  /// Parse a string produced by [`BuildVariant::variant_string`].
  pub fn from_variant_string(s: &str, ppc_arch: &str) -> Result<Self, VariantError> {
    let malformed = || VariantError::MalformedVariantString(s.to_string());
    let mut parts = s.splitn(4, '-');
    let python = parts.next().and_then(|p| p.strip_prefix("py")).ok_or_else(malformed)?;
    let build_type: BuildType = parts.next().ok_or_else(malformed)?.parse()?;
    let mpi_type = parts.next().ok_or_else(malformed)?;
    let cuda = parts.next().map(str::to_string);
    if python.is_empty() || mpi_type.is_empty() || (build_type == BuildType::Cuda) != cuda.is_some() {
      return Err(malformed());
    }
    Ok(Self {
      python: python.to_string(),
      build_type,
      mpi_type: mpi_type.to_string(),
      cuda,
      ppc_arch: ppc_arch.to_string(),
    })
  }

  /// Variables visible to selectors and `{{ }}` expressions when rendering for this variant.
  pub fn selector_context(&self) -> BTreeMap<String, String> {
    let mut ctx = host_context();
    ctx.insert("python".into(), self.python.clone());
    ctx.insert("py".into(), self.python.replace('.', ""));
    ctx.insert("build_type".into(), self.build_type.to_string());
    ctx.insert("mpi_type".into(), self.mpi_type.clone());
    ctx.insert("ppc_arch".into(), self.ppc_arch.clone());
    if let Some(cuda) = &self.cuda {
      ctx.insert("cudatoolkit".into(), cuda.clone());
    }
    ctx
  }

  /// The `--variants` dictionary handed to conda-build.
  pub fn conda_build_variants(&self) -> String {
    let mut s = format!(
      "{{python: '{}', build_type: '{}', mpi_type: '{}'",
      self.python, self.build_type, self.mpi_type
    );
    if let Some(cuda) = &self.cuda {
      s.push_str(&format!(", cudatoolkit: '{}'", cuda));
    }
    s.push('}');
    s
  }
}

impl fmt::Display for BuildVariant {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.variant_string())
  }
}

/// Platform booleans conda selectors commonly test.
fn host_context() -> BTreeMap<String, String> {
  let arch = std::env::consts::ARCH;
  let os = std::env::consts::OS;
  let flag = |b: bool| if b { "true" } else { "false" }.to_string();
  BTreeMap::from([
    ("linux".to_string(), flag(os == "linux")),
    ("osx".to_string(), flag(os == "macos")),
    ("win".to_string(), flag(os == "windows")),
    ("x86_64".to_string(), flag(arch == "x86_64")),
    ("ppc64le".to_string(), flag(arch == "powerpc64")),
    ("s390x".to_string(), flag(arch == "s390x")),
  ])
}

/// The requested axes, expanded on demand into concrete variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantMatrix {
  pythons: Vec<String>,
  build_types: Vec<BuildType>,
  mpi_types: Vec<String>,
  cudas: Vec<String>,
  ppc_arch: String,
}

impl VariantMatrix {
  /// Build a matrix from comma-separated flag values.
  pub fn new<S: AsRef<str>>(
    pythons: &[S],
    build_types: &[S],
    mpi_types: &[S],
    cudas: &[S],
    ppc_arch: &str,
  ) -> Result<Self, VariantError> {
    let pythons = dedup(parse_arg_list(pythons));
    let mpi_types = dedup(parse_arg_list(mpi_types));
    let cudas = dedup(parse_arg_list(cudas));
    let build_types = dedup(
      parse_arg_list(build_types)
        .iter()
        .map(|b| b.parse())
        .collect::<Result<Vec<BuildType>, _>>()?,
    );

    if pythons.is_empty() {
      return Err(VariantError::EmptyAxis { axis: "python_versions" });
    }
    if build_types.is_empty() {
      return Err(VariantError::EmptyAxis { axis: "build_types" });
    }
    if mpi_types.is_empty() {
      return Err(VariantError::EmptyAxis { axis: "mpi_types" });
    }
    if build_types.contains(&BuildType::Cuda) && cudas.is_empty() {
      return Err(VariantError::MissingCudaVersion);
    }
    if !SUPPORTED_PPC_ARCHES.contains(&ppc_arch) {
      return Err(VariantError::UnknownPpcArch(ppc_arch.to_string()));
    }

    Ok(Self {
      pythons,
      build_types,
      mpi_types,
      cudas,
      ppc_arch: ppc_arch.to_string(),
    })
  }

  /// Expand into variants: build type outermost, then python, MPI, and cuda.
  pub fn variants(&self) -> Vec<BuildVariant> {
    let mut out = Vec::new();
    for &build_type in &self.build_types {
      let cudas: Vec<Option<String>> = match build_type {
        BuildType::Cpu => vec![None],
        BuildType::Cuda => self.cudas.iter().cloned().map(Some).collect(),
      };
      for python in &self.pythons {
        for mpi_type in &self.mpi_types {
          for cuda in &cudas {
            out.push(BuildVariant {
              python: python.clone(),
              build_type,
              mpi_type: mpi_type.clone(),
              cuda: cuda.clone(),
              ppc_arch: self.ppc_arch.clone(),
            });
          }
        }
      }
    }
    out
  }

  pub fn len(&self) -> usize {
    self.variants().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// CUDA versions that actually take part in the expansion.
  pub fn cuda_versions(&self) -> &[String] {
    if self.build_types.contains(&BuildType::Cuda) {
      &self.cudas
    } else {
      &[]
    }
  }

  pub fn build_types(&self) -> &[BuildType] {
    &self.build_types
  }

  pub fn ppc_arch(&self) -> &str {
    &self.ppc_arch
  }
}

fn dedup<T: PartialEq>(items: Vec<T>) -> Vec<T> {
  let mut out: Vec<T> = Vec::with_capacity(items.len());
  for item in items {
    if !out.contains(&item) {
      out.push(item);
    }
  }
  out
}
