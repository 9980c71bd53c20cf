//! Default values and well-known file names.

/// Version of this tool, written into env file headers and image tags.
pub const OPEN_CE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const DEFAULT_PYTHON_VERSIONS: &str = "3.9";
pub const DEFAULT_BUILD_TYPES: &str = "cpu,cuda";
pub const DEFAULT_MPI_TYPES: &str = "openmpi";
pub const DEFAULT_CUDA_VERSIONS: &str = "11.2";
pub const DEFAULT_PPC_ARCH: &str = "p9";
pub const SUPPORTED_PPC_ARCHES: &[&str] = &["p9", "p10"];

pub const DEFAULT_OUTPUT_FOLDER: &str = "condabuild";
pub const DEFAULT_PKG_FORMAT: &str = "conda";
pub const DEFAULT_GIT_LOCATION: &str = "https://github.com/open-ce";
pub const DEFAULT_ENVS_REPO: &str = "open-ce";
pub const DEFAULT_ENVS_BRANCH: &str = "main";
pub const DEFAULT_REPOSITORY_FOLDER: &str = ".";

pub const DEFAULT_RECIPE_CONFIG_FILE: &str = "config/build-config.yaml";
pub const CONDA_BUILD_CONFIG_FILE: &str = "conda_build_config.yaml";
pub const DEFAULT_TEST_CONFIG_FILE: &str = "tests/open-ce-tests.yaml";
pub const DEFAULT_TEST_RESULT_FILE: &str = "test_results.xml";

/// Prefix of every generated conda environment file.
pub const CONDA_ENV_FILENAME_PREFIX: &str = "open-ce-conda-env-";
pub const OPEN_CE_VERSION_HEADER: &str = "#Open-CE Version:";
pub const OPEN_CE_VARIANT_HEADER: &str = "#open-ce-variant:";
pub const OPEN_CE_LOCAL_PACKAGES_HEADER: &str = "#open-ce-local-packages:";

/// Container engines in order of preference.
pub const CONTAINER_TOOLS: &[&str] = &["podman", "docker"];
pub const CONTAINER_HOME: &str = "/home/builder";
pub const CONTAINER_LOCAL_FILES: &str = "local_files";
pub const BUILDER_IMAGE_PREFIX: &str = "open-ce-builder";

pub const RUNTIME_IMAGE_NAME: &str = "open-ce";
pub const RUNTIME_IMAGE_USER: &str = "opence";
pub const RUNTIME_TARGET_DIR: &str = "/home/opence/opence-local-conda-channel";
pub const IMAGE_STAGING_DIR: &str = ".open-ce-image";

/// Completion markers live under `<output>/<MARKER_DIR>`.
pub const MARKER_DIR: &str = ".open-ce/units";
pub const PATCHED_MARKER: &str = ".open-ce-patched";

/// Upper bound on concurrently running unit builds.
pub const MAX_PARALLELISM: usize = 16;

pub const PACKAGE_EXTENSIONS: &[&str] = &[".conda", ".tar.bz2"];
