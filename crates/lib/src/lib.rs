//! opence-lib: build orchestration for Open-CE conda packages
//!
//! This crate provides the pieces behind the `open-ce` command:
//! - `env_config`: environment files and their imports
//! - `graph`: build units per recipe and variant, connected into a DAG
//! - `execute`: wave scheduling of units through a pluggable builder
//! - `env_file`: conda environment files for the built packages
//! - `container` and `image`: containerized builds and runtime images
//! - `ops`: the `build env` and `build feedstock` operations

pub mod consts;
pub mod container;
pub mod env_config;
pub mod env_file;
pub mod error;
pub mod execute;
pub mod feedstock;
pub mod graph;
pub mod image;
pub mod ops;
pub mod render;
pub mod test_runner;
pub mod util;
pub mod variant;

pub use error::{ErrorKind, OpenCeError};
