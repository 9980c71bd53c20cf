//! CLI integration tests for `open-ce build`.

mod build_env_tests;
mod build_feedstock_tests;
mod build_image_tests;
mod common;
