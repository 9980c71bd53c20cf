//! Tests for the public opence-lib API.

mod plan_tests;
