pub mod config;
pub mod yaml_include;

/// Common utilities shared across the storefront workspace
///
/// This crate provides functionality that is used by more than one crate:
///
/// - Configuration loading (YAML with `!include` composition)
/// - Shared test utilities, error type and assertion macros

// Test helpers module - available for both development and test builds
#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

#[cfg(any(test, feature = "test-helpers"))]
pub use test_helpers::get_test_in_memory_database_url;
