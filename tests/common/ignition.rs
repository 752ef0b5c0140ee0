//! Shared ignition payloads for integration tests.
//!
//! Integration tests are compiled as separate crates (one per top-level file in
//! `tests/`), so shared values live under `tests/common/` and are pulled in
//! with `#[path = "common/ignition.rs"] mod ignition;`.

/// Minimal ignition config accepted as inline content.
pub const INLINE_IGNITION: &str = r#"{"ignition":{"version":"3.2.0"}}"#;

/// Pool name used across scenarios.
pub const DEFAULT_POOL: &str = "default";
