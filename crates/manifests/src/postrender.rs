//! Post-render cleanup for helm-family output.

use once_cell::sync::Lazy;
use regex::Regex;

const MANIFEST_SEPARATOR: &str = "---\n";

/// Matches the source-path comment helm stamps on manifests rendered from a
/// chart's tests directory.
static TESTS_MANIFEST_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"# Source: .*/templates/tests/.*").expect("valid pattern"));

/// Drop rendered manifest sections originating from a chart's tests
/// directory.
#[must_use]
pub fn remove_tests_directory_templates(rendered: &str) -> String {
    rendered
        .split(MANIFEST_SEPARATOR)
        .filter(|manifest| !TESTS_MANIFEST_PATTERN.is_match(manifest))
        .collect::<Vec<_>>()
        .join(MANIFEST_SEPARATOR)
}
