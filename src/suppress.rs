//! Host-side suppression of known-broken tests.
//!
//! Individual tests in a suite binary can be suppressed by listing them in a
//! file named after the suite inside the filter directory, one gtest-style
//! pattern per line:
//!
//! ```text
//! $ cat gtest_filter/base_unittests_disabled
//! DataPackTest.Load
//! FileUtilTest.*
//! ```
//!
//! When the pool was booted in emulator mode, an additional
//! `<suite>_emulator_additional_disabled` file is applied on top; tests that
//! only fail on emulators live there.

use std::fs;
use std::path::PathBuf;

use regex::Regex;
use tracing::debug;

/// A glob-style pattern suppressing known-bad tests.
///
/// Supports the gtest wildcard language: `*` matches any run of characters,
/// `?` matches exactly one. Matches are anchored to the whole identifier.
#[derive(Debug, Clone)]
pub struct DisabledPattern {
    raw: String,
    regex: Regex,
}

impl DisabledPattern {
    /// Compiles a pattern. Everything except `*` and `?` is literal.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let mut translated = String::with_capacity(raw.len() + 8);
        translated.push('^');
        for ch in raw.chars() {
            match ch {
                '*' => translated.push_str(".*"),
                '?' => translated.push('.'),
                other => translated.push_str(&regex::escape(&other.to_string())),
            }
        }
        translated.push('$');

        // The translation only emits escaped literals and `.`/`.*`, so the
        // compile cannot fail.
        let regex = Regex::new(&translated).expect("translated glob must compile");
        Self { raw, regex }
    }

    /// The pattern as written in the suppression file.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern suppresses the given test identifier.
    pub fn matches(&self, test_id: &str) -> bool {
        self.regex.is_match(test_id)
    }
}

/// Returns `true` if the identifier matches any of the patterns.
pub fn is_disabled(test_id: &str, patterns: &[DisabledPattern]) -> bool {
    patterns.iter().any(|p| p.matches(test_id))
}

/// Loads per-suite disabled-test patterns from the host.
///
/// A trait so tests can inject a fixed list without touching the filesystem.
pub trait PatternStore: Send + Sync {
    /// Loads the patterns for a suite. `emulator_pool` selects whether the
    /// emulator-only additions apply.
    fn load_patterns(&self, suite_name: &str, emulator_pool: bool) -> std::io::Result<Vec<DisabledPattern>>;
}

/// Reads suppression files from a directory on the host filesystem.
///
/// A missing file is an empty pattern list, not an error; `#` comments and
/// blank lines are skipped.
pub struct FilePatternStore {
    dir: PathBuf,
}

impl FilePatternStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn read_pattern_file(&self, file_name: &str) -> std::io::Result<Vec<DisabledPattern>> {
        let path = self.dir.join(file_name);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No suppression file at {}", path.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(DisabledPattern::new)
            .collect())
    }
}

impl PatternStore for FilePatternStore {
    fn load_patterns(
        &self,
        suite_name: &str,
        emulator_pool: bool,
    ) -> std::io::Result<Vec<DisabledPattern>> {
        let mut patterns = self.read_pattern_file(&format!("{suite_name}_disabled"))?;
        if emulator_pool {
            patterns.extend(
                self.read_pattern_file(&format!("{suite_name}_emulator_additional_disabled"))?,
            );
        }
        debug!(
            "Loaded {} disabled patterns for {}",
            patterns.len(),
            suite_name
        );
        Ok(patterns)
    }
}
