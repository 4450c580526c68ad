use std::{
    path::{Path, PathBuf},
    sync::LazyLock,
    time::Instant,
};

use aho_corasick::AhoCorasick;
use dashmap::DashMap;
use object::{Object, ObjectKind};

use crate::core::domain::RunnerCapabilities;

const TEST_FRAMEWORK_LIBRARY: &str = "boost_unit_test_framework";

/// Strings a runner with `--list_content` support carries: help text,
/// environment variable and flag name.
const LIST_CONTENT_MARKERS: [&str; 3] = [
    "Lists the content of test tree - names of all test suites and test cases.",
    "BOOST_TEST_LIST_CONTENT",
    "list_content",
];

/// Help text of `--version`.
const VERSION_MARKERS: [&str; 1] = ["Prints Boost.Test version and exits."];

static MARKERS: LazyLock<Option<AhoCorasick>> = LazyLock::new(|| {
    let patterns = LIST_CONTENT_MARKERS.iter().chain(VERSION_MARKERS.iter());
    match AhoCorasick::new(patterns) {
        Ok(matcher) => Some(matcher),
        Err(e) => {
            tracing::error!(error = %e, "Failed to build capability marker matcher");
            None
        }
    }
});

/// Determines what a runner executable supports without running it.
///
/// Never fails: an unreadable binary has no capabilities.
pub fn probe(path: &Path) -> RunnerCapabilities {
    let started = Instant::now();
    let capabilities = match std::fs::read(path) {
        Ok(buffer) => probe_bytes(&buffer),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read runner, assuming no capabilities");
            RunnerCapabilities::default()
        }
    };

    tracing::debug!(
        path = %path.display(),
        ?capabilities,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Probed runner capabilities"
    );
    capabilities
}

pub fn probe_bytes(buffer: &[u8]) -> RunnerCapabilities {
    let found = found_markers(buffer);
    let all_found = |markers: &[&str]| {
        markers
            .iter()
            .all(|marker| found.iter().any(|(pattern, hit)| pattern == marker && *hit))
    };

    let list_content = imports_test_framework(buffer) || all_found(&LIST_CONTENT_MARKERS);
    if !list_content {
        tracing::warn!("Runner does not appear to support listing its content");
    }

    // `--version` was added after `--list_content`
    let version = list_content && all_found(&VERSION_MARKERS);

    RunnerCapabilities {
        list_content,
        version,
    }
}

/// Whether the executable dynamically links the test framework library.
fn imports_test_framework(buffer: &[u8]) -> bool {
    let file = match object::File::parse(buffer) {
        Ok(file) => file,
        Err(e) => {
            tracing::debug!(error = %e, "Runner is not a recognised object file");
            return false;
        }
    };

    if !matches!(file.kind(), ObjectKind::Executable | ObjectKind::Dynamic) {
        return false;
    }

    match file.imports() {
        Ok(imports) => imports.iter().any(|import| {
            String::from_utf8_lossy(import.library())
                .to_ascii_lowercase()
                .contains(TEST_FRAMEWORK_LIBRARY)
        }),
        Err(e) => {
            tracing::debug!(error = %e, "Failed to read runner imports");
            false
        }
    }
}

/// Pairs every marker with whether it occurs in `buffer`.
fn found_markers(buffer: &[u8]) -> Vec<(&'static str, bool)> {
    let markers = LIST_CONTENT_MARKERS.iter().chain(VERSION_MARKERS.iter());
    let mut hits = vec![false; LIST_CONTENT_MARKERS.len() + VERSION_MARKERS.len()];

    if let Some(matcher) = MARKERS.as_ref() {
        for hit in matcher.find_overlapping_iter(buffer) {
            hits[hit.pattern().as_usize()] = true;
        }
    }

    markers.copied().zip(hits).collect()
}

/// Capabilities per runner path, probed on first use.
///
/// Concurrent first lookups may probe the same binary twice; both store the
/// same value.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    entries: DashMap<PathBuf, RunnerCapabilities>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &Path) -> RunnerCapabilities {
        if let Some(capabilities) = self.entries.get(path) {
            return *capabilities;
        }

        let capabilities = probe(path);
        self.entries.insert(path.to_path_buf(), capabilities);
        capabilities
    }

    pub fn invalidate(&self, path: &Path) {
        self.entries.remove(path);
    }
}
