use std::collections::BTreeMap;

use crate::core::{
    domain::{LogEntry, LogEntryKind, TestOutcome, TestResult},
    results::leak::parse_memory_leaks,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stream {
    StdOut,
    StdErr,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct StreamOptions {
    /// Look for a leak dump in the captured text.
    pub detect_memory_leaks: bool,
    /// Fail tests for which a leak was found.
    pub fail_test_on_memory_leak: bool,
}

/// Attributes captured standard output or error to every result in `results`.
///
/// Captures are only requested for single-test batches, so the whole stream
/// belongs to the one test that ran.
pub fn parse_stream(
    text: &str,
    stream: Stream,
    options: StreamOptions,
    results: &mut BTreeMap<String, TestResult>,
) {
    if text.trim().is_empty() {
        return;
    }

    let leaks = if options.detect_memory_leaks {
        parse_memory_leaks(text)
    } else {
        Vec::new()
    };

    let entries = if leaks.is_empty() {
        let kind = match stream {
            Stream::StdOut => LogEntryKind::StdOut,
            Stream::StdErr => LogEntryKind::StdErr,
        };
        vec![LogEntry::new(kind, text)]
    } else {
        leaks
    };
    let leaked = entries.iter().any(LogEntry::is_memory_leak);

    for result in results.values_mut() {
        result.log_entries.extend(entries.iter().cloned());
        if leaked && options.fail_test_on_memory_leak && result.outcome == TestOutcome::Passed {
            result.outcome = TestOutcome::Failed;
        }
    }
}
