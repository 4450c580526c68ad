use std::sync::atomic::{AtomicUsize, Ordering};

use crate::core::{
    domain::{TestCase, TestOutcome},
    projection::ReportedResult,
    traits::host::FrameworkHandle,
};

/// Reports results on the terminal and keeps a tally per outcome.
#[derive(Debug, Default)]
pub struct ConsoleHandle {
    passed: AtomicUsize,
    failed: AtomicUsize,
    skipped: AtomicUsize,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl ConsoleHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> Summary {
        Summary {
            passed: self.passed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

impl FrameworkHandle for ConsoleHandle {
    fn record_start(&self, test: &TestCase) {
        tracing::debug!(test = %test, "Test started");
    }

    fn record_end(&self, test: &TestCase, outcome: TestOutcome) {
        let counter = match outcome {
            TestOutcome::Passed => &self.passed,
            TestOutcome::Skipped => &self.skipped,
            TestOutcome::Failed | TestOutcome::Aborted => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(test = %test, ?outcome, "Test finished");
    }

    fn record_result(&self, result: &ReportedResult) {
        println!(
            "{:<7} {} ({} us)",
            format!("{:?}", result.outcome).to_uppercase(),
            result.test,
            result.duration.as_micros()
        );
        if let Some(message) = &result.error_message {
            for line in message.lines() {
                println!("        {}", line);
            }
        }
        if let Some(trace) = &result.error_stack_trace {
            println!("        {}", trace);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_are_counted() {
        let handle = ConsoleHandle::new();
        let test = TestCase::new("Suite/A", "/bin/unit");
        handle.record_end(&test, TestOutcome::Passed);
        handle.record_end(&test, TestOutcome::Failed);
        handle.record_end(&test, TestOutcome::Aborted);
        handle.record_end(&test, TestOutcome::Skipped);

        assert_eq!(
            handle.summary(),
            Summary {
                passed: 1,
                failed: 2,
                skipped: 1,
            }
        );
    }
}
