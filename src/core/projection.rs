//! Conversion of reconciled results into what the hosting framework displays.

use std::time::Duration;

use chrono::{DateTime, Utc};
use itertools::Itertools;

use crate::core::domain::{
    LogEntry, LogEntryKind, MessageCategory, TestCase, TestOutcome, TestResult,
};

const MIN_DURATION: Duration = Duration::from_micros(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResultMessage {
    pub category: MessageCategory,
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportedResult {
    pub test: TestCase,
    /// Never [`TestOutcome::Aborted`], aborted tests are reported as failed.
    pub outcome: TestOutcome,
    pub duration: Duration,
    pub messages: Vec<ResultMessage>,
    pub error_message: Option<String>,
    pub error_stack_trace: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl ReportedResult {
    pub fn new(
        test: &TestCase,
        result: &TestResult,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        let outcome = match result.outcome {
            TestOutcome::Aborted => TestOutcome::Failed,
            outcome => outcome,
        };

        let messages = result
            .log_entries
            .iter()
            .map(|entry| ResultMessage {
                category: entry.category(),
                text: message_text(test, entry),
            })
            .collect();

        let errors = errors(result);
        let (mut error_message, mut error_stack_trace) = (None, None);
        if outcome == TestOutcome::Failed {
            if let Some(last) = errors.last() {
                error_message = Some(errors.iter().map(|e| e.detail.as_str()).join("\n"));
                error_stack_trace = last.source.as_ref().map(|source| {
                    format!(
                        "at {}() in {}:line {}",
                        test.name(),
                        source.file,
                        source.line.map(i64::from).unwrap_or(-1)
                    )
                });
            }
        }

        if let Some(message) = &result.message {
            error_message = Some(message.clone());
            if outcome == TestOutcome::Failed && error_stack_trace.is_none() {
                error_stack_trace = test.code_file.as_ref().map(ToString::to_string);
            }
        }

        ReportedResult {
            test: test.clone(),
            outcome,
            duration: result.duration.max(MIN_DURATION),
            messages,
            error_message,
            error_stack_trace,
            start_time,
            end_time,
        }
    }
}

/// Entries summarised in the error message. A single memory leak is reported
/// only when the test has no other error.
fn errors(result: &TestResult) -> Vec<&LogEntry> {
    let errors: Vec<&LogEntry> = result.log_entries.iter().filter(|e| e.is_error()).collect();
    if !errors.is_empty() {
        return errors;
    }
    result
        .log_entries
        .iter()
        .filter(|e| e.is_memory_leak())
        .take(1)
        .collect()
}

fn message_text(test: &TestCase, entry: &LogEntry) -> String {
    if matches!(entry.kind, LogEntryKind::StdOut | LogEntryKind::StdErr) {
        return format!("{}\n", entry.detail.trim_end());
    }

    let mut text = String::new();
    if let Some(source) = &entry.source {
        text.push_str(&format!("{}: ", source));
    }
    text.push_str(&format!("{} in \"{}\"", entry.label(), test.name()));

    match &entry.kind {
        LogEntryKind::MemoryLeak {
            allocation_number,
            size_bytes,
            leaked_data,
        } => {
            text.push_str(&format!(
                ": memory allocation number {}, leak size {} byte{}",
                allocation_number,
                size_bytes,
                if *size_bytes == 1 { "" } else { "s" }
            ));
            append_context(&mut text, &entry.context_frames);
            if !leaked_data.is_empty() {
                text.push_str(&format!("\n{}", leaked_data));
            }
        }
        LogEntryKind::Exception {
            last_checkpoint,
            checkpoint_detail,
        } => {
            text.push_str(&format!(": {}", entry.detail.trim_end()));
            if let Some(checkpoint) = last_checkpoint {
                text.push_str(&format!(
                    "\n{}: last checkpoint: {}",
                    checkpoint, checkpoint_detail
                ));
            }
            append_context(&mut text, &entry.context_frames);
        }
        _ => {
            text.push_str(&format!(": {}", entry.detail.trim_end()));
            append_context(&mut text, &entry.context_frames);
        }
    }

    text.push('\n');
    text
}

fn append_context(text: &mut String, frames: &[String]) {
    if frames.is_empty() {
        return;
    }
    text.push_str("\nOccurred in a following context:\n");
    text.push_str(&frames.iter().map(|frame| format!("    {}", frame)).join("\n"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::domain::SourceFileInfo;

    fn test_case() -> TestCase {
        TestCase::new("Suite/Case", "/opt/tests/unit")
    }

    fn project(result: &TestResult) -> ReportedResult {
        let now = Utc::now();
        ReportedResult::new(&test_case(), result, now, now)
    }

    #[test]
    fn test_passed_result_has_no_error() {
        let mut result = TestResult::new("Suite/Case", TestOutcome::Passed)
            .with_duration(Duration::from_micros(42));
        result.log_entries.push(
            LogEntry::new(LogEntryKind::Info, "check ok")
                .with_source(Some(SourceFileInfo::new("a.cpp", Some(3)))),
        );

        let reported = project(&result);
        assert_eq!(reported.outcome, TestOutcome::Passed);
        assert_eq!(reported.duration, Duration::from_micros(42));
        assert_eq!(reported.error_message, None);
        assert_eq!(
            reported.messages,
            vec![ResultMessage {
                category: MessageCategory::StdOut,
                text: "a.cpp(3): info in \"Case\": check ok\n".to_string(),
            }]
        );
    }

    #[test]
    fn test_zero_duration_is_clamped() {
        let reported = project(&TestResult::new("Suite/Case", TestOutcome::Passed));
        assert_eq!(reported.duration, Duration::from_micros(1));
    }

    #[test]
    fn test_failed_result_summarises_errors() {
        let mut result = TestResult::new("Suite/Case", TestOutcome::Aborted);
        result.log_entries.push(LogEntry::new(LogEntryKind::Error, "first"));
        result.log_entries.push(
            LogEntry::new(LogEntryKind::FatalError, "second")
                .with_source(Some(SourceFileInfo::new("b.cpp", Some(9)))),
        );

        let reported = project(&result);
        assert_eq!(reported.outcome, TestOutcome::Failed);
        assert_eq!(reported.error_message.as_deref(), Some("first\nsecond"));
        assert_eq!(
            reported.error_stack_trace.as_deref(),
            Some("at Case() in b.cpp:line 9")
        );
    }

    #[test]
    fn test_context_frames_and_checkpoint() {
        let mut entry = LogEntry::new(
            LogEntryKind::Exception {
                last_checkpoint: Some(SourceFileInfo::new("c.cpp", Some(1))),
                checkpoint_detail: "setup".to_string(),
            },
            "boom",
        );
        entry.context_frames = vec!["i = 1".to_string(), "j = 2".to_string()];

        assert_eq!(
            message_text(&test_case(), &entry),
            "exception in \"Case\": boom\nc.cpp(1): last checkpoint: setup\n\
Occurred in a following context:\n    i = 1\n    j = 2\n"
        );
    }

    #[test]
    fn test_memory_leak_is_error_only_without_other_errors() {
        let leak = LogEntry::new(
            LogEntryKind::MemoryLeak {
                allocation_number: 7,
                size_bytes: 1,
                leaked_data: "<a> 61".to_string(),
            },
            "{7} normal block at 0x1, 1 bytes long.",
        )
        .with_source(Some(SourceFileInfo::new("d.cpp", Some(4))));

        let mut result = TestResult::new("Suite/Case", TestOutcome::Failed);
        result.log_entries.push(leak.clone());
        let reported = project(&result);
        assert_eq!(
            reported.error_message.as_deref(),
            Some("{7} normal block at 0x1, 1 bytes long.")
        );
        assert_eq!(
            reported.messages[0].text,
            "d.cpp(4): memory leak in \"Case\": memory allocation number 7, leak size 1 byte\n<a> 61\n"
        );

        result.log_entries.push(LogEntry::new(LogEntryKind::Error, "assert"));
        assert_eq!(project(&result).error_message.as_deref(), Some("assert"));
    }

    #[test]
    fn test_synthesized_message_uses_code_file() {
        let mut test = test_case();
        test.code_file = Some(SourceFileInfo::new("e.cpp", Some(30)));
        let result = TestResult::new("Suite/Case", TestOutcome::Failed)
            .with_message("Test timed out after 100 ms.".to_string());

        let now = Utc::now();
        let reported = ReportedResult::new(&test, &result, now, now);
        assert_eq!(
            reported.error_message.as_deref(),
            Some("Test timed out after 100 ms.")
        );
        assert_eq!(reported.error_stack_trace.as_deref(), Some("e.cpp(30)"));
    }

    #[test]
    fn test_std_streams_are_passed_through() {
        let entry = LogEntry::new(LogEntryKind::StdErr, "oops  \n\n");
        assert_eq!(message_text(&test_case(), &entry), "oops\n");
    }
}
