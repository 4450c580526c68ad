use std::{collections::BTreeMap, path::Path, time::Duration};

use chrono::{DateTime, Utc};
use encoding_rs::Encoding;
use futures::future::join_all;

use crate::{
    constants::{
        RESULT_FILE_NOT_FOUND_MSG, TEST_NAME_CONTAINS_COMMA_MSG, TEST_NAME_CONTAINS_SPACE_MSG,
        TEST_NOT_FOUND, TEST_NOT_FOUND_MSG,
    },
    core::{
        args::{CommandLineArgs, OutputFormat},
        domain::{LogEntry, LogEntryKind, TestCase, TestOutcome, TestResult},
        pipeline::batching::TestRun,
        results::{
            ParseError,
            decode::read_text,
            log::parse_log,
            repair::repair,
            report::parse_report,
            stdio::{Stream, StreamOptions, parse_stream},
        },
        traits::runner::RunError,
    },
};

#[derive(Clone, Copy, Debug)]
pub struct ReconcileOptions {
    pub legacy_encoding: &'static Encoding,
    pub fail_test_on_memory_leak: bool,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        ReconcileOptions {
            legacy_encoding: encoding_rs::WINDOWS_1252,
            fail_test_on_memory_leak: false,
        }
    }
}

/// Result files of a finished run, `None` when missing, empty or unreadable.
#[derive(Debug, Default)]
struct Artifacts {
    report: Option<String>,
    log: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
}

/// Merges the result files of a finished run into one result per test of the
/// run.
///
/// Never fails: when no usable structured output exists every test receives
/// a synthesized result.
#[tracing::instrument(skip_all, fields(batch = %run.id))]
pub async fn reconcile(
    run: &TestRun,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    options: ReconcileOptions,
) -> BTreeMap<String, TestResult> {
    let artifacts = load_artifacts(run, options.legacy_encoding).await;

    let mut results = BTreeMap::new();
    let parsed = match parse_structured(&artifacts, &run.arguments, &mut results) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to parse structured results");
            false
        }
    };
    if !parsed {
        return fallback_results(run, artifacts.report.as_deref(), elapsed(start, end));
    }

    results.retain(|path, _| run.tests.iter().any(|test| &test.path == path));
    for test in &run.tests {
        if !results.contains_key(&test.path) {
            tracing::debug!(test = %test, "Test missing from structured results");
            results.insert(test.path.clone(), not_found_result(test));
        }
    }

    let stream_options = StreamOptions {
        detect_memory_leaks: run.arguments.detect_memory_leaks > 0,
        fail_test_on_memory_leak: options.fail_test_on_memory_leak,
    };
    if let Some(stdout) = &artifacts.stdout {
        parse_stream(stdout, Stream::StdOut, stream_options, &mut results);
    }
    if let Some(stderr) = &artifacts.stderr {
        parse_stream(stderr, Stream::StdErr, stream_options, &mut results);
    }

    results
}

/// Results of a run the runner did not finish in time.
pub fn timeout_results(run: &TestRun, timeout: Duration) -> BTreeMap<String, TestResult> {
    let message = format!("Test timed out after {} ms.", timeout.as_millis());
    run.tests
        .iter()
        .map(|test| {
            let result = TestResult::new(&test.path, TestOutcome::Failed)
                .with_duration(timeout)
                .with_message(message.clone());
            (test.path.clone(), result)
        })
        .collect()
}

/// Results of a run whose runner could not be started or supervised.
pub fn failure_results(
    run: &TestRun,
    error: &RunError,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> BTreeMap<String, TestResult> {
    fatal_results(run, &error.to_string(), elapsed(start, end))
}

async fn load_artifacts(run: &TestRun, legacy: &'static Encoding) -> Artifacts {
    let args = &run.arguments;
    let files = [
        args.report_file.as_deref(),
        args.log_file.as_deref(),
        args.stdout_file.as_deref(),
        args.stderr_file.as_deref(),
    ];

    let mut texts = join_all(files.into_iter().map(|path| load(path, legacy)))
        .await
        .into_iter();

    Artifacts {
        report: texts.next().flatten(),
        log: texts.next().flatten(),
        stdout: texts.next().flatten(),
        stderr: texts.next().flatten(),
    }
}

async fn load(path: Option<&Path>, legacy: &'static Encoding) -> Option<String> {
    let path = path?;
    match read_text(path, legacy).await {
        Ok(text) if text.trim().is_empty() => {
            tracing::debug!(path = %path.display(), "Result file is empty");
            None
        }
        Ok(text) => Some(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Result file does not exist");
            None
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to read result file");
            None
        }
    }
}

/// Parses the XML report then the XML log into `results`. `Ok(false)` when
/// there is neither. Artifacts written in another format are not parsed.
fn parse_structured(
    artifacts: &Artifacts,
    args: &CommandLineArgs,
    results: &mut BTreeMap<String, TestResult>,
) -> Result<bool, ParseError> {
    let report = artifacts
        .report
        .as_ref()
        .filter(|_| args.report_format == OutputFormat::Xml);
    let log = artifacts
        .log
        .as_ref()
        .filter(|_| args.log_format == OutputFormat::Xml);

    if report.is_none() && log.is_none() {
        return Ok(false);
    }
    if let Some(report) = report {
        parse_report(&repair(report), results)?;
    }
    if let Some(log) = log {
        parse_log(&repair(log), results)?;
    }
    Ok(true)
}

fn fallback_results(
    run: &TestRun,
    report: Option<&str>,
    duration: Duration,
) -> BTreeMap<String, TestResult> {
    let report = report.map(str::trim).unwrap_or_default();

    if report.starts_with(TEST_NOT_FOUND) {
        tracing::info!("Runner found none of the requested tests");
        return run
            .tests
            .iter()
            .map(|test| (test.path.clone(), not_found_result(test)))
            .collect();
    }

    let detail = if report.is_empty() {
        RESULT_FILE_NOT_FOUND_MSG
    } else {
        report
    };
    fatal_results(run, detail, duration)
}

fn fatal_results(run: &TestRun, detail: &str, duration: Duration) -> BTreeMap<String, TestResult> {
    run.tests
        .iter()
        .map(|test| {
            let mut result =
                TestResult::new(&test.path, TestOutcome::Failed).with_duration(duration);
            result
                .log_entries
                .push(LogEntry::new(LogEntryKind::FatalError, detail));
            (test.path.clone(), result)
        })
        .collect()
}

fn not_found_result(test: &TestCase) -> TestResult {
    let message = if test.path.contains(' ') {
        TEST_NAME_CONTAINS_SPACE_MSG
    } else if test.path.contains(',') {
        TEST_NAME_CONTAINS_COMMA_MSG
    } else {
        TEST_NOT_FOUND_MSG
    };
    TestResult::new(&test.path, TestOutcome::Skipped).with_message(message.to_string())
}

fn elapsed(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    (end - start).to_std().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Arc};

    use super::*;
    use crate::core::{
        domain::{RunnerCapabilities, SourceFileInfo},
        settings::RunnerSettings,
        traits::runner::MockTestRunner,
    };

    const SOURCE: &str = "/opt/tests/unit";

    const REPORT: &str = r#"<TestResult><TestSuite name="Master" result="failed"><TestSuite name="Suite" result="failed"><TestCase name="Pass" result="passed"/><TestCase name="Fail" result="failed"/><TestCase name="Other" result="passed"/></TestSuite></TestSuite></TestResult>"#;

    const LOG: &str = "<TestLog><TestSuite name=\"Master\"><TestSuite name=\"Suite\">\
<TestCase name=\"Pass\"><Message file=\"s.cpp\" line=\"2\"><![CDATA[hi]]></Message><TestingTime>10</TestingTime></TestCase>\
<TestCase name=\"Fail\"><Error file=\"s.cpp\" line=\"4\"><![CDATA[bad\x01\x1f value\r\nnext]]></Error><TestingTime>20</TestingTime></TestCase>\
</TestSuite></TestSuite></TestLog>";

    struct Fixture {
        dir: tempfile::TempDir,
        run: TestRun,
    }

    impl Fixture {
        fn new(tests: &[&str]) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mut runner = MockTestRunner::new();
            runner.expect_source().return_const(PathBuf::from(SOURCE));
            runner
                .expect_capabilities()
                .return_const(RunnerCapabilities::default());

            let arguments = CommandLineArgs {
                report_file: Some(dir.path().join("unit.test.report.xml")),
                log_file: Some(dir.path().join("unit.test.log.xml")),
                stdout_file: Some(dir.path().join("unit.test.stdout.log")),
                stderr_file: Some(dir.path().join("unit.test.stderr.log")),
                ..CommandLineArgs::default()
            };
            let tests = tests.iter().map(|path| TestCase::new(path, SOURCE)).collect();
            let run = TestRun::new(Arc::new(runner), tests, arguments, RunnerSettings::default());
            Fixture { dir, run }
        }

        fn write(&self, name: &str, content: impl AsRef<[u8]>) {
            std::fs::write(self.dir.path().join(name), content).unwrap();
        }

        async fn reconcile(&self) -> BTreeMap<String, TestResult> {
            let start = Utc::now();
            let end = start + chrono::Duration::milliseconds(250);
            reconcile(&self.run, start, end, ReconcileOptions::default()).await
        }
    }

    #[tokio::test]
    async fn test_report_and_log_are_merged() {
        let fixture = Fixture::new(&["Suite/Pass", "Suite/Fail"]);
        fixture.write("unit.test.report.xml", REPORT);
        fixture.write("unit.test.log.xml", LOG);

        let results = fixture.reconcile().await;
        assert_eq!(results.len(), 2);

        let pass = &results["Suite/Pass"];
        assert_eq!(pass.outcome, TestOutcome::Passed);
        assert_eq!(pass.duration, Duration::from_micros(10));
        assert_eq!(
            pass.log_entries,
            vec![LogEntry::new(LogEntryKind::Message, "hi")
                .with_source(Some(SourceFileInfo::new("s.cpp", Some(2))))]
        );

        assert_eq!(results["Suite/Fail"].outcome, TestOutcome::Failed);
    }

    #[tokio::test]
    async fn test_control_bytes_in_cdata_are_escaped() {
        let fixture = Fixture::new(&["Suite/Fail"]);
        fixture.write("unit.test.log.xml", LOG);

        let results = fixture.reconcile().await;
        assert_eq!(
            results["Suite/Fail"].log_entries[0].detail,
            "bad0x010x1F value\r\nnext"
        );
    }

    #[tokio::test]
    async fn test_unrequested_tests_are_dropped_and_missing_ones_not_found() {
        let fixture = Fixture::new(&["Suite/Pass", "Suite/Absent"]);
        fixture.write("unit.test.report.xml", REPORT);

        let results = fixture.reconcile().await;
        assert_eq!(
            results.keys().collect::<Vec<_>>(),
            vec!["Suite/Absent", "Suite/Pass"]
        );
        assert_eq!(results["Suite/Absent"].outcome, TestOutcome::Skipped);
        assert_eq!(
            results["Suite/Absent"].message.as_deref(),
            Some(TEST_NOT_FOUND_MSG)
        );
    }

    #[tokio::test]
    async fn test_missing_test_keeps_captured_output() {
        let fixture = Fixture::new(&["Suite/Absent"]);
        fixture.write("unit.test.report.xml", REPORT);
        fixture.write("unit.test.stderr.log", "fixture setup threw\n");

        let results = fixture.reconcile().await;
        let result = &results["Suite/Absent"];
        assert_eq!(result.outcome, TestOutcome::Skipped);
        assert_eq!(result.message.as_deref(), Some(TEST_NOT_FOUND_MSG));
        assert_eq!(
            result.log_entries,
            vec![LogEntry::new(LogEntryKind::StdErr, "fixture setup threw\n")]
        );
    }

    #[tokio::test]
    async fn test_non_xml_log_is_not_parsed() {
        let mut fixture = Fixture::new(&["Suite/Pass"]);
        fixture.run.arguments.log_format = OutputFormat::Hrf;
        fixture.write("unit.test.report.xml", REPORT);
        fixture.write("unit.test.log.xml", "Running 3 test cases...\n\n*** No errors detected\n");

        let results = fixture.reconcile().await;
        let result = &results["Suite/Pass"];
        assert_eq!(result.outcome, TestOutcome::Passed);
        assert!(result.log_entries.is_empty());
    }

    #[tokio::test]
    async fn test_no_xml_artifact_falls_back_to_raw_report() {
        let mut fixture = Fixture::new(&["Suite/Pass"]);
        fixture.run.arguments.report_format = OutputFormat::Hrf;
        fixture.run.arguments.log_format = OutputFormat::Hrf;
        fixture.write("unit.test.report.xml", "Test module \"unit\" has passed\n");

        let results = fixture.reconcile().await;
        let result = &results["Suite/Pass"];
        assert_eq!(result.outcome, TestOutcome::Failed);
        assert_eq!(result.log_entries[0].detail, "Test module \"unit\" has passed");
    }

    #[tokio::test]
    async fn test_not_found_messages_depend_on_test_name() {
        let fixture = Fixture::new(&["Suite/With space", "Suite/With,comma", "Suite/Plain"]);
        fixture.write("unit.test.report.xml", format!("\r\n  {}\r\n", TEST_NOT_FOUND));

        let results = fixture.reconcile().await;
        assert!(results.values().all(|r| r.outcome == TestOutcome::Skipped));

        let space = results["Suite/With space"].message.clone();
        let comma = results["Suite/With,comma"].message.clone();
        let plain = results["Suite/Plain"].message.clone();
        assert_ne!(space, comma);
        assert_ne!(comma, plain);
        assert_ne!(space, plain);
    }

    #[tokio::test]
    async fn test_malformed_report_fails_every_test() {
        let fixture = Fixture::new(&["Suite/Pass", "Suite/Fail"]);
        fixture.write("unit.test.report.xml", "<TestResult><TestSuite");
        fixture.write("unit.test.log.xml", LOG);

        let results = fixture.reconcile().await;
        for result in results.values() {
            assert_eq!(result.outcome, TestOutcome::Failed);
            assert_eq!(result.duration, Duration::from_millis(250));
            assert_eq!(
                result.log_entries,
                vec![LogEntry::new(LogEntryKind::FatalError, "<TestResult><TestSuite")]
            );
        }
    }

    #[tokio::test]
    async fn test_empty_and_missing_files_are_alike() {
        let missing = Fixture::new(&["Suite/Pass"]);
        let empty = Fixture::new(&["Suite/Pass"]);
        empty.write("unit.test.report.xml", "");
        empty.write("unit.test.log.xml", "  \n");

        let missing = missing.reconcile().await;
        let empty = empty.reconcile().await;
        assert_eq!(missing, empty);
        assert_eq!(
            missing["Suite/Pass"].log_entries[0].detail,
            RESULT_FILE_NOT_FOUND_MSG
        );
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_decoded() {
        let fixture = Fixture::new(&["Suite/Fail"]);
        let mut log = b"<TestLog><TestSuite name=\"Master\"><TestSuite name=\"Suite\"><TestCase name=\"Fail\"><Error><![CDATA[caf"
            .to_vec();
        log.extend_from_slice(b"\xe9]]></Error></TestCase></TestSuite></TestSuite></TestLog>");
        fixture.write("unit.test.log.xml", log);

        let results = fixture.reconcile().await;
        let result = &results["Suite/Fail"];
        assert_eq!(result.outcome, TestOutcome::Failed);
        assert_eq!(result.log_entries[0].detail, "café");
    }

    #[tokio::test]
    async fn test_streams_are_appended_in_order() {
        let mut fixture = Fixture::new(&["Suite/Pass"]);
        fixture.run.arguments.detect_memory_leaks = 1;
        fixture.write("unit.test.report.xml", REPORT);
        fixture.write("unit.test.log.xml", LOG);
        fixture.write("unit.test.stdout.log", "out\n");
        fixture.write("unit.test.stderr.log", "err\n");

        let results = fixture.reconcile().await;
        let kinds: Vec<&LogEntryKind> = results["Suite/Pass"]
            .log_entries
            .iter()
            .map(|entry| &entry.kind)
            .collect();
        assert_eq!(
            kinds,
            vec![&LogEntryKind::Message, &LogEntryKind::StdOut, &LogEntryKind::StdErr]
        );
    }

    #[tokio::test]
    async fn test_reconciliation_is_deterministic() {
        let fixture = Fixture::new(&["Suite/Pass", "Suite/Fail", "Suite/Absent"]);
        fixture.write("unit.test.report.xml", REPORT);
        fixture.write("unit.test.log.xml", LOG);
        fixture.write("unit.test.stderr.log", "warning\n");

        let first = fixture.reconcile().await;
        let second = fixture.reconcile().await;
        assert_eq!(first, second);
        assert_eq!(format!("{:?}", first), format!("{:?}", second));
    }

    #[test]
    fn test_timeout_results() {
        let fixture = Fixture::new(&["Suite/Pass", "Suite/Fail"]);
        let results = timeout_results(&fixture.run, Duration::from_millis(1500));

        assert_eq!(results.len(), 2);
        for result in results.values() {
            assert_eq!(result.outcome, TestOutcome::Failed);
            assert_eq!(result.duration, Duration::from_millis(1500));
            assert!(result.log_entries.is_empty());
            assert_eq!(result.message.as_deref(), Some("Test timed out after 1500 ms."));
        }
    }

    #[test]
    fn test_failure_results_carry_launch_message() {
        let fixture = Fixture::new(&["Suite/Pass"]);
        let error = RunError::Launch {
            executable: PathBuf::from(SOURCE),
            msg: "permission denied".to_string(),
        };
        let now = Utc::now();
        let results = failure_results(&fixture.run, &error, now, now);

        let result = &results["Suite/Pass"];
        assert_eq!(result.outcome, TestOutcome::Failed);
        assert_eq!(result.log_entries[0].kind, LogEntryKind::FatalError);
        assert!(result.log_entries[0].detail.contains("permission denied"));
    }
}
