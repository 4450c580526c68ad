pub const REPORT_FILE_SUFFIX: &str = ".test.report.xml";
pub const LOG_FILE_SUFFIX: &str = ".test.log.xml";
pub const STDOUT_FILE_SUFFIX: &str = ".test.stdout.log";
pub const STDERR_FILE_SUFFIX: &str = ".test.stderr.log";

/// Report content of a runner whose `--run_test` filter matched nothing.
pub const TEST_NOT_FOUND: &str = "Test setup error: no test cases matching filter";

pub const TEST_NOT_FOUND_MSG: &str =
    "The runner could not find the test. Make sure it is registered and its name is spelled correctly.";
pub const TEST_NAME_CONTAINS_SPACE_MSG: &str =
    "The runner could not find the test. Test names containing spaces cannot be selected on the command line.";
pub const TEST_NAME_CONTAINS_COMMA_MSG: &str =
    "The runner could not find the test. Test names containing commas cannot be selected on the command line.";

pub const RESULT_FILE_NOT_FOUND_MSG: &str = "Result file not found.";

/// Bounds of the forced kill loop of process tree teardown.
pub const MAX_KILL_PASSES: usize = 10;
pub const KILL_PASS_INTERVAL_MS: u64 = 50;

/// How often the descendants of a running runner are recorded.
pub const DESCENDANT_SNAPSHOT_INTERVAL_MS: u64 = 100;
