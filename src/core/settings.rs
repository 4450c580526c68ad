use std::{path::PathBuf, str::FromStr, time::Duration};

use crate::core::args::{CommandLineArgs, LogLevel, OutputFormat, ReportLevel};

/// How selected tests are grouped into runner invocations.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Strategy {
    /// One invocation per source module.
    Source,
    /// One invocation per source module and parent test suite.
    #[default]
    TestSuite,
    /// One invocation per test case.
    TestCase,
    /// One unfiltered invocation, used when instrumentation overhead matters.
    One,
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let strategy = match s.trim().to_ascii_lowercase().as_str() {
            "source" => Strategy::Source,
            "testsuite" | "test_suite" => Strategy::TestSuite,
            "testcase" | "test_case" => Strategy::TestCase,
            "one" => Strategy::One,
            other => return Err(format!("unknown batch strategy '{}'", other)),
        };
        Ok(strategy)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunnerSettings {
    /// `None` waits for the runner indefinitely.
    pub timeout: Option<Duration>,
}

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
}

/// Read-only snapshot of the adapter configuration for a run.
#[derive(Clone, Debug)]
pub struct Settings {
    pub batch_strategy: Strategy,
    pub run_disabled_tests: bool,
    pub post_test_delay: Duration,
    pub runner: RunnerSettings,
    pub enable_stdout_redirection: bool,
    pub enable_stderr_redirection: bool,
    pub detect_memory_leaks: bool,
    pub fail_test_on_memory_leak: bool,
    pub log_level: LogLevel,
    pub log_format: OutputFormat,
    pub report_level: ReportLevel,
    pub report_format: OutputFormat,
    pub output_directory: PathBuf,
    /// Label of the encoding used when a result file is not valid UTF-8.
    pub legacy_encoding: String,
    /// Time a runner gets to exit after an interrupt before it is killed.
    pub grace_period: Duration,
    /// Base arguments cloned into every batch.
    pub command_line_args: CommandLineArgs,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            batch_strategy: Strategy::default(),
            run_disabled_tests: false,
            post_test_delay: Duration::ZERO,
            runner: RunnerSettings::default(),
            enable_stdout_redirection: true,
            enable_stderr_redirection: true,
            detect_memory_leaks: false,
            fail_test_on_memory_leak: false,
            log_level: LogLevel::default(),
            log_format: OutputFormat::Xml,
            report_level: ReportLevel::default(),
            report_format: OutputFormat::Xml,
            output_directory: std::env::temp_dir().join("native-test-adapter"),
            legacy_encoding: "windows-1252".to_string(),
            grace_period: Duration::from_millis(500),
            command_line_args: CommandLineArgs::default(),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds settings from `NTA_*` variables resolved through `lookup`,
    /// falling back to defaults for missing ones.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Settings::default();

        let timeout = match parse_var::<i64, _>(&lookup, "NTA_TIMEOUT_MS")? {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms as u64)),
            Some(_) => None,
            None => defaults.runner.timeout,
        };

        Ok(Settings {
            batch_strategy: parse_var(&lookup, "NTA_BATCH_STRATEGY")?
                .unwrap_or(defaults.batch_strategy),
            run_disabled_tests: parse_var(&lookup, "NTA_RUN_DISABLED_TESTS")?
                .unwrap_or(defaults.run_disabled_tests),
            post_test_delay: parse_var(&lookup, "NTA_POST_TEST_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.post_test_delay),
            runner: RunnerSettings { timeout },
            enable_stdout_redirection: parse_var(&lookup, "NTA_STDOUT_REDIRECTION")?
                .unwrap_or(defaults.enable_stdout_redirection),
            enable_stderr_redirection: parse_var(&lookup, "NTA_STDERR_REDIRECTION")?
                .unwrap_or(defaults.enable_stderr_redirection),
            detect_memory_leaks: parse_var(&lookup, "NTA_DETECT_MEMORY_LEAKS")?
                .unwrap_or(defaults.detect_memory_leaks),
            fail_test_on_memory_leak: parse_var(&lookup, "NTA_FAIL_TEST_ON_MEMORY_LEAK")?
                .unwrap_or(defaults.fail_test_on_memory_leak),
            log_level: parse_var(&lookup, "NTA_LOG_LEVEL")?.unwrap_or(defaults.log_level),
            report_level: parse_var(&lookup, "NTA_REPORT_LEVEL")?
                .unwrap_or(defaults.report_level),
            output_directory: lookup("NTA_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_directory),
            legacy_encoding: lookup("NTA_LEGACY_ENCODING").unwrap_or(defaults.legacy_encoding),
            grace_period: parse_var(&lookup, "NTA_GRACE_PERIOD_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.grace_period),
            ..defaults
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, SettingsError>
where
    T: FromStr,
    T::Err: ToString,
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(key) else {
        return Ok(None);
    };

    value
        .trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| SettingsError::InvalidValue {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        })
}
