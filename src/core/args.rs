use std::{collections::BTreeMap, fmt, path::PathBuf, str::FromStr};

use itertools::Itertools;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Hrf,
    #[default]
    Xml,
    Junit,
}

impl OutputFormat {
    fn as_arg(&self) -> &'static str {
        match self {
            OutputFormat::Hrf => "HRF",
            OutputFormat::Xml => "XML",
            OutputFormat::Junit => "JUNIT",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogLevel {
    All,
    Success,
    #[default]
    TestSuite,
    UnitScope,
    Message,
    Warning,
    Error,
    CppException,
    SystemError,
    FatalError,
    Nothing,
}

impl LogLevel {
    fn as_arg(&self) -> &'static str {
        match self {
            LogLevel::All => "all",
            LogLevel::Success => "success",
            LogLevel::TestSuite => "test_suite",
            LogLevel::UnitScope => "unit_scope",
            LogLevel::Message => "message",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::CppException => "cpp_exception",
            LogLevel::SystemError => "system_error",
            LogLevel::FatalError => "fatal_error",
            LogLevel::Nothing => "nothing",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "all" => LogLevel::All,
            "success" => LogLevel::Success,
            "test_suite" => LogLevel::TestSuite,
            "unit_scope" => LogLevel::UnitScope,
            "message" => LogLevel::Message,
            "warning" => LogLevel::Warning,
            "error" => LogLevel::Error,
            "cpp_exception" => LogLevel::CppException,
            "system_error" => LogLevel::SystemError,
            "fatal_error" => LogLevel::FatalError,
            "nothing" => LogLevel::Nothing,
            other => return Err(format!("unknown log level '{}'", other)),
        };
        Ok(level)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReportLevel {
    Confirm,
    Short,
    #[default]
    Detailed,
    No,
}

impl ReportLevel {
    fn as_arg(&self) -> &'static str {
        match self {
            ReportLevel::Confirm => "confirm",
            ReportLevel::Short => "short",
            ReportLevel::Detailed => "detailed",
            ReportLevel::No => "no",
        }
    }
}

impl FromStr for ReportLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let level = match s.trim().to_ascii_lowercase().as_str() {
            "confirm" => ReportLevel::Confirm,
            "short" => ReportLevel::Short,
            "detailed" => ReportLevel::Detailed,
            "no" => ReportLevel::No,
            other => return Err(format!("unknown report level '{}'", other)),
        };
        Ok(level)
    }
}

/// Command line configuration of a single runner invocation.
///
/// Every batch owns its own copy; strategies clone the base arguments
/// before filling in test selection and output paths.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommandLineArgs {
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub tests: Vec<String>,
    pub log_format: OutputFormat,
    pub log_level: LogLevel,
    pub log_file: Option<PathBuf>,
    pub report_format: OutputFormat,
    pub report_level: ReportLevel,
    pub report_file: Option<PathBuf>,
    pub stdout_file: Option<PathBuf>,
    pub stderr_file: Option<PathBuf>,
    pub catch_system_errors: Option<bool>,
    pub detect_memory_leaks: u32,
}

impl CommandLineArgs {
    /// Renders the arguments passed to the runner executable.
    ///
    /// Standard output and error capture are not part of the argument list,
    /// the supervisor redirects the child's streams to those files instead.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();

        args.extend(
            run_test_filters(&self.tests)
                .into_iter()
                .map(|filter| format!("--run_test={}", filter)),
        );

        if let Some(log_file) = &self.log_file {
            args.push(format!("--log_format={}", self.log_format.as_arg()));
            args.push(format!("--log_level={}", self.log_level.as_arg()));
            args.push(format!("--log_sink={}", log_file.display()));
        }

        if let Some(report_file) = &self.report_file {
            args.push(format!("--report_format={}", self.report_format.as_arg()));
            args.push(format!("--report_level={}", self.report_level.as_arg()));
            args.push(format!("--report_sink={}", report_file.display()));
        }

        if let Some(catch_system_errors) = self.catch_system_errors {
            let value = if catch_system_errors { "yes" } else { "no" };
            args.push(format!("--catch_system_errors={}", value));
        }

        if self.detect_memory_leaks > 0 {
            args.push(format!("--detect_memory_leaks={}", self.detect_memory_leaks));
        }

        args
    }
}

impl fmt::Display for CommandLineArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered = self
            .to_args()
            .into_iter()
            .map(|arg| {
                if arg.contains(' ') {
                    format!("\"{}\"", arg)
                } else {
                    arg
                }
            })
            .join(" ");
        f.write_str(&rendered)
    }
}

/// Groups test paths by parent suite, one `--run_test` filter per suite.
///
/// The runner only accepts several names in a single filter when they share
/// the same parent suite, e.g. `Suite/A,B`.
fn run_test_filters(tests: &[String]) -> Vec<String> {
    tests
        .iter()
        .map(|test| match test.rsplit_once('/') {
            Some((parent, name)) => (Some(parent), name),
            None => (None, test.as_str()),
        })
        .into_group_map_by(|(parent, _)| *parent)
        .into_iter()
        .sorted_by_key(|(parent, _)| *parent)
        .map(|(parent, names)| {
            let names = names.iter().map(|(_, name)| *name).join(",");
            match parent {
                Some(parent) => format!("{}/{}", parent, names),
                None => names,
            }
        })
        .collect()
}
