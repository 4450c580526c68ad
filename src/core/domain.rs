use std::{
    fmt,
    path::{Path, PathBuf},
    time::Duration,
};

/// A discovered test: its fully qualified path inside the runner's test tree
/// (master suite excluded, components separated by `/`) and the module that
/// defines it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestCase {
    pub path: String,
    pub source: PathBuf,
    pub enabled: bool,
    pub code_file: Option<SourceFileInfo>,
}

impl TestCase {
    pub fn new<T: AsRef<Path>>(path: &str, source: T) -> Self {
        TestCase {
            path: path.to_string(),
            source: source.as_ref().into(),
            enabled: true,
            code_file: None,
        }
    }

    /// Display name, i.e. the last path component.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }

    /// Path of the immediate parent suite, `None` for tests in the master suite.
    pub fn parent_suite(&self) -> Option<&str> {
        self.path.rsplit_once('/').map(|(parent, _)| parent)
    }
}

impl fmt::Display for TestCase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceFileInfo {
    pub file: String,
    pub line: Option<u32>,
}

impl SourceFileInfo {
    pub fn new(file: &str, line: Option<u32>) -> Self {
        SourceFileInfo {
            file: file.to_string(),
            line,
        }
    }
}

impl fmt::Display for SourceFileInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}({})", self.file, line),
            None => f.write_str(&self.file),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunnerCapabilities {
    pub list_content: bool,
    pub version: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TestOutcome {
    Passed,
    Failed,
    Skipped,
    Aborted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageCategory {
    StdOut,
    StdErr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogEntryKind {
    Info,
    Message,
    Warning,
    Error,
    FatalError,
    Exception {
        last_checkpoint: Option<SourceFileInfo>,
        checkpoint_detail: String,
    },
    MemoryLeak {
        allocation_number: u64,
        size_bytes: u64,
        leaked_data: String,
    },
    StdOut,
    StdErr,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub kind: LogEntryKind,
    pub detail: String,
    pub source: Option<SourceFileInfo>,
    pub context_frames: Vec<String>,
}

impl LogEntry {
    pub fn new(kind: LogEntryKind, detail: &str) -> Self {
        LogEntry {
            kind,
            detail: detail.to_string(),
            source: None,
            context_frames: Vec::new(),
        }
    }

    pub fn with_source(self, source: Option<SourceFileInfo>) -> Self {
        Self { source, ..self }
    }

    pub fn category(&self) -> MessageCategory {
        match self.kind {
            LogEntryKind::Info | LogEntryKind::Message | LogEntryKind::StdOut => {
                MessageCategory::StdOut
            }
            LogEntryKind::Warning
            | LogEntryKind::Error
            | LogEntryKind::FatalError
            | LogEntryKind::Exception { .. }
            | LogEntryKind::MemoryLeak { .. }
            | LogEntryKind::StdErr => MessageCategory::StdErr,
        }
    }

    /// Entries which contribute to a test's error message.
    pub fn is_error(&self) -> bool {
        matches!(
            self.kind,
            LogEntryKind::Warning
                | LogEntryKind::Error
                | LogEntryKind::FatalError
                | LogEntryKind::Exception { .. }
        )
    }

    /// Entries which make a test fail when found in the log.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            LogEntryKind::Error | LogEntryKind::FatalError | LogEntryKind::Exception { .. }
        )
    }

    pub fn is_memory_leak(&self) -> bool {
        matches!(self.kind, LogEntryKind::MemoryLeak { .. })
    }

    /// Lower-case label used when rendering the entry for the host.
    pub fn label(&self) -> &'static str {
        match self.kind {
            LogEntryKind::Info => "info",
            LogEntryKind::Message => "message",
            LogEntryKind::Warning => "warning",
            LogEntryKind::Error => "error",
            LogEntryKind::FatalError => "fatal error",
            LogEntryKind::Exception { .. } => "exception",
            LogEntryKind::MemoryLeak { .. } => "memory leak",
            LogEntryKind::StdOut => "standard output",
            LogEntryKind::StdErr => "standard error",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    pub path: String,
    pub outcome: TestOutcome,
    pub duration: Duration,
    pub log_entries: Vec<LogEntry>,
    /// Diagnostic attached to results synthesized without structured output.
    pub message: Option<String>,
}

impl TestResult {
    pub fn new(path: &str, outcome: TestOutcome) -> Self {
        TestResult {
            path: path.to_string(),
            outcome,
            duration: Duration::ZERO,
            log_entries: Vec::new(),
            message: None,
        }
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }

    pub fn with_message(self, message: String) -> Self {
        Self {
            message: Some(message),
            ..self
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunContext {
    pub is_being_debugged: bool,
    pub is_data_collection_enabled: bool,
}
