use std::{path::PathBuf, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::core::{
    args::CommandLineArgs,
    domain::RunnerCapabilities,
    settings::RunnerSettings,
    traits::runner::{RunError, TestRunner},
};

/// Runner which pretends to execute tests: after `delay` it writes canned
/// result files to the paths requested in the arguments and returns `result`.
#[derive(Debug, Clone)]
pub struct RunnerStub {
    source: PathBuf,
    result: Result<i32, RunError>,
    delay: Duration,
    report: Option<String>,
    log: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
}

impl RunnerStub {
    pub fn new(source: PathBuf, result: Result<i32, RunError>, delay: Duration) -> Self {
        Self {
            source,
            result,
            delay,
            report: None,
            log: None,
            stdout: None,
            stderr: None,
        }
    }

    pub fn with_report(self, report: &str) -> Self {
        Self {
            report: Some(report.to_string()),
            ..self
        }
    }

    pub fn with_log(self, log: &str) -> Self {
        Self {
            log: Some(log.to_string()),
            ..self
        }
    }

    pub fn with_stdout(self, stdout: &str) -> Self {
        Self {
            stdout: Some(stdout.to_string()),
            ..self
        }
    }

    pub fn with_stderr(self, stderr: &str) -> Self {
        Self {
            stderr: Some(stderr.to_string()),
            ..self
        }
    }
}

#[async_trait::async_trait]
impl TestRunner for RunnerStub {
    #[tracing::instrument(skip(cancel))]
    async fn execute(
        &self,
        args: &CommandLineArgs,
        settings: &RunnerSettings,
        cancel: CancellationToken,
    ) -> Result<i32, RunError> {
        tracing::debug!("Start execution: args={}", args);
        tokio::select! {
            _ = cancel.cancelled() => return Err(RunError::Cancelled),
            _ = tokio::time::sleep(self.delay) => {}
        }

        let outputs = [
            (&args.report_file, &self.report),
            (&args.log_file, &self.log),
            (&args.stdout_file, &self.stdout),
            (&args.stderr_file, &self.stderr),
        ];
        for (path, content) in outputs {
            if let (Some(path), Some(content)) = (path, content) {
                tokio::fs::write(path, content)
                    .await
                    .map_err(|e| RunError::Launch {
                        executable: self.source.clone(),
                        msg: e.to_string(),
                    })?;
            }
        }

        tracing::debug!("Execution result: {:?}", self.result);
        self.result.clone()
    }

    fn source(&self) -> PathBuf {
        self.source.clone()
    }

    fn capabilities(&self) -> RunnerCapabilities {
        RunnerCapabilities {
            list_content: true,
            version: true,
        }
    }
}
