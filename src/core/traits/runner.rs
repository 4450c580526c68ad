use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tokio_util::sync::CancellationToken;

use crate::core::{
    args::CommandLineArgs,
    domain::RunnerCapabilities,
    settings::{RunnerSettings, Settings},
};

#[derive(Clone, Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to launch '{}': {msg}", executable.display())]
    Launch { executable: PathBuf, msg: String },
    #[error("Runner did not finish within {} ms", timeout.as_millis())]
    Timeout { timeout: Duration },
    #[error("Runner was cancelled")]
    Cancelled,
    #[error("Failed to tear down process {pid}: {msg}")]
    Teardown { pid: u32, msg: String },
}

/// An external test runner executable.
#[mockall::automock]
#[async_trait::async_trait]
pub trait TestRunner: std::fmt::Debug + Send + Sync {
    /// Runs the executable with `args` and resolves to its exit code.
    async fn execute(
        &self,
        args: &CommandLineArgs,
        settings: &RunnerSettings,
        cancel: CancellationToken,
    ) -> Result<i32, RunError>;

    /// Path of the executable, distinguishing runner instances.
    fn source(&self) -> PathBuf;

    fn capabilities(&self) -> RunnerCapabilities;
}

#[mockall::automock]
pub trait RunnerFactory: std::fmt::Debug + Send + Sync {
    /// Provides the runner for a source module, `None` if it cannot run it.
    fn get_runner(&self, source: &Path, settings: &Settings) -> Option<Arc<dyn TestRunner>>;
}
