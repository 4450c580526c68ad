use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::core::{
    domain::{TestCase, TestOutcome},
    projection::ReportedResult,
};

/// Callbacks into the hosting test framework.
#[mockall::automock]
pub trait FrameworkHandle: Send + Sync {
    fn record_start(&self, test: &TestCase);

    fn record_end(&self, test: &TestCase, outcome: TestOutcome);

    fn record_result(&self, result: &ReportedResult);
}

#[mockall::automock]
#[async_trait::async_trait]
pub trait TestDiscoverer: std::fmt::Debug + Send + Sync {
    async fn discover(&self, source: &Path) -> Vec<TestCase>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WorkingEnvironment {
    pub working_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("No debug configuration available for {0}")]
    Unavailable(PathBuf),
    #[error("{0}")]
    Other(String),
}

/// Resolves the working directory and environment a module should run with.
#[mockall::automock]
pub trait EnvironmentResolver: std::fmt::Debug + Send + Sync {
    fn resolve(&self, source: &Path) -> Result<WorkingEnvironment, ResolveError>;
}
