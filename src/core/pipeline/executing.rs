use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::Utc;
use itertools::Itertools;
use tokio_util::sync::CancellationToken;

use crate::{
    constants::{LOG_FILE_SUFFIX, REPORT_FILE_SUFFIX, STDERR_FILE_SUFFIX, STDOUT_FILE_SUFFIX},
    core::{
        args::CommandLineArgs,
        domain::{RunContext, TestCase},
        pipeline::{
            batching::{ArgsBuilder, BatchContext, TestRun, strategy_for},
            reconciling::{ReconcileOptions, failure_results, reconcile, timeout_results},
        },
        projection::ReportedResult,
        results::decode::legacy_encoding,
        settings::{Settings, Strategy},
        temporary::TemporaryFile,
        traits::{
            host::{EnvironmentResolver, FrameworkHandle, TestDiscoverer},
            runner::{RunError, RunnerFactory},
        },
    },
};

/// Runs tests on behalf of the host and reports one result per test.
///
/// Batches run one after another. A run can be cancelled from another task
/// through [`TestExecutor::cancel`].
#[derive(Debug)]
pub struct TestExecutor {
    factory: Arc<dyn RunnerFactory>,
    discoverer: Arc<dyn TestDiscoverer>,
    resolver: Arc<dyn EnvironmentResolver>,
    settings: Settings,
    cancel: Mutex<CancellationToken>,
}

impl TestExecutor {
    pub fn new(
        factory: Arc<dyn RunnerFactory>,
        discoverer: Arc<dyn TestDiscoverer>,
        resolver: Arc<dyn EnvironmentResolver>,
        settings: Settings,
    ) -> Self {
        TestExecutor {
            factory,
            discoverer,
            resolver,
            settings,
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Discovers and runs every test of `sources`.
    #[tracing::instrument(skip(self, handle))]
    pub async fn run_all(&self, sources: &[PathBuf], ctx: RunContext, handle: &dyn FrameworkHandle) {
        let token = self.start_run().await;

        let strategy = if ctx.is_data_collection_enabled {
            Strategy::Source
        } else {
            self.settings.batch_strategy
        };

        for source in sources {
            if token.is_cancelled() {
                break;
            }

            let tests: Vec<TestCase> = self
                .discoverer
                .discover(source)
                .await
                .into_iter()
                .filter(|test| test.enabled || self.settings.run_disabled_tests)
                .collect();
            tracing::info!(source = %source.display(), tests = tests.len(), "Discovered tests");

            let runs = strategy_for(strategy, self.batch_context(ctx)).batch_tests(&tests);
            if !self.run_batches(runs, handle, &token).await {
                break;
            }
        }
    }

    /// Runs the given tests, ignoring duplicates.
    #[tracing::instrument(skip_all, fields(tests = tests.len()))]
    pub async fn run_selected(&self, tests: &[TestCase], ctx: RunContext, handle: &dyn FrameworkHandle) {
        let token = self.start_run().await;

        let strategy = match self.settings.batch_strategy {
            _ if ctx.is_data_collection_enabled => Strategy::One,
            Strategy::Source => Strategy::TestSuite,
            strategy => strategy,
        };

        let tests: Vec<TestCase> = tests.iter().unique().cloned().collect();
        let runs = strategy_for(strategy, self.batch_context(ctx)).batch_tests(&tests);
        self.run_batches(runs, handle, &token).await;
    }

    /// Stops the current run. The running batch is torn down and reports no
    /// results, remaining batches are not started.
    pub fn cancel(&self) {
        match self.cancel.lock() {
            Ok(token) => {
                tracing::info!("Cancelling test run");
                token.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Failed to cancel test run"),
        }
    }

    async fn start_run(&self) -> CancellationToken {
        // Registered before the first await so a cancel issued from then on
        // reaches this run
        let token = CancellationToken::new();
        match self.cancel.lock() {
            Ok(mut current) => *current = token.clone(),
            Err(e) => tracing::error!(error = %e, "Failed to register test run"),
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.settings.output_directory).await {
            tracing::error!(
                dir = %self.settings.output_directory.display(),
                error = %e,
                "Failed to create output directory"
            );
        }
        token
    }

    fn batch_context(&self, ctx: RunContext) -> BatchContext {
        let settings = self.settings.clone();
        let resolver = self.resolver.clone();
        let args: ArgsBuilder =
            Arc::new(move |source: &Path| default_arguments(&settings, resolver.as_ref(), ctx, source));
        BatchContext::new(self.factory.clone(), self.settings.clone(), args)
    }

    /// Runs `runs` in order. Returns `false` once the run was cancelled.
    async fn run_batches(
        &self,
        runs: Vec<TestRun>,
        handle: &dyn FrameworkHandle,
        token: &CancellationToken,
    ) -> bool {
        for run in runs {
            if token.is_cancelled() || !self.run_batch(run, handle, token).await {
                tracing::info!("Test run cancelled");
                return false;
            }
        }
        true
    }

    #[tracing::instrument(skip_all, fields(batch = %run.id, source = %run.source().display()))]
    async fn run_batch(&self, run: TestRun, handle: &dyn FrameworkHandle, token: &CancellationToken) -> bool {
        for test in &run.tests {
            handle.record_start(test);
        }

        let _files: Vec<TemporaryFile> = [
            &run.arguments.report_file,
            &run.arguments.log_file,
            &run.arguments.stdout_file,
            &run.arguments.stderr_file,
        ]
        .into_iter()
        .flatten()
        .map(TemporaryFile::new)
        .collect();

        let start = Utc::now();
        let status = run
            .runner
            .execute(&run.arguments, &run.settings, token.child_token())
            .await;
        let end = Utc::now();

        let results = match status {
            Ok(code) => {
                tracing::debug!(code, "Runner exited");
                if !self.settings.post_test_delay.is_zero() {
                    tokio::time::sleep(self.settings.post_test_delay).await;
                }
                let options = ReconcileOptions {
                    legacy_encoding: legacy_encoding(&self.settings.legacy_encoding),
                    fail_test_on_memory_leak: self.settings.fail_test_on_memory_leak,
                };
                reconcile(&run, start, end, options).await
            }
            Err(RunError::Cancelled) => return false,
            Err(RunError::Timeout { timeout }) => {
                tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Runner timed out");
                timeout_results(&run, timeout)
            }
            Err(e) => {
                tracing::error!(error = %e, "Runner failed");
                failure_results(&run, &e, start, end)
            }
        };

        // A cancellation racing the runner's exit still wins
        if token.is_cancelled() {
            return false;
        }

        for test in &run.tests {
            let Some(result) = results.get(&test.path) else {
                tracing::error!(test = %test, "No result reconciled for test");
                continue;
            };
            let reported = ReportedResult::new(test, result, start, end);
            handle.record_end(test, reported.outcome);
            handle.record_result(&reported);
        }
        true
    }
}

/// Base arguments of every run of `source`: environment, result files and
/// the options configured for the adapter.
fn default_arguments(
    settings: &Settings,
    resolver: &dyn EnvironmentResolver,
    ctx: RunContext,
    source: &Path,
) -> CommandLineArgs {
    let mut args = settings.command_line_args.clone();

    match resolver.resolve(source) {
        Ok(environment) => {
            if environment.working_directory.is_some() {
                args.working_directory = environment.working_directory;
            }
            args.environment.extend(environment.environment);
        }
        Err(e) => tracing::debug!(source = %source.display(), error = %e, "No working environment"),
    }
    if args.working_directory.is_none() {
        args.working_directory = source.parent().map(Path::to_path_buf);
    }

    let name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let artifact = |suffix: &str| Some(settings.output_directory.join(format!("{}{}", name, suffix)));

    args.report_file = artifact(REPORT_FILE_SUFFIX);
    args.report_format = settings.report_format;
    args.report_level = settings.report_level;
    args.log_file = artifact(LOG_FILE_SUFFIX);
    args.log_format = settings.log_format;
    args.log_level = settings.log_level;
    if settings.enable_stdout_redirection {
        args.stdout_file = artifact(STDOUT_FILE_SUFFIX);
    }
    if settings.enable_stderr_redirection {
        args.stderr_file = artifact(STDERR_FILE_SUFFIX);
    }

    // Only a debugger may turn system error catching off
    let catch = args.catch_system_errors.unwrap_or(false) || !ctx.is_being_debugged;
    args.catch_system_errors = Some(catch);
    if settings.detect_memory_leaks {
        args.detect_memory_leaks = 1;
    }

    args
}
