use std::{collections::BTreeMap, panic, path::PathBuf, process::ExitCode, sync::Arc, time::Duration};

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use native_test_adapter::{
    console::ConsoleHandle,
    core::{
        domain::{RunContext, TestCase},
        pipeline::executing::TestExecutor,
        settings::{Settings, Strategy},
        traits::host::TestDiscoverer,
    },
    native::{
        capabilities::{CapabilityCache, probe},
        environment::StaticEnvironmentResolver,
        process_tree::ProcfsProcessTree,
        runner::DefaultRunnerFactory,
    },
};

#[derive(Parser)]
#[command(author, version, about = "Runs native test executables and reports per-test results")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run selected tests of a test executable.
    Run {
        /// Test executable.
        source: PathBuf,

        /// Fully qualified test path, e.g. `Suite/Case`.
        #[arg(short, long = "test", required = true)]
        tests: Vec<String>,

        /// One of `source`, `testsuite`, `testcase` or `one`.
        #[arg(long)]
        strategy: Option<Strategy>,

        /// Per batch timeout, 0 disables it.
        #[arg(long)]
        timeout_ms: Option<u64>,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        working_dir: Option<PathBuf>,

        /// Environment override in `KEY=VALUE` form.
        #[arg(long = "env", value_parser = parse_env)]
        environment: Vec<(String, String)>,

        /// Let the runner crash instead of catching system errors.
        #[arg(long)]
        debugging: bool,

        /// Run everything in one unfiltered invocation per executable.
        #[arg(long)]
        data_collection: bool,
    },
    /// Print the capabilities of test executables.
    Probe {
        #[arg(required = true)]
        sources: Vec<PathBuf>,
    },
}

/// Tests are always selected explicitly on the command line.
#[derive(Debug)]
struct NoDiscovery;

#[async_trait::async_trait]
impl TestDiscoverer for NoDiscovery {
    async fn discover(&self, _source: &std::path::Path) -> Vec<TestCase> {
        Vec::new()
    }
}

#[tokio::main]
#[tracing::instrument]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
    set_panic_hook();

    let cli = Cli::parse();
    match cli.command {
        Commands::Probe { sources } => {
            for source in sources {
                let capabilities = probe(&source);
                println!(
                    "{}: list_content={} version={}",
                    source.display(),
                    capabilities.list_content,
                    capabilities.version
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run {
            source,
            tests,
            strategy,
            timeout_ms,
            output_dir,
            working_dir,
            environment,
            debugging,
            data_collection,
        } => {
            let mut settings = Settings::from_env()?;
            if let Some(strategy) = strategy {
                settings.batch_strategy = strategy;
            }
            if let Some(timeout_ms) = timeout_ms {
                settings.runner.timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));
            }
            if let Some(output_dir) = output_dir {
                settings.output_directory = output_dir;
            }
            tracing::debug!(?settings, "Loaded settings");

            let executor = Arc::new(TestExecutor::new(
                Arc::new(DefaultRunnerFactory::new(
                    Arc::new(CapabilityCache::new()),
                    Arc::new(ProcfsProcessTree::default()),
                )),
                Arc::new(NoDiscovery),
                Arc::new(StaticEnvironmentResolver::new(
                    working_dir,
                    environment.into_iter().collect::<BTreeMap<_, _>>(),
                )),
                settings,
            ));

            let canceller = executor.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });

            let tests: Vec<TestCase> = tests
                .iter()
                .map(|path| TestCase::new(path, &source))
                .collect();
            let ctx = RunContext {
                is_being_debugged: debugging,
                is_data_collection_enabled: data_collection,
            };

            let handle = ConsoleHandle::new();
            executor.run_selected(&tests, ctx, &handle).await;

            let summary = handle.summary();
            tracing::info!(
                passed = summary.passed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Test run finished"
            );
            println!(
                "{} passed, {} failed, {} skipped",
                summary.passed, summary.failed, summary.skipped
            );

            if summary.failed > 0 || summary.passed + summary.failed + summary.skipped < tests.len() {
                Ok(ExitCode::FAILURE)
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
    }
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", value))
}

fn set_panic_hook() {
    panic::set_hook(Box::new(|panic_info| {
        tracing::error!(
            message = "panic occurred",
            panic = %panic_info
        );
    }));
}
